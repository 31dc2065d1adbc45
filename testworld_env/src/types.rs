//! Common types for the testworld provider abstraction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

use crate::error::ProviderError;

/// Unique identifier for a provisioned container.
///
/// Uses UUID v4 for global uniqueness without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub Uuid);

impl ContainerId {
    /// Creates a new random ContainerId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic ContainerId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for ContainerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form, like `docker ps`
        write!(f, "{}", &self.0.simple().to_string()[..12])
    }
}

/// Handle to a container created by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHandle {
    /// Provider-assigned identity
    pub id: ContainerId,

    /// Container name (the member's unique address)
    pub name: String,

    /// Network the container is attached to
    pub network: String,

    /// Name-based discovery aliases on that network
    pub aliases: Vec<String>,
}

/// Handle to a network created by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRef {
    pub id: String,
    pub name: String,
}

/// Options for creating a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkOptions {
    /// Network driver, e.g. `bridge`
    pub driver: String,

    /// Whether containers may be attached after creation
    pub attachable: bool,
}

impl NetworkOptions {
    /// Bridge-mode, attachable network.
    pub fn bridge() -> Self {
        Self {
            driver: "bridge".to_string(),
            attachable: true,
        }
    }
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self::bridge()
    }
}

/// Build an image from a context directory instead of pulling one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildContext {
    /// Build context path or identifier
    pub context: String,

    /// Dockerfile path relative to the context (empty = default)
    pub dockerfile: String,
}

/// A file copied into a container before it starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerFile {
    pub container_path: String,
    pub contents: Vec<u8>,
    pub mode: u32,
}

impl ContainerFile {
    /// Creates a file with mode `0o644`.
    pub fn new(container_path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            container_path: container_path.into(),
            contents: contents.into(),
            mode: 0o644,
        }
    }
}

/// Provider-facing container creation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    /// Container name
    pub name: String,

    /// Image reference, e.g. `alpine:latest`
    pub image: String,

    /// Build context used when `image` is empty
    pub build: Option<BuildContext>,

    /// Network to attach to
    pub network: String,

    /// Aliases registered on `network`
    pub aliases: Vec<String>,

    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub exposed_ports: Vec<String>,

    /// tmpfs mounts (path -> options)
    pub tmpfs: BTreeMap<String, String>,

    pub files: Vec<ContainerFile>,
}

/// Byte stream returned by exec, logs, and file copy.
pub type OutputStream = Pin<Box<dyn AsyncRead + Send>>;

/// Wraps an in-memory buffer as an [`OutputStream`].
pub fn output_from_bytes(bytes: impl Into<Vec<u8>>) -> OutputStream {
    Box::pin(std::io::Cursor::new(bytes.into()))
}

/// Drains an [`OutputStream`] into memory.
pub async fn read_output(mut stream: OutputStream) -> Result<Vec<u8>, ProviderError> {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    Ok(buf)
}

/// Result of running a command inside a container.
pub struct ExecResult {
    pub exit_code: i64,

    /// Combined stdout and stderr
    pub output: OutputStream,
}

impl std::fmt::Debug for ExecResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecResult")
            .field("exit_code", &self.exit_code)
            .finish_non_exhaustive()
    }
}
