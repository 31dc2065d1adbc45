//! Error types for the testworld provider abstraction.

use thiserror::Error;

/// Errors reported by a [`ContainerProvider`](crate::ContainerProvider) or a
/// [`ReadinessProbe`](crate::ReadinessProbe).
///
/// Payloads are plain strings so the error is `Clone`: a provisioning failure
/// is captured once and handed to every reader of the pending result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Container creation failed
    #[error("create failed: {0}")]
    Create(String),

    /// Container start failed
    #[error("start failed: {0}")]
    Start(String),

    /// Command execution failed (not a non-zero exit code)
    #[error("exec failed: {0}")]
    Exec(String),

    /// Reading container logs failed
    #[error("failed to get logs: {0}")]
    Logs(String),

    /// Copying a file out of the container failed
    #[error("copy failed: {0}")]
    CopyFile(String),

    /// Terminating the container failed
    #[error("terminate failed: {0}")]
    Terminate(String),

    /// Network creation or removal failed
    #[error("network error: {0}")]
    Network(String),

    /// The container or network is unknown to the provider
    #[error("not found: {0}")]
    NotFound(String),

    /// Reading an output stream failed
    #[error("stream error: {0}")]
    Stream(String),

    /// Operation timed out
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// The provisioning task ended without publishing a result
    #[error("provisioning of {0} was aborted")]
    Aborted(String),
}

impl ProviderError {
    /// Creates a create error.
    pub fn create(msg: impl Into<String>) -> Self {
        Self::Create(msg.into())
    }

    /// Creates a not-found error.
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }
}

impl From<std::io::Error> for ProviderError {
    fn from(err: std::io::Error) -> Self {
        Self::Stream(err.to_string())
    }
}
