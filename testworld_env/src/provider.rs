//! Container provider abstraction.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::ProviderError;
use crate::types::{
    ContainerHandle, CreateRequest, ExecResult, NetworkOptions, NetworkRef, OutputStream,
};

/// Backend that owns the actual sandboxes and networks.
///
/// # Implementations
///
/// - **Docker**: wraps a container engine API (not part of this workspace)
/// - **Simulation**: `testworld::sim::SimProvider`, in-memory with fault injection
///
/// # Lifecycle
///
/// ```text
/// create_network
///     |
///     +-- create(request) --> start --> exec / logs / copy_file_out --> terminate
///     |
/// cleanup_network
/// ```
///
/// Every method may be called concurrently from several provisioning tasks.
#[async_trait]
pub trait ContainerProvider: Send + Sync + 'static {
    /// Creates a network that containers can join by name.
    async fn create_network(&self, options: &NetworkOptions) -> Result<NetworkRef, ProviderError>;

    /// Removes a network created by [`create_network`](Self::create_network).
    async fn cleanup_network(&self, network: &NetworkRef) -> Result<(), ProviderError>;

    /// Creates (but does not start) a container.
    ///
    /// The container is attached to `request.network` and registered under
    /// every name in `request.aliases`.
    async fn create(&self, request: &CreateRequest) -> Result<ContainerHandle, ProviderError>;

    /// Starts a created container.
    async fn start(&self, handle: &ContainerHandle) -> Result<(), ProviderError>;

    /// Runs a command to completion.
    ///
    /// # Returns
    /// * `Ok(ExecResult)` - The command ran; any exit code
    /// * `Err(ProviderError::Exec)` - The command could not be run at all
    async fn exec(&self, handle: &ContainerHandle, cmd: &[String]) -> Result<ExecResult, ProviderError>;

    /// Returns the container's log output so far.
    async fn logs(&self, handle: &ContainerHandle) -> Result<OutputStream, ProviderError>;

    /// Streams the content of a file inside the container.
    async fn copy_file_out(&self, handle: &ContainerHandle, path: &str) -> Result<OutputStream, ProviderError>;

    /// Stops and removes the container.
    ///
    /// The stop request escalates to a forced kill once `grace_period` has
    /// elapsed.
    async fn terminate(&self, handle: &ContainerHandle, grace_period: Duration) -> Result<(), ProviderError>;
}
