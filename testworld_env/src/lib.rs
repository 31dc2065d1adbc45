//! testworld environment abstraction layer
//!
//! This crate defines the collaborators the testworld harness drives but does
//! not implement itself:
//! - **Provisioning**: [`ContainerProvider`] creates, starts, execs into and
//!   terminates sandboxed containers, and manages the shared network
//! - **Readiness**: [`ReadinessProbe`] blocks until a container is usable
//! - **Scheduling**: [`TaskSpawner`] runs provisioning work in the background
//!
//! # Example
//!
//! ```ignore
//! use testworld_env::{ContainerProvider, ExecProbe, await_ready};
//!
//! async fn boot(provider: &dyn ContainerProvider, request: &CreateRequest) -> Result<(), ProviderError> {
//!     let handle = provider.create(request).await?;
//!     provider.start(&handle).await?;
//!     await_ready(&ExecProbe::new(["true"]), provider, &handle).await
//! }
//! ```

mod error;
mod probe;
mod provider;
mod spawn;
mod tokio_impl;
mod types;

pub use error::ProviderError;
pub use probe::{await_ready, ExecProbe, ReadinessProbe, DEFAULT_STARTUP_TIMEOUT};
pub use provider::ContainerProvider;
pub use spawn::{BoxFuture, TaskSpawner};
pub use tokio_impl::TokioSpawner;
pub use types::{
    output_from_bytes, read_output, BuildContext, ContainerFile, ContainerHandle, ContainerId,
    CreateRequest, ExecResult, NetworkOptions, NetworkRef, OutputStream,
};
