//! Readiness probes.
//!
//! A probe blocks until a container satisfies some condition. The condition
//! language (HTTP checks, log patterns, ...) belongs to the probe
//! implementation; the harness only relies on [`await_ready`] returning once
//! the container is usable or the probe's startup timeout has elapsed.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::error::ProviderError;
use crate::provider::ContainerProvider;
use crate::types::{read_output, ContainerHandle};

/// Default time a probe may take before it is considered failed.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Condition a container has to meet before tests may use it.
#[async_trait]
pub trait ReadinessProbe: Send + Sync + 'static {
    /// Upper bound for [`wait_until_ready`](Self::wait_until_ready).
    fn startup_timeout(&self) -> Duration {
        DEFAULT_STARTUP_TIMEOUT
    }

    /// Returns once the container is ready.
    ///
    /// Implementations may loop forever; [`await_ready`] applies the timeout.
    async fn wait_until_ready(
        &self,
        provider: &dyn ContainerProvider,
        handle: &ContainerHandle,
    ) -> Result<(), ProviderError>;
}

/// Runs `probe` against `handle`, bounded by the probe's startup timeout.
pub async fn await_ready(
    probe: &dyn ReadinessProbe,
    provider: &dyn ContainerProvider,
    handle: &ContainerHandle,
) -> Result<(), ProviderError> {
    let timeout = probe.startup_timeout();
    match tokio::time::timeout(timeout, probe.wait_until_ready(provider, handle)).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(timeout.as_millis() as u64)),
    }
}

/// Polls a command until it exits with code 0.
#[derive(Debug, Clone)]
pub struct ExecProbe {
    cmd: Vec<String>,
    poll_interval: Duration,
    startup_timeout: Duration,
}

impl ExecProbe {
    /// Creates a probe for `cmd`.
    pub fn new<I, S>(cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            poll_interval: Duration::from_millis(100),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }

    /// Sets the startup timeout.
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Sets the delay between attempts.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[async_trait]
impl ReadinessProbe for ExecProbe {
    fn startup_timeout(&self) -> Duration {
        self.startup_timeout
    }

    async fn wait_until_ready(
        &self,
        provider: &dyn ContainerProvider,
        handle: &ContainerHandle,
    ) -> Result<(), ProviderError> {
        loop {
            let result = provider.exec(handle, &self.cmd).await?;
            // Drain so the provider can release the stream.
            let _ = read_output(result.output).await;
            if result.exit_code == 0 {
                return Ok(());
            }
            debug!(
                "{}: {:?} exited with {}, retrying",
                handle.name, self.cmd, result.exit_code
            );
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        output_from_bytes, ContainerId, CreateRequest, ExecResult, NetworkOptions, NetworkRef,
        OutputStream,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Exec succeeds once `ready_after` calls have been made.
    struct CountingProvider {
        calls: AtomicUsize,
        ready_after: usize,
    }

    #[async_trait]
    impl ContainerProvider for CountingProvider {
        async fn create_network(&self, _: &NetworkOptions) -> Result<NetworkRef, ProviderError> {
            unimplemented!()
        }
        async fn cleanup_network(&self, _: &NetworkRef) -> Result<(), ProviderError> {
            unimplemented!()
        }
        async fn create(&self, _: &CreateRequest) -> Result<ContainerHandle, ProviderError> {
            unimplemented!()
        }
        async fn start(&self, _: &ContainerHandle) -> Result<(), ProviderError> {
            unimplemented!()
        }
        async fn exec(&self, _: &ContainerHandle, _: &[String]) -> Result<ExecResult, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(ExecResult {
                exit_code: if n >= self.ready_after { 0 } else { 1 },
                output: output_from_bytes(Vec::new()),
            })
        }
        async fn logs(&self, _: &ContainerHandle) -> Result<OutputStream, ProviderError> {
            unimplemented!()
        }
        async fn copy_file_out(&self, _: &ContainerHandle, _: &str) -> Result<OutputStream, ProviderError> {
            unimplemented!()
        }
        async fn terminate(&self, _: &ContainerHandle, _: Duration) -> Result<(), ProviderError> {
            unimplemented!()
        }
    }

    fn handle() -> ContainerHandle {
        ContainerHandle {
            id: ContainerId::from_seed(1),
            name: "probe-target".to_string(),
            network: "net".to_string(),
            aliases: vec!["probe-target".to_string()],
        }
    }

    #[tokio::test]
    async fn test_exec_probe_retries_until_success() {
        let provider = CountingProvider {
            calls: AtomicUsize::new(0),
            ready_after: 3,
        };
        let probe = ExecProbe::new(["true"]).with_poll_interval(Duration::from_millis(1));

        await_ready(&probe, &provider, &handle()).await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exec_probe_times_out() {
        let provider = CountingProvider {
            calls: AtomicUsize::new(0),
            ready_after: usize::MAX,
        };
        let probe = ExecProbe::new(["false"])
            .with_poll_interval(Duration::from_millis(5))
            .with_startup_timeout(Duration::from_millis(50));

        let err = await_ready(&probe, &provider, &handle()).await.unwrap_err();
        assert_eq!(err, ProviderError::Timeout(50));
    }
}
