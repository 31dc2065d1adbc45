//! Pending slots - single-assignment results of background provisioning.
//!
//! A provisioning task owns the [`SlotWriter`] and publishes exactly one
//! outcome. Any number of [`PendingSlot`] readers wait for that outcome.
//!
//! Publication goes through a `tokio::sync::watch` channel: the writer
//! stores the result and wakes readers in one step, and a reader only ever
//! sees the value after it has been fully stored. Once resolved, every
//! further `resolve` returns immediately.

use testworld_env::{ContainerHandle, ProviderError};
use tokio::sync::watch;

/// Outcome of one provisioning attempt.
pub type SlotResult = Result<ContainerHandle, ProviderError>;

/// Creates a connected writer/reader pair for the member `name`.
pub fn pending(name: impl Into<String>) -> (SlotWriter, PendingSlot) {
    let (tx, rx) = watch::channel(None);
    (SlotWriter { tx }, PendingSlot { name: name.into(), rx })
}

/// Write half, consumed by [`SlotWriter::publish`].
#[derive(Debug)]
pub struct SlotWriter {
    tx: watch::Sender<Option<SlotResult>>,
}

impl SlotWriter {
    /// Publishes the outcome and wakes every waiting reader.
    pub fn publish(self, result: SlotResult) {
        // Stores the value even if no reader is subscribed yet.
        self.tx.send_replace(Some(result));
    }
}

/// Read half; cloning yields another reader of the same outcome.
#[derive(Debug, Clone)]
pub struct PendingSlot {
    name: String,
    rx: watch::Receiver<Option<SlotResult>>,
}

impl PendingSlot {
    /// Member address this slot provisions.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits for the outcome.
    ///
    /// If the writer was dropped without publishing (the task panicked),
    /// returns [`ProviderError::Aborted`].
    pub async fn resolve(&self) -> SlotResult {
        let mut rx = self.rx.clone();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| Err(ProviderError::Aborted(self.name.clone())))
    }

    /// Returns the outcome if it is already available.
    pub fn try_resolve(&self) -> Option<SlotResult> {
        if let Some(result) = self.rx.borrow().clone() {
            return Some(result);
        }
        if self.rx.has_changed().is_err() {
            return Some(Err(ProviderError::Aborted(self.name.clone())));
        }
        None
    }

    /// Returns true once an outcome (or an abort) is available.
    pub fn is_resolved(&self) -> bool {
        self.try_resolve().is_some()
    }
}
