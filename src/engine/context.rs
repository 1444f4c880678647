//! Per-request facts supplied by the caller.

use std::collections::BTreeMap;
use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{Result, StorageError};
use crate::types::{InstanceId, LocalDevices};

/// Caller identity, local device maps and cancellation for one request.
///
/// Instance IDs and device maps are keyed by driver name because one
/// caller talks to several drivers through one request.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    instance_ids: BTreeMap<String, InstanceId>,
    local_devices: BTreeMap<String, LocalDevices>,
    cancel: CancellationToken,
}

impl RequestContext {
    /// A context with no caller facts and a fresh cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the caller's instance ID for its driver.
    #[must_use]
    pub fn with_instance_id(mut self, instance_id: InstanceId) -> Self {
        self.instance_ids
            .insert(instance_id.driver.clone(), instance_id);
        self
    }

    /// Records the caller's local device map for its driver.
    #[must_use]
    pub fn with_local_devices(mut self, devices: LocalDevices) -> Self {
        self.local_devices.insert(devices.driver.clone(), devices);
        self
    }

    /// Uses `token` to observe cancellation.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The caller's instance ID for `driver`, if supplied.
    #[must_use]
    pub fn instance_id(&self, driver: &str) -> Option<&InstanceId> {
        self.instance_ids.get(driver)
    }

    /// The caller's device map for `driver`, if supplied.
    #[must_use]
    pub fn local_devices(&self, driver: &str) -> Option<&LocalDevices> {
        self.local_devices.get(driver)
    }

    /// Token observed by every operation run with this context.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fails with [`StorageError::Cancelled`] once the caller has given up.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Cancelled`] after cancellation.
    pub fn ensure_live(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        Ok(())
    }

    /// Runs a read, abandoning it as soon as the caller cancels.
    pub(crate) async fn read<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        self.ensure_live()?;
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(StorageError::Cancelled),
            result = operation => result,
        }
    }

    /// Runs a mutation. Cancellation is honoured only before the backend
    /// call starts; a started mutation runs to completion.
    pub(crate) async fn mutate<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        self.ensure_live()?;
        operation.await
    }
}
