//! Storage driver contract and the registry of driver constructors.
//!
//! The lifecycle engine talks to backends only through [`StorageDriver`].
//! Drivers translate backend failures into [`StorageError`] kinds here, at
//! the driver boundary.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use camino::Utf8PathBuf;

use crate::config::{DEFAULT_LOCAL_DEVICES_FILE, ServiceConfig, StevedoreConfig};
use crate::error::{Result, StorageError};
use crate::executor::LocalExecutor;
use crate::runner::{CommandRunner, ProcessCommandRunner};
use crate::types::{
    ExecutorOps, InstanceId, NextDeviceInfo, Snapshot, SnapshotCopyRequest, Volume,
    VolumeAttachRequest, VolumeAttachments, VolumeCopyRequest, VolumeCreateRequest,
    VolumeDetachRequest, VolumeSnapshotRequest,
};

mod locks;
pub mod mock;
pub mod rbd;

pub use locks::{IdGuard, IdLocks, LockTable};

/// Capability set implemented once per storage backend.
///
/// Listing and inspect calls return every attachment the backend knows of
/// when `attachments` asks for any; the engine applies the per-caller
/// visibility rules afterwards.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Driver name, for example `mock`.
    fn name(&self) -> &str;

    /// Next-device naming settings for the owning service.
    fn next_device_info(&self) -> NextDeviceInfo;

    /// Executor commands implemented by this driver's executor.
    fn executor_ops(&self) -> ExecutorOps;

    /// Computes the host's identity without an executor round trip.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unsupported`] when the driver relies on the
    /// caller's executor, or a resolution error.
    async fn instance_id(&self) -> Result<InstanceId> {
        Err(StorageError::Unsupported(format!(
            "{} resolves instance IDs through its executor",
            self.name()
        )))
    }

    /// Lists volumes.
    async fn volumes(&self, attachments: VolumeAttachments) -> Result<Vec<Volume>>;

    /// Inspects one volume.
    async fn volume_inspect(&self, id: &str, attachments: VolumeAttachments) -> Result<Volume>;

    /// Creates a volume. The backend assigns the final ID.
    async fn volume_create(&self, request: &VolumeCreateRequest) -> Result<Volume>;

    /// Creates a volume from a snapshot.
    async fn volume_create_from_snapshot(
        &self,
        _snapshot_id: &str,
        _request: &VolumeCreateRequest,
    ) -> Result<Volume> {
        Err(StorageError::Unsupported(format!(
            "{} cannot create volumes from snapshots",
            self.name()
        )))
    }

    /// Clones a volume.
    async fn volume_copy(&self, _id: &str, _request: &VolumeCopyRequest) -> Result<Volume> {
        Err(StorageError::Unsupported(format!(
            "{} cannot copy volumes",
            self.name()
        )))
    }

    /// Snapshots a volume.
    async fn volume_snapshot(
        &self,
        _id: &str,
        _request: &VolumeSnapshotRequest,
    ) -> Result<Snapshot> {
        Err(StorageError::Unsupported(format!(
            "{} cannot snapshot volumes",
            self.name()
        )))
    }

    /// Removes a volume. A second removal of the same ID is `NotFound`.
    async fn volume_remove(&self, id: &str, force: bool) -> Result<()>;

    /// Attaches a volume to `instance`.
    async fn volume_attach(
        &self,
        id: &str,
        instance: &InstanceId,
        request: &VolumeAttachRequest,
    ) -> Result<Volume>;

    /// Detaches a volume from `instance`, or from every instance when the
    /// request is forced. Detaching an unattached volume succeeds.
    async fn volume_detach(
        &self,
        id: &str,
        instance: &InstanceId,
        request: &VolumeDetachRequest,
    ) -> Result<Volume>;

    /// Lists snapshots.
    async fn snapshots(&self) -> Result<Vec<Snapshot>>;

    /// Inspects one snapshot.
    async fn snapshot_inspect(&self, id: &str) -> Result<Snapshot>;

    /// Copies a snapshot.
    async fn snapshot_copy(
        &self,
        _id: &str,
        _request: &SnapshotCopyRequest,
    ) -> Result<Snapshot> {
        Err(StorageError::Unsupported(format!(
            "{} cannot copy snapshots",
            self.name()
        )))
    }

    /// Removes a snapshot.
    async fn snapshot_remove(&self, id: &str) -> Result<()>;
}

/// Shared collaborators handed to driver constructors.
#[derive(Clone)]
pub struct DriverDeps {
    /// Runner used for every backend CLI call.
    pub runner: Arc<dyn CommandRunner>,
    /// Mount table consulted by executors.
    pub local_devices_file: Utf8PathBuf,
}

impl fmt::Debug for DriverDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverDeps")
            .field("local_devices_file", &self.local_devices_file)
            .finish_non_exhaustive()
    }
}

impl DriverDeps {
    /// Dependencies backed by real processes.
    #[must_use]
    pub fn from_config(config: &StevedoreConfig) -> Self {
        Self {
            runner: Arc::new(ProcessCommandRunner),
            local_devices_file: Utf8PathBuf::from(&config.local_devices_file),
        }
    }

    /// Dependencies using `runner` and the default mount table.
    #[must_use]
    pub fn with_runner(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            local_devices_file: Utf8PathBuf::from(DEFAULT_LOCAL_DEVICES_FILE),
        }
    }
}

/// Builds a driver instance for one service.
pub type DriverConstructor = fn(&ServiceConfig, &DriverDeps) -> Result<Arc<dyn StorageDriver>>;

/// Builds the host-side executor for one service.
pub type ExecutorConstructor = fn(&ServiceConfig, &DriverDeps) -> Result<Box<dyn LocalExecutor>>;

/// Constructors registered under one driver name.
#[derive(Clone, Copy, Debug)]
pub struct DriverRegistration {
    /// Driver name services refer to.
    pub name: &'static str,
    /// Server-side driver constructor.
    pub driver: DriverConstructor,
    /// Host-side executor constructor.
    pub executor: ExecutorConstructor,
}

/// Explicit table of known drivers, built once at process start.
#[derive(Clone, Debug, Default)]
pub struct DriverRegistry {
    entries: Vec<DriverRegistration>,
}

impl DriverRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the drivers shipped with this crate.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            entries: vec![mock::registration(), rbd::registration()],
        }
    }

    /// Adds a driver.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] when the name is already taken.
    pub fn register(&mut self, registration: DriverRegistration) -> Result<()> {
        if self.lookup(registration.name).is_ok() {
            return Err(StorageError::Config(format!(
                "driver {} is registered twice",
                registration.name
            )));
        }
        self.entries.push(registration);
        Ok(())
    }

    /// Names of every registered driver in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|entry| entry.name).collect()
    }

    fn lookup(&self, name: &str) -> Result<&DriverRegistration> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .ok_or_else(|| StorageError::Config(format!("unknown driver {name:?}")))
    }

    /// Constructs the driver for `service`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] for unknown drivers or options the
    /// driver rejects.
    pub fn create_driver(&self, service: &ServiceConfig, deps: &DriverDeps) -> Result<Arc<dyn StorageDriver>> {
        (self.lookup(&service.driver)?.driver)(service, deps)
    }

    /// Constructs the executor for `service`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] for unknown drivers or options the
    /// executor rejects.
    pub fn create_executor(&self, service: &ServiceConfig, deps: &DriverDeps) -> Result<Box<dyn LocalExecutor>> {
        (self.lookup(&service.driver)?.executor)(service, deps)
    }
}

#[cfg(test)]
mod tests;
