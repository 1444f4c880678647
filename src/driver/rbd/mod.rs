//! Ceph RBD driver built on the `rbd` command-line tool.
//!
//! Volume IDs take the form `pool.image` and snapshot IDs
//! `pool.image@snapshot`. Attachments are derived from the watchers `rbd
//! status` reports, keyed by watcher address, which is also the instance ID
//! the executor resolves for each host. Images are single-attach.

use std::ffi::OsString;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{DriverDeps, DriverRegistration, IdLocks, StorageDriver};
use crate::config::{NextDeviceOverrides, ServiceConfig};
use crate::error::{Result, StorageError};
use crate::executor::LocalExecutor;
use crate::runner::{CommandOutput, CommandRunner};
use crate::types::{
    Attachment, ExecutorOps, InstanceId, NextDeviceInfo, Snapshot, Volume, VolumeAttachRequest,
    VolumeAttachments, VolumeCopyRequest, VolumeCreateRequest, VolumeDetachRequest,
    VolumeSnapshotRequest,
};

mod executor;
mod identity;
mod types;

pub use executor::RbdExecutor;
pub use identity::HostIdentity;

use types::{ImageInfo, ImageRow, ImageStatus, MappedDevice, ShowMapped, SnapRow};

/// Driver name.
pub const NAME: &str = "rbd";

/// Pool used when neither the request nor the service names one.
pub const DEFAULT_POOL: &str = "rbd";

/// Default `rbd` binary.
pub const DEFAULT_RBD_BIN: &str = "rbd";

/// Default `ip` binary.
pub const DEFAULT_IP_BIN: &str = "ip";

/// Binary consulted for `mon_host` when no monitors are configured.
pub const DEFAULT_CEPH_CONF_BIN: &str = "ceph-conf";

/// Size of images created without an explicit size, in GiB.
const DEFAULT_SIZE_GIB: i64 = 1;

const MIB_PER_GIB: i64 = 1024;

/// Registration for [`crate::driver::DriverRegistry`].
#[must_use]
pub fn registration() -> DriverRegistration {
    DriverRegistration {
        name: NAME,
        driver: build_driver,
        executor: build_executor,
    }
}

fn build_driver(service: &ServiceConfig, deps: &DriverDeps) -> Result<Arc<dyn StorageDriver>> {
    Ok(Arc::new(RbdDriver::new(service, deps)?))
}

fn build_executor(service: &ServiceConfig, deps: &DriverDeps) -> Result<Box<dyn LocalExecutor>> {
    Ok(Box::new(RbdExecutor::new(service, deps)))
}

/// Base next-device settings: the kernel names `/dev/rbdN` itself.
#[must_use]
pub fn default_next_device() -> NextDeviceInfo {
    NextDeviceInfo {
        ignore: true,
        prefix: String::from("rbd"),
        pattern: String::from(r"\d"),
    }
}

/// Failures raised while driving the `rbd` tool.
#[derive(Debug, Error)]
pub enum RbdError {
    /// Raised when `rbd` exits unsuccessfully.
    #[error("{program} {command} failed with status {status_text}: {stderr}")]
    CommandFailure {
        /// Binary that was run.
        program: String,
        /// Subcommand and arguments, space separated.
        command: String,
        /// Exit code as text, or `unknown`.
        status_text: String,
        /// Trimmed diagnostics.
        stderr: String,
        /// Resource family the command addressed.
        resource: &'static str,
        /// Identifier the command addressed.
        id: String,
    },
    /// Raised when `rbd` prints JSON the driver cannot read.
    #[error("failed to parse rbd {resource} output: {message}")]
    Parse {
        /// Resource family being parsed.
        resource: &'static str,
        /// Parser diagnostics.
        message: String,
    },
    /// Raised for identifiers outside the `pool.image[@snapshot]` form.
    #[error("invalid rbd {resource} ID {id:?}")]
    InvalidId {
        /// Resource family of the identifier.
        resource: &'static str,
        /// Offending identifier.
        id: String,
    },
}

impl From<RbdError> for StorageError {
    fn from(value: RbdError) -> Self {
        match value {
            RbdError::CommandFailure {
                ref stderr,
                resource,
                ref id,
                ..
            } => {
                if stderr.contains("No such file or directory") || stderr.contains("(2)") {
                    Self::not_found(resource, id.clone())
                } else if stderr.contains("File exists")
                    || stderr.contains("(17)")
                    || stderr.contains("Device or resource busy")
                    || stderr.contains("(16)")
                {
                    Self::Conflict(value.to_string())
                } else {
                    Self::Transport(value.to_string())
                }
            }
            RbdError::Parse { .. } => Self::Transport(value.to_string()),
            RbdError::InvalidId { .. } => Self::Validation(value.to_string()),
        }
    }
}

/// An image addressed as `pool/image` by the tool and `pool.image` by
/// callers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageSpec {
    /// Pool holding the image.
    pub pool: String,
    /// Image name within the pool.
    pub image: String,
}

impl ImageSpec {
    /// Parses a `pool.image` volume ID.
    ///
    /// # Errors
    ///
    /// Returns [`RbdError::InvalidId`] when either part is missing.
    pub fn parse_id(id: &str) -> Result<Self, RbdError> {
        match id.split_once('.') {
            Some((pool, image)) if !pool.is_empty() && !image.is_empty() => Ok(Self {
                pool: pool.to_owned(),
                image: image.to_owned(),
            }),
            _ => Err(RbdError::InvalidId {
                resource: "volume",
                id: id.to_owned(),
            }),
        }
    }

    /// Splits a create name into pool and image, using `default_pool`
    /// when the name carries no pool.
    #[must_use]
    pub fn from_name(name: &str, default_pool: &str) -> Self {
        match name.split_once('.') {
            Some((pool, image)) if !pool.is_empty() && !image.is_empty() => Self {
                pool: pool.to_owned(),
                image: image.to_owned(),
            },
            _ => Self {
                pool: default_pool.to_owned(),
                image: name.to_owned(),
            },
        }
    }

    /// The caller-facing volume ID.
    #[must_use]
    pub fn id(&self) -> String {
        format!("{}.{}", self.pool, self.image)
    }

    /// The `pool/image` form the tool expects.
    #[must_use]
    pub fn spec(&self) -> String {
        format!("{}/{}", self.pool, self.image)
    }
}

/// A snapshot addressed as `pool.image@name`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SnapSpec {
    /// Image the snapshot belongs to.
    pub image: ImageSpec,
    /// Snapshot name.
    pub name: String,
}

impl SnapSpec {
    /// Parses a `pool.image@name` snapshot ID.
    ///
    /// # Errors
    ///
    /// Returns [`RbdError::InvalidId`] when any part is missing.
    pub fn parse_id(id: &str) -> Result<Self, RbdError> {
        let invalid = || RbdError::InvalidId {
            resource: "snapshot",
            id: id.to_owned(),
        };
        let (volume, name) = id.split_once('@').ok_or_else(invalid)?;
        if name.is_empty() {
            return Err(invalid());
        }
        let image = ImageSpec::parse_id(volume).map_err(|_| invalid())?;
        Ok(Self {
            image,
            name: name.to_owned(),
        })
    }

    /// The caller-facing snapshot ID.
    #[must_use]
    pub fn id(&self) -> String {
        format!("{}@{}", self.image.id(), self.name)
    }

    /// The `pool/image@name` form the tool expects.
    #[must_use]
    pub fn spec(&self) -> String {
        format!("{}@{}", self.image.spec(), self.name)
    }
}

fn gib(bytes: u64) -> i64 {
    i64::try_from(bytes >> 30).unwrap_or(i64::MAX)
}

/// Thin async front end over the `rbd` binary.
#[derive(Clone)]
pub(crate) struct RbdCli {
    runner: Arc<dyn CommandRunner>,
    program: String,
    timeout: Duration,
}

impl fmt::Debug for RbdCli {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RbdCli")
            .field("program", &self.program)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RbdCli {
    #[must_use]
    pub(crate) fn new(service: &ServiceConfig, deps: &DriverDeps) -> Self {
        Self {
            runner: Arc::clone(&deps.runner),
            program: service
                .rbd_bin
                .clone()
                .unwrap_or_else(|| DEFAULT_RBD_BIN.to_owned()),
            timeout: service.command_timeout(),
        }
    }

    fn check_output(
        &self,
        output: CommandOutput,
        args: &[&str],
        resource: &'static str,
        id: &str,
    ) -> Result<String, RbdError> {
        if output.is_success() {
            return Ok(output.stdout);
        }
        let status_text = output
            .code
            .map_or_else(|| String::from("unknown"), |code| code.to_string());
        Err(RbdError::CommandFailure {
            program: self.program.clone(),
            command: args.join(" "),
            status_text,
            stderr: output.diagnostics().to_owned(),
            resource,
            id: id.to_owned(),
        })
    }

    /// Runs one subcommand and returns its stdout.
    async fn run(&self, args: &[&str], resource: &'static str, id: &str) -> Result<String> {
        let argv: Vec<OsString> = args.iter().map(OsString::from).collect();
        let output = self.runner.run(&self.program, &argv, self.timeout).await?;
        Ok(self.check_output(output, args, resource, id)?)
    }

    /// Runs one subcommand in JSON mode and decodes its reply.
    async fn json<T: DeserializeOwned>(
        &self,
        args: &[&str],
        resource: &'static str,
        id: &str,
    ) -> Result<T> {
        let mut full: Vec<&str> = args.to_vec();
        full.extend(["--format", "json"]);
        let stdout = self.run(&full, resource, id).await?;
        serde_json::from_str(&stdout).map_err(|err| {
            StorageError::from(RbdError::Parse {
                resource,
                message: err.to_string(),
            })
        })
    }

    /// Images mapped on this host.
    pub(crate) async fn mapped(&self) -> Result<Vec<MappedDevice>> {
        let stdout = self
            .run(&["showmapped", "--format", "json"], "mapping", "local")
            .await?;
        if stdout.trim().is_empty() {
            return Ok(Vec::new());
        }
        let reply: ShowMapped = serde_json::from_str(&stdout).map_err(|err| {
            StorageError::from(RbdError::Parse {
                resource: "mapping",
                message: err.to_string(),
            })
        })?;
        Ok(reply.into_devices())
    }
}

fn mapped_device<'a>(mapped: &'a [MappedDevice], spec: &ImageSpec) -> Option<&'a str> {
    mapped
        .iter()
        .find(|dev| dev.pool == spec.pool && dev.name == spec.image)
        .map(|dev| dev.device.as_str())
}

/// The RBD driver for one service.
#[derive(Debug)]
pub struct RbdDriver {
    cli: RbdCli,
    identity: HostIdentity,
    local: OnceCell<InstanceId>,
    default_pool: String,
    pools: Vec<String>,
    next_device: NextDeviceOverrides,
    locks: IdLocks,
}

impl RbdDriver {
    /// Creates a driver from a service's options.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] when a pool name is blank.
    pub fn new(service: &ServiceConfig, deps: &DriverDeps) -> Result<Self> {
        let default_pool = service
            .default_pool
            .clone()
            .unwrap_or_else(|| DEFAULT_POOL.to_owned());
        if default_pool.trim().is_empty() || service.pools.iter().any(|p| p.trim().is_empty()) {
            return Err(StorageError::Config(format!(
                "service {} declares a blank rbd pool",
                service.name
            )));
        }
        Ok(Self {
            cli: RbdCli::new(service, deps),
            identity: HostIdentity::new(service, deps),
            local: OnceCell::new(),
            default_pool,
            pools: service.pools.clone(),
            next_device: service.next_device.clone(),
            locks: IdLocks::new(),
        })
    }

    fn listed_pools(&self) -> Vec<&str> {
        if self.pools.is_empty() {
            vec![self.default_pool.as_str()]
        } else {
            self.pools.iter().map(String::as_str).collect()
        }
    }

    async fn local_instance(&self) -> Result<&InstanceId> {
        self.local.get_or_try_init(|| self.identity.resolve()).await
    }

    fn volume(spec: &ImageSpec, size: u64) -> Volume {
        Volume {
            id: spec.id(),
            name: spec.image.clone(),
            size: gib(size),
            volume_type: spec.pool.clone(),
            ..Volume::default()
        }
    }

    async fn info(&self, spec: &ImageSpec) -> Result<ImageInfo> {
        self.cli
            .json(&["info", &spec.spec()], "volume", &spec.id())
            .await
    }

    async fn status(&self, spec: &ImageSpec) -> Result<ImageStatus> {
        self.cli
            .json(&["status", &spec.spec()], "volume", &spec.id())
            .await
    }

    /// Attachments from watchers. The local mapping, if any, names the
    /// device of this host's attachment.
    async fn attachments(&self, spec: &ImageSpec, mapped: &[MappedDevice]) -> Result<Vec<Attachment>> {
        let status = self.status(spec).await?;
        let local_device = mapped_device(mapped, spec);
        let local = match local_device {
            Some(_) if !status.watchers.is_empty() => Some(self.local_instance().await?),
            _ => None,
        };
        Ok(status
            .watchers
            .iter()
            .map(|watcher| {
                let instance_id = InstanceId::new(watcher.host(), NAME);
                let device_name = match (local, local_device) {
                    (Some(iid), Some(device)) if *iid == instance_id => device.to_owned(),
                    _ => String::new(),
                };
                Attachment {
                    volume_id: spec.id(),
                    instance_id,
                    device_name,
                    mount_point: String::new(),
                }
            })
            .collect())
    }

    async fn inspect_spec(&self, spec: &ImageSpec, attachments: VolumeAttachments) -> Result<Volume> {
        let info = self.info(spec).await?;
        let mut volume = Self::volume(spec, info.size);
        if attachments.wants_attachments() {
            let mapped = self.cli.mapped().await?;
            volume.attachments = self.attachments(spec, &mapped).await?;
        }
        Ok(volume)
    }

    async fn unmap(&self, device: &str, spec: &ImageSpec) -> Result<()> {
        self.cli.run(&["unmap", device], "volume", &spec.id()).await?;
        info!(volume_id = %spec.id(), device, "rbd image unmapped");
        Ok(())
    }
}

#[async_trait]
impl StorageDriver for RbdDriver {
    fn name(&self) -> &str {
        NAME
    }

    fn next_device_info(&self) -> NextDeviceInfo {
        self.next_device.apply(default_next_device())
    }

    fn executor_ops(&self) -> ExecutorOps {
        ExecutorOps::INSTANCE_ID | ExecutorOps::LOCAL_DEVICES
    }

    async fn instance_id(&self) -> Result<InstanceId> {
        self.local_instance().await.cloned()
    }

    async fn volumes(&self, attachments: VolumeAttachments) -> Result<Vec<Volume>> {
        let mapped = if attachments.wants_attachments() {
            self.cli.mapped().await?
        } else {
            Vec::new()
        };
        let mut volumes = Vec::new();
        for pool in self.listed_pools() {
            let rows: Vec<ImageRow> = self
                .cli
                .json(&["ls", "-l", "--pool", pool], "pool", pool)
                .await?;
            for row in rows.into_iter().filter(|row| row.snapshot.is_none()) {
                let spec = ImageSpec {
                    pool: pool.to_owned(),
                    image: row.image,
                };
                let mut volume = Self::volume(&spec, row.size);
                if attachments.wants_attachments() {
                    volume.attachments = self.attachments(&spec, &mapped).await?;
                }
                volumes.push(volume);
            }
        }
        Ok(volumes)
    }

    async fn volume_inspect(&self, id: &str, attachments: VolumeAttachments) -> Result<Volume> {
        let spec = ImageSpec::parse_id(id)?;
        self.inspect_spec(&spec, attachments).await
    }

    async fn volume_create(&self, request: &VolumeCreateRequest) -> Result<Volume> {
        let spec = ImageSpec::from_name(&request.name, &self.default_pool);
        let _guard = self.locks.lock(&spec.id()).await;
        let size_gib = request
            .size
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_SIZE_GIB);
        let size_mib = size_gib.saturating_mul(MIB_PER_GIB).to_string();
        self.cli
            .run(&["create", "--size", &size_mib, &spec.spec()], "volume", &spec.id())
            .await?;
        info!(volume_id = %spec.id(), size_gib, "rbd image created");
        let mut volume = self.inspect_spec(&spec, VolumeAttachments::None).await?;
        volume.opts = request.opts.clone();
        Ok(volume)
    }

    async fn volume_copy(&self, id: &str, request: &VolumeCopyRequest) -> Result<Volume> {
        let source = ImageSpec::parse_id(id)?;
        let dest = ImageSpec::from_name(&request.volume_name, &source.pool);
        let _guard = self.locks.lock(&dest.id()).await;
        self.cli
            .run(&["cp", &source.spec(), &dest.spec()], "volume", id)
            .await?;
        info!(source = %source.id(), volume_id = %dest.id(), "rbd image copied");
        let mut volume = self.inspect_spec(&dest, VolumeAttachments::None).await?;
        volume.opts = request.opts.clone();
        Ok(volume)
    }

    async fn volume_snapshot(&self, id: &str, request: &VolumeSnapshotRequest) -> Result<Snapshot> {
        let image = ImageSpec::parse_id(id)?;
        let _guard = self.locks.lock(id).await;
        let info = self.info(&image).await?;
        let snap = SnapSpec {
            image,
            name: request.snapshot_name.clone(),
        };
        self.cli
            .run(&["snap", "create", &snap.spec()], "snapshot", &snap.id())
            .await?;
        info!(snapshot_id = %snap.id(), "rbd snapshot created");
        Ok(Snapshot {
            id: snap.id(),
            name: snap.name.clone(),
            volume_id: snap.image.id(),
            volume_size: gib(info.size),
            opts: request.opts.clone(),
        })
    }

    async fn volume_remove(&self, id: &str, force: bool) -> Result<()> {
        let spec = ImageSpec::parse_id(id)?;
        let _guard = self.locks.lock(id).await;
        if force {
            let mapped = self.cli.mapped().await?;
            if let Some(device) = mapped_device(&mapped, &spec) {
                self.unmap(device, &spec).await?;
            }
        }
        self.cli.run(&["rm", &spec.spec()], "volume", id).await?;
        info!(volume_id = id, "rbd image removed");
        Ok(())
    }

    async fn volume_attach(
        &self,
        id: &str,
        instance: &InstanceId,
        request: &VolumeAttachRequest,
    ) -> Result<Volume> {
        let spec = ImageSpec::parse_id(id)?;
        let _guard = self.locks.lock(id).await;
        let info = self.info(&spec).await?;
        let status = self.status(&spec).await?;
        if let Some(other) = status
            .watchers
            .iter()
            .find(|watcher| watcher.host() != instance.id)
        {
            return Err(StorageError::Conflict(format!(
                "volume {id} is attached to {}",
                other.host()
            )));
        }
        if !status.watchers.is_empty() {
            if !request.force {
                return Err(StorageError::Conflict(format!(
                    "volume {id} is already attached to {instance}"
                )));
            }
            let mapped = self.cli.mapped().await?;
            if let Some(device) = mapped_device(&mapped, &spec) {
                self.unmap(device, &spec).await?;
            }
        }
        let stdout = self.cli.run(&["map", &spec.spec()], "volume", id).await?;
        let device_name = stdout.trim().to_owned();
        info!(volume_id = id, device = %device_name, %instance, "rbd image mapped");
        let mut volume = Self::volume(&spec, info.size);
        volume.attachments.push(Attachment {
            volume_id: spec.id(),
            instance_id: instance.clone(),
            device_name,
            mount_point: String::new(),
        });
        Ok(volume)
    }

    async fn volume_detach(
        &self,
        id: &str,
        instance: &InstanceId,
        request: &VolumeDetachRequest,
    ) -> Result<Volume> {
        let spec = ImageSpec::parse_id(id)?;
        let _guard = self.locks.lock(id).await;
        let info = self.info(&spec).await?;
        let mapped = self.cli.mapped().await?;
        let device = mapped_device(&mapped, &spec);
        if device.is_none() {
            debug!(volume_id = id, "rbd image is not mapped locally");
        }
        if let Some(local_device) = device {
            if request.force || self.local_instance().await? == instance {
                self.unmap(local_device, &spec).await?;
            }
        }
        Ok(Self::volume(&spec, info.size))
    }

    async fn snapshots(&self) -> Result<Vec<Snapshot>> {
        let mut snapshots = Vec::new();
        for pool in self.listed_pools() {
            let rows: Vec<ImageRow> = self
                .cli
                .json(&["ls", "-l", "--pool", pool], "pool", pool)
                .await?;
            for row in rows {
                let Some(name) = row.snapshot else { continue };
                let snap = SnapSpec {
                    image: ImageSpec {
                        pool: pool.to_owned(),
                        image: row.image,
                    },
                    name,
                };
                snapshots.push(Snapshot {
                    id: snap.id(),
                    volume_id: snap.image.id(),
                    volume_size: gib(row.size),
                    name: snap.name,
                    ..Snapshot::default()
                });
            }
        }
        Ok(snapshots)
    }

    async fn snapshot_inspect(&self, id: &str) -> Result<Snapshot> {
        let snap = SnapSpec::parse_id(id)?;
        let rows: Vec<SnapRow> = self
            .cli
            .json(&["snap", "ls", &snap.image.spec()], "snapshot", id)
            .await?;
        let row = rows
            .into_iter()
            .find(|row| row.name == snap.name)
            .ok_or_else(|| StorageError::not_found("snapshot", id))?;
        Ok(Snapshot {
            id: snap.id(),
            name: row.name,
            volume_id: snap.image.id(),
            volume_size: gib(row.size),
            ..Snapshot::default()
        })
    }

    async fn snapshot_remove(&self, id: &str) -> Result<()> {
        let snap = SnapSpec::parse_id(id)?;
        let _guard = self.locks.lock(id).await;
        self.cli
            .run(&["snap", "rm", &snap.spec()], "snapshot", id)
            .await?;
        info!(snapshot_id = id, "rbd snapshot removed");
        Ok(())
    }
}
