//! In-memory driver used for tests and demonstrations.
//!
//! Each service gets its own fixture set: three volumes in `zone-000` and
//! three snapshots of 100 GiB volumes. The primary service (the one named
//! `mock`) also seeds three attachments on `vol-000`. Up to three instances
//! may attach the same volume at once.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tracing::debug;

use super::{DriverDeps, DriverRegistration, LockTable, StorageDriver};
use crate::config::{NextDeviceOverrides, ServiceConfig};
use crate::error::{Result, StorageError};
use crate::executor::LocalExecutor;
use crate::types::{
    Attachment, ExecutorOps, InstanceId, NextDeviceInfo, Snapshot, SnapshotCopyRequest, Volume,
    VolumeAttachRequest, VolumeAttachments, VolumeCopyRequest, VolumeCreateRequest,
    VolumeDetachRequest, VolumeSnapshotRequest,
};

mod executor;

pub use executor::MockExecutor;

/// Driver name.
pub const NAME: &str = "mock";

/// Instance ID reported for the local host.
pub const INSTANCE_ID: &str = "iid-000";

/// Availability zone of every fixture volume.
pub const ZONE: &str = "zone-000";

/// Devices the seeded attachments occupy, with their mount points.
pub const SEEDED_DEVICES: [(&str, &str); 3] = [
    ("/dev/xvda", "/var/log"),
    ("/dev/xvdb", "/home"),
    ("/dev/xvdc", "/net/share"),
];

const FIXTURE_COUNT: usize = 3;
const MAX_ATTACHMENTS: usize = 3;
const FIXTURE_SIZE: i64 = 10240;
const SNAPSHOT_VOLUME_SIZE: i64 = 100;

/// Registration for [`crate::driver::DriverRegistry`].
#[must_use]
pub fn registration() -> DriverRegistration {
    DriverRegistration {
        name: NAME,
        driver: build_driver,
        executor: build_executor,
    }
}

fn build_driver(service: &ServiceConfig, _deps: &DriverDeps) -> Result<Arc<dyn StorageDriver>> {
    Ok(Arc::new(MockDriver::new(service)))
}

fn build_executor(_service: &ServiceConfig, _deps: &DriverDeps) -> Result<Box<dyn LocalExecutor>> {
    Ok(Box::new(MockExecutor))
}

/// Base next-device settings: the mock backend needs no device naming.
#[must_use]
pub fn default_next_device() -> NextDeviceInfo {
    NextDeviceInfo {
        ignore: true,
        ..NextDeviceInfo::default()
    }
}

/// The in-memory driver.
#[derive(Debug)]
pub struct MockDriver {
    next_device: NextDeviceOverrides,
    volumes: LockTable<Volume>,
    snapshots: LockTable<Snapshot>,
    volume_seq: AtomicUsize,
    snapshot_seq: AtomicUsize,
}

impl MockDriver {
    /// Creates a driver seeded with the fixture set for `service`.
    #[must_use]
    pub fn new(service: &ServiceConfig) -> Self {
        let seed_attachments = service
            .seed_attachments
            .unwrap_or_else(|| service.is_primary());
        let driver = Self {
            next_device: service.next_device.clone(),
            volumes: LockTable::new("volume"),
            snapshots: LockTable::new("snapshot"),
            volume_seq: AtomicUsize::new(FIXTURE_COUNT),
            snapshot_seq: AtomicUsize::new(FIXTURE_COUNT),
        };
        for index in 0..FIXTURE_COUNT {
            let id = format!("vol-{index:03}");
            let attachments = if index == 0 && seed_attachments {
                seeded_attachments(&id)
            } else {
                Vec::new()
            };
            driver.volumes.insert(
                id.clone(),
                Volume {
                    id,
                    name: format!("Volume {index}"),
                    size: FIXTURE_SIZE,
                    availability_zone: ZONE.to_owned(),
                    volume_type: String::from("block"),
                    attachments,
                    ..Volume::default()
                },
            );
            let snap_id = format!("snap-{index:03}");
            driver.snapshots.insert(
                snap_id.clone(),
                Snapshot {
                    id: snap_id,
                    name: format!("Snapshot {index}"),
                    volume_id: format!("vol-{index:03}"),
                    volume_size: SNAPSHOT_VOLUME_SIZE,
                    ..Snapshot::default()
                },
            );
        }
        driver
    }

    fn next_volume_id(&self) -> String {
        format!("vol-{:03}", self.volume_seq.fetch_add(1, Ordering::Relaxed))
    }

    fn next_snapshot_id(&self) -> String {
        format!("snap-{:03}", self.snapshot_seq.fetch_add(1, Ordering::Relaxed))
    }

    fn new_volume(&self, request: &VolumeCreateRequest, default_size: i64) -> Volume {
        Volume {
            id: self.next_volume_id(),
            name: request.name.clone(),
            size: request.size.unwrap_or(default_size),
            iops: request.iops.unwrap_or_default(),
            availability_zone: request
                .availability_zone
                .clone()
                .unwrap_or_else(|| ZONE.to_owned()),
            volume_type: request.volume_type.clone().unwrap_or_default(),
            attachments: Vec::new(),
            opts: request.opts.clone(),
        }
    }

    fn store_volume(&self, volume: Volume) -> Result<Volume> {
        if self.volumes.insert(volume.id.clone(), volume.clone()) {
            debug!(volume_id = %volume.id, "mock volume created");
            Ok(volume)
        } else {
            Err(StorageError::Conflict(format!("volume {} already exists", volume.id)))
        }
    }

    fn store_snapshot(&self, snapshot: Snapshot) -> Result<Snapshot> {
        if self.snapshots.insert(snapshot.id.clone(), snapshot.clone()) {
            Ok(snapshot)
        } else {
            Err(StorageError::Conflict(format!(
                "snapshot {} already exists",
                snapshot.id
            )))
        }
    }
}

fn seeded_attachments(volume_id: &str) -> Vec<Attachment> {
    SEEDED_DEVICES
        .iter()
        .enumerate()
        .map(|(index, (device, _))| Attachment {
            volume_id: volume_id.to_owned(),
            instance_id: InstanceId::new(format!("iid-{index:03}"), NAME),
            device_name: (*device).to_owned(),
            mount_point: String::new(),
        })
        .collect()
}

fn strip_attachments(mut volume: Volume, attachments: VolumeAttachments) -> Volume {
    if !attachments.wants_attachments() {
        volume.attachments.clear();
    }
    volume
}

fn free_device(volume: &Volume) -> String {
    let used: BTreeSet<&str> = volume
        .attachments
        .iter()
        .map(|att| att.device_name.as_str())
        .collect();
    ('a'..='z')
        .map(|suffix| format!("/dev/xvd{suffix}"))
        .find(|name| !used.contains(name.as_str()))
        .unwrap_or_default()
}

#[async_trait]
impl StorageDriver for MockDriver {
    fn name(&self) -> &str {
        NAME
    }

    fn next_device_info(&self) -> NextDeviceInfo {
        self.next_device.apply(default_next_device())
    }

    fn executor_ops(&self) -> ExecutorOps {
        ExecutorOps::ALL
    }

    async fn instance_id(&self) -> Result<InstanceId> {
        Ok(InstanceId::new(INSTANCE_ID, NAME))
    }

    async fn volumes(&self, attachments: VolumeAttachments) -> Result<Vec<Volume>> {
        Ok(self
            .volumes
            .values()
            .await
            .into_iter()
            .map(|vol| strip_attachments(vol, attachments))
            .collect())
    }

    async fn volume_inspect(&self, id: &str, attachments: VolumeAttachments) -> Result<Volume> {
        let volume = self.volumes.get(id).await?;
        Ok(strip_attachments(volume, attachments))
    }

    async fn volume_create(&self, request: &VolumeCreateRequest) -> Result<Volume> {
        self.store_volume(self.new_volume(request, 0))
    }

    async fn volume_create_from_snapshot(
        &self,
        snapshot_id: &str,
        request: &VolumeCreateRequest,
    ) -> Result<Volume> {
        let snapshot = self.snapshots.get(snapshot_id).await?;
        self.store_volume(self.new_volume(request, snapshot.volume_size))
    }

    async fn volume_copy(&self, id: &str, request: &VolumeCopyRequest) -> Result<Volume> {
        let source = self.volumes.get(id).await?;
        let mut opts = source.opts.clone();
        opts.extend(request.opts.clone());
        self.store_volume(Volume {
            id: self.next_volume_id(),
            name: request.volume_name.clone(),
            attachments: Vec::new(),
            opts,
            ..source
        })
    }

    async fn volume_snapshot(&self, id: &str, request: &VolumeSnapshotRequest) -> Result<Snapshot> {
        let source = self.volumes.get(id).await?;
        self.store_snapshot(Snapshot {
            id: self.next_snapshot_id(),
            name: request.snapshot_name.clone(),
            volume_id: source.id,
            volume_size: source.size,
            opts: request.opts.clone(),
        })
    }

    async fn volume_remove(&self, id: &str, _force: bool) -> Result<()> {
        self.volumes.remove_if(id, |_| Ok(())).await?;
        debug!(volume_id = id, "mock volume removed");
        Ok(())
    }

    async fn volume_attach(
        &self,
        id: &str,
        instance: &InstanceId,
        request: &VolumeAttachRequest,
    ) -> Result<Volume> {
        self.volumes
            .with(id, |volume| {
                if volume.attachment_for(instance).is_some() {
                    if !request.force {
                        return Err(StorageError::Conflict(format!(
                            "volume {id} is already attached to {instance}"
                        )));
                    }
                    volume.attachments.retain(|att| &att.instance_id != instance);
                }
                if volume.attachments.len() >= MAX_ATTACHMENTS {
                    return Err(StorageError::Conflict(format!(
                        "volume {id} already has {MAX_ATTACHMENTS} attachments"
                    )));
                }
                let device_name = request
                    .next_device_name
                    .clone()
                    .filter(|name| !name.trim().is_empty())
                    .unwrap_or_else(|| free_device(volume));
                volume.attachments.push(Attachment {
                    volume_id: volume.id.clone(),
                    instance_id: instance.clone(),
                    device_name,
                    mount_point: String::new(),
                });
                Ok(volume.clone())
            })
            .await
    }

    async fn volume_detach(
        &self,
        id: &str,
        instance: &InstanceId,
        request: &VolumeDetachRequest,
    ) -> Result<Volume> {
        self.volumes
            .with(id, |volume| {
                if request.force {
                    volume.attachments.clear();
                } else {
                    volume.attachments.retain(|att| &att.instance_id != instance);
                }
                Ok(volume.clone())
            })
            .await
    }

    async fn snapshots(&self) -> Result<Vec<Snapshot>> {
        Ok(self.snapshots.values().await)
    }

    async fn snapshot_inspect(&self, id: &str) -> Result<Snapshot> {
        self.snapshots.get(id).await
    }

    async fn snapshot_copy(&self, id: &str, request: &SnapshotCopyRequest) -> Result<Snapshot> {
        let source = self.snapshots.get(id).await?;
        self.store_snapshot(Snapshot {
            id: self.next_snapshot_id(),
            name: request.snapshot_name.clone(),
            opts: request.opts.clone(),
            ..source
        })
    }

    async fn snapshot_remove(&self, id: &str) -> Result<()> {
        self.snapshots.remove_if(id, |_| Ok(())).await.map(|_| ())
    }
}
