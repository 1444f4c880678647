//! Request and response envelopes exchanged between a client and the
//! lifecycle engine.
//!
//! Each request has exactly one matching response variant, so callers
//! match on the variant instead of inspecting an untyped payload.

use serde::{Deserialize, Serialize};

use crate::engine::ServiceMap;
use crate::executor::ExecutorInfo;
use crate::types::{
    AttachToken, InstanceId, ServiceInfo, Snapshot, SnapshotCopyRequest, Volume,
    VolumeAttachRequest, VolumeAttachments, VolumeCopyRequest, VolumeCreateRequest,
    VolumeDetachRequest, VolumeSnapshotRequest,
};

/// A call addressed to the engine.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Request {
    /// Describe every service.
    Services,
    /// Describe one service.
    ServiceInspect {
        /// Service name.
        service: String,
    },
    /// List volumes of every service.
    Volumes {
        /// Attachment visibility.
        attachments: VolumeAttachments,
    },
    /// List volumes of one service.
    VolumesByService {
        /// Service name.
        service: String,
        /// Attachment visibility.
        attachments: VolumeAttachments,
    },
    /// Inspect one volume.
    VolumeInspect {
        /// Service name.
        service: String,
        /// Volume ID.
        volume_id: String,
        /// Attachment visibility.
        attachments: VolumeAttachments,
    },
    /// Create a volume.
    VolumeCreate {
        /// Service name.
        service: String,
        /// Volume parameters.
        request: VolumeCreateRequest,
    },
    /// Create a volume from a snapshot.
    VolumeCreateFromSnapshot {
        /// Service name.
        service: String,
        /// Source snapshot ID.
        snapshot_id: String,
        /// Volume parameters.
        request: VolumeCreateRequest,
    },
    /// Copy a volume.
    VolumeCopy {
        /// Service name.
        service: String,
        /// Source volume ID.
        volume_id: String,
        /// Copy parameters.
        request: VolumeCopyRequest,
    },
    /// Snapshot a volume.
    VolumeSnapshot {
        /// Service name.
        service: String,
        /// Source volume ID.
        volume_id: String,
        /// Snapshot parameters.
        request: VolumeSnapshotRequest,
    },
    /// Remove a volume.
    VolumeRemove {
        /// Service name.
        service: String,
        /// Volume ID.
        volume_id: String,
        /// Remove even when attached, where the backend allows it.
        force: bool,
    },
    /// Attach a volume to the caller.
    VolumeAttach {
        /// Service name.
        service: String,
        /// Volume ID.
        volume_id: String,
        /// Attach parameters.
        request: VolumeAttachRequest,
    },
    /// Detach a volume.
    VolumeDetach {
        /// Service name.
        service: String,
        /// Volume ID.
        volume_id: String,
        /// Detach parameters.
        request: VolumeDetachRequest,
    },
    /// List snapshots of every service.
    Snapshots,
    /// List snapshots of one service.
    SnapshotsByService {
        /// Service name.
        service: String,
    },
    /// Inspect one snapshot.
    SnapshotInspect {
        /// Service name.
        service: String,
        /// Snapshot ID.
        snapshot_id: String,
    },
    /// Copy a snapshot.
    SnapshotCopy {
        /// Service name.
        service: String,
        /// Source snapshot ID.
        snapshot_id: String,
        /// Copy parameters.
        request: SnapshotCopyRequest,
    },
    /// Remove a snapshot.
    SnapshotRemove {
        /// Service name.
        service: String,
        /// Snapshot ID.
        snapshot_id: String,
    },
    /// List downloadable executors.
    Executors,
    /// Describe one executor.
    ExecutorInspect {
        /// Executor file name.
        name: String,
    },
    /// Download one executor.
    ExecutorFetch {
        /// Executor file name.
        name: String,
    },
    /// Ask the engine for its own instance ID for a service's driver.
    InstanceId {
        /// Service name.
        service: String,
    },
}

impl Request {
    /// The service a single-service request addresses.
    #[must_use]
    pub fn service(&self) -> Option<&str> {
        match self {
            Self::ServiceInspect { service }
            | Self::VolumesByService { service, .. }
            | Self::VolumeInspect { service, .. }
            | Self::VolumeCreate { service, .. }
            | Self::VolumeCreateFromSnapshot { service, .. }
            | Self::VolumeCopy { service, .. }
            | Self::VolumeSnapshot { service, .. }
            | Self::VolumeRemove { service, .. }
            | Self::VolumeAttach { service, .. }
            | Self::VolumeDetach { service, .. }
            | Self::SnapshotsByService { service }
            | Self::SnapshotInspect { service, .. }
            | Self::SnapshotCopy { service, .. }
            | Self::SnapshotRemove { service, .. }
            | Self::InstanceId { service } => Some(service),
            Self::Services
            | Self::Volumes { .. }
            | Self::Snapshots
            | Self::Executors
            | Self::ExecutorInspect { .. }
            | Self::ExecutorFetch { .. } => None,
        }
    }
}

/// The engine's reply.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "kind", content = "body", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Response {
    /// Every service.
    Services(Vec<ServiceInfo>),
    /// One service.
    Service(ServiceInfo),
    /// Volumes per service.
    Volumes(ServiceMap<Vec<Volume>>),
    /// Volumes of one service.
    VolumeList(Vec<Volume>),
    /// One volume.
    Volume(Volume),
    /// An attached volume and the token proving the attach.
    Attached {
        /// The volume after attaching.
        volume: Volume,
        /// Token issued for this attach.
        token: AttachToken,
    },
    /// Snapshots per service.
    Snapshots(ServiceMap<Vec<Snapshot>>),
    /// Snapshots of one service.
    SnapshotList(Vec<Snapshot>),
    /// One snapshot.
    Snapshot(Snapshot),
    /// Downloadable executors.
    Executors(Vec<ExecutorInfo>),
    /// One executor.
    Executor(ExecutorInfo),
    /// Executor bytes.
    ExecutorBytes(Vec<u8>),
    /// An instance ID.
    InstanceId(InstanceId),
    /// Success without payload.
    Ok,
}

impl Response {
    /// Variant name, for mismatch diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Services(_) => "services",
            Self::Service(_) => "service",
            Self::Volumes(_) => "volumes",
            Self::VolumeList(_) => "volumeList",
            Self::Volume(_) => "volume",
            Self::Attached { .. } => "attached",
            Self::Snapshots(_) => "snapshots",
            Self::SnapshotList(_) => "snapshotList",
            Self::Snapshot(_) => "snapshot",
            Self::Executors(_) => "executors",
            Self::Executor(_) => "executor",
            Self::ExecutorBytes(_) => "executorBytes",
            Self::InstanceId(_) => "instanceId",
            Self::Ok => "ok",
        }
    }
}
