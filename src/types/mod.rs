//! Backend-agnostic data model exchanged between callers, the engine and
//! drivers.
//!
//! Every type is `serde` serialisable with the field names of the wire
//! contract (`volumeID`, `instanceID`, `availabilityZone`, ...).

use std::collections::BTreeMap;

mod instance;
mod requests;
mod service;
mod volume;

pub use instance::{ExecutorOps, InstanceId, LocalDevices, NextDeviceInfo};
pub use requests::{
    SnapshotCopyRequest, VolumeAttachRequest, VolumeCopyRequest, VolumeCreateRequest,
    VolumeCreateRequestBuilder, VolumeDetachRequest, VolumeSnapshotRequest,
};
pub use service::{DriverInfo, ServiceInfo};
pub use volume::{AttachToken, Attachment, Snapshot, Volume, VolumeAttachments};

/// Opaque options passed through to drivers untouched.
///
/// Values keep their JSON type, so an integer priority stays an integer.
pub type Opts = BTreeMap<String, serde_json::Value>;
