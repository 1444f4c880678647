//! Volumes, attachments and snapshots.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Opts;
use super::instance::{InstanceId, LocalDevices};

/// Relationship between a volume and one consuming instance.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Attachment {
    /// Volume the attachment belongs to.
    #[serde(rename = "volumeID")]
    pub volume_id: String,
    /// Host holding the attachment.
    #[serde(rename = "instanceID")]
    pub instance_id: InstanceId,
    /// Device name on the host; empty until a local mapping is known.
    #[serde(rename = "deviceName", default)]
    pub device_name: String,
    /// Mount point; populated only by local-device enrichment.
    #[serde(rename = "mountPoint", default)]
    pub mount_point: String,
}

/// A block-storage volume owned by one service.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Volume {
    /// Backend-scoped identifier, for example `vol-000` or `rbd.data`.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Size in GiB.
    #[serde(default)]
    pub size: i64,
    /// Provisioned IOPS, when the backend tracks them.
    #[serde(default)]
    pub iops: i64,
    /// Availability zone.
    #[serde(rename = "availabilityZone", default)]
    pub availability_zone: String,
    /// Backend-specific type tag (the pool for `rbd`).
    #[serde(rename = "type", default)]
    pub volume_type: String,
    /// Attachments in backend order.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Opaque options recorded at creation time.
    #[serde(default)]
    pub opts: Opts,
}

impl Volume {
    /// Returns the attachment held by `instance`, if any.
    #[must_use]
    pub fn attachment_for(&self, instance: &InstanceId) -> Option<&Attachment> {
        self.attachments
            .iter()
            .find(|att| &att.instance_id == instance)
    }

    /// Whether any instance holds an attachment.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        !self.attachments.is_empty()
    }

    /// Filters and enriches attachments for the requested visibility mode.
    ///
    /// Returns `None` when the volume must be hidden from the caller, which
    /// only happens for [`VolumeAttachments::OnlyUnattached`].
    #[must_use]
    pub fn apply_visibility(
        mut self,
        mode: VolumeAttachments,
        instance: Option<&InstanceId>,
        local_devices: Option<&LocalDevices>,
    ) -> Option<Self> {
        match mode {
            VolumeAttachments::None => self.attachments.clear(),
            VolumeAttachments::OnlyUnattached => {
                if self.is_attached() {
                    return None;
                }
            }
            VolumeAttachments::AnyInstance => {}
            VolumeAttachments::ForInstance | VolumeAttachments::ForInstanceWithDevices => {
                self.attachments
                    .retain(|att| instance.is_some_and(|iid| &att.instance_id == iid));
                if mode == VolumeAttachments::ForInstance {
                    for att in &mut self.attachments {
                        att.device_name.clear();
                    }
                }
            }
        }
        for att in &mut self.attachments {
            att.mount_point = local_devices
                .and_then(|devices| devices.mount_point(&att.device_name))
                .map(str::to_owned)
                .unwrap_or_default();
        }
        Some(self)
    }
}

/// A point-in-time copy of a volume.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Snapshot {
    /// Backend-scoped identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Volume the snapshot was taken from.
    #[serde(rename = "volumeID")]
    pub volume_id: String,
    /// Size of the source volume at snapshot time, in GiB.
    #[serde(rename = "volumeSize", default)]
    pub volume_size: i64,
    /// Opaque options recorded at creation time.
    #[serde(default)]
    pub opts: Opts,
}

/// Credential proving which attach produced the current device mapping.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AttachToken(String);

impl AttachToken {
    /// Issues a fresh random token.
    #[must_use]
    pub fn issue() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the token text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttachToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Attachment visibility requested on inspect and list calls.
///
/// The modes are not independent toggles: device mapping implies
/// filtering to the caller's own instance.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum VolumeAttachments {
    /// Omit attachments entirely.
    #[default]
    None,
    /// Only the caller's attachment, without device names.
    ForInstance,
    /// Only the caller's attachment, with device names and mount points.
    ForInstanceWithDevices,
    /// Attachments held by any instance.
    AnyInstance,
    /// Only volumes that no instance holds.
    OnlyUnattached,
}

impl VolumeAttachments {
    /// Maps the boolean `attachments` listing flag onto a mode.
    #[must_use]
    pub const fn from_flag(attachments: bool) -> Self {
        if attachments {
            Self::AnyInstance
        } else {
            Self::None
        }
    }

    /// Whether the mode needs the caller's instance ID.
    #[must_use]
    pub const fn requires_instance(self) -> bool {
        matches!(self, Self::ForInstance | Self::ForInstanceWithDevices)
    }

    /// Whether drivers must enumerate attachments for this mode.
    #[must_use]
    pub const fn wants_attachments(self) -> bool {
        !matches!(self, Self::None)
    }
}
