//! Request payloads for volume and snapshot operations.

use serde::{Deserialize, Serialize};

use super::Opts;
use crate::error::StorageError;

/// Parameters for creating a volume.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct VolumeCreateRequest {
    /// Volume name. Drivers may interpret a `pool.name` form.
    pub name: String,
    /// Target availability zone.
    #[serde(rename = "availabilityZone", default)]
    pub availability_zone: Option<String>,
    /// Requested IOPS.
    #[serde(default)]
    pub iops: Option<i64>,
    /// Requested size in GiB.
    #[serde(default)]
    pub size: Option<i64>,
    /// Backend-specific type tag.
    #[serde(rename = "type", default)]
    pub volume_type: Option<String>,
    /// Options the backend may interpret arbitrarily.
    #[serde(default)]
    pub opts: Opts,
}

impl VolumeCreateRequest {
    /// Starts a builder for a [`VolumeCreateRequest`].
    #[must_use]
    pub fn builder() -> VolumeCreateRequestBuilder {
        VolumeCreateRequestBuilder::default()
    }

    /// Rejects requests that no backend could satisfy.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Validation`] when the name is blank or a
    /// numeric field is negative.
    pub fn validate(&self) -> Result<(), StorageError> {
        require_name(&self.name, "name")?;
        if self.size.is_some_and(|size| size < 0) {
            return Err(StorageError::Validation(String::from(
                "size must not be negative",
            )));
        }
        if self.iops.is_some_and(|iops| iops < 0) {
            return Err(StorageError::Validation(String::from(
                "iops must not be negative",
            )));
        }
        Ok(())
    }
}

/// Builder for [`VolumeCreateRequest`] that trims and validates on build.
#[derive(Clone, Debug, Default)]
pub struct VolumeCreateRequestBuilder {
    request: VolumeCreateRequest,
}

impl VolumeCreateRequestBuilder {
    /// Sets the volume name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.request.name = value.into();
        self
    }

    /// Sets the availability zone.
    #[must_use]
    pub fn availability_zone(mut self, value: impl Into<String>) -> Self {
        self.request.availability_zone = Some(value.into());
        self
    }

    /// Sets the IOPS.
    #[must_use]
    pub const fn iops(mut self, value: i64) -> Self {
        self.request.iops = Some(value);
        self
    }

    /// Sets the size in GiB.
    #[must_use]
    pub const fn size(mut self, value: i64) -> Self {
        self.request.size = Some(value);
        self
    }

    /// Sets the type tag.
    #[must_use]
    pub fn volume_type(mut self, value: impl Into<String>) -> Self {
        self.request.volume_type = Some(value.into());
        self
    }

    /// Adds one opaque option.
    #[must_use]
    pub fn opt(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.request.opts.insert(key.into(), value.into());
        self
    }

    /// Builds the request, trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Validation`] when the request is invalid.
    pub fn build(self) -> Result<VolumeCreateRequest, StorageError> {
        let mut request = self.request;
        request.name = request.name.trim().to_owned();
        request.availability_zone = request.availability_zone.map(|az| az.trim().to_owned());
        request.volume_type = request.volume_type.map(|ty| ty.trim().to_owned());
        request.validate()?;
        Ok(request)
    }
}

/// Parameters for attaching a volume to the caller's instance.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeAttachRequest {
    /// Device name the caller's executor predicted, if any.
    #[serde(default)]
    pub next_device_name: Option<String>,
    /// Re-attach even when the caller already holds the volume.
    #[serde(default)]
    pub force: bool,
    /// Opaque options.
    #[serde(default)]
    pub opts: Opts,
}

/// Parameters for detaching a volume.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeDetachRequest {
    /// Detach every instance, not just the caller.
    #[serde(default)]
    pub force: bool,
    /// Opaque options.
    #[serde(default)]
    pub opts: Opts,
}

/// Parameters for snapshotting a volume.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotRequest {
    /// Name of the new snapshot.
    pub snapshot_name: String,
    /// Opaque options.
    #[serde(default)]
    pub opts: Opts,
}

impl VolumeSnapshotRequest {
    /// Rejects a blank snapshot name.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Validation`] when the name is blank.
    pub fn validate(&self) -> Result<(), StorageError> {
        require_name(&self.snapshot_name, "snapshotName")
    }
}

/// Parameters for copying a volume.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeCopyRequest {
    /// Name of the new volume.
    pub volume_name: String,
    /// Opaque options.
    #[serde(default)]
    pub opts: Opts,
}

impl VolumeCopyRequest {
    /// Rejects a blank volume name.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Validation`] when the name is blank.
    pub fn validate(&self) -> Result<(), StorageError> {
        require_name(&self.volume_name, "volumeName")
    }
}

/// Parameters for copying a snapshot.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotCopyRequest {
    /// Name of the derived snapshot.
    pub snapshot_name: String,
    /// Destination region or pool, when the backend supports one.
    #[serde(default)]
    pub dest_id: Option<String>,
    /// Opaque options.
    #[serde(default)]
    pub opts: Opts,
}

impl SnapshotCopyRequest {
    /// Rejects a blank snapshot name.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Validation`] when the name is blank.
    pub fn validate(&self) -> Result<(), StorageError> {
        require_name(&self.snapshot_name, "snapshotName")
    }
}

fn require_name(value: &str, field: &str) -> Result<(), StorageError> {
    if value.trim().is_empty() {
        return Err(StorageError::Validation(format!("{field} is required")));
    }
    Ok(())
}
