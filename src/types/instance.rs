//! Host identity and host-local device facts.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a consuming host to one driver.
///
/// Equality covers the driver name, so identifiers minted by different
/// drivers never compare equal even when their payloads match.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct InstanceId {
    /// Opaque payload minted by the driver (an IP address for `rbd`).
    pub id: String,
    /// Name of the driver that minted the identifier.
    pub driver: String,
}

impl InstanceId {
    /// Creates an identifier for `driver`.
    pub fn new(id: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            driver: driver.into(),
        }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.driver, self.id)
    }
}

/// Block devices visible to the host, keyed by device name.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDevices {
    /// Driver whose executor produced the map.
    pub driver: String,
    /// Device name to mount point. Unmounted devices map to an empty string.
    pub device_map: BTreeMap<String, String>,
}

impl LocalDevices {
    /// Returns the mount point recorded for `device`, if any.
    #[must_use]
    pub fn mount_point(&self, device: &str) -> Option<&str> {
        self.device_map
            .get(device)
            .map(String::as_str)
            .filter(|mount| !mount.is_empty())
    }
}

/// Next-device naming settings advertised by a driver.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NextDeviceInfo {
    /// When set, the backend needs no local device naming.
    pub ignore: bool,
    /// Device name prefix, for example `xvd`.
    pub prefix: String,
    /// Single character class matched after the prefix, for example `\w`.
    pub pattern: String,
}

impl Default for NextDeviceInfo {
    fn default() -> Self {
        Self {
            ignore: false,
            prefix: String::from("xvd"),
            pattern: String::from(r"\w"),
        }
    }
}

/// Bitmask of executor commands implemented on a platform.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ExecutorOps(u8);

impl ExecutorOps {
    /// No optional command is implemented.
    pub const NONE: Self = Self(0);
    /// `instanceID` is implemented.
    pub const INSTANCE_ID: Self = Self(1);
    /// `nextDevice` is implemented.
    pub const NEXT_DEVICE: Self = Self(1 << 1);
    /// `localDevices` is implemented.
    pub const LOCAL_DEVICES: Self = Self(1 << 2);
    /// Every optional command is implemented.
    pub const ALL: Self = Self(0b111);

    /// Returns the raw bitmask.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Builds a mask from raw bits, discarding unknown bits.
    #[must_use]
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// Whether every bit in `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the union of both masks.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for ExecutorOps {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}
