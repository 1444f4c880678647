//! Serde shapes of the `rbd --format json` replies the driver consumes.

use serde::Deserialize;

/// One row of `rbd ls -l`. Snapshot rows carry `snapshot`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct ImageRow {
    pub(super) image: String,
    #[serde(default)]
    pub(super) size: u64,
    #[serde(default)]
    pub(super) snapshot: Option<String>,
}

/// Reply of `rbd info`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct ImageInfo {
    #[serde(default)]
    pub(super) size: u64,
}

/// Reply of `rbd status`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub(super) struct ImageStatus {
    #[serde(default)]
    pub(super) watchers: Vec<Watcher>,
}

/// A client holding a watch on an image, which is how `rbd` exposes
/// mappings held by other hosts.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct Watcher {
    pub(super) address: String,
}

impl Watcher {
    /// Host part of `10.0.0.1:0/3112` style addresses, with any IPv6
    /// brackets removed.
    pub(super) fn host(&self) -> &str {
        let without_nonce = self
            .address
            .split_once('/')
            .map_or(self.address.as_str(), |(addr, _)| addr);
        if let Some(rest) = without_nonce.strip_prefix('[') {
            return rest.split_once(']').map_or(rest, |(host, _)| host);
        }
        without_nonce
            .rsplit_once(':')
            .map_or(without_nonce, |(host, _)| host)
    }
}

/// One row of `rbd snap ls`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct SnapRow {
    pub(super) name: String,
    #[serde(default)]
    pub(super) size: u64,
}

/// One locally mapped device from `rbd showmapped`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct MappedDevice {
    pub(super) pool: String,
    pub(super) name: String,
    pub(super) device: String,
}

/// `rbd showmapped` prints an object keyed by device index on older
/// releases and an array on newer ones.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum ShowMapped {
    List(Vec<MappedDevice>),
    Keyed(std::collections::BTreeMap<String, MappedDevice>),
}

impl ShowMapped {
    pub(super) fn into_devices(self) -> Vec<MappedDevice> {
        match self {
            Self::List(devices) => devices,
            Self::Keyed(devices) => devices.into_values().collect(),
        }
    }
}
