//! Service and driver descriptions returned by inspection calls.

use serde::{Deserialize, Serialize};

use super::instance::{ExecutorOps, NextDeviceInfo};

/// Description of a driver as seen through one service.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverInfo {
    /// Driver name, for example `mock` or `rbd`.
    pub name: String,
    /// Next-device naming settings for the owning service.
    pub next_device: NextDeviceInfo,
    /// Executor commands the driver implements on this platform.
    pub executor_ops: ExecutorOps,
    /// Number of registered services using this driver.
    pub services: usize,
}

/// Description of a registered service.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ServiceInfo {
    /// Unique service name.
    pub name: String,
    /// Driver backing the service.
    pub driver: DriverInfo,
}
