//! Host-side executor for the RBD driver.

use async_trait::async_trait;
use camino::Utf8PathBuf;

use super::{HostIdentity, NAME, RbdCli};
use crate::config::ServiceConfig;
use crate::driver::DriverDeps;
use crate::error::Result;
use crate::executor::{LocalExecutor, read_mounts};
use crate::types::{ExecutorOps, InstanceId, LocalDevices};

const DEVICE_PREFIX: &str = "/dev/rbd";

/// Resolves the host address and lists mapped `/dev/rbdN` devices.
#[derive(Debug)]
pub struct RbdExecutor {
    identity: HostIdentity,
    cli: RbdCli,
    mounts: Utf8PathBuf,
}

impl RbdExecutor {
    /// Creates the executor for one service.
    #[must_use]
    pub fn new(service: &ServiceConfig, deps: &DriverDeps) -> Self {
        Self {
            identity: HostIdentity::new(service, deps),
            cli: RbdCli::new(service, deps),
            mounts: deps.local_devices_file.clone(),
        }
    }
}

#[async_trait]
impl LocalExecutor for RbdExecutor {
    fn driver(&self) -> &str {
        NAME
    }

    fn supported(&self) -> ExecutorOps {
        ExecutorOps::INSTANCE_ID | ExecutorOps::LOCAL_DEVICES
    }

    async fn instance_id(&self) -> Result<InstanceId> {
        self.identity.resolve().await
    }

    /// Mapped devices appear with an empty mount point until mounted.
    async fn local_devices(&self) -> Result<LocalDevices> {
        let mounted = read_mounts(NAME, &self.mounts, Some(DEVICE_PREFIX))?;
        let mut devices = LocalDevices {
            driver: NAME.to_owned(),
            device_map: self
                .cli
                .mapped()
                .await?
                .into_iter()
                .map(|dev| (dev.device, String::new()))
                .collect(),
        };
        devices.device_map.extend(mounted.device_map);
        Ok(devices)
    }
}
