//! Host-side executor for the mock driver.

use std::collections::BTreeSet;

use async_trait::async_trait;

use super::{INSTANCE_ID, NAME, SEEDED_DEVICES};
use crate::error::Result;
use crate::executor::{LocalExecutor, next_device_name};
use crate::types::{ExecutorOps, InstanceId, LocalDevices, NextDeviceInfo};

/// Executor reporting a fixed identity and the seeded device layout.
#[derive(Clone, Copy, Debug, Default)]
pub struct MockExecutor;

#[async_trait]
impl LocalExecutor for MockExecutor {
    fn driver(&self) -> &str {
        NAME
    }

    fn supported(&self) -> ExecutorOps {
        ExecutorOps::ALL
    }

    async fn instance_id(&self) -> Result<InstanceId> {
        Ok(InstanceId::new(INSTANCE_ID, NAME))
    }

    async fn next_device(&self, info: &NextDeviceInfo) -> Result<Option<String>> {
        let existing: BTreeSet<String> = SEEDED_DEVICES
            .iter()
            .map(|(device, _)| (*device).to_owned())
            .collect();
        next_device_name(info, &existing)
    }

    async fn local_devices(&self) -> Result<LocalDevices> {
        Ok(LocalDevices {
            driver: NAME.to_owned(),
            device_map: SEEDED_DEVICES
                .iter()
                .map(|(device, mount)| ((*device).to_owned(), (*mount).to_owned()))
                .collect(),
        })
    }
}
