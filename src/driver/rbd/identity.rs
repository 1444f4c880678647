//! Resolution of the address a Ceph cluster observes for this host.

use std::ffi::OsString;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::{DEFAULT_CEPH_CONF_BIN, DEFAULT_IP_BIN, NAME};
use crate::config::ServiceConfig;
use crate::driver::DriverDeps;
use crate::error::{Result, StorageError};
use crate::resolver::{self, IpTool, parse_monitor_addresses, split_mon_host};
use crate::runner::CommandRunner;
use crate::types::InstanceId;

/// Monitor discovery plus interface and route queries for one service.
#[derive(Clone)]
pub struct HostIdentity {
    runner: Arc<dyn CommandRunner>,
    monitors: Vec<String>,
    ceph_conf_bin: String,
    ip: IpTool,
    timeout: Duration,
}

impl fmt::Debug for HostIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostIdentity")
            .field("monitors", &self.monitors)
            .field("ceph_conf_bin", &self.ceph_conf_bin)
            .field("ip", &self.ip)
            .finish_non_exhaustive()
    }
}

impl HostIdentity {
    /// Builds the resolver inputs from a service's options.
    #[must_use]
    pub fn new(service: &ServiceConfig, deps: &DriverDeps) -> Self {
        let timeout = service.command_timeout();
        let ip_bin = service
            .ip_bin
            .clone()
            .unwrap_or_else(|| DEFAULT_IP_BIN.to_owned());
        Self {
            runner: Arc::clone(&deps.runner),
            monitors: service.monitors.clone(),
            ceph_conf_bin: DEFAULT_CEPH_CONF_BIN.to_owned(),
            ip: IpTool::new(Arc::clone(&deps.runner), ip_bin, timeout),
            timeout,
        }
    }

    /// Monitor addresses from the service options, or from `ceph-conf`
    /// when none are configured.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Resolution`] when no monitor can be found or
    /// parsed.
    pub async fn monitors(&self) -> Result<Vec<IpAddr>> {
        if !self.monitors.is_empty() {
            return parse_monitor_addresses(&self.monitors);
        }
        let args = [
            OsString::from("--lookup"),
            OsString::from("mon_host"),
        ];
        let output = self
            .runner
            .run(&self.ceph_conf_bin, &args, self.timeout)
            .await?;
        if !output.is_success() {
            return Err(StorageError::Resolution(format!(
                "no monitors configured and {} --lookup mon_host failed: {}",
                self.ceph_conf_bin,
                output.diagnostics()
            )));
        }
        let hosts = split_mon_host(&output.stdout);
        debug!(count = hosts.len(), "read monitors from ceph-conf");
        parse_monitor_addresses(&hosts)
    }

    /// Resolves this host's instance ID.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Resolution`] when no usable address exists,
    /// or a retryable error when a host query fails.
    pub async fn resolve(&self) -> Result<InstanceId> {
        let monitors = self.monitors().await?;
        let interfaces = self.ip.interfaces().await?;
        let address = resolver::resolve(&monitors, &interfaces, &self.ip).await?;
        Ok(InstanceId::new(address.to_string(), NAME))
    }
}
