//! Service declarations and driver options.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::types::{NextDeviceInfo, Opts};

/// Default deadline for backend CLI calls made by drivers.
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// Per-service overrides of a driver's next-device settings.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct NextDeviceOverrides {
    /// Overrides [`NextDeviceInfo::ignore`].
    #[serde(default)]
    pub ignore: Option<bool>,
    /// Overrides [`NextDeviceInfo::prefix`].
    #[serde(default)]
    pub prefix: Option<String>,
    /// Overrides [`NextDeviceInfo::pattern`].
    #[serde(default)]
    pub pattern: Option<String>,
}

impl NextDeviceOverrides {
    /// Applies the overrides on top of a driver's defaults.
    #[must_use]
    pub fn apply(&self, base: NextDeviceInfo) -> NextDeviceInfo {
        NextDeviceInfo {
            ignore: self.ignore.unwrap_or(base.ignore),
            prefix: self.prefix.clone().unwrap_or(base.prefix),
            pattern: self.pattern.clone().unwrap_or(base.pattern),
        }
    }
}

/// One configured service: a name bound to a driver and its options.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Unique service name.
    pub name: String,
    /// Driver name. Blank means the process default driver.
    #[serde(default)]
    pub driver: String,
    /// Pool (or namespace) used when a request does not name one.
    #[serde(default)]
    pub default_pool: Option<String>,
    /// Pools the driver enumerates when listing.
    #[serde(default)]
    pub pools: Vec<String>,
    /// Backend monitor or endpoint addresses.
    #[serde(default)]
    pub monitors: Vec<String>,
    /// Next-device naming overrides.
    #[serde(default)]
    pub next_device: NextDeviceOverrides,
    /// Whether the mock driver seeds attachments on `vol-000`.
    #[serde(default)]
    pub seed_attachments: Option<bool>,
    /// Path of the `rbd` binary.
    #[serde(default)]
    pub rbd_bin: Option<String>,
    /// Path of the `ip` binary.
    #[serde(default)]
    pub ip_bin: Option<String>,
    /// Deadline for backend CLI calls, in seconds.
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
    /// Unrecognised options, passed through to request options untouched.
    #[serde(flatten)]
    pub extra: Opts,
}

impl ServiceConfig {
    /// Creates a service with no driver options.
    pub fn new(name: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: driver.into(),
            ..Self::default()
        }
    }

    /// Deadline for backend CLI calls.
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(
            self.command_timeout_secs
                .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS),
        )
    }

    /// Whether this service is the one named after its own driver.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.name == self.driver
    }
}

/// Parses a services document.
///
/// The document is a JSON array of objects. Services without a driver use
/// `default_driver`. A service named after `default_driver` is prepended
/// when the document does not declare one.
///
/// # Errors
///
/// Returns [`ConfigError::Services`] for malformed JSON or blank names and
/// [`ConfigError::DuplicateService`] when a name repeats.
pub fn parse_services(contents: &str, default_driver: &str) -> Result<Vec<ServiceConfig>, ConfigError> {
    let declared: Vec<ServiceConfig> =
        serde_json::from_str(contents).map_err(|err| ConfigError::Services {
            path: "<services>".into(),
            message: err.to_string(),
        })?;

    let mut seen = BTreeSet::new();
    let mut services = Vec::with_capacity(declared.len() + 1);
    for mut service in declared {
        service.name = service.name.trim().to_owned();
        if service.name.is_empty() {
            return Err(ConfigError::Services {
                path: "<services>".into(),
                message: String::from("every service needs a name"),
            });
        }
        if service.driver.trim().is_empty() {
            default_driver.clone_into(&mut service.driver);
        }
        if !seen.insert(service.name.clone()) {
            return Err(ConfigError::DuplicateService(service.name));
        }
        services.push(service);
    }

    if !seen.contains(default_driver) {
        services.insert(0, ServiceConfig::new(default_driver, default_driver));
    }
    Ok(services)
}
