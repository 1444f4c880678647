//! Configuration loading via `ortho-config`.
//!
//! Process settings are layered from defaults, `stevedore.toml`, `STEVEDORE_*`
//! environment variables and CLI flags. Services are declared separately in
//! a JSON document because each driver accepts its own option set.

use std::ffi::OsString;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::error::StorageError;

mod services;

pub use services::{NextDeviceOverrides, ServiceConfig, parse_services};

/// Default executor timeout in seconds.
pub const DEFAULT_EXECUTOR_TIMEOUT_SECS: u64 = 60;

/// Default mount table consulted for local devices.
pub const DEFAULT_LOCAL_DEVICES_FILE: &str = "/proc/mounts";

/// Process-wide settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "STEVEDORE",
    discovery(
        app_name = "stevedore",
        env_var = "STEVEDORE_CONFIG_PATH",
        config_file_name = "stevedore.toml",
        dotfile_name = ".stevedore.toml",
        project_file_name = "stevedore.toml"
    )
)]
pub struct StevedoreConfig {
    /// Driver used for the implicit primary service and for services that
    /// do not name a driver.
    #[ortho_config(default = "mock".to_owned())]
    pub default_driver: String,
    /// JSON file declaring services. Optional; without it only the implicit
    /// primary service exists.
    pub services_file: Option<String>,
    /// Directory holding `stevedore-lsx-<platform>` binaries to serve.
    pub executor_dir: Option<String>,
    /// Directory the client installs its executor into.
    pub tool_dir: Option<String>,
    /// Deadline for each executor invocation.
    #[ortho_config(default = DEFAULT_EXECUTOR_TIMEOUT_SECS)]
    pub executor_timeout_secs: u64,
    /// Mount table used by executors to enumerate local devices.
    #[ortho_config(default = DEFAULT_LOCAL_DEVICES_FILE.to_owned())]
    pub local_devices_file: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl StevedoreConfig {
    /// Settings with every default applied and no optional paths set.
    #[must_use]
    pub fn defaults() -> Self {
        Self {
            default_driver: String::from("mock"),
            services_file: None,
            executor_dir: None,
            tool_dir: None,
            executor_timeout_secs: DEFAULT_EXECUTOR_TIMEOUT_SECS,
            local_devices_file: DEFAULT_LOCAL_DEVICES_FILE.to_owned(),
        }
    }

    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to stevedore.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    fn require_optional_field(value: Option<&str>, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        value.map_or(Ok(()), |inner| Self::require_field(inner, metadata))
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("stevedore")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages include guidance on how
    /// to provide missing values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a field is blank and
    /// [`ConfigError::Invalid`] when the executor timeout is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.default_driver,
            &FieldMetadata::new("default driver", "STEVEDORE_DEFAULT_DRIVER", "default_driver"),
        )?;
        Self::require_field(
            &self.local_devices_file,
            &FieldMetadata::new(
                "local devices file",
                "STEVEDORE_LOCAL_DEVICES_FILE",
                "local_devices_file",
            ),
        )?;
        Self::require_optional_field(
            self.services_file.as_deref(),
            &FieldMetadata::new("services file", "STEVEDORE_SERVICES_FILE", "services_file"),
        )?;
        Self::require_optional_field(
            self.executor_dir.as_deref(),
            &FieldMetadata::new("executor directory", "STEVEDORE_EXECUTOR_DIR", "executor_dir"),
        )?;
        Self::require_optional_field(
            self.tool_dir.as_deref(),
            &FieldMetadata::new("tool directory", "STEVEDORE_TOOL_DIR", "tool_dir"),
        )?;
        if self.executor_timeout_secs == 0 {
            return Err(ConfigError::Invalid(String::from(
                "executor_timeout_secs must be greater than zero",
            )));
        }
        Ok(())
    }

    /// Deadline applied to each executor invocation.
    #[must_use]
    pub const fn executor_timeout(&self) -> Duration {
        Duration::from_secs(self.executor_timeout_secs)
    }

    /// Reads and parses the configured services, adding the implicit primary
    /// service for the default driver.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or its content is
    /// invalid.
    pub fn service_configs(&self) -> Result<Vec<ServiceConfig>, ConfigError> {
        let contents = match &self.services_file {
            Some(path) => read_services_file(Utf8Path::new(path))?,
            None => String::from("[]"),
        };
        parse_services(&contents, &self.default_driver)
    }

    /// Executor directory as a path, if configured.
    #[must_use]
    pub fn executor_dir_path(&self) -> Option<Utf8PathBuf> {
        self.executor_dir.as_deref().map(Utf8PathBuf::from)
    }
}

fn read_services_file(path: &Utf8Path) -> Result<String, ConfigError> {
    let parent = match path.parent() {
        Some(dir) if !dir.as_str().is_empty() => dir,
        _ => Utf8Path::new("."),
    };
    let file_name = path.file_name().ok_or_else(|| ConfigError::Services {
        path: path.to_path_buf(),
        message: String::from("services file path is missing a filename"),
    })?;
    Dir::open_ambient_dir(parent, ambient_authority())
        .and_then(|dir| dir.read_to_string(file_name))
        .map_err(|err| ConfigError::Services {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds an unusable value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// Raised when the services document cannot be read or parsed.
    #[error("invalid services file {path}: {message}")]
    Services {
        /// Path of the services document.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when two services share a name.
    #[error("service {0:?} is declared more than once")]
    DuplicateService(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

impl From<ConfigError> for StorageError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

#[cfg(test)]
mod tests;
