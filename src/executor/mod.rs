//! Host-local executor protocol.
//!
//! An executor is a small binary that answers questions only the host can
//! answer: who am I to this driver, which device name comes next, and which
//! block devices are mounted where. Each call is one process invocation:
//! `stevedore-lsx <driver> <command> [args...]`. Success prints one JSON
//! value on stdout and exits `0`. Failure prints a [`JsonError`] on stderr
//! and exits with the per-kind code from [`ErrorKind::exit_code`].
//!
//! [`ErrorKind::exit_code`]: crate::error::ErrorKind::exit_code

use std::collections::BTreeSet;
use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

use async_trait::async_trait;
use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde_json::Value;
use tracing::debug;

use crate::error::{JsonError, Result, StorageError};
use crate::types::{ExecutorOps, InstanceId, LocalDevices, NextDeviceInfo};

mod client;
mod install;
mod table;

pub use client::ExecutorClient;
pub use install::{install_executor, installed_checksum};
pub use table::{EXECUTOR_BASENAME, ExecutorInfo, ExecutorTable, Platform, sha256_hex};

/// Commands understood by every executor.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum LsxCommand {
    /// Report the [`ExecutorOps`] bitmask.
    Supported,
    /// Report the host's [`InstanceId`].
    InstanceId,
    /// Report the next free device name.
    NextDevice,
    /// Report [`LocalDevices`].
    LocalDevices,
}

impl LsxCommand {
    /// Wire name of the command.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Supported => "supported",
            Self::InstanceId => "instanceID",
            Self::NextDevice => "nextDevice",
            Self::LocalDevices => "localDevices",
        }
    }

    /// Bit that must be advertised before the command may be invoked.
    #[must_use]
    pub const fn required_op(self) -> ExecutorOps {
        match self {
            Self::Supported => ExecutorOps::NONE,
            Self::InstanceId => ExecutorOps::INSTANCE_ID,
            Self::NextDevice => ExecutorOps::NEXT_DEVICE,
            Self::LocalDevices => ExecutorOps::LOCAL_DEVICES,
        }
    }
}

impl fmt::Display for LsxCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LsxCommand {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "supported" => Ok(Self::Supported),
            "instanceID" => Ok(Self::InstanceId),
            "nextDevice" => Ok(Self::NextDevice),
            "localDevices" => Ok(Self::LocalDevices),
            other => Err(StorageError::Unsupported(format!(
                "unknown executor command {other:?}"
            ))),
        }
    }
}

/// Host-side behaviour of one driver's executor.
#[async_trait]
pub trait LocalExecutor: Send + Sync {
    /// Driver the executor serves.
    fn driver(&self) -> &str;

    /// Commands implemented on this platform.
    fn supported(&self) -> ExecutorOps;

    /// Determines the host's identity for the driver.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Resolution`] when no identity can be derived.
    async fn instance_id(&self) -> Result<InstanceId> {
        Err(StorageError::Unsupported(String::from("instanceID")))
    }

    /// Returns the next unused device name, or `None` if none is needed.
    ///
    /// # Errors
    ///
    /// Returns an error when the device namespace cannot be read.
    async fn next_device(&self, _info: &NextDeviceInfo) -> Result<Option<String>> {
        Err(StorageError::Unsupported(String::from("nextDevice")))
    }

    /// Enumerates block devices visible to the host.
    ///
    /// # Errors
    ///
    /// Returns an error when the mount table cannot be read.
    async fn local_devices(&self) -> Result<LocalDevices> {
        Err(StorageError::Unsupported(String::from("localDevices")))
    }
}

/// Runs one executor command and returns its JSON payload.
///
/// # Errors
///
/// Returns [`StorageError::Unsupported`] when the command is unknown or not
/// advertised, [`StorageError::Validation`] for malformed arguments, and any
/// error the executor raises.
pub async fn execute(
    executor: &dyn LocalExecutor,
    name: &str,
    args: &[String],
) -> Result<Value> {
    let command: LsxCommand = name.parse()?;
    let ops = executor.supported();
    if !ops.contains(command.required_op()) {
        return Err(StorageError::Unsupported(format!(
            "{command} is not supported by the {} executor on this platform",
            executor.driver()
        )));
    }
    debug!(driver = executor.driver(), %command, ?args, "executing");
    let value = match command {
        LsxCommand::Supported => serde_json::to_value(ops)?,
        LsxCommand::InstanceId => serde_json::to_value(executor.instance_id().await?)?,
        LsxCommand::NextDevice => {
            let info = parse_next_device_args(args)?;
            if info.ignore {
                Value::Null
            } else {
                serde_json::to_value(executor.next_device(&info).await?)?
            }
        }
        LsxCommand::LocalDevices => serde_json::to_value(executor.local_devices().await?)?,
    };
    Ok(value)
}

/// Runs one executor command, writing the protocol output and returning the
/// process exit code.
///
/// # Errors
///
/// Returns an I/O error only when stdout or stderr cannot be written.
pub async fn run_executor(
    executor: &dyn LocalExecutor,
    command: &str,
    args: &[String],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> io::Result<i32> {
    match execute(executor, command, args).await {
        Ok(value) => {
            writeln!(stdout, "{value}")?;
            Ok(0)
        }
        Err(err) => {
            let body = serde_json::to_string(&err.to_json()).map_err(io::Error::other)?;
            writeln!(stderr, "{body}")?;
            Ok(err.kind().exit_code())
        }
    }
}

/// Reports a protocol-level failure that happened before dispatch, such as
/// a missing command argument.
///
/// # Errors
///
/// Returns an I/O error when stderr cannot be written.
pub fn report_failure(err: &StorageError, stderr: &mut dyn Write) -> io::Result<i32> {
    let body = serde_json::to_string(&JsonError::from(err)).map_err(io::Error::other)?;
    writeln!(stderr, "{body}")?;
    Ok(err.kind().exit_code())
}

/// Renders [`NextDeviceInfo`] as `nextDevice` arguments.
#[must_use]
pub fn next_device_args(info: &NextDeviceInfo) -> Vec<String> {
    vec![
        info.ignore.to_string(),
        info.prefix.clone(),
        info.pattern.clone(),
    ]
}

fn parse_next_device_args(args: &[String]) -> Result<NextDeviceInfo> {
    match args {
        [flag, prefix, pattern] => {
            let ignore = flag.parse::<bool>().map_err(|_| {
                StorageError::Validation(format!("ignore flag must be true or false, got {flag:?}"))
            })?;
            Ok(NextDeviceInfo {
                ignore,
                prefix: prefix.clone(),
                pattern: pattern.clone(),
            })
        }
        _ => Err(StorageError::Validation(String::from(
            "nextDevice expects <ignore> <prefix> <pattern>",
        ))),
    }
}

/// Single character class that follows a device prefix.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DevicePattern {
    /// `\w`: lowercase letters `a` to `z`.
    Word,
    /// `\d`: digits `0` to `9`.
    Digit,
    /// `[x-y]`: an inclusive character range.
    Range(char, char),
    /// A single literal character.
    Literal(char),
}

impl DevicePattern {
    /// Candidate suffix characters in the order they are tried.
    #[must_use]
    pub fn candidates(&self) -> Vec<char> {
        match self {
            Self::Word => ('a'..='z').collect(),
            Self::Digit => ('0'..='9').collect(),
            Self::Range(first, last) => (*first..=*last).collect(),
            Self::Literal(ch) => vec![*ch],
        }
    }
}

impl FromStr for DevicePattern {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || StorageError::Validation(format!("unsupported device pattern {s:?}"));
        match s {
            r"\w" => return Ok(Self::Word),
            r"\d" => return Ok(Self::Digit),
            _ => {}
        }
        let chars: Vec<char> = s.chars().collect();
        match chars.as_slice() {
            ['[', first, '-', last, ']'] if first <= last => Ok(Self::Range(*first, *last)),
            [ch] if ch.is_ascii_alphanumeric() => Ok(Self::Literal(*ch)),
            _ => Err(invalid()),
        }
    }
}

/// Returns the first `/dev/<prefix><c>` name absent from `existing`.
///
/// # Errors
///
/// Returns [`StorageError::Validation`] for an unsupported pattern and
/// [`StorageError::Conflict`] when every candidate is taken.
pub fn next_device_name(info: &NextDeviceInfo, existing: &BTreeSet<String>) -> Result<Option<String>> {
    if info.ignore {
        return Ok(None);
    }
    let pattern: DevicePattern = info.pattern.parse()?;
    pattern
        .candidates()
        .into_iter()
        .map(|suffix| format!("/dev/{}{suffix}", info.prefix))
        .find(|name| !existing.contains(name))
        .map(Some)
        .ok_or_else(|| {
            StorageError::Conflict(format!(
                "no free device names for prefix {}",
                info.prefix
            ))
        })
}

/// Lists entries of a device directory as absolute `/dev/...` style paths.
///
/// # Errors
///
/// Returns [`StorageError::Internal`] when the directory cannot be read.
pub fn scan_device_dir(dir: &Utf8Path) -> Result<BTreeSet<String>> {
    let handle = Dir::open_ambient_dir(dir, ambient_authority())
        .map_err(|err| StorageError::Internal(format!("failed to open {dir}: {err}")))?;
    let entries = handle
        .entries()
        .map_err(|err| StorageError::Internal(format!("failed to list {dir}: {err}")))?;
    let mut names = BTreeSet::new();
    for entry in entries {
        let name = entry
            .and_then(|item| item.file_name())
            .map_err(|err| StorageError::Internal(format!("failed to list {dir}: {err}")))?;
        names.insert(format!("/dev/{name}"));
    }
    Ok(names)
}

/// Parses a `/proc/mounts` style table into a device map.
///
/// Only `/dev/` devices are kept, optionally narrowed to `device_prefix`.
/// When a device is mounted more than once the first mount point wins.
#[must_use]
pub fn parse_mounts(driver: &str, contents: &str, device_prefix: Option<&str>) -> LocalDevices {
    let mut devices = LocalDevices {
        driver: driver.to_owned(),
        ..LocalDevices::default()
    };
    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let (Some(device), Some(mount)) = (fields.next(), fields.next()) else {
            continue;
        };
        if !device.starts_with("/dev/") {
            continue;
        }
        if device_prefix.is_some_and(|prefix| !device.starts_with(prefix)) {
            continue;
        }
        devices
            .device_map
            .entry(unescape_mount_field(device))
            .or_insert_with(|| unescape_mount_field(mount));
    }
    devices
}

/// Reads and parses a mount table from disk. See [`parse_mounts`].
///
/// # Errors
///
/// Returns [`StorageError::Internal`] when the file cannot be read.
pub fn read_mounts(driver: &str, path: &Utf8Path, device_prefix: Option<&str>) -> Result<LocalDevices> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("/"));
    let file_name = path
        .file_name()
        .ok_or_else(|| StorageError::Config(format!("{path} is not a file path")))?;
    let contents = Dir::open_ambient_dir(parent, ambient_authority())
        .and_then(|dir| dir.read_to_string(file_name))
        .map_err(|err| StorageError::Internal(format!("failed to read {path}: {err}")))?;
    Ok(parse_mounts(driver, &contents, device_prefix))
}

fn unescape_mount_field(raw: &str) -> String {
    raw.replace(r"\040", " ")
        .replace(r"\011", "\t")
        .replace(r"\012", "\n")
        .replace(r"\134", "\\")
}

#[cfg(test)]
mod tests;
