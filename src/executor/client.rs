//! Invokes an installed executor binary and decodes its replies.

use std::ffi::OsString;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use super::{LsxCommand, next_device_args};
use crate::error::{ErrorKind, JsonError, Result, StorageError};
use crate::runner::CommandRunner;
use crate::types::{ExecutorOps, InstanceId, LocalDevices, NextDeviceInfo};

/// Runs executor commands through a [`CommandRunner`] with a deadline.
#[derive(Clone)]
pub struct ExecutorClient {
    runner: Arc<dyn CommandRunner>,
    program: Utf8PathBuf,
    timeout: Duration,
}

impl fmt::Debug for ExecutorClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorClient")
            .field("program", &self.program)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ExecutorClient {
    /// Creates a client for the executor at `program`.
    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<Utf8PathBuf>, timeout: Duration) -> Self {
        Self {
            runner,
            program: program.into(),
            timeout,
        }
    }

    /// Path of the executor binary.
    #[must_use]
    pub fn program(&self) -> &Utf8Path {
        &self.program
    }

    /// Runs `command` for `driver` and decodes the JSON reply.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Timeout`] when the executor overruns and is
    /// killed, the executor's own error when it exits non-zero with a
    /// structured reply, and [`StorageError::Transport`] otherwise.
    #[instrument(skip(self), fields(program = %self.program))]
    pub async fn invoke<T: DeserializeOwned>(
        &self,
        driver: &str,
        command: LsxCommand,
        args: &[String],
    ) -> Result<T> {
        let mut argv = Vec::with_capacity(args.len() + 2);
        argv.push(OsString::from(driver));
        argv.push(OsString::from(command.as_str()));
        argv.extend(args.iter().map(OsString::from));

        let output = self
            .runner
            .run(self.program.as_str(), &argv, self.timeout)
            .await?;
        if output.is_success() {
            debug!(stdout = output.stdout.trim(), "executor replied");
            return Ok(serde_json::from_str(output.stdout.trim())?);
        }

        let Some(code) = output.code else {
            return Err(StorageError::Transport(format!(
                "executor {command} terminated without an exit status"
            )));
        };
        match serde_json::from_str::<JsonError>(output.stderr.trim()) {
            Ok(err) => {
                let kind = ErrorKind::from_exit_code(code).unwrap_or_else(|| err.kind());
                Err(err.into_error(kind))
            }
            Err(_) => Err(StorageError::Transport(format!(
                "executor {command} exited with {code}: {}",
                output.diagnostics()
            ))),
        }
    }

    /// Queries the commands the executor implements for `driver`.
    ///
    /// # Errors
    ///
    /// See [`ExecutorClient::invoke`].
    pub async fn supported(&self, driver: &str) -> Result<ExecutorOps> {
        self.invoke(driver, LsxCommand::Supported, &[]).await
    }

    /// Queries the host's identity for `driver`.
    ///
    /// # Errors
    ///
    /// See [`ExecutorClient::invoke`].
    pub async fn instance_id(&self, driver: &str) -> Result<InstanceId> {
        self.invoke(driver, LsxCommand::InstanceId, &[]).await
    }

    /// Queries the next free device name for `driver`.
    ///
    /// # Errors
    ///
    /// See [`ExecutorClient::invoke`].
    pub async fn next_device(&self, driver: &str, info: &NextDeviceInfo) -> Result<Option<String>> {
        if info.ignore {
            return Ok(None);
        }
        self.invoke(driver, LsxCommand::NextDevice, &next_device_args(info))
            .await
    }

    /// Queries the host's local devices for `driver`.
    ///
    /// # Errors
    ///
    /// See [`ExecutorClient::invoke`].
    pub async fn local_devices(&self, driver: &str) -> Result<LocalDevices> {
        self.invoke(driver, LsxCommand::LocalDevices, &[]).await
    }
}
