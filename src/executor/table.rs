//! Server-side table of executor binaries per host platform.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{Result, StorageError};

/// Base name shared by every executor binary.
pub const EXECUTOR_BASENAME: &str = "stevedore-lsx";

/// Host operating systems with a dedicated executor build.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Platform {
    /// Linux hosts.
    Linux,
    /// macOS hosts.
    Darwin,
    /// Windows hosts.
    Windows,
}

impl Platform {
    /// Every platform in advertisement order.
    pub const ALL: [Self; 3] = [Self::Linux, Self::Darwin, Self::Windows];

    /// File name of the executor built for this platform.
    #[must_use]
    pub const fn executor_name(self) -> &'static str {
        match self {
            Self::Linux => "stevedore-lsx-linux",
            Self::Darwin => "stevedore-lsx-darwin",
            Self::Windows => "stevedore-lsx-windows.exe",
        }
    }

    /// Platform of the running process, if it has an executor build.
    #[must_use]
    pub fn current() -> Option<Self> {
        Self::from_os(std::env::consts::OS)
    }

    /// Maps a Rust target OS name onto a platform.
    #[must_use]
    pub fn from_os(os: &str) -> Option<Self> {
        match os {
            "linux" => Some(Self::Linux),
            "macos" | "darwin" => Some(Self::Darwin),
            "windows" => Some(Self::Windows),
            _ => None,
        }
    }
}

/// Metadata a client uses to decide whether its executor copy is current.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ExecutorInfo {
    /// Executor file name, for example `stevedore-lsx-linux`.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Lowercase hex SHA-256 digest of the binary.
    pub sha256: String,
}

#[derive(Clone, Debug)]
struct ExecutorEntry {
    platform: Platform,
    path: Utf8PathBuf,
    info: ExecutorInfo,
}

/// Executors available for download, built once at startup.
#[derive(Clone, Debug, Default)]
pub struct ExecutorTable {
    entries: Vec<ExecutorEntry>,
}

impl ExecutorTable {
    /// An empty table for processes that do not serve executors.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Scans `dir` for platform executors and records their checksums.
    ///
    /// Platforms without a binary in `dir` are simply absent.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] when `dir` cannot be opened and
    /// [`StorageError::Internal`] when a present binary cannot be read.
    pub fn scan(dir: &Utf8Path) -> Result<Self> {
        let handle = Dir::open_ambient_dir(dir, ambient_authority()).map_err(|err| {
            StorageError::Config(format!("executor directory {dir} is unusable: {err}"))
        })?;
        let mut entries = Vec::new();
        for platform in Platform::ALL {
            let name = platform.executor_name();
            let bytes = match handle.read(name) {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(StorageError::Internal(format!(
                        "failed to read {dir}/{name}: {err}"
                    )));
                }
            };
            let info = ExecutorInfo {
                name: name.to_owned(),
                size: bytes.len() as u64,
                sha256: sha256_hex(&bytes),
            };
            debug!(name, size = info.size, "registered executor");
            entries.push(ExecutorEntry {
                platform,
                path: dir.join(name),
                info,
            });
        }
        info!(count = entries.len(), %dir, "executor table built");
        Ok(Self { entries })
    }

    /// Metadata for every available executor.
    #[must_use]
    pub fn list(&self) -> Vec<ExecutorInfo> {
        self.entries.iter().map(|entry| entry.info.clone()).collect()
    }

    /// Metadata for one executor by file name.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown names.
    pub fn inspect(&self, name: &str) -> Result<ExecutorInfo> {
        self.entry(name).map(|entry| entry.info.clone())
    }

    /// Metadata for the executor built for `platform`, if present.
    #[must_use]
    pub fn for_platform(&self, platform: Platform) -> Option<&ExecutorInfo> {
        self.entries
            .iter()
            .find(|entry| entry.platform == platform)
            .map(|entry| &entry.info)
    }

    /// Reads an executor's bytes, refusing to serve a binary whose content
    /// no longer matches the advertised checksum.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown names and
    /// [`StorageError::Internal`] when the file cannot be read or changed on
    /// disk after the table was built.
    pub fn fetch(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self.entry(name)?;
        let parent = entry.path.parent().unwrap_or_else(|| Utf8Path::new("."));
        let bytes = Dir::open_ambient_dir(parent, ambient_authority())
            .and_then(|dir| dir.read(name))
            .map_err(|err| StorageError::Internal(format!("failed to read {}: {err}", entry.path)))?;
        if sha256_hex(&bytes) != entry.info.sha256 {
            return Err(StorageError::Internal(format!(
                "{} changed on disk since startup",
                entry.path
            )));
        }
        Ok(bytes)
    }

    fn entry(&self, name: &str) -> Result<&ExecutorEntry> {
        self.entries
            .iter()
            .find(|entry| entry.info.name == name)
            .ok_or_else(|| StorageError::not_found("executor", name))
    }
}

/// Lowercase hex SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
