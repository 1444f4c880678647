//! Client-side executor installation into the tool directory.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use tracing::info;

use super::table::{ExecutorInfo, sha256_hex};
use crate::error::{Result, StorageError};

/// Checksum of the executor already installed in `tool_dir`, if any.
///
/// # Errors
///
/// Returns [`StorageError::Internal`] when the file exists but cannot be
/// read.
pub fn installed_checksum(tool_dir: &Utf8Path, name: &str) -> Result<Option<String>> {
    let dir = match Dir::open_ambient_dir(tool_dir, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_error(tool_dir, &err)),
    };
    match dir.read(name) {
        Ok(bytes) => Ok(Some(sha256_hex(&bytes))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_error(&tool_dir.join(name), &err)),
    }
}

/// Verifies `bytes` against `info` and installs them as an executable in
/// `tool_dir`, replacing any previous copy atomically.
///
/// # Errors
///
/// Returns [`StorageError::Transport`] when the bytes do not match the
/// advertised size or checksum, and [`StorageError::Internal`] when the file
/// cannot be written.
pub fn install_executor(tool_dir: &Utf8Path, info: &ExecutorInfo, bytes: &[u8]) -> Result<Utf8PathBuf> {
    let digest = sha256_hex(bytes);
    if digest != info.sha256 || bytes.len() as u64 != info.size {
        return Err(StorageError::Transport(format!(
            "executor {} failed verification: expected sha256 {}, got {digest}",
            info.name, info.sha256
        )));
    }

    Dir::create_ambient_dir_all(tool_dir, ambient_authority())
        .map_err(|err| io_error(tool_dir, &err))?;
    let dir = Dir::open_ambient_dir(tool_dir, ambient_authority())
        .map_err(|err| io_error(tool_dir, &err))?;
    let staging = format!(".{}.partial", info.name);
    dir.write(&staging, bytes)
        .map_err(|err| io_error(&tool_dir.join(&staging), &err))?;
    mark_executable(&tool_dir.join(&staging))?;
    dir.rename(&staging, &dir, &info.name)
        .map_err(|err| io_error(&tool_dir.join(&info.name), &err))?;

    let path = tool_dir.join(&info.name);
    info!(%path, sha256 = %info.sha256, "installed executor");
    Ok(path)
}

#[cfg(unix)]
fn mark_executable(path: &Utf8Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .map_err(|err| io_error(path, &err))
}

#[cfg(not(unix))]
fn mark_executable(_path: &Utf8Path) -> Result<()> {
    Ok(())
}

fn io_error(path: &Utf8Path, err: &io::Error) -> StorageError {
    StorageError::Internal(format!("failed to access {path}: {err}"))
}
