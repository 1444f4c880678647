//! Scratch directories shared by integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Include this module with:
//!
//! ```rust
//! #[path = "common/workspace.rs"]
//! mod workspace;
//! ```

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

/// Services document declaring two extra mock services after the implicit
/// primary one.
pub const THREE_MOCKS: &str = r#"[{"name": "mock2"}, {"name": "mock3"}]"#;

/// Mount points of the devices behind the seeded `vol-000` attachments.
pub const SEEDED_MOUNTS: [&str; 3] = ["/var/log", "/home", "/net/share"];

/// A temporary directory with UTF-8 path helpers.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Creates an empty workspace.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp dir"),
        }
    }

    /// Root of the workspace.
    pub fn path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(self.dir.path().to_path_buf()).expect("utf8 temp dir")
    }

    /// Writes `contents` to `name` under the workspace and returns its path.
    pub fn write(&self, name: &str, contents: &str) -> Utf8PathBuf {
        let path = self.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dir");
        }
        fs::write(&path, contents).expect("write file");
        path
    }

    /// Writes an executable shell script to `name`.
    #[cfg(unix)]
    pub fn write_script(&self, name: &str, body: &str) -> Utf8PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = self.write(name, &format!("#!/bin/sh\n{body}\n"));
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
        path
    }

    /// A subdirectory path, created on demand.
    pub fn dir(&self, name: &str) -> Utf8PathBuf {
        let path = self.path().join(name);
        fs::create_dir_all(&path).expect("create dir");
        path
    }
}

/// Reads a file written by the code under test.
pub fn read(path: &Utf8Path) -> Vec<u8> {
    fs::read(path).expect("read file")
}
