//! Shared test utilities for minicon tests.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use minicon::rootfs::RootFs;

/// Test environment with a mock extracted rootfs.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Mock rootfs directory
    pub rootfs_dir: PathBuf,
}

impl TestEnv {
    /// Create an empty rootfs.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let rootfs_dir = temp_dir.path().join("rootfs");
        fs::create_dir_all(&rootfs_dir).expect("Failed to create rootfs dir");
        Self {
            _temp_dir: temp_dir,
            rootfs_dir,
        }
    }

    pub fn rootfs(&self) -> RootFs {
        RootFs::new(&self.rootfs_dir)
    }

    /// Create a file (with parents) under the rootfs.
    pub fn add_file(&self, rel: &str, content: &[u8]) {
        let path = self.rootfs_dir.join(rel.trim_start_matches('/'));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dirs");
        }
        fs::write(&path, content).expect("Failed to write file");
    }

    /// Create a symlink under the rootfs.
    pub fn add_symlink(&self, rel: &str, target: &str) {
        let path = self.rootfs_dir.join(rel.trim_start_matches('/'));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dirs");
        }
        std::os::unix::fs::symlink(target, &path).expect("Failed to create symlink");
    }

    /// Populate `count` one-file directories under /data.
    pub fn add_spread(&self, count: usize) {
        for n in 0..count {
            self.add_file(&format!("/data/d{n:04}/file"), b"x");
        }
    }
}

/// Path helper for assertions.
pub fn p(s: &str) -> &Path {
    Path::new(s)
}
