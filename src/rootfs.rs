//! An extracted container filesystem and the queries the minimizer runs
//! against it.
//!
//! All paths handed to a [`RootFs`] are image-absolute (`/usr/bin/env`);
//! they are joined onto the extraction directory for inspection and stay
//! image-absolute in every [`FileSet`] / [`SymlinkSet`] produced.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::MinimizeError;
use crate::fileset::{FileSet, SymlinkSet};

#[derive(Debug, Clone)]
pub struct RootFs {
    root: PathBuf,
}

impl RootFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Join an image-absolute path onto the extraction directory.
    pub fn host_path(&self, rel: &Path) -> PathBuf {
        match rel.strip_prefix("/") {
            Ok(stripped) => self.root.join(stripped),
            Err(_) => self.root.join(rel),
        }
    }

    /// True if the path resolves to a regular file (symlinks followed,
    /// dangling links excluded).
    pub fn is_file(&self, rel: &Path) -> bool {
        fs::metadata(self.host_path(rel)).is_ok_and(|m| !m.is_dir())
    }

    pub fn is_dir(&self, rel: &Path) -> bool {
        fs::metadata(self.host_path(rel)).is_ok_and(|m| m.is_dir())
    }

    pub fn is_symlink(&self, rel: &Path) -> bool {
        fs::symlink_metadata(self.host_path(rel)).is_ok_and(|m| m.file_type().is_symlink())
    }

    /// Read a symlink's target, expressed image-absolute.
    ///
    /// Relative targets resolve against the link's directory; the rootfs
    /// prefix is stripped so the result is meaningful inside the image.
    pub fn link_target(&self, rel: &Path) -> Option<PathBuf> {
        let host = self.host_path(rel);
        let target = fs::read_link(&host).ok()?;
        if target.is_absolute() {
            return Some(target);
        }
        let resolved = host.parent()?.join(target);
        let resolved = normalize(&resolved);
        match resolved.strip_prefix(&self.root) {
            Ok(stripped) => Some(Path::new("/").join(stripped)),
            Err(_) => Some(resolved),
        }
    }

    /// Classify a path and record it in the matching set.
    ///
    /// Paths that do not exist under the root are silently dropped: trace
    /// and linker output routinely mentions paths that only exist in other
    /// namespaces or have already disappeared.
    pub fn classify(&self, rel: &Path, files: &mut FileSet, symlinks: &mut SymlinkSet) {
        let rel = normalize(rel);
        if !self.is_file(&rel) {
            return;
        }
        if self.is_symlink(&rel) {
            if let Some(target) = self.link_target(&rel) {
                symlinks.insert(&rel, &target);
            }
        } else {
            files.insert(&rel);
        }
    }

    /// Enumerate every non-directory entry under the root, keyed by its
    /// immediate parent directory (the root itself keys under `/`).
    pub fn snapshot(&self) -> Result<FileSet, MinimizeError> {
        let meta = fs::metadata(&self.root)?;
        if !meta.is_dir() {
            return Err(MinimizeError::NotADirectory(self.root.clone()));
        }

        let mut set = FileSet::new();
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = entry.map_err(|e| {
                MinimizeError::Io(e.into_io_error().unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::Other, "walk aborted")
                }))
            })?;
            if entry.file_type().is_dir() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .expect("walkdir yields paths under its root");
            set.insert(&Path::new("/").join(rel));
        }
        Ok(set)
    }
}

/// Lexically normalize a path: collapse `.` and `..` without touching the
/// filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, RootFs) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::create_dir_all(root.join("usr/lib")).unwrap();
        fs::write(root.join("bin/app"), b"#!/bin/sh\n").unwrap();
        fs::write(root.join("usr/lib/libc.so.6"), b"elf").unwrap();
        symlink("libc.so.6", root.join("usr/lib/libc.so")).unwrap();
        let rootfs = RootFs::new(root);
        (tmp, rootfs)
    }

    #[test]
    fn test_snapshot_skips_directories() {
        let (_tmp, rootfs) = fixture();
        let set = rootfs.snapshot().unwrap();

        assert_eq!(set.file_count(), 3);
        assert!(set.contains(Path::new("/bin/app")));
        assert!(set.contains(Path::new("/usr/lib/libc.so")));
        assert!(!set.contains(Path::new("/usr/lib")));
    }

    #[test]
    fn test_snapshot_keys_by_parent() {
        let (_tmp, rootfs) = fixture();
        let set = rootfs.snapshot().unwrap();

        assert!(set.entries(Path::new("/usr/lib")).is_some());
        assert!(set.entries(Path::new("/bin")).is_some());
    }

    #[test]
    fn test_snapshot_rejects_non_directory() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("plain");
        fs::write(&file, b"x").unwrap();

        let err = RootFs::new(&file).snapshot().unwrap_err();
        assert!(matches!(err, MinimizeError::NotADirectory(_)));
    }

    #[test]
    fn test_classify_splits_files_and_symlinks() {
        let (_tmp, rootfs) = fixture();
        let mut files = FileSet::new();
        let mut links = SymlinkSet::new();

        rootfs.classify(Path::new("/usr/lib/libc.so.6"), &mut files, &mut links);
        rootfs.classify(Path::new("/usr/lib/libc.so"), &mut files, &mut links);
        rootfs.classify(Path::new("/does/not/exist"), &mut files, &mut links);

        assert_eq!(files.file_count(), 1);
        assert_eq!(links.len(), 1);
        let (link, target) = links.iter().next().unwrap();
        assert_eq!(link, &PathBuf::from("/usr/lib/libc.so"));
        assert_eq!(target, &PathBuf::from("/usr/lib/libc.so.6"));
    }

    #[test]
    fn test_dangling_symlink_is_dropped() {
        let (tmp, rootfs) = fixture();
        symlink("missing", tmp.path().join("bin/broken")).unwrap();

        let mut files = FileSet::new();
        let mut links = SymlinkSet::new();
        rootfs.classify(Path::new("/bin/broken"), &mut files, &mut links);

        assert!(files.is_empty());
        assert!(links.is_empty());
    }

    #[test]
    fn test_normalize_collapses_dots() {
        assert_eq!(
            normalize(Path::new("/usr/./lib/../bin/sh")),
            PathBuf::from("/usr/bin/sh")
        );
    }
}
