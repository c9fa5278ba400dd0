//! Core data model: sets of files and symbolic links selected for an image.
//!
//! A [`FileSet`] groups absolute paths (relative to an extracted rootfs) by
//! directory so they can be emitted as one COPY directive per directory. A
//! [`SymlinkSet`] maps a link path to its resolved target. A path is always
//! classified as exactly one of regular file, symlink, or directory, so the
//! two sets never share keys.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Files grouped by directory.
///
/// Insertion is idempotent: appending an already-present path is a no-op.
/// Iteration order is deterministic (BTreeMap) so generated Dockerfiles are
/// stable across runs with the same contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSet {
    dirs: BTreeMap<PathBuf, Vec<PathBuf>>,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file path, keyed by its parent directory.
    ///
    /// The root path itself keys under `/`.
    pub fn insert(&mut self, path: &Path) {
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        self.insert_in(&dir, path);
    }

    /// Insert an entry under an explicit directory key.
    ///
    /// Used by the path-tree compressor, which re-homes entries under a
    /// common ancestor rather than their immediate parent.
    pub fn insert_in(&mut self, dir: &Path, entry: &Path) {
        let files = self.dirs.entry(dir.to_path_buf()).or_default();
        if !files.iter().any(|f| f == entry) {
            files.push(entry.to_path_buf());
        }
    }

    /// Remove one entry from a directory's list, dropping the key if the
    /// list becomes empty. Returns true if the entry was present.
    pub fn remove(&mut self, dir: &Path, entry: &Path) -> bool {
        let Some(files) = self.dirs.get_mut(dir) else {
            return false;
        };
        let Some(idx) = files.iter().position(|f| f == entry) else {
            return false;
        };
        files.remove(idx);
        if files.is_empty() {
            self.dirs.remove(dir);
        }
        true
    }

    /// Remove an entire directory key, returning its entries.
    pub fn remove_dir(&mut self, dir: &Path) -> Option<Vec<PathBuf>> {
        self.dirs.remove(dir)
    }

    pub fn contains(&self, path: &Path) -> bool {
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        self.dirs
            .get(&dir)
            .is_some_and(|files| files.iter().any(|f| f == path))
    }

    /// Number of directory keys.
    pub fn dir_count(&self) -> usize {
        self.dirs.len()
    }

    /// Total number of entries across all directories.
    pub fn file_count(&self) -> usize {
        self.dirs.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    pub fn entries(&self, dir: &Path) -> Option<&[PathBuf]> {
        self.dirs.get(dir).map(Vec::as_slice)
    }

    /// Directory keys in deterministic order.
    pub fn dir_keys(&self) -> Vec<PathBuf> {
        self.dirs.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &Vec<PathBuf>)> {
        self.dirs.iter()
    }

    /// Every entry across all directories, in deterministic order.
    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.dirs.values().flatten()
    }

    /// Merge another set into this one, deduplicating entries.
    pub fn merge(&mut self, other: &FileSet) {
        for (dir, files) in other.iter() {
            for file in files {
                self.insert_in(dir, file);
            }
        }
    }
}

/// Symbolic links selected for an image: link path → resolved target,
/// both expressed relative to the rootfs being inspected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymlinkSet {
    links: BTreeMap<PathBuf, PathBuf>,
}

impl SymlinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, link: &Path, target: &Path) {
        self.links.insert(link.to_path_buf(), target.to_path_buf());
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &PathBuf)> {
        self.links.iter()
    }

    pub fn merge(&mut self, other: &SymlinkSet) {
        for (link, target) in other.iter() {
            self.insert(link, target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_keys_by_parent() {
        let mut set = FileSet::new();
        set.insert(Path::new("/usr/lib/libc.so.6"));

        assert_eq!(set.dir_count(), 1);
        assert_eq!(
            set.entries(Path::new("/usr/lib")).unwrap(),
            &[PathBuf::from("/usr/lib/libc.so.6")]
        );
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut set = FileSet::new();
        for _ in 0..3 {
            set.insert(Path::new("/bin/sh"));
        }

        assert_eq!(set.file_count(), 1);
    }

    #[test]
    fn test_root_level_entry_keys_under_slash() {
        let mut set = FileSet::new();
        set.insert(Path::new("/init"));

        assert!(set.entries(Path::new("/")).is_some());
    }

    #[test]
    fn test_remove_drops_empty_dir_key() {
        let mut set = FileSet::new();
        set.insert(Path::new("/etc/passwd"));
        set.insert(Path::new("/etc/group"));

        assert!(set.remove(Path::new("/etc"), Path::new("/etc/passwd")));
        assert_eq!(set.dir_count(), 1);
        assert!(set.remove(Path::new("/etc"), Path::new("/etc/group")));
        assert_eq!(set.dir_count(), 0);
        assert!(!set.remove(Path::new("/etc"), Path::new("/etc/group")));
    }

    #[test]
    fn test_merge_deduplicates() {
        let mut a = FileSet::new();
        a.insert(Path::new("/bin/sh"));
        let mut b = FileSet::new();
        b.insert(Path::new("/bin/sh"));
        b.insert(Path::new("/bin/ls"));

        a.merge(&b);
        assert_eq!(a.file_count(), 2);
    }

    #[test]
    fn test_symlink_set_overwrites_target() {
        let mut links = SymlinkSet::new();
        links.insert(Path::new("/lib"), Path::new("/usr/lib"));
        links.insert(Path::new("/lib"), Path::new("/usr/lib64"));

        assert_eq!(links.len(), 1);
        let (_, target) = links.iter().next().unwrap();
        assert_eq!(target, &PathBuf::from("/usr/lib64"));
    }
}
