//! Path-tree compression: bound the number of directory groupings.
//!
//! A Dockerfile supports only so many COPY directives before builds get
//! unwieldy, so before a candidate is materialized its directory keys are
//! merged pairwise under their lowest common ancestor until at most
//! [`MAX_COPY_DIRECTIVES`] keys remain. Collapsed keys become recursive
//! members (`dir/`) of the ancestor entry, trading directive count for
//! directive breadth.

use std::path::{Path, PathBuf};

use crate::fileset::FileSet;
use crate::rootfs::RootFs;

/// Upper bound on directory keys handed to the Dockerfile generator.
pub const MAX_COPY_DIRECTIVES: usize = 127;

/// Deepest directory path that is a segment-prefix of both inputs.
///
/// Falls back to the filesystem root when no segments are shared.
pub fn lowest_common_ancestor(a: &Path, b: &Path) -> PathBuf {
    let segs = |p: &Path| -> Vec<String> {
        p.to_string_lossy()
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    };
    let (sa, sb) = (segs(a), segs(b));
    let shared = sa
        .iter()
        .zip(sb.iter())
        .take_while(|(x, y)| x == y)
        .count();
    if shared == 0 {
        return PathBuf::from("/");
    }
    PathBuf::from(format!("/{}", sa[..shared].join("/")))
}

/// Merge directory keys pairwise until at most `limit` remain.
///
/// Deterministic given the set's (sorted) key order. Keys that collapse
/// into an ancestor are recorded as recursive members (trailing separator
/// when the key names a directory in the rootfs); a key that *is* the
/// ancestor keeps its original entries. When the ancestor already holds an
/// entry, member lists are merged and then themselves collapsed to their
/// pairwise ancestors so a single key's list cannot grow without bound
/// across repeated passes.
pub fn compress(files: &FileSet, rootfs: &RootFs, limit: usize) -> FileSet {
    let mut dict = files.clone();

    while dict.dir_count() > limit {
        let keys = dict.dir_keys();
        let mut i = 0;
        while i + 1 < keys.len() {
            let (left, right) = (&keys[i], &keys[i + 1]);
            i += 2;

            let left_entries = dict.remove_dir(left).unwrap_or_default();
            let right_entries = dict.remove_dir(right).unwrap_or_default();
            let ancestor = lowest_common_ancestor(left, right);
            let existing = dict.remove_dir(&ancestor);
            let had_existing = existing.is_some();

            let mut members: Vec<PathBuf> = existing.unwrap_or_default();
            for (key, entries) in [(left, left_entries), (right, right_entries)] {
                if key.as_path() == ancestor.as_path() {
                    // The ancestor itself: keep its concrete entries.
                    for entry in entries {
                        push_missing(&mut members, entry);
                    }
                } else {
                    push_missing(&mut members, recursive_member(key, rootfs));
                }
            }

            if had_existing {
                // Collapse the merged list to its distinct pairwise
                // ancestors when more than one remains.
                let mut collapsed: Vec<PathBuf> = Vec::new();
                for x in 0..members.len() {
                    for y in x + 1..members.len() {
                        push_missing(
                            &mut collapsed,
                            lowest_common_ancestor(&members[x], &members[y]),
                        );
                    }
                }
                if collapsed.len() > 1 {
                    members = collapsed;
                }
            }

            if !members.is_empty() {
                for member in &members {
                    dict.insert_in(&ancestor, member);
                }
            }
        }
    }
    dict
}

fn recursive_member(key: &Path, rootfs: &RootFs) -> PathBuf {
    if rootfs.is_dir(key) {
        PathBuf::from(format!("{}/", key.display()))
    } else {
        key.to_path_buf()
    }
}

fn push_missing(list: &mut Vec<PathBuf>, item: PathBuf) {
    if !list.iter().any(|p| p == &item) {
        list.push(item);
    }
}
