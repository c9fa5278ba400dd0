//! Archive materialization for large candidates.
//!
//! When a candidate holds too many files for per-file COPY directives, the
//! selection is serialized into one tar stream referenced by `ADD`.
//! Ownership is forced to root, symlinks store their target unfollowed,
//! directories carry a trailing separator, and a short list of well-known
//! sensitive paths gets fixed permissions regardless of what the extracted
//! rootfs says (the extraction step may have flattened them).

use std::fs::{self, File};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use tar::{Builder, EntryType, Header};
use tracing::warn;

use crate::error::MinimizeError;
use crate::fileset::FileSet;
use crate::rootfs::RootFs;

/// Candidates above this many files are materialized as an archive
/// instead of COPY directives.
pub const ARCHIVE_THRESHOLD: usize = 256;

/// Permission overrides applied by path, regardless of source metadata.
const MODE_OVERRIDES: &[(&str, u32)] = &[
    ("/tmp", 0o1777),
    ("/var/tmp", 0o1777),
    ("/root", 0o700),
];

/// Serialize every entry of `files` into a tar archive at `dest`.
///
/// Individual entries that cannot be read are logged and skipped: files
/// can legitimately disappear between enumeration and archiving.
pub fn build_archive(files: &FileSet, rootfs: &RootFs, dest: &Path) -> Result<(), MinimizeError> {
    let out = File::create(dest)?;
    let mut builder = Builder::new(out);
    builder.follow_symlinks(false);

    for path in files.paths() {
        if let Err(e) = append_entry(&mut builder, path, rootfs) {
            warn!("skipping {}: {e}", path.display());
        }
    }

    builder.into_inner()?.sync_all()?;
    Ok(())
}

fn append_entry(
    builder: &mut Builder<File>,
    path: &Path,
    rootfs: &RootFs,
) -> Result<(), MinimizeError> {
    let host = rootfs.host_path(path);
    let meta = fs::symlink_metadata(&host)?;

    let mut header = Header::new_gnu();
    header.set_mtime(meta.mtime().max(0) as u64);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(override_mode(path).unwrap_or(meta.mode() & 0o7777));
    let _ = header.set_username("root");
    let _ = header.set_groupname("root");

    // tar names are root-relative; "/usr/bin/env" becomes "usr/bin/env"
    let name = path
        .to_string_lossy()
        .trim_start_matches('/')
        .to_string();

    if meta.file_type().is_symlink() {
        let target = fs::read_link(&host)?;
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        builder.append_link(&mut header, &name, &target)?;
    } else if meta.is_dir() {
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        let name = if name.ends_with('/') {
            name
        } else {
            format!("{name}/")
        };
        builder.append_data(&mut header, &name, io::empty())?;
    } else {
        header.set_entry_type(EntryType::Regular);
        header.set_size(meta.len());
        let file = File::open(&host)?;
        builder.append_data(&mut header, &name, file)?;
    }
    Ok(())
}

fn override_mode(path: &Path) -> Option<u32> {
    let cleaned = path.to_string_lossy();
    let cleaned = cleaned.trim_end_matches('/');
    MODE_OVERRIDES
        .iter()
        .find(|(p, _)| *p == cleaned)
        .map(|(_, mode)| *mode)
}
