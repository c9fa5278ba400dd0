//! Static linkage extraction: resolve a command's dynamic library
//! dependencies with the image's own linker.
//!
//! Runs `ldd` inside a chroot of the extracted rootfs so resolution uses
//! the image's linker search paths, then parses the line-oriented output
//! into a (files, symlinks) candidate set. Cheap first guess before
//! tracing or bisection.

use std::path::Path;

use tracing::{debug, info};

use crate::error::MinimizeError;
use crate::fileset::{FileSet, SymlinkSet};
use crate::process::{shell, sudo_prefix};
use crate::rootfs::RootFs;

/// Resolve dynamic dependencies of `command` (an image-absolute path or a
/// bare name findable via `which` inside the chroot).
pub async fn resolve_dependencies(
    rootfs: &RootFs,
    command: &str,
) -> Result<(FileSet, SymlinkSet), MinimizeError> {
    let sudo = sudo_prefix();
    let root = rootfs.path().display();
    let ldd_cmd = format!(
        "{sudo}chroot {root} ldd $({sudo}chroot {root} which {command})"
    );
    debug!("running: {ldd_cmd}");

    let result = shell(&ldd_cmd)
        .await
        .map_err(|e| MinimizeError::ToolUnavailable(format!("ldd: {e}")))?;
    if !result.success() {
        return Err(MinimizeError::ToolUnavailable(format!(
            "ldd failed for '{command}': {}",
            result.stderr_trimmed()
        )));
    }

    Ok(parse_ldd_output(&result.stdout, rootfs))
}

/// Parse ldd output into files and symlinks.
///
/// Three line shapes:
/// - `libname.so => /path/libname.so (0x...)`
/// - `libname.so => not found`
/// - `/lib64/ld-linux-x86-64.so.2 (0x...)` (the dynamic linker itself)
///
/// "not found" entries are unresolved dependencies, not errors; paths that
/// do not exist under the rootfs are dropped during classification.
pub fn parse_ldd_output(output: &str, rootfs: &RootFs) -> (FileSet, SymlinkSet) {
    let mut files = FileSet::new();
    let mut symlinks = SymlinkSet::new();

    for line in output.lines() {
        if line.contains("not found") {
            continue;
        }
        let resolved = if let Some((_, rhs)) = line.split_once("=>") {
            rhs.trim().split_whitespace().next()
        } else {
            line.trim().split_whitespace().next()
        };
        let Some(lib) = resolved else { continue };
        if !lib.starts_with('/') {
            // vdso and friends resolve to no real file
            continue;
        }
        rootfs.classify(Path::new(lib), &mut files, &mut symlinks);
    }

    (files, symlinks)
}

/// Full static phase: pick the command out of the image metadata and
/// resolve its linkage.
pub async fn static_analysis(
    rootfs: &RootFs,
    entrypoint: &[String],
    cmd: &[String],
) -> Result<(FileSet, SymlinkSet), MinimizeError> {
    let command = entrypoint
        .first()
        .or_else(|| cmd.first())
        .ok_or(MinimizeError::NoCommand)?;
    let name = Path::new(command)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or(MinimizeError::NoCommand)?;

    info!("static analysis of command: {name}");
    let (files, symlinks) = resolve_dependencies(rootfs, &name).await?;
    info!(
        "linkage extractor found {} files, {} symlinks",
        files.file_count(),
        symlinks.len()
    );
    Ok((files, symlinks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn rootfs_with_libs() -> (TempDir, RootFs) {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("lib64")).unwrap();
        fs::write(tmp.path().join("lib64/libc.so.6"), b"elf").unwrap();
        fs::write(tmp.path().join("lib64/ld-linux-x86-64.so.2"), b"elf").unwrap();
        fs::write(tmp.path().join("lib64/libm.so.6.1"), b"elf").unwrap();
        symlink("libm.so.6.1", tmp.path().join("lib64/libm.so.6")).unwrap();
        let rootfs = RootFs::new(tmp.path());
        (tmp, rootfs)
    }

    #[test]
    fn test_parse_standard_arrow_lines() {
        let (_tmp, rootfs) = rootfs_with_libs();
        let output = "\tlibc.so.6 => /lib64/libc.so.6 (0x00007f12)\n";

        let (files, symlinks) = parse_ldd_output(output, &rootfs);
        assert!(files.contains(Path::new("/lib64/libc.so.6")));
        assert!(symlinks.is_empty());
    }

    #[test]
    fn test_parse_bare_linker_line() {
        let (_tmp, rootfs) = rootfs_with_libs();
        let output = "\t/lib64/ld-linux-x86-64.so.2 (0x00007f34)\n";

        let (files, _) = parse_ldd_output(output, &rootfs);
        assert!(files.contains(Path::new("/lib64/ld-linux-x86-64.so.2")));
    }

    #[test]
    fn test_parse_skips_not_found() {
        let (_tmp, rootfs) = rootfs_with_libs();
        let output = "\tlibmissing.so => not found\n";

        let (files, symlinks) = parse_ldd_output(output, &rootfs);
        assert!(files.is_empty());
        assert!(symlinks.is_empty());
    }

    #[test]
    fn test_parse_skips_vdso() {
        let (_tmp, rootfs) = rootfs_with_libs();
        let output = "\tlinux-vdso.so.1 (0x00007ffc)\n";

        let (files, symlinks) = parse_ldd_output(output, &rootfs);
        assert!(files.is_empty());
        assert!(symlinks.is_empty());
    }

    #[test]
    fn test_parse_classifies_symlinked_lib() {
        let (_tmp, rootfs) = rootfs_with_libs();
        let output = "\tlibm.so.6 => /lib64/libm.so.6 (0x00007f56)\n";

        let (files, symlinks) = parse_ldd_output(output, &rootfs);
        assert!(files.is_empty());
        assert_eq!(symlinks.len(), 1);
        let (link, target) = symlinks.iter().next().unwrap();
        assert_eq!(link, Path::new("/lib64/libm.so.6"));
        assert_eq!(target, Path::new("/lib64/libm.so.6.1"));
    }

    #[test]
    fn test_parse_drops_paths_outside_rootfs() {
        let (_tmp, rootfs) = rootfs_with_libs();
        let output = "\tlibfoo.so => /opt/vendor/libfoo.so (0x1)\n";

        let (files, symlinks) = parse_ldd_output(output, &rootfs);
        assert!(files.is_empty());
        assert!(symlinks.is_empty());
    }
}
