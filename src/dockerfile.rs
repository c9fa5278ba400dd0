//! Build-definition handling: structural parsing, the two-stage minimal
//! template, and per-candidate generated definitions.
//!
//! The template keeps every original stage (the last `FROM` gains
//! `AS builder`) and appends a `FROM scratch` stage carrying the image
//! metadata. Candidates then either COPY file groups `--from=builder` or
//! ADD a tar archive of the selected files.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::MinimizeError;
use crate::fileset::{FileSet, SymlinkSet};
use crate::preprocess::ImageConfig;

/// Template filename inside the scratch environment.
pub const TEMPLATE_NAME: &str = "Dockerfile.minimal.template";

/// Archive filename referenced by ADD-based candidates.
pub const ARCHIVE_NAME: &str = "files.tar";

const KNOWN_INSTRUCTIONS: &[&str] = &[
    "FROM",
    "RUN",
    "CMD",
    "LABEL",
    "MAINTAINER",
    "EXPOSE",
    "ENV",
    "ADD",
    "COPY",
    "ENTRYPOINT",
    "VOLUME",
    "USER",
    "WORKDIR",
    "ARG",
    "ONBUILD",
    "STOPSIGNAL",
    "HEALTHCHECK",
    "SHELL",
];

/// One instruction of a build definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub keyword: String,
    pub arguments: String,
}

/// Parse a Dockerfile into its instruction list.
///
/// Line-oriented with `\` continuations and `#` comments. The definition
/// must contain at least one FROM and no unknown instructions; this is the
/// parse-before-process gate, not a full frontend.
pub fn parse(content: &str) -> Result<Vec<Instruction>, MinimizeError> {
    let mut instructions = Vec::new();
    let mut pending = String::new();

    for raw in content.lines() {
        let line = raw.trim();
        if pending.is_empty() && (line.is_empty() || line.starts_with('#')) {
            continue;
        }
        if let Some(stripped) = line.strip_suffix('\\') {
            pending.push_str(stripped);
            pending.push(' ');
            continue;
        }
        pending.push_str(line);
        let logical = std::mem::take(&mut pending);

        let (keyword, arguments) = match logical.split_once(char::is_whitespace) {
            Some((k, a)) => (k.to_uppercase(), a.trim().to_string()),
            None => (logical.trim().to_uppercase(), String::new()),
        };
        if !KNOWN_INSTRUCTIONS.contains(&keyword.as_str()) {
            return Err(MinimizeError::InvalidDockerfile(format!(
                "unknown instruction: {keyword}"
            )));
        }
        instructions.push(Instruction { keyword, arguments });
    }

    if !pending.is_empty() {
        return Err(MinimizeError::InvalidDockerfile(
            "dangling line continuation".to_string(),
        ));
    }
    if !instructions.iter().any(|i| i.keyword == "FROM") {
        return Err(MinimizeError::InvalidDockerfile(
            "no FROM instruction".to_string(),
        ));
    }
    Ok(instructions)
}

/// Write the minimal template: the original definition with its final
/// stage named `builder`, followed by a scratch stage with the image
/// metadata.
pub fn write_template(
    dest: &Path,
    original: &str,
    config: &ImageConfig,
) -> Result<(), MinimizeError> {
    let mut lines: Vec<String> = original.lines().map(str::to_string).collect();
    for line in lines.iter_mut().rev() {
        if line.trim_start().to_uppercase().starts_with("FROM") {
            line.push_str(" AS builder");
            break;
        }
    }

    let mut out = lines.join("\n");
    out.push_str("\n\nFROM scratch\n\n");
    for env in &config.env() {
        let _ = writeln!(out, "ENV {env}");
    }
    if !config.working_dir().is_empty() {
        let _ = writeln!(out, "WORKDIR {}", config.working_dir());
    }
    if !config.user().is_empty() {
        let _ = writeln!(out, "USER {}", config.user());
    }
    for port in config.exposed_ports() {
        let _ = writeln!(out, "EXPOSE {port}");
    }
    if !config.entrypoint().is_empty() {
        let _ = writeln!(out, "ENTRYPOINT [{}]", quote_list(&config.entrypoint()));
    }
    if !config.cmd().is_empty() {
        let _ = writeln!(out, "CMD [{}]", quote_list(&config.cmd()));
    }

    fs::write(dest, out)?;
    Ok(())
}

/// Materialize a candidate definition with per-directory COPY directives.
///
/// Each directory key becomes `COPY --from=builder [<entries>..., "<dir>/"]`;
/// each symlink copies its resolved target onto the link path.
pub fn write_copy_candidate(
    env_dir: &Path,
    name: &str,
    files: &FileSet,
    symlinks: &SymlinkSet,
) -> Result<PathBuf, MinimizeError> {
    let mut out = fs::read_to_string(env_dir.join(TEMPLATE_NAME))?;
    out.push('\n');

    for (dir, entries) in files.iter() {
        let mut quoted: Vec<String> = entries
            .iter()
            .map(|e| format!("\"{}\"", e.display()))
            .collect();
        let dest = dir.display().to_string();
        let dest = if dest.ends_with('/') {
            dest
        } else {
            format!("{dest}/")
        };
        quoted.push(format!("\"{dest}\""));
        let _ = writeln!(out, "COPY --from=builder [{}]", quoted.join(", "));
    }
    for (link, target) in symlinks.iter() {
        let _ = writeln!(
            out,
            "COPY --from=builder [\"{}\", \"{}\"]",
            target.display(),
            link.display()
        );
    }
    out.push('\n');

    let path = env_dir.join(name);
    fs::write(&path, out)?;
    Ok(path)
}

/// Materialize a candidate definition that ADDs the prebuilt archive.
pub fn write_archive_candidate(env_dir: &Path, name: &str) -> Result<PathBuf, MinimizeError> {
    let mut out = fs::read_to_string(env_dir.join(TEMPLATE_NAME))?;
    let _ = writeln!(out, "\nADD {ARCHIVE_NAME} /\n");

    let path = env_dir.join(name);
    fs::write(&path, out)?;
    Ok(path)
}

fn quote_list(items: &[String]) -> String {
    items
        .iter()
        .map(|i| format!("\"{i}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_simple() {
        let parsed = parse("FROM alpine:3.20\nRUN apk add curl\nCMD [\"sh\"]\n").unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].keyword, "FROM");
        assert_eq!(parsed[0].arguments, "alpine:3.20");
    }

    #[test]
    fn test_parse_continuations_and_comments() {
        let parsed = parse("# build\nFROM debian\nRUN apt-get update && \\\n    apt-get install -y curl\n").unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(parsed[1].arguments.contains("apt-get install"));
    }

    #[test]
    fn test_parse_rejects_missing_from() {
        let err = parse("RUN echo hi\n").unwrap_err();
        assert!(matches!(err, MinimizeError::InvalidDockerfile(_)));
    }

    #[test]
    fn test_parse_rejects_unknown_instruction() {
        let err = parse("FROM alpine\nFOOBAR x\n").unwrap_err();
        assert!(matches!(err, MinimizeError::InvalidDockerfile(_)));
    }

    #[test]
    fn test_template_marks_last_from_as_builder() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join(TEMPLATE_NAME);
        let config = ImageConfig::default();

        write_template(&dest, "FROM golang AS build\nFROM alpine\n", &config).unwrap();
        let out = fs::read_to_string(&dest).unwrap();

        assert!(out.contains("FROM golang AS build\n"));
        assert!(out.contains("FROM alpine AS builder"));
        assert!(out.contains("FROM scratch"));
    }

    #[test]
    fn test_template_carries_metadata() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join(TEMPLATE_NAME);
        let config = ImageConfig::sample();

        write_template(&dest, "FROM alpine\n", &config).unwrap();
        let out = fs::read_to_string(&dest).unwrap();

        assert!(out.contains("ENV PATH=/usr/bin"));
        assert!(out.contains("WORKDIR /srv"));
        assert!(out.contains("EXPOSE 8080/tcp"));
        assert!(out.contains("ENTRYPOINT [\"/srv/app\"]"));
        assert!(out.contains("CMD [\"--port\", \"8080\"]"));
    }

    #[test]
    fn test_copy_candidate_directives() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(TEMPLATE_NAME), "FROM scratch\n").unwrap();

        let mut files = FileSet::new();
        files.insert(Path::new("/lib/libc.so.6"));
        files.insert(Path::new("/lib/libm.so.6"));
        let mut symlinks = SymlinkSet::new();
        symlinks.insert(Path::new("/lib/libz.so"), Path::new("/lib/libz.so.1.3"));

        let path = write_copy_candidate(tmp.path(), "Dockerfile.minimal.ldd", &files, &symlinks)
            .unwrap();
        let out = fs::read_to_string(path).unwrap();

        assert!(out.contains(
            "COPY --from=builder [\"/lib/libc.so.6\", \"/lib/libm.so.6\", \"/lib/\"]"
        ));
        assert!(out.contains("COPY --from=builder [\"/lib/libz.so.1.3\", \"/lib/libz.so\"]"));
    }

    #[test]
    fn test_archive_candidate_adds_tar() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(TEMPLATE_NAME), "FROM scratch\n").unwrap();

        let path =
            write_archive_candidate(tmp.path(), "Dockerfile.minimal.bisect-1").unwrap();
        let out = fs::read_to_string(path).unwrap();
        assert!(out.contains("ADD files.tar /"));
    }
}
