//! Dynamic dependency extraction: observe the running container under a
//! syscall tracer.
//!
//! The image is started fresh and the tracer attaches to its init process,
//! following children and recording file-opening and exec syscalls. Trace
//! output is consumed line by line so an inactivity window can declare the
//! workload settled long before the process exits; an overall deadline
//! bounds the phase regardless of activity. Collected paths are classified
//! exactly like the static extractor's.

use std::fs;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::MinimizeError;
use crate::fileset::{FileSet, SymlinkSet};
use crate::linkage;
use crate::preprocess::{resolve_command, Environment, ImageConfig};
use crate::process::{run, sudo_prefix, Cmd, ScopedChild};
use crate::rootfs::{normalize, RootFs};

/// Syscalls worth watching: file opens and execs.
const WATCHED_SYSCALLS: &[&str] = &["open", "openat", "execve", "execveat"];

/// Window without new trace output after which the workload is considered
/// settled.
const INACTIVITY_WINDOW: Duration = Duration::from_secs(30);

/// The tracer must exist and be statically linked; a dynamically linked
/// tracer cannot run against the stripped-down candidate images.
pub async fn verify_tracer(tracer: &Path) -> Result<(), MinimizeError> {
    if !tracer.exists() {
        return Err(MinimizeError::ToolUnavailable(format!(
            "tracer binary missing: {}",
            tracer.display()
        )));
    }
    let result = Cmd::new("ldd").arg_path(tracer).allow_fail().run().await?;
    let combined = format!("{}{}", result.stdout, result.stderr);
    if result.success() && !combined.contains("not a dynamic executable") {
        return Err(MinimizeError::ToolUnavailable(format!(
            "tracer is not statically linked: {}",
            tracer.display()
        )));
    }
    Ok(())
}

/// Extract `<syscall>(...,"<path>"` matches into files and symlinks.
///
/// Relative paths resolve against the image working directory. Paths that
/// do not exist under the rootfs are dropped during classification.
pub fn parse_trace_output(
    output: &str,
    rootfs: &RootFs,
    working_dir: &str,
) -> (FileSet, SymlinkSet) {
    let pattern = format!(
        r#"(?:{})\([^"]*"([^"]+)""#,
        WATCHED_SYSCALLS.join("|")
    );
    let re = Regex::new(&pattern).expect("trace pattern is valid");

    let mut files = FileSet::new();
    let mut symlinks = SymlinkSet::new();
    for line in output.lines() {
        let Some(caps) = re.captures(line) else {
            continue;
        };
        let raw = &caps[1];
        let path = if raw.starts_with('/') {
            normalize(Path::new(raw))
        } else {
            normalize(&Path::new(working_dir).join(raw))
        };
        rootfs.classify(&path, &mut files, &mut symlinks);
    }
    (files, symlinks)
}

/// Wait for the container's init PID to appear, bounded.
async fn container_pid(container: &str) -> Result<String, MinimizeError> {
    for _ in 0..50 {
        if let Ok(result) = Cmd::new("docker")
            .args(["inspect", "-f", "{{.State.Pid}}", container])
            .allow_fail()
            .run()
            .await
        {
            let pid = result.stdout_trimmed().to_string();
            if result.success() && !pid.is_empty() && pid != "0" {
                return Ok(pid);
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Err(MinimizeError::ToolUnavailable(format!(
        "container {container} never reported a PID"
    )))
}

/// Run the image under the tracer and merge every observed dependency
/// into `files`/`symlinks`.
pub async fn dynamic_analysis(
    env: &Environment,
    config: &ImageConfig,
    tracer: &Path,
    deadline: Duration,
    files: &mut FileSet,
    symlinks: &mut SymlinkSet,
) -> Result<(), MinimizeError> {
    verify_tracer(tracer).await?;
    let rootfs = env.rootfs();

    let container = format!("{}-strace", env.image());
    info!("starting traced container {container}");
    run(
        "docker",
        ["run", "-d", "--rm", "--name", container.as_str(), env.image()],
    )
    .await
    .map_err(|e| MinimizeError::ToolUnavailable(format!("docker run: {e}")))?;

    let pid = container_pid(&container).await?;
    debug!("container PID: {pid}");

    let trace_spec = format!("trace={}", WATCHED_SYSCALLS.join(","));
    let mut args: Vec<String> = Vec::new();
    let program = if sudo_prefix().is_empty() {
        tracer.to_string_lossy().into_owned()
    } else {
        args.push(tracer.to_string_lossy().into_owned());
        "sudo".to_string()
    };
    args.extend(
        ["-p", pid.as_str(), "-f", "-e", trace_spec.as_str()]
            .into_iter()
            .map(str::to_string),
    );

    let mut child = ScopedChild::spawn(&program, &args, Stdio::piped(), Stdio::piped())
        .map_err(MinimizeError::Other)?;

    // strace writes to stderr; merge both streams into one channel so the
    // inactivity window observes liveness on either.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    if let Some(stdout) = child.stdout() {
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    }
    if let Some(stderr) = child.stderr() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    }

    let mut collected = String::new();
    let overall = tokio::time::sleep(deadline);
    tokio::pin!(overall);
    loop {
        tokio::select! {
            line = rx.recv() => match line {
                Some(line) => {
                    collected.push_str(&line);
                    collected.push('\n');
                }
                None => break,
            },
            _ = tokio::time::sleep(INACTIVITY_WINDOW) => {
                info!("no trace output for {}s, stopping tracer", INACTIVITY_WINDOW.as_secs());
                break;
            }
            _ = &mut overall => {
                info!("trace deadline reached, stopping tracer");
                break;
            }
        }
    }

    child.terminate_group().await;
    let _ = run("docker", ["kill", container.as_str()]).await;

    // Keep the raw trace around for debugging
    if let Err(e) = fs::write(env.path().join("strace.log"), &collected) {
        warn!("could not write trace log: {e}");
    }

    let working_dir = config.working_dir();
    let (traced_files, traced_links) = parse_trace_output(&collected, &rootfs, &working_dir);
    info!(
        "trace extractor found {} files, {} symlinks",
        traced_files.file_count(),
        traced_links.len()
    );
    files.merge(&traced_files);
    symlinks.merge(&traced_links);

    merge_interpreter_deps(&rootfs, config, files, symlinks).await;
    Ok(())
}

/// If the start command is a script, its interpreter (and the
/// interpreter's linkage) belongs in the candidate too.
async fn merge_interpreter_deps(
    rootfs: &RootFs,
    config: &ImageConfig,
    files: &mut FileSet,
    symlinks: &mut SymlinkSet,
) {
    let Ok(command) = resolve_command(rootfs, config).await else {
        return;
    };
    let Some(interpreter) = shebang_interpreter(rootfs, &command) else {
        return;
    };
    info!("command is a script, adding interpreter {interpreter}");
    rootfs.classify(Path::new(&interpreter), files, symlinks);
    if let Ok((dep_files, dep_links)) = linkage::resolve_dependencies(rootfs, &interpreter).await {
        files.merge(&dep_files);
        symlinks.merge(&dep_links);
    }
}

/// Read a `#!interpreter` directive from the first line of a file.
pub fn shebang_interpreter(rootfs: &RootFs, command: &Path) -> Option<String> {
    let content = fs::read(rootfs.host_path(command)).ok()?;
    let first_line = content.split(|b| *b == b'\n').next()?;
    let first_line = String::from_utf8_lossy(first_line);
    let rest = first_line.strip_prefix("#!")?;
    rest.split_whitespace().next().map(str::to_string)
}
