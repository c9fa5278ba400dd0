//! Centralized command execution with consistent error handling.
//!
//! Two layers: [`Cmd`] runs short-lived tools (docker build, tar, chroot)
//! to completion and captures output; [`ScopedChild`] runs a subprocess in
//! its own process group and races it against a deadline, signaling the
//! whole group on expiry so traced children are reclaimed too.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit status of the command.
    pub status: ExitStatus,
    /// Captured stdout as a string.
    pub stdout: String,
    /// Captured stderr as a string.
    pub stderr: String,
}

impl CommandResult {
    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Get the exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    /// Get stdout, trimmed of whitespace.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Get stderr, trimmed of whitespace.
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// Builder for configuring command execution.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    /// If true, don't fail on non-zero exit.
    allow_fail: bool,
    /// Custom error message prefix.
    error_prefix: Option<String>,
}

impl Cmd {
    /// Create a new command builder.
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            current_dir: None,
            allow_fail: false,
            error_prefix: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Add a path as an argument.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Set the working directory.
    pub fn dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// Allow non-zero exit codes without failing.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Set a custom error message prefix.
    pub fn error_msg(mut self, msg: impl AsRef<str>) -> Self {
        self.error_prefix = Some(msg.as_ref().to_string());
        self
    }

    /// Run the command and capture output.
    pub async fn run(self) -> Result<CommandResult> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        if let Some(ref dir) = self.current_dir {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .await
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", self.program))?;

        let result = CommandResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !self.allow_fail && !result.success() {
            let prefix = self
                .error_prefix
                .unwrap_or_else(|| format!("'{}' failed", self.program));

            let stderr = result.stderr_trimmed();
            if stderr.is_empty() {
                bail!("{} (exit code {})", prefix, result.code());
            } else {
                bail!("{} (exit code {}):\n{}", prefix, result.code(), stderr);
            }
        }

        Ok(result)
    }
}

/// Run a command with arguments. Fails with stderr on error.
pub async fn run<I, S>(program: &str, args: I) -> Result<CommandResult>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut cmd = Cmd::new(program);
    for arg in args {
        cmd = cmd.arg(arg);
    }
    cmd.run().await
}

/// Run a shell command via `sh -c`.
pub async fn shell(command: &str) -> Result<CommandResult> {
    run("sh", ["-c", command]).await
}

/// `sudo` prefix for operations that need root (chroot, tar extraction),
/// empty when already root.
pub fn sudo_prefix() -> &'static str {
    // geteuid never fails
    if unsafe { libc::geteuid() } == 0 {
        ""
    } else {
        "sudo "
    }
}

/// How a deadline-bounded subprocess ended.
#[derive(Debug)]
pub enum DeadlineOutcome {
    /// The process exited on its own before the deadline.
    Exited(ExitStatus),
    /// The deadline expired; the process group was signaled.
    Expired,
}

/// A subprocess running in its own process group, so the deadline can
/// reclaim every child it spawned.
pub struct ScopedChild {
    child: Child,
    program: String,
}

impl ScopedChild {
    /// Spawn `program args` in a fresh process group with the given stdio.
    pub fn spawn<I, S>(program: &str, args: I, stdout: Stdio, stderr: Stdio) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut cmd = Command::new(program);
        for arg in args {
            cmd.arg(arg.as_ref());
        }
        cmd.stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .process_group(0)
            .kill_on_drop(true);
        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to execute '{program}'. Is it installed?"))?;
        Ok(Self {
            child,
            program: program.to_string(),
        })
    }

    pub fn stdout(&mut self) -> Option<tokio::process::ChildStdout> {
        self.child.stdout.take()
    }

    pub fn stderr(&mut self) -> Option<tokio::process::ChildStderr> {
        self.child.stderr.take()
    }

    /// Wait for exit, racing against `budget`.
    ///
    /// A process that exits a moment before the deadline wins the race and
    /// is reported as [`DeadlineOutcome::Exited`]; one still alive at the
    /// deadline has its entire group terminated and is reaped.
    pub async fn wait_with_deadline(mut self, budget: Duration) -> Result<DeadlineOutcome> {
        tokio::select! {
            status = self.child.wait() => {
                let status = status
                    .with_context(|| format!("Failed waiting on '{}'", self.program))?;
                Ok(DeadlineOutcome::Exited(status))
            }
            _ = tokio::time::sleep(budget) => {
                self.terminate_group().await;
                Ok(DeadlineOutcome::Expired)
            }
        }
    }

    /// SIGTERM the whole process group, then reap the direct child.
    pub async fn terminate_group(&mut self) {
        if let Some(pid) = self.child.id() {
            unsafe {
                libc::killpg(pid as libc::pid_t, libc::SIGTERM);
            }
        }
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }
}
