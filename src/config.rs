//! Run configuration, assembled from the CLI.

use std::path::PathBuf;
use std::time::Duration;

/// Everything one minimization run needs to know.
#[derive(Debug, Clone)]
pub struct Config {
    /// Build definition to minimize.
    pub dockerfile: PathBuf,
    /// Minimize an existing image instead of a build definition.
    pub image: Option<String>,
    /// Bisection step cap.
    pub max_steps: u32,
    /// Health-check budget per candidate run, and the trace deadline.
    pub timeout: Duration,
    /// Statically linked tracer binary.
    pub strace_path: PathBuf,
    /// Verbose logging.
    pub debug: bool,
    /// Fall back to bisection when tracing alone is insufficient.
    pub bisect: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dockerfile: PathBuf::from("./Dockerfile"),
            image: None,
            max_steps: 10,
            timeout: Duration::from_secs(30),
            strace_path: PathBuf::from("/usr/local/bin/strace"),
            debug: false,
            bisect: true,
        }
    }
}
