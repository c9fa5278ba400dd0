//! minicon CLI entry point.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use minicon::config::Config;
use minicon::minimize;

#[derive(Parser)]
#[command(name = "minicon")]
#[command(about = "Minimize a Docker image to the files its startup command actually needs")]
#[command(
    after_help = "The minimized Dockerfile.minimal (and files.tar, when the archive path\nis taken) is written to the current directory."
)]
struct Cli {
    /// Path to the Dockerfile
    #[arg(short, long, default_value = "./Dockerfile")]
    file: PathBuf,

    /// Minimize an existing image instead of a Dockerfile
    #[arg(long)]
    image: Option<String>,

    /// Maximum number of bisection steps
    #[arg(long, default_value_t = 10)]
    max_steps: u32,

    /// Seconds a candidate may run before being declared healthy
    #[arg(short, long, default_value_t = 30)]
    timeout: u64,

    /// Path to a statically linked strace binary
    #[arg(long, default_value = "/usr/local/bin/strace")]
    strace_path: PathBuf,

    /// Enable verbose logging
    #[arg(long)]
    debug: bool,

    /// Skip the bisection fallback when tracing alone is insufficient
    #[arg(long)]
    no_bisect: bool,
}

/// Silent unless --debug (or RUST_LOG) asks otherwise.
fn init_logging(debug: bool) {
    let default = if debug { "minicon=debug" } else { "off" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = Config {
        dockerfile: cli.file,
        image: cli.image,
        max_steps: cli.max_steps,
        timeout: Duration::from_secs(cli.timeout),
        strace_path: cli.strace_path,
        debug: cli.debug,
        bisect: !cli.no_bisect,
    };

    if let Err(e) = minimize::run(config).await {
        eprintln!("minicon: {e}");
        std::process::exit(1);
    }
}
