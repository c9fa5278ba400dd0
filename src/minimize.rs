//! The minimization pipeline: cheapest sufficient candidate wins.
//!
//! Phases run in order of cost — the start command's own files, static
//! linkage, syscall tracing, randomized bisection — and the first candidate
//! the oracle accepts ends the run. Tooling problems skip a phase; oracle
//! rejections fall through to the next, more thorough phase.

use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::config::Config;
use crate::dockerfile::ARCHIVE_NAME;
use crate::error::MinimizeError;
use crate::linkage;
use crate::oracle::{Candidate, DockerOracle, Oracle, Verdict};
use crate::preprocess::{self, Environment, ImageConfig};
use crate::search;
use crate::trace;

/// Run one complete minimization.
///
/// On success `Dockerfile.minimal` (and `files.tar` when the archive path
/// was taken) is left in the invocation directory; on failure partial
/// artifacts are removed. The scratch environment and generated image
/// tags are cleaned up either way.
pub async fn run(config: Config) -> Result<(), MinimizeError> {
    info!("starting minicon");
    let (env, metadata) = preprocess::prepare(&config).await?;

    let result = run_phases(&config, &env, &metadata).await;

    info!("cleaning up");
    env.cleanup().await;
    if result.is_err() {
        if let Ok(cwd) = std::env::current_dir() {
            let _ = fs::remove_file(cwd.join("Dockerfile.minimal"));
            let _ = fs::remove_file(cwd.join(ARCHIVE_NAME));
        }
    }
    result
}

/// Docker build context for candidate builds: the directory the original
/// definition lives in (the scratch directory in `--image` mode).
fn build_context(config: &Config, env: &Environment) -> PathBuf {
    if config.image.is_some() {
        return env.path().to_path_buf();
    }
    config
        .dockerfile
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf()
}

async fn run_phases(
    config: &Config,
    env: &Environment,
    metadata: &ImageConfig,
) -> Result<(), MinimizeError> {
    let output_dir = std::env::current_dir()?;
    let mut oracle = DockerOracle::new(
        env.clone(),
        build_context(config, env),
        output_dir,
        config.timeout,
    );
    let rootfs = env.rootfs();

    // Phase 0: just the start command's own files.
    let (mut files, mut symlinks) = preprocess::initial_candidate(env, metadata).await;
    let verdict = oracle
        .check(Candidate::new("initial", &files, &symlinks))
        .await?;
    if verdict == Verdict::Pass {
        info!("build definition is already minimal");
        return Ok(());
    }
    info!("image is not minimal, starting analysis");

    // Phase 1: static linkage.
    match linkage::static_analysis(&rootfs, &metadata.entrypoint(), &metadata.cmd()).await {
        Ok((f, s)) => {
            files.merge(&f);
            symlinks.merge(&s);
            let verdict = oracle
                .check(Candidate::new("ldd", &files, &symlinks))
                .await?;
            if verdict == Verdict::Pass {
                info!("static analysis succeeded");
                return Ok(());
            }
            info!("static candidate rejected, continuing with dynamic analysis");
        }
        Err(e) if e.is_phase_recoverable() => warn!("static phase skipped: {e}"),
        Err(e) => return Err(e),
    }

    // Phase 2: syscall tracing, merged with everything gathered so far.
    match trace::dynamic_analysis(
        env,
        metadata,
        &config.strace_path,
        config.timeout,
        &mut files,
        &mut symlinks,
    )
    .await
    {
        Ok(()) => {
            let verdict = oracle
                .check(Candidate::new("strace", &files, &symlinks))
                .await?;
            if verdict == Verdict::Pass {
                info!("dynamic analysis succeeded");
                return Ok(());
            }
            info!("dynamic candidate rejected");
        }
        Err(e) if e.is_phase_recoverable() => warn!("dynamic phase skipped: {e}"),
        Err(e) => return Err(e),
    }

    // Phase 3: randomized bisection over the whole filesystem.
    if !config.bisect {
        return Err(MinimizeError::Other(anyhow::anyhow!(
            "analysis phases found no sufficient candidate and bisection is disabled"
        )));
    }
    let snapshot = rootfs.snapshot()?;
    let mut rng = StdRng::from_entropy();
    let best = search::minimize(snapshot, &mut oracle, &mut rng, config.max_steps).await?;
    info!("bisection converged to {} files", best.file_count());
    Ok(())
}
