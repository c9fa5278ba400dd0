//! The validation oracle: build a candidate image and run it once.
//!
//! The health rule is deliberate and load-bearing: a run still alive when
//! the time budget expires is force-stopped and counted as PASS (a service
//! that survives to the deadline is healthy); an exit code of zero before
//! the deadline is PASS; a non-zero exit before the deadline, or a failed
//! build, is FAIL. Changing this rule silently changes which files the
//! search keeps.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tracing::{debug, info};

use crate::archive::{self, ARCHIVE_THRESHOLD};
use crate::compress::{self, MAX_COPY_DIRECTIVES};
use crate::dockerfile::{self, ARCHIVE_NAME};
use crate::error::MinimizeError;
use crate::fileset::{FileSet, SymlinkSet};
use crate::preprocess::Environment;
use crate::process::{Cmd, DeadlineOutcome, ScopedChild};

/// Health verdict for one candidate. Never partial: a hung run resolves
/// to Pass at the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail,
}

/// One trial image definition: a file selection plus the step identifier
/// it is materialized under.
pub struct Candidate<'a> {
    pub tag: String,
    pub files: &'a FileSet,
    pub symlinks: &'a SymlinkSet,
}

impl<'a> Candidate<'a> {
    pub fn new(tag: impl Into<String>, files: &'a FileSet, symlinks: &'a SymlinkSet) -> Self {
        Self {
            tag: tag.into(),
            files,
            symlinks,
        }
    }
}

/// Map a deadline-bounded run to a health verdict.
///
/// Survival to the deadline and a clean exit are both healthy; only an
/// early non-zero exit is a failure.
pub fn verdict_for(outcome: &DeadlineOutcome) -> Verdict {
    match outcome {
        DeadlineOutcome::Expired => Verdict::Pass,
        DeadlineOutcome::Exited(status) if status.success() => Verdict::Pass,
        DeadlineOutcome::Exited(_) => Verdict::Fail,
    }
}

/// Decides whether a candidate file set is sufficient.
#[allow(async_fn_in_trait)]
pub trait Oracle {
    async fn check(&mut self, candidate: Candidate<'_>) -> Result<Verdict, MinimizeError>;
}

/// The real oracle: materialize, `docker build`, `docker run` under a
/// budget. On PASS the generated definition (and archive, when used) is
/// persisted to the invocation directory as the current best result.
pub struct DockerOracle {
    env: Environment,
    context: PathBuf,
    output_dir: PathBuf,
    budget: Duration,
}

impl DockerOracle {
    pub fn new(env: Environment, context: PathBuf, output_dir: PathBuf, budget: Duration) -> Self {
        Self {
            env,
            context,
            output_dir,
            budget,
        }
    }

    /// Write the candidate's definition (COPY-based for small selections,
    /// archive-based above [`ARCHIVE_THRESHOLD`] files). Returns the
    /// definition path and whether an archive was produced.
    fn materialize(&self, candidate: &Candidate<'_>) -> Result<(PathBuf, bool), MinimizeError> {
        let name = format!("Dockerfile.minimal.{}", candidate.tag);
        if candidate.files.file_count() > ARCHIVE_THRESHOLD {
            let archive_path = self.env.path().join(ARCHIVE_NAME);
            archive::build_archive(candidate.files, &self.env.rootfs(), &archive_path)?;
            // The build context must contain the archive for ADD. When the
            // context is the scratch directory itself the archive is already
            // in place; a copy onto itself would truncate it.
            let staged = self.context.join(ARCHIVE_NAME);
            if staged != archive_path {
                fs::copy(&archive_path, &staged)?;
            }
            let path = dockerfile::write_archive_candidate(self.env.path(), &name)?;
            Ok((path, true))
        } else {
            let compressed =
                compress::compress(candidate.files, &self.env.rootfs(), MAX_COPY_DIRECTIVES);
            let path = dockerfile::write_copy_candidate(
                self.env.path(),
                &name,
                &compressed,
                candidate.symlinks,
            )?;
            Ok((path, false))
        }
    }

    async fn build(&self, definition: &Path, image_tag: &str) -> Result<bool, MinimizeError> {
        let result = Cmd::new("docker")
            .args(["build", "-f"])
            .arg_path(definition)
            .args(["-t", image_tag])
            .arg_path(&self.context)
            .allow_fail()
            .run()
            .await?;
        debug!("build output:\n{}", result.stdout);
        Ok(result.success())
    }

    /// Run the built candidate once, racing the budget timer.
    async fn run_candidate(&self, image_tag: &str, tag: &str) -> Result<Verdict, MinimizeError> {
        let container = format!("{}-test-{tag}", image_tag.replace(':', "-"));
        let child = ScopedChild::spawn(
            "docker",
            ["run", "--rm", "--name", container.as_str(), image_tag],
            Stdio::null(),
            Stdio::null(),
        )
        .map_err(MinimizeError::Other)?;

        let outcome = child.wait_with_deadline(self.budget).await?;
        if let DeadlineOutcome::Expired = outcome {
            info!(
                "{} seconds passed, stopping candidate run",
                self.budget.as_secs()
            );
            let _ = Cmd::new("docker")
                .args(["stop", "-t", "5", container.as_str()])
                .allow_fail()
                .run()
                .await;
        }
        if let DeadlineOutcome::Exited(status) = &outcome {
            if !status.success() {
                debug!("candidate exited with {status}");
            }
        }
        Ok(verdict_for(&outcome))
    }

    /// Copy the passing definition (and archive) over the current best.
    fn persist_best(&self, definition: &Path, archived: bool) -> Result<(), MinimizeError> {
        fs::copy(definition, self.output_dir.join("Dockerfile.minimal"))?;
        if archived {
            fs::copy(
                self.env.path().join(ARCHIVE_NAME),
                self.output_dir.join(ARCHIVE_NAME),
            )?;
        }
        Ok(())
    }
}

impl Oracle for DockerOracle {
    async fn check(&mut self, candidate: Candidate<'_>) -> Result<Verdict, MinimizeError> {
        let (definition, archived) = self.materialize(&candidate)?;
        let image_tag = format!("{}:{}", self.env.image(), candidate.tag);

        let verdict = if self.build(&definition, &image_tag).await? {
            self.run_candidate(&image_tag, &candidate.tag).await?
        } else {
            debug!("build failed for candidate {}", candidate.tag);
            Verdict::Fail
        };

        if archived {
            let staged = self.context.join(ARCHIVE_NAME);
            if staged != self.env.path().join(ARCHIVE_NAME) {
                let _ = fs::remove_file(staged);
            }
        }
        match verdict {
            Verdict::Pass => {
                info!("candidate {} passed", candidate.tag);
                self.persist_best(&definition, archived)?;
            }
            Verdict::Fail => {
                info!("candidate {} failed", candidate.tag);
                let _ = Cmd::new("docker")
                    .args(["rmi", "-f", image_tag.as_str()])
                    .allow_fail()
                    .run()
                    .await;
            }
        }
        Ok(verdict)
    }
}
