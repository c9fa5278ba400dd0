//! Typed failure reasons for the minimization pipeline.
//!
//! The pipeline needs to distinguish "skip this phase and try the next"
//! (tooling problems) from "this run cannot succeed at all" (bad input,
//! exhausted search). Oracle rejections are not errors — they are the
//! ordinary FAIL verdict driving the bisection retry loop.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MinimizeError {
    /// The build definition file does not exist.
    #[error("build definition not found: {0}")]
    MissingInput(PathBuf),

    /// The build definition could not be parsed.
    #[error("invalid build definition: {0}")]
    InvalidDockerfile(String),

    /// A rootfs path expected to be a directory is not one.
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// No ENTRYPOINT or CMD to analyze.
    #[error("no start command found in image metadata")]
    NoCommand,

    /// An external tool is missing or unusable; the current phase is
    /// skipped and the next one tried.
    #[error("required tool unavailable: {0}")]
    ToolUnavailable(String),

    /// The unresolved pool emptied without any candidate passing.
    #[error("no unresolved files left to split")]
    PoolExhausted,

    /// The bisection step cap was reached before convergence.
    #[error("bisection step limit ({0}) reached without convergence")]
    StepLimit(u32),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MinimizeError {
    /// True for failures that abort one phase but let the pipeline fall
    /// through to the next (static → dynamic → bisection).
    pub fn is_phase_recoverable(&self) -> bool {
        matches!(
            self,
            MinimizeError::ToolUnavailable(_) | MinimizeError::NoCommand
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tooling_errors_are_phase_recoverable() {
        assert!(MinimizeError::ToolUnavailable("strace".into()).is_phase_recoverable());
        assert!(MinimizeError::NoCommand.is_phase_recoverable());
    }

    #[test]
    fn test_terminal_errors_are_not_recoverable() {
        assert!(!MinimizeError::PoolExhausted.is_phase_recoverable());
        assert!(!MinimizeError::StepLimit(10).is_phase_recoverable());
        assert!(!MinimizeError::MissingInput(PathBuf::from("Dockerfile")).is_phase_recoverable());
    }
}
