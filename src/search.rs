//! Randomized bisection over the unresolved file pool.
//!
//! Each outer step flips a fair coin per unresolved file, proposes the
//! moved half as a candidate, and asks the oracle. A failed trial keeps
//! its moved files in the candidate and re-flips the remainder, so the
//! candidate grows back toward the full (known-sufficient) pool and some
//! draw must eventually pass. A passing trial becomes the next, smaller
//! pool: the verified-sufficient set roughly halves per step.

use rand::Rng;
use tracing::{debug, info};

use crate::error::MinimizeError;
use crate::fileset::{FileSet, SymlinkSet};
use crate::oracle::{Candidate, Oracle, Verdict};

/// The two disjoint partitions of the search: files committed to the
/// current candidate and files not yet classified. Their union never
/// grows — no file is introduced after the initial snapshot.
#[derive(Debug, Clone, Default)]
pub struct SearchState {
    pub resolved: FileSet,
    pub unresolved: FileSet,
}

impl SearchState {
    pub fn new(pool: FileSet) -> Self {
        Self {
            resolved: FileSet::new(),
            unresolved: pool,
        }
    }
}

/// Move each unresolved file into `resolved` with probability 1/2.
///
/// Operates on a fixed snapshot of every directory list so each file is
/// decided exactly once per pass; directory keys emptied by the move are
/// dropped.
pub fn partition(state: &mut SearchState, rng: &mut impl Rng) {
    for dir in state.unresolved.dir_keys() {
        let entries: Vec<_> = state
            .unresolved
            .entries(&dir)
            .map(|e| e.to_vec())
            .unwrap_or_default();
        for entry in entries {
            if rng.gen_bool(0.5) {
                state.resolved.insert_in(&dir, &entry);
                state.unresolved.remove(&dir, &entry);
            }
        }
    }
}

/// One outer bisection step: partition, trial, retry until a candidate
/// passes or the pool empties.
async fn bisection_step<O: Oracle>(
    mut state: SearchState,
    oracle: &mut O,
    rng: &mut impl Rng,
    step: u32,
) -> Result<SearchState, MinimizeError> {
    let symlinks = SymlinkSet::new();
    loop {
        if state.unresolved.is_empty() {
            return Err(MinimizeError::PoolExhausted);
        }
        partition(&mut state, rng);
        debug!(
            "step {step}: trying {} files ({} unresolved)",
            state.resolved.file_count(),
            state.unresolved.file_count()
        );

        let candidate = Candidate::new(format!("bisect-{step}"), &state.resolved, &symlinks);
        match oracle.check(candidate).await? {
            Verdict::Pass => {
                info!("bisection step {step} succeeded");
                return Ok(SearchState::new(state.resolved));
            }
            Verdict::Fail => continue,
        }
    }
}

/// Run the bisection search over `pool` for at most `max_steps` steps.
///
/// Succeeds when the pool converges (nothing left to split after a pass),
/// returning the last verified-sufficient set. Fails with
/// [`MinimizeError::PoolExhausted`] when a step's pool empties without any
/// passing candidate, and with [`MinimizeError::StepLimit`] when the cap
/// runs out before convergence.
pub async fn minimize<O: Oracle>(
    pool: FileSet,
    oracle: &mut O,
    rng: &mut impl Rng,
    max_steps: u32,
) -> Result<FileSet, MinimizeError> {
    info!(
        "starting bisection over {} files in {} directories",
        pool.file_count(),
        pool.dir_count()
    );
    let mut state = SearchState::new(pool);
    let mut last_pass: Option<FileSet> = None;

    for step in 1..=max_steps {
        if state.unresolved.is_empty() {
            return match last_pass {
                Some(best) => {
                    info!("bisection converged after {} steps", step - 1);
                    Ok(best)
                }
                None => Err(MinimizeError::PoolExhausted),
            };
        }
        info!("bisection iteration {step}");
        state = bisection_step(state, oracle, rng, step).await?;
        last_pass = Some(state.unresolved.clone());
    }

    if state.unresolved.is_empty() {
        if let Some(best) = last_pass {
            return Ok(best);
        }
    }
    Err(MinimizeError::StepLimit(max_steps))
}
