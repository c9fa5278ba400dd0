//! Integration tests: snapshot, compression, bisection, and archive
//! working against a real (mock) rootfs, with simulated oracles standing
//! in for docker.

mod helpers;

use helpers::{p, TestEnv};
use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::SeedableRng;

use minicon::archive::build_archive;
use minicon::compress::compress;
use minicon::error::MinimizeError;
use minicon::fileset::FileSet;
use minicon::oracle::{Candidate, Oracle, Verdict};
use minicon::search::minimize;

/// Oracle that passes iff every path in `required` is present.
struct RequireAll {
    required: Vec<PathBuf>,
    passes: Vec<FileSet>,
}

impl RequireAll {
    fn new(required: Vec<PathBuf>) -> Self {
        Self {
            required,
            passes: Vec::new(),
        }
    }
}

impl Oracle for RequireAll {
    async fn check(&mut self, candidate: Candidate<'_>) -> Result<Verdict, MinimizeError> {
        if self.required.iter().all(|r| candidate.files.contains(r)) {
            self.passes.push(candidate.files.clone());
            Ok(Verdict::Pass)
        } else {
            Ok(Verdict::Fail)
        }
    }
}

#[test]
fn test_snapshot_feeds_compressor_within_bound() {
    let env = TestEnv::new();
    env.add_spread(200);

    let snapshot = env.rootfs().snapshot().unwrap();
    assert_eq!(snapshot.dir_count(), 200);
    assert_eq!(snapshot.file_count(), 200);

    let compressed = compress(&snapshot, &env.rootfs(), 127);
    assert!(compressed.dir_count() <= 127);
}

#[tokio::test]
async fn test_bisection_over_real_snapshot_keeps_required_files() {
    let env = TestEnv::new();
    env.add_spread(40);
    env.add_file("/bin/app", b"elf");
    env.add_file("/lib/libc.so.6", b"elf");

    let snapshot = env.rootfs().snapshot().unwrap();
    let required = vec![PathBuf::from("/bin/app"), PathBuf::from("/lib/libc.so.6")];
    let mut oracle = RequireAll::new(required.clone());
    let mut rng = StdRng::seed_from_u64(99);

    // The pool never empties below the required files, so the step cap
    // ends the run; every accepted candidate must contain both.
    let err = minimize(snapshot, &mut oracle, &mut rng, 6)
        .await
        .unwrap_err();
    assert!(matches!(err, MinimizeError::StepLimit(6)));
    assert!(!oracle.passes.is_empty());
    for passing in &oracle.passes {
        for r in &required {
            assert!(passing.contains(r), "{} missing", r.display());
        }
    }

    // Later candidates should be no larger than the first accepted one.
    let first = oracle.passes.first().unwrap().file_count();
    let last = oracle.passes.last().unwrap().file_count();
    assert!(last <= first);
}

#[tokio::test]
async fn test_bisection_result_survives_archiving() {
    let env = TestEnv::new();
    env.add_spread(30);
    env.add_file("/bin/app", b"binary");
    env.add_symlink("/bin/app-alias", "app");

    let snapshot = env.rootfs().snapshot().unwrap();
    let mut oracle = RequireAll::new(vec![PathBuf::from("/bin/app")]);
    let mut rng = StdRng::seed_from_u64(5);

    let _ = minimize(snapshot, &mut oracle, &mut rng, 4).await;
    let best = oracle.passes.last().expect("at least one passing candidate");

    let dest = env._temp_dir.path().join("files.tar");
    build_archive(best, &env.rootfs(), &dest).unwrap();

    let mut found = false;
    let mut ar = tar::Archive::new(std::fs::File::open(&dest).unwrap());
    for entry in ar.entries().unwrap() {
        let entry = entry.unwrap();
        if entry.path().unwrap().as_ref() == p("bin/app") {
            found = true;
            assert_eq!(entry.header().uid().unwrap(), 0);
        }
    }
    assert!(found, "bin/app missing from archive");
}
