//! minicon - minimize a Docker image to the files its startup command
//! actually needs.
//!
//! The pipeline builds the image, extracts its filesystem, and searches
//! for the smallest file set that still passes a build-and-run health
//! check: static linkage first, then syscall tracing, then a randomized
//! bisection over the whole tree.

pub mod archive;
pub mod compress;
pub mod config;
pub mod dockerfile;
pub mod error;
pub mod fileset;
pub mod linkage;
pub mod minimize;
pub mod oracle;
pub mod preprocess;
pub mod process;
pub mod rootfs;
pub mod search;
pub mod trace;
