// src/lib.rs

//! Feedstock solvability checker
//!
//! Decides whether a conda recipe ("feedstock") could be built: for every
//! variant in `.ci_support/`, the recipe is rendered and each output's
//! build, host, run and test requirements are solved in order against the
//! variant's channels, with run exports propagated between them.
//!
//! # Architecture
//!
//! - Opaque solver: anything implementing [`solver::SolverBackend`]
//! - Two caches: an LRU of run exports and a TTL pool of solver handles
//! - Virtual packages: a throwaway `file://` channel of `__glibc`, `__osx`...
//! - Bounded execution: timeouts fail open, crashes fail closed
//!
//! ```no_run
//! use feedstock_solvable::{CheckOptions, check_recipe_solvable};
//! use std::path::Path;
//!
//! let report = check_recipe_solvable(Path::new("numpy-feedstock"), &CheckOptions::default());
//! println!("solvable: {}", report.solvable);
//! ```

pub mod channel;
pub mod compression;
pub mod config;
mod error;
pub mod feedstock;
pub mod matchspec;
pub mod render;
pub mod repository;
pub mod resolver;
pub mod run_exports;
pub mod solver;
pub mod virtual_packages;
pub mod worker;

pub use channel::{Channel, PlatformTarget};
pub use config::{CheckOptions, CheckerConfig, Isolation, VariantConfig};
pub use error::{Error, Result};
pub use feedstock::{FeedstockChecker, SolvabilityReport, VariantResult, check_feedstock};
pub use resolver::{OutputResolution, Phase, PhaseResult, PropagationEngine};
pub use run_exports::{RunExportBundle, RunExportCache};
pub use solver::{SolveOutcome, SolverHandle, SolverPool};

use std::path::Path;

/// Check whether the feedstock at `feedstock_dir` is solvable
///
/// Returns `(solvable, errors, solvable_by_variant)` as a report and never
/// fails. With a non-zero timeout the check runs isolated per
/// `options.isolation` and is reported solvable when it does not finish in
/// time. A zero timeout counts as no timeout.
pub fn check_recipe_solvable(feedstock_dir: &Path, options: &CheckOptions) -> SolvabilityReport {
    let label = feedstock_dir.display().to_string();
    match (options.timeout.filter(|t| !t.is_zero()), options.isolation) {
        (Some(timeout), Isolation::Subprocess) => match worker::SubprocessWorker::current_exe() {
            Ok(worker) => worker.run(feedstock_dir, options, timeout),
            Err(e) => SolvabilityReport::failed(e.to_string()),
        },
        (timeout, _) => {
            let dir = feedstock_dir.to_path_buf();
            let options = options.clone();
            worker::run_bounded(timeout, &label, move || Ok(check_feedstock(&dir, &options)))
        }
    }
}
