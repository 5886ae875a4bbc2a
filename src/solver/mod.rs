// src/solver/mod.rs

//! Access to the dependency solver
//!
//! The solver itself is an external program; this module wraps it behind a
//! narrow seam:
//!
//! - [`SolverBackend`] opens a [`SolverContext`] for a channel list and a
//!   target subdir; the context answers `solve(specs)` queries
//! - [`SolverHandle`] adds spec normalization, the deny-list and run-export
//!   collection on top of a context
//! - [`SolverPool`] keeps recently used handles alive for a short while
//! - [`MicromambaBackend`] is the shipped backend

mod handle;
mod micromamba;
mod pool;

pub use handle::{DENY_LIST, RunExportIgnores, SolveOutcome, SolverHandle};
pub use micromamba::{MicromambaBackend, SOLVER_PROGRAM_ENV};
pub use pool::{SOLVER_POOL_SIZE, SOLVER_POOL_TTL_SECS, SolverPool};

use crate::channel::{Channel, PlatformTarget};
use crate::error::Result;

/// One package the solver would install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedPackage {
    /// Channel subdir URL the artifact is served from
    pub channel_url: String,
    /// Artifact file name (`name-version-build.conda`)
    pub filename: String,
    pub name: String,
    pub version: String,
    pub build: String,
    /// The repodata record of the artifact, as JSON
    pub metadata_json: String,
}

impl LinkedPackage {
    /// `name version build`, pinning exactly this artifact
    pub fn concrete_spec(&self) -> String {
        format!("{} {} {}", self.name, self.version, self.build)
    }
}

/// Answer of a single solver invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolveAttempt {
    /// The requirements are satisfiable; these packages would be linked
    Solved(Vec<LinkedPackage>),
    /// The requirements are not satisfiable; the solver's explanation
    Unsatisfiable(String),
}

/// Factory of solver contexts
pub trait SolverBackend: Send + Sync {
    /// Prepare a context solving against `channels` (highest priority
    /// first) for the `target` subdir
    fn open(&self, channels: &[Channel], target: &PlatformTarget) -> Result<Box<dyn SolverContext>>;
}

/// A solver bound to one channel list and target
///
/// Downgrades are always allowed. An `Err` means the solver could not be
/// run at all, not that the requirements are unsatisfiable.
pub trait SolverContext: Send + Sync {
    fn solve(&self, specs: &[String]) -> Result<SolveAttempt>;
}
