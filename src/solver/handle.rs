// src/solver/handle.rs

//! A solver bound to one (channels, target) pair

use super::{LinkedPackage, SolveAttempt, SolverContext};
use crate::channel::{Channel, PlatformTarget};
use crate::matchspec::{RequirementSpec, package_name};
use crate::run_exports::{RunExportBundle, RunExportCache};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Packages never handed to the solver nor reported back
pub const DENY_LIST: [&str; 1] = ["parquet-cpp"];

fn is_denied(name: &str) -> bool {
    DENY_LIST.contains(&name)
}

/// Result of solving one requirement set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolveOutcome {
    pub solvable: bool,
    pub error: Option<String>,
    /// `name version build` of every resolved package; present iff solvable
    pub concrete_specs: Option<Vec<String>>,
    #[serde(default)]
    pub run_exports: RunExportBundle,
}

impl SolveOutcome {
    pub fn unsolvable(error: impl Into<String>) -> Self {
        Self {
            solvable: false,
            error: Some(error.into()),
            concrete_specs: None,
            run_exports: RunExportBundle::default(),
        }
    }

    /// Resolved specs, empty when the solve failed
    pub fn specs(&self) -> &[String] {
        self.concrete_specs.as_deref().unwrap_or_default()
    }
}

/// Which run exports to leave out of a solve result
///
/// Both sets hold package names; requirement strings are reduced to their
/// name on construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunExportIgnores {
    /// Resolved packages whose exports are skipped entirely
    pub from: BTreeSet<String>,
    /// Exported packages dropped from every bucket
    pub tokens: BTreeSet<String>,
}

impl RunExportIgnores {
    pub fn new<S: AsRef<str>>(from: &[S], tokens: &[S]) -> Self {
        Self {
            from: from.iter().map(|s| package_name(s.as_ref())).collect(),
            tokens: tokens.iter().map(|s| package_name(s.as_ref())).collect(),
        }
    }
}

/// Solver for one channel list and target subdir
pub struct SolverHandle {
    channels: Vec<Channel>,
    target: PlatformTarget,
    context: Box<dyn SolverContext>,
    run_exports: Arc<RunExportCache>,
}

impl SolverHandle {
    pub fn new(
        channels: Vec<Channel>,
        target: PlatformTarget,
        context: Box<dyn SolverContext>,
        run_exports: Arc<RunExportCache>,
    ) -> Self {
        Self {
            channels,
            target,
            context,
            run_exports,
        }
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn target(&self) -> &PlatformTarget {
        &self.target
    }

    /// Solve `specs`
    ///
    /// With `run_exports` given, the run exports of the requested top-level
    /// packages are gathered into the outcome. Never fails: invalid specs and
    /// solver breakdowns come back as unsolvable outcomes.
    pub fn solve(&self, specs: &[String], run_exports: Option<&RunExportIgnores>) -> SolveOutcome {
        let mut normalized = Vec::with_capacity(specs.len());
        let mut requested = BTreeSet::new();
        for spec in specs {
            let parsed = match RequirementSpec::parse(spec) {
                Ok(parsed) => parsed,
                Err(e) => return SolveOutcome::unsolvable(e.to_string()),
            };
            if is_denied(&parsed.name) {
                continue;
            }
            requested.insert(parsed.name.clone());
            normalized.push(parsed.normalized());
        }

        debug!(
            "Running solver on {} for specs\n\n{}\n",
            self.target,
            normalized.join("\n")
        );

        let packages = match self.context.solve(&normalized) {
            Ok(SolveAttempt::Solved(packages)) => packages,
            Ok(SolveAttempt::Unsatisfiable(explanation)) => {
                info!("Solver failed on {}: {}", self.target, explanation.lines().next().unwrap_or(""));
                return SolveOutcome::unsolvable(explanation);
            }
            Err(e) => {
                info!("Solver could not run on {}: {}", self.target, e);
                return SolveOutcome::unsolvable(e.to_string());
            }
        };

        let concrete_specs = packages
            .iter()
            .filter(|pkg| !is_denied(&pkg.name))
            .map(LinkedPackage::concrete_spec)
            .collect();

        let exports = match run_exports {
            Some(ignores) => self.collect_run_exports(&packages, &requested, ignores),
            None => RunExportBundle::default(),
        };

        SolveOutcome {
            solvable: true,
            error: None,
            concrete_specs: Some(concrete_specs),
            run_exports: exports,
        }
    }

    /// Union the run exports of the packages that were asked for by name
    fn collect_run_exports(
        &self,
        packages: &[LinkedPackage],
        requested: &BTreeSet<String>,
        ignores: &RunExportIgnores,
    ) -> RunExportBundle {
        let mut bundle = RunExportBundle::default();
        for pkg in packages {
            if !requested.contains(&pkg.name) || ignores.from.contains(&pkg.name) {
                continue;
            }
            let exports = self
                .run_exports
                .get_run_exports(&pkg.channel_url, &pkg.filename, &pkg.metadata_json);
            bundle.merge(&exports.without_names(&ignores.tokens));
        }
        bundle
    }
}
