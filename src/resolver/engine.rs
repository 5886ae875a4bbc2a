// src/resolver/engine.rs

//! Requirement propagation
//!
//! Solves the build, host, run and test requirement sets of one rendered
//! output in order, carrying run exports from earlier environments into
//! later requirement sets and pinning run requirements to what build and
//! host resolved to.

use crate::channel::{Channel, PlatformTarget};
use crate::matchspec::package_name;
use crate::render::{
    BUILD_REQUIREMENTS, HOST_REQUIREMENTS, IGNORE_RUN_EXPORTS, IGNORE_RUN_EXPORTS_FROM,
    RUN_REQUIREMENTS, RenderedOutput, TEST_REQUIREMENTS, TEST_REQUIRES,
};
use crate::solver::{RunExportIgnores, SolveOutcome, SolverPool};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use super::pins::apply_pins;
use super::plan::{OutputResolution, Phase, PhaseResult};

/// Drop the recipe's own outputs and exact duplicates, keeping order
pub fn clean_requirements(reqs: &[String], outnames: &BTreeSet<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    reqs.iter()
        .filter(|req| !outnames.contains(&package_name(req)))
        .filter(|req| seen.insert(req.as_str()))
        .cloned()
        .collect()
}

/// Union `exports` into `reqs`
fn merge_exports(reqs: &mut Vec<String>, exports: &BTreeSet<String>) {
    for export in exports {
        if !reqs.contains(export) {
            reqs.push(export.clone());
        }
    }
}

/// Drives the phases of each output through a shared solver pool
pub struct PropagationEngine {
    pool: Arc<SolverPool>,
}

impl PropagationEngine {
    pub fn new(pool: Arc<SolverPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<SolverPool> {
        &self.pool
    }

    /// Resolve all phases of `output`
    ///
    /// `outnames` holds every output name of the recipe; those are removed
    /// from each requirement set before solving. Build requirements are
    /// solved for `build_target`, everything else for `host_target`.
    pub fn resolve_output(
        &self,
        output: &RenderedOutput,
        outnames: &BTreeSet<String>,
        channels: &[Channel],
        host_target: &PlatformTarget,
        build_target: &PlatformTarget,
    ) -> OutputResolution {
        info!("Checking output {} for {}", output.name, host_target);
        let mut resolution = OutputResolution::new(&output.name);
        let ignores = RunExportIgnores::new(
            output.get_value(IGNORE_RUN_EXPORTS_FROM),
            output.get_value(IGNORE_RUN_EXPORTS),
        );
        let noarch = output.is_noarch();

        let mut host = output.get_value(HOST_REQUIREMENTS).to_vec();
        let mut run = output.get_value(RUN_REQUIREMENTS).to_vec();
        let mut build_specs = Vec::new();
        let mut host_specs = Vec::new();

        let build = clean_requirements(output.get_value(BUILD_REQUIREMENTS), outnames);
        if !build.is_empty() {
            let result = self.solve_phase(Phase::Build, build, channels, build_target, Some(&ignores));
            let exports = &result.outcome.run_exports;

            if output.is_cross {
                merge_exports(&mut host, &exports.strong);
                if !noarch {
                    merge_exports(&mut run, &exports.strong);
                }
            } else if noarch {
                merge_exports(&mut run, &exports.strong);
                if output.build_is_host {
                    merge_exports(&mut run, &exports.noarch);
                }
            } else {
                merge_exports(&mut run, &exports.strong);
                if output.build_is_host {
                    merge_exports(&mut run, &exports.weak);
                } else {
                    // Both weak and strong build exports land in host here
                    merge_exports(&mut host, &exports.weak);
                    merge_exports(&mut host, &exports.strong);
                }
            }

            build_specs = result.outcome.specs().to_vec();
            resolution.record(result);
        }

        let host = clean_requirements(&host, outnames);
        if !host.is_empty() {
            let result = self.solve_phase(Phase::Host, host, channels, host_target, Some(&ignores));
            if output.is_cross {
                let exports = &result.outcome.run_exports;
                merge_exports(&mut run, if noarch { &exports.noarch } else { &exports.weak });
            }
            host_specs = result.outcome.specs().to_vec();
            resolution.record(result);
        }

        let pinned = apply_pins(
            &run,
            &host_specs,
            &build_specs,
            output.is_cross,
            noarch,
            outnames,
            &output.pin_run_as_build,
        );
        let run = clean_requirements(&pinned, outnames);
        let mut run_for_test = run.clone();
        if !run.is_empty() {
            let result = self.solve_phase(Phase::Run, run, channels, host_target, None);
            if let Some(specs) = &result.outcome.concrete_specs {
                run_for_test = specs.clone();
            }
            resolution.record(result);
        }

        let run_names: BTreeSet<String> = run_for_test.iter().map(|r| package_name(r)).collect();
        let mut test: Vec<String> = output
            .get_value(TEST_REQUIRES)
            .iter()
            .chain(output.get_value(TEST_REQUIREMENTS))
            .filter(|req| !run_names.contains(&package_name(req)))
            .cloned()
            .collect();
        test.extend(run_for_test);
        let test = clean_requirements(&test, outnames);
        if !test.is_empty() {
            let result = self.solve_phase(Phase::Test, test, channels, host_target, None);
            resolution.record(result);
        }

        debug!(
            "Output {}: solvable={} after {} phase(s)",
            resolution.name,
            resolution.solvable,
            resolution.phases.len()
        );
        resolution
    }

    fn solve_phase(
        &self,
        phase: Phase,
        input: Vec<String>,
        channels: &[Channel],
        target: &PlatformTarget,
        ignores: Option<&RunExportIgnores>,
    ) -> PhaseResult {
        debug!("{} phase on {}: {:?}", phase, target, input);
        let outcome = match self.pool.get_solver(channels, target) {
            Ok(handle) => handle.solve(&input, ignores),
            Err(e) => SolveOutcome::unsolvable(e.to_string()),
        };
        if !outcome.solvable {
            debug!("{} phase unsolvable: {:?}", phase, outcome.error);
        }
        PhaseResult { phase, input, outcome }
    }
}
