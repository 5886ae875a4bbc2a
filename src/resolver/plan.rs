// src/resolver/plan.rs

//! Resolution result data structures
//!
//! Contains the per-phase and per-output results of propagation.

use crate::solver::SolveOutcome;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Requirement phases, in the order they are solved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Build,
    Host,
    Run,
    Test,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Phase::Build, Phase::Host, Phase::Run, Phase::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Host => "host",
            Self::Run => "run",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attempted phase: what was handed to the solver and what came back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: Phase,
    /// Cleaned requirement set, before spec normalization
    pub input: Vec<String>,
    pub outcome: SolveOutcome,
}

/// Result of resolving every phase of one rendered output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputResolution {
    pub name: String,
    pub solvable: bool,
    pub errors: Vec<String>,
    /// Attempted phases only; skipped phases have no entry
    pub phases: Vec<PhaseResult>,
}

impl OutputResolution {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            solvable: true,
            errors: Vec::new(),
            phases: Vec::new(),
        }
    }

    /// The result of `phase`, if it was attempted
    pub fn phase(&self, phase: Phase) -> Option<&PhaseResult> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    pub(crate) fn record(&mut self, result: PhaseResult) {
        self.solvable &= result.outcome.solvable;
        if let Some(err) = &result.outcome.error {
            self.errors.push(err.clone());
        }
        self.phases.push(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_ands_solvability() {
        let mut res = OutputResolution::new("foo");
        assert!(res.solvable);

        res.record(PhaseResult {
            phase: Phase::Build,
            input: vec!["make".to_string()],
            outcome: SolveOutcome {
                solvable: true,
                concrete_specs: Some(vec!["make 4.3 h0".to_string()]),
                ..SolveOutcome::default()
            },
        });
        res.record(PhaseResult {
            phase: Phase::Run,
            input: vec!["nope".to_string()],
            outcome: SolveOutcome::unsolvable("nothing provides nope"),
        });

        assert!(!res.solvable);
        assert_eq!(res.errors, ["nothing provides nope"]);
        assert!(res.phase(Phase::Build).is_some());
        assert!(res.phase(Phase::Host).is_none());
        assert_eq!(Phase::Test.to_string(), "test");
        assert_eq!(serde_json::to_string(&Phase::Host).unwrap(), "\"host\"");
    }
}
