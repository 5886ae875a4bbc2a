// src/solver/micromamba.rs

//! Solver backend driving `micromamba create --dry-run --json`
//!
//! Any program with a compatible command line (micromamba, mamba 2) works.
//! The dry run solves into a prefix that is never created. The glibc
//! override travels on the child's environment only.

use super::{LinkedPackage, SolveAttempt, SolverBackend, SolverContext};
use crate::channel::{Channel, PlatformTarget};
use crate::error::{Error, Result};
use crate::virtual_packages::glibc_override;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Environment variable naming the solver program
pub const SOLVER_PROGRAM_ENV: &str = "FEEDSTOCK_SOLVABLE_SOLVER";

/// Programs looked up on `PATH`, in order
const CANDIDATE_PROGRAMS: [&str; 2] = ["micromamba", "mamba"];

/// Backend spawning one dry-run solve per query
#[derive(Debug, Clone)]
pub struct MicromambaBackend {
    program: PathBuf,
    glibc_override: String,
}

impl MicromambaBackend {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            glibc_override: glibc_override(),
        }
    }

    /// Locate the solver program
    ///
    /// `configured` (from the config file) wins, then
    /// `FEEDSTOCK_SOLVABLE_SOLVER`, then the first candidate on `PATH`.
    pub fn discover(configured: Option<&str>) -> Result<Self> {
        let from_env = std::env::var(SOLVER_PROGRAM_ENV).ok();
        if let Some(program) = configured.map(str::to_string).or(from_env) {
            let path = which::which(&program)
                .map_err(|e| Error::InitError(format!("Solver program '{program}' not found: {e}")))?;
            return Ok(Self::new(path));
        }

        CANDIDATE_PROGRAMS
            .iter()
            .find_map(|name| which::which(name).ok())
            .map(Self::new)
            .ok_or_else(|| {
                Error::InitError(format!(
                    "No solver found on PATH (tried {}); set {SOLVER_PROGRAM_ENV}",
                    CANDIDATE_PROGRAMS.join(", ")
                ))
            })
    }

    /// Value of `CONDA_OVERRIDE_GLIBC` for the solver process
    pub fn with_glibc_override(mut self, version: impl Into<String>) -> Self {
        self.glibc_override = version.into();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl SolverBackend for MicromambaBackend {
    fn open(&self, channels: &[Channel], target: &PlatformTarget) -> Result<Box<dyn SolverContext>> {
        let prefix = tempfile::Builder::new().prefix("solve-prefix-").tempdir()?;
        Ok(Box::new(MicromambaContext {
            program: self.program.clone(),
            glibc_override: self.glibc_override.clone(),
            channel_urls: channels.iter().map(Channel::base_url).collect(),
            subdir: target.subdir(),
            prefix,
        }))
    }
}

struct MicromambaContext {
    program: PathBuf,
    glibc_override: String,
    channel_urls: Vec<String>,
    subdir: String,
    /// Parent of the never-created target prefix
    prefix: tempfile::TempDir,
}

impl MicromambaContext {
    fn command(&self, specs: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("create")
            .args(["--dry-run", "--json", "--yes"])
            .args(["--override-channels", "--strict-channel-priority"])
            .arg("--platform")
            .arg(&self.subdir)
            .arg("-p")
            .arg(self.prefix.path().join("env"));
        for url in &self.channel_urls {
            cmd.arg("-c").arg(url);
        }
        cmd.args(specs)
            .env("CONDA_OVERRIDE_GLIBC", &self.glibc_override)
            .stdin(Stdio::null());
        cmd
    }
}

impl SolverContext for MicromambaContext {
    fn solve(&self, specs: &[String]) -> Result<SolveAttempt> {
        let output = self.command(specs).output().map_err(|e| {
            Error::SolverError(format!("Failed to run {}: {e}", self.program.display()))
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(
            "{} exited with {} ({} bytes of output)",
            self.program.display(),
            output.status,
            stdout.len()
        );

        parse_solver_output(&stdout, &stderr, output.status.success())
    }
}

/// Interpret the JSON report of a dry-run solve
pub(crate) fn parse_solver_output(stdout: &str, stderr: &str, exited_ok: bool) -> Result<SolveAttempt> {
    let report: Value = match serde_json::from_str(stdout.trim()) {
        Ok(report) => report,
        Err(_) if !exited_ok => {
            return Err(Error::SolverError(format!(
                "solver exited with an error: {}",
                stderr.trim()
            )));
        }
        Err(e) => {
            return Err(Error::SolverError(format!("Unparsable solver output: {e}")));
        }
    };

    let succeeded = report
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(exited_ok);

    if !succeeded || !exited_ok {
        return Ok(SolveAttempt::Unsatisfiable(explanation(&report, stderr)));
    }

    let links = report
        .pointer("/actions/LINK")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    links
        .iter()
        .map(linked_package)
        .collect::<Result<Vec<_>>>()
        .map(SolveAttempt::Solved)
}

fn explanation(report: &Value, stderr: &str) -> String {
    if let Some(problems) = report.get("solver_problems").and_then(Value::as_array) {
        let lines: Vec<&str> = problems.iter().filter_map(Value::as_str).collect();
        if !lines.is_empty() {
            return lines.join("\n");
        }
    }
    if let Some(message) = report.get("message").and_then(Value::as_str) {
        return message.to_string();
    }
    stderr.trim().to_string()
}

fn linked_package(entry: &Value) -> Result<LinkedPackage> {
    let field = |key: &str| entry.get(key).and_then(Value::as_str).map(str::to_string);
    let missing = |key: &str| Error::SolverError(format!("LINK entry without '{key}': {entry}"));

    let name = field("name").ok_or_else(|| missing("name"))?;
    let version = field("version").ok_or_else(|| missing("version"))?;
    let build = field("build_string")
        .or_else(|| field("build"))
        .ok_or_else(|| missing("build_string"))?;

    // `url` is the full artifact URL; older reports only give channel + fn
    let (channel_url, filename) = match field("url").as_deref().and_then(|u| u.rsplit_once('/')) {
        Some((base, file)) => (base.to_string(), file.to_string()),
        None => {
            let channel = field("channel").ok_or_else(|| missing("url"))?;
            let subdir = field("subdir").unwrap_or_default();
            let filename = field("fn").ok_or_else(|| missing("fn"))?;
            let base = Channel::new(channel).subdir_url(&subdir);
            (base, filename)
        }
    };

    Ok(LinkedPackage {
        channel_url,
        filename,
        name,
        version,
        build,
        metadata_json: entry.to_string(),
    })
}
