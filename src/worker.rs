// src/worker.rs

//! Bounded execution of feedstock checks
//!
//! A check that runs out of time is reported as solvable (fail open); one
//! that errors or panics is reported as not solvable with a single error
//! (fail closed). Two isolation modes exist:
//!
//! - a worker thread, abandoned on timeout
//! - a child process running the hidden `worker` subcommand, killed on
//!   timeout; options go in as JSON on stdin, the report comes back as JSON
//!   on stdout

use crate::config::CheckOptions;
use crate::error::{Error, Result};
use crate::feedstock::SolvabilityReport;
use std::any::Any;
use std::io::{Read, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Name of the hidden subcommand serving subprocess checks
pub const WORKER_SUBCOMMAND: &str = "worker";

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("check panicked: {detail}")
}

fn settle(result: std::thread::Result<Result<SolvabilityReport>>) -> SolvabilityReport {
    match result {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => SolvabilityReport::failed(e.to_string()),
        Err(payload) => SolvabilityReport::failed(panic_message(payload.as_ref())),
    }
}

/// Run `job` within `timeout` on a worker thread
///
/// Without a timeout, or with a zero one, the job runs on the calling
/// thread. On timeout the worker thread is left to finish on its own; its
/// result is discarded.
pub fn run_bounded<F>(timeout: Option<Duration>, label: &str, job: F) -> SolvabilityReport
where
    F: FnOnce() -> Result<SolvabilityReport> + Send + 'static,
{
    let Some(timeout) = timeout.filter(|t| !t.is_zero()) else {
        return settle(catch_unwind(AssertUnwindSafe(job)));
    };

    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("feedstock-check".to_string())
        .spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(job));
            // The receiver is gone after a timeout
            let _ = tx.send(result);
        });
    if let Err(e) = spawned {
        return SolvabilityReport::failed(Error::WorkerError(format!("cannot spawn worker thread: {e}")).to_string());
    }

    match rx.recv_timeout(timeout) {
        Ok(result) => settle(result),
        Err(mpsc::RecvTimeoutError::Timeout) => {
            warn!("SOLVER TIMEOUT for {} after {}s", label, timeout.as_secs());
            SolvabilityReport::timed_out()
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            SolvabilityReport::failed(Error::WorkerError("worker thread exited without a result".to_string()).to_string())
        }
    }
}

/// Runs checks in a child process of `program`
#[derive(Debug, Clone)]
pub struct SubprocessWorker {
    program: PathBuf,
}

impl SubprocessWorker {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Worker re-executing the running binary
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    /// Check `feedstock_dir` in a child process bounded by `timeout`
    pub fn run(&self, feedstock_dir: &Path, options: &CheckOptions, timeout: Duration) -> SolvabilityReport {
        match self.try_run(feedstock_dir, options, timeout) {
            Ok(report) => report,
            Err(e) => SolvabilityReport::failed(e.to_string()),
        }
    }

    fn try_run(&self, feedstock_dir: &Path, options: &CheckOptions, timeout: Duration) -> Result<SolvabilityReport> {
        // The child's scratch data lives under a directory removed by us
        let scratch = match &options.scratch_dir {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                TempDir::with_prefix_in("feedstock-worker-", root)?
            }
            None => TempDir::with_prefix("feedstock-worker-")?,
        };
        let mut child_options = options.clone();
        child_options.timeout = None;
        child_options.scratch_dir = Some(scratch.path().to_path_buf());
        let request = serde_json::to_vec(&child_options)?;

        debug!("Spawning {} {} {}", self.program.display(), WORKER_SUBCOMMAND, feedstock_dir.display());
        let mut child = Command::new(&self.program)
            .arg(WORKER_SUBCOMMAND)
            .arg(feedstock_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::WorkerError(format!("failed to spawn {}: {e}", self.program.display())))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A child that exits early closes the pipe; its exit status says why
            if let Err(e) = stdin.write_all(&request) {
                debug!("Could not write worker request: {}", e);
            }
        }

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::WorkerError("worker stdout not captured".to_string()))?;
        let reader = thread::spawn(move || {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).map(|_| buf)
        });

        // A zero budget means no budget
        let status = if timeout.is_zero() {
            Some(child.wait()?)
        } else {
            child.wait_timeout(timeout)?
        };
        match status {
            Some(status) => {
                let output = reader
                    .join()
                    .map_err(|_| Error::WorkerError("worker output reader panicked".to_string()))??;
                if !status.success() {
                    return Err(Error::WorkerError(format!("worker exited with {status}")));
                }
                serde_json::from_slice(&output)
                    .map_err(|e| Error::WorkerError(format!("unreadable worker report: {e}")))
            }
            None => {
                let _ = child.kill();
                let _ = child.wait();
                warn!(
                    "SOLVER TIMEOUT for {} after {}s",
                    feedstock_dir.display(),
                    timeout.as_secs()
                );
                Ok(SolvabilityReport::timed_out())
            }
        }
    }
}

/// Serve one check request as the `worker` subcommand
///
/// Reads [`CheckOptions`] as JSON from `input`, checks `feedstock_dir` in
/// this process and writes the report as JSON to `output`.
pub fn serve(feedstock_dir: &Path, input: impl Read, mut output: impl Write) -> Result<()> {
    let options: CheckOptions = serde_json::from_reader(input)?;
    let report = crate::feedstock::check_feedstock(feedstock_dir, &options);
    serde_json::to_writer(&mut output, &report)?;
    output.flush()?;
    Ok(())
}
