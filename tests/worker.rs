// tests/worker.rs

//! Bounded execution: timeouts fail open, failures fail closed.

use feedstock_solvable::feedstock::NO_VARIANTS_MESSAGE;
use feedstock_solvable::worker::{SubprocessWorker, run_bounded};
use feedstock_solvable::{CheckOptions, Error, Isolation, SolvabilityReport, check_recipe_solvable};
use std::thread;
use std::time::{Duration, Instant};

fn solvable_report() -> SolvabilityReport {
    SolvabilityReport {
        solvable: true,
        ..SolvabilityReport::default()
    }
}

#[test]
fn test_timeout_fails_open() {
    let start = Instant::now();
    let report = run_bounded(Some(Duration::from_millis(100)), "slow-feedstock", || {
        thread::sleep(Duration::from_secs(5));
        Ok(SolvabilityReport::failed("too late"))
    });

    assert!(report.solvable);
    assert!(report.errors.is_empty());
    assert!(report.solvable_by_variant.is_empty());
    assert!(start.elapsed() < Duration::from_secs(4));
}

#[test]
fn test_result_within_budget_is_verbatim() {
    let report = run_bounded(Some(Duration::from_secs(30)), "quick", || {
        let mut report = solvable_report();
        report.solvable_by_variant.insert("linux_64_".to_string(), true);
        Ok(report)
    });
    assert!(report.solvable);
    assert_eq!(report.solvable_by_variant.len(), 1);
}

#[test]
fn test_error_fails_closed() {
    let report = run_bounded(Some(Duration::from_secs(30)), "broken", || {
        Err(Error::SolverError("solver segfaulted".to_string()))
    });
    assert!(!report.solvable);
    assert_eq!(report.errors, ["Solver failure: solver segfaulted"]);
    assert!(report.solvable_by_variant.is_empty());
}

#[test]
fn test_panic_fails_closed() {
    for timeout in [None, Some(Duration::from_secs(30))] {
        let report = run_bounded(timeout, "panicky", || -> feedstock_solvable::Result<SolvabilityReport> {
            panic!("worker blew up")
        });
        assert!(!report.solvable);
        assert_eq!(report.errors, ["check panicked: worker blew up"]);
    }
}

#[test]
fn test_thread_isolation_reports_missing_variants() {
    let dir = tempfile::tempdir().unwrap();
    let options = CheckOptions {
        timeout: Some(Duration::from_secs(30)),
        isolation: Isolation::Thread,
        ..CheckOptions::default()
    };

    let report = check_recipe_solvable(dir.path(), &options);

    assert!(!report.solvable);
    assert_eq!(report.errors, [NO_VARIANTS_MESSAGE]);
}

#[test]
fn test_zero_timeout_means_unbounded() {
    for isolation in [Isolation::Thread, Isolation::Subprocess] {
        let dir = tempfile::tempdir().unwrap();
        let options = CheckOptions {
            timeout: Some(Duration::ZERO),
            isolation,
            ..CheckOptions::default()
        };

        let report = check_recipe_solvable(dir.path(), &options);

        assert!(!report.solvable, "{isolation:?}");
        assert_eq!(report.errors, [NO_VARIANTS_MESSAGE]);
        assert!(report.solvable_by_variant.is_empty());
    }
}

#[test]
fn test_zero_budget_waits_for_the_job() {
    let report = run_bounded(Some(Duration::ZERO), "zero-budget", || {
        thread::sleep(Duration::from_millis(50));
        Err(Error::SolverError("finished anyway".to_string()))
    });
    assert!(!report.solvable);
    assert_eq!(report.errors, ["Solver failure: finished anyway"]);

    let dir = tempfile::tempdir().unwrap();
    let worker = SubprocessWorker::new(env!("CARGO_BIN_EXE_feedstock-solvable"));
    let report = worker.run(dir.path(), &CheckOptions::default(), Duration::ZERO);
    assert_eq!(report.errors, [NO_VARIANTS_MESSAGE]);
}

#[test]
fn test_subprocess_worker_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let worker = SubprocessWorker::new(env!("CARGO_BIN_EXE_feedstock-solvable"));

    let report = worker.run(dir.path(), &CheckOptions::default(), Duration::from_secs(60));

    assert!(!report.solvable);
    assert_eq!(report.errors, [NO_VARIANTS_MESSAGE]);
}

#[cfg(unix)]
#[test]
fn test_subprocess_timeout_kills_worker() {
    use std::os::unix::fs::PermissionsExt;

    let bin = tempfile::tempdir().unwrap();
    let script = bin.path().join("slow-worker");
    std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let feedstock = tempfile::tempdir().unwrap();
    let start = Instant::now();
    let report = SubprocessWorker::new(&script).run(feedstock.path(), &CheckOptions::default(), Duration::from_millis(500));

    assert_eq!(report, solvable_report());
    assert!(start.elapsed() < Duration::from_secs(20));
}

#[test]
fn test_missing_worker_program_fails_closed() {
    let feedstock = tempfile::tempdir().unwrap();
    let report = SubprocessWorker::new("/nonexistent/feedstock-solvable").run(
        feedstock.path(),
        &CheckOptions::default(),
        Duration::from_secs(5),
    );
    assert!(!report.solvable);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with("Worker failed:"));
}
