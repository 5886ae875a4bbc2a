// src/solver/pool.rs

//! Short-lived cache of solver handles
//!
//! Opening a solver can mean loading repodata for every channel, so handles
//! are shared between the phases and variants of a check. The cache is
//! keyed by the exact channel order and subdir; entries expire after a
//! minute so long runs pick up channel updates.
//!
//! The cache lock is not held while a solver opens, so slow repodata loads
//! for one key do not stall other keys. When two callers open the same key
//! at once, the handle stored first is the one both get back.

use super::{SolverBackend, SolverHandle};
use crate::channel::{Channel, PlatformTarget};
use crate::error::Result;
use crate::run_exports::RunExportCache;
use cached::{Cached, TimedSizedCache};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Seconds a solver handle stays cached
pub const SOLVER_POOL_TTL_SECS: u64 = 60;

/// Number of solver handles kept at once
pub const SOLVER_POOL_SIZE: usize = 8;

type HandleKey = (Vec<String>, String);

/// Pool of solver handles keyed by (channels, target subdir)
pub struct SolverPool {
    backend: Arc<dyn SolverBackend>,
    run_exports: Arc<RunExportCache>,
    handles: Mutex<TimedSizedCache<HandleKey, Arc<SolverHandle>>>,
    opened: AtomicUsize,
}

impl SolverPool {
    pub fn new(backend: Arc<dyn SolverBackend>, run_exports: Arc<RunExportCache>) -> Self {
        Self::with_limits(backend, run_exports, SOLVER_POOL_SIZE, SOLVER_POOL_TTL_SECS)
    }

    pub fn with_limits(
        backend: Arc<dyn SolverBackend>,
        run_exports: Arc<RunExportCache>,
        size: usize,
        ttl_secs: u64,
    ) -> Self {
        Self {
            backend,
            run_exports,
            handles: Mutex::new(TimedSizedCache::with_size_and_lifespan(size.max(1), ttl_secs)),
            opened: AtomicUsize::new(0),
        }
    }

    /// The run-export cache shared by every handle of this pool
    pub fn run_exports(&self) -> &Arc<RunExportCache> {
        &self.run_exports
    }

    /// Get a solver for `channels` and `target`, opening one when needed
    pub fn get_solver(&self, channels: &[Channel], target: &PlatformTarget) -> Result<Arc<SolverHandle>> {
        let key: HandleKey = (
            channels.iter().map(|c| c.as_str().to_string()).collect(),
            target.subdir(),
        );

        if let Some(handle) = self.cached(&key) {
            return Ok(handle);
        }

        debug!("Opening solver for {} on {:?}", target, key.0);
        let context = self.backend.open(channels, target)?;
        self.opened.fetch_add(1, Ordering::Relaxed);

        let handle = Arc::new(SolverHandle::new(
            channels.to_vec(),
            target.clone(),
            context,
            Arc::clone(&self.run_exports),
        ));
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = handles.cache_get(&key) {
            debug!("Solver for {} was opened concurrently; dropping ours", target);
            return Ok(Arc::clone(existing));
        }
        handles.cache_set(key, Arc::clone(&handle));
        Ok(handle)
    }

    fn cached(&self, key: &HandleKey) -> Option<Arc<SolverHandle>> {
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        handles.cache_get(key).map(Arc::clone)
    }

    /// Number of solver contexts opened so far
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::repository::MetadataFetcher;
    use crate::solver::{SolveAttempt, SolverContext};
    use std::path::Path;
    use std::thread;
    use std::time::{Duration, Instant};

    struct NoNetwork;

    impl MetadataFetcher for NoNetwork {
        fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
            Err(Error::NotFoundError(url.to_string()))
        }

        fn download_file(&self, url: &str, _dest_path: &Path) -> Result<()> {
            Err(Error::NotFoundError(url.to_string()))
        }
    }

    struct Empty;

    impl SolverContext for Empty {
        fn solve(&self, _specs: &[String]) -> Result<SolveAttempt> {
            Ok(SolveAttempt::Solved(Vec::new()))
        }
    }

    struct Backend;

    impl SolverBackend for Backend {
        fn open(&self, _channels: &[Channel], target: &PlatformTarget) -> Result<Box<dyn SolverContext>> {
            if target.platform == "broken" {
                return Err(Error::SolverError("no solver for broken".to_string()));
            }
            Ok(Box::new(Empty))
        }
    }

    fn pool() -> SolverPool {
        SolverPool::new(
            Arc::new(Backend),
            Arc::new(RunExportCache::new(Arc::new(NoNetwork))),
        )
    }

    #[test]
    fn test_handles_are_reused_per_key() {
        let pool = pool();
        let channels = vec![Channel::new("conda-forge"), Channel::new("defaults")];
        let linux = PlatformTarget::new("linux", "64");

        let a = pool.get_solver(&channels, &linux).unwrap();
        let b = pool.get_solver(&channels, &linux).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.opened(), 1);

        pool.get_solver(&channels, &PlatformTarget::new("osx", "arm64")).unwrap();
        let reversed: Vec<Channel> = channels.iter().rev().cloned().collect();
        pool.get_solver(&reversed, &linux).unwrap();
        assert_eq!(pool.opened(), 3);
    }

    #[test]
    fn test_open_failure_is_not_cached() {
        let pool = pool();
        let broken = PlatformTarget::new("broken", "64");
        assert!(pool.get_solver(&[], &broken).is_err());
        assert!(pool.get_solver(&[], &broken).is_err());
        assert_eq!(pool.opened(), 0);
    }

    /// Backend whose `open` waits until a second open is in flight
    #[derive(Default)]
    struct Rendezvous {
        inside: AtomicUsize,
        peak: AtomicUsize,
    }

    impl SolverBackend for Rendezvous {
        fn open(&self, _channels: &[Channel], _target: &PlatformTarget) -> Result<Box<dyn SolverContext>> {
            let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let deadline = Instant::now() + Duration::from_secs(2);
            while self.inside.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            self.peak.fetch_max(self.inside.load(Ordering::SeqCst), Ordering::SeqCst);
            self.inside.fetch_sub(1, Ordering::SeqCst);
            Ok(Box::new(Empty))
        }
    }

    fn rendezvous_pool() -> (Arc<Rendezvous>, Arc<SolverPool>) {
        let backend = Arc::new(Rendezvous::default());
        let pool = Arc::new(SolverPool::new(
            backend.clone(),
            Arc::new(RunExportCache::new(Arc::new(NoNetwork))),
        ));
        (backend, pool)
    }

    #[test]
    fn test_different_keys_open_concurrently() {
        let (backend, pool) = rendezvous_pool();
        let workers: Vec<_> = [("linux", "64"), ("osx", "arm64")]
            .into_iter()
            .map(|(platform, arch)| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || pool.get_solver(&[], &PlatformTarget::new(platform, arch)).unwrap())
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(backend.peak.load(Ordering::SeqCst), 2);
        assert_eq!(pool.opened(), 2);
    }

    #[test]
    fn test_concurrent_opens_of_one_key_share_a_handle() {
        let (_backend, pool) = rendezvous_pool();
        let linux = PlatformTarget::new("linux", "64");
        let workers: Vec<_> = (0..2)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let linux = linux.clone();
                thread::spawn(move || pool.get_solver(&[], &linux).unwrap())
            })
            .collect();
        let handles: Vec<Arc<SolverHandle>> = workers.into_iter().map(|w| w.join().unwrap()).collect();

        assert!(Arc::ptr_eq(&handles[0], &handles[1]));
        assert!(Arc::ptr_eq(&handles[0], &pool.get_solver(&[], &linux).unwrap()));
    }
}
