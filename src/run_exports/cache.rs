// src/run_exports/cache.rs

//! Process-wide memo of run exports per artifact
//!
//! Lookups consult three sources in order and stop at the first one with
//! data:
//!
//! 1. the channel's `run_exports.json.zst` manifest, next to `repodata.json`
//! 2. the artifact metadata service, only when `channeldata.json` says the
//!    package declares run exports
//! 3. the artifact itself, downloaded into a scratch directory (same
//!    condition as 2)
//!
//! Every failure along the way counts as "no data" so a lookup never fails.

use super::{RunExportBundle, artifact, is_declared};
use crate::channel::split_subdir_url;
use crate::repository::MetadataFetcher;
use cached::{Cached, SizedCache};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Number of artifacts whose run exports are remembered
pub const RUN_EXPORT_CACHE_SIZE: usize = 10_240;

/// Artifact metadata service consulted as the second source
pub const DEFAULT_METADATA_SERVICE: &str =
    "https://raw.githubusercontent.com/regro/libcfgraph/master";

/// Hit/miss counters for the artifact memo
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

type JsonMemo = HashMap<String, Option<Arc<Value>>>;

/// Memoized run-export lookup keyed by (channel subdir URL, filename)
pub struct RunExportCache {
    fetcher: Arc<dyn MetadataFetcher>,
    artifacts: Mutex<SizedCache<(String, String), RunExportBundle>>,
    manifests: Mutex<JsonMemo>,
    channeldata: Mutex<JsonMemo>,
    metadata_service: String,
    scratch_dir: Option<PathBuf>,
}

impl RunExportCache {
    pub fn new(fetcher: Arc<dyn MetadataFetcher>) -> Self {
        Self::with_capacity(fetcher, RUN_EXPORT_CACHE_SIZE)
    }

    pub fn with_capacity(fetcher: Arc<dyn MetadataFetcher>, capacity: usize) -> Self {
        Self {
            fetcher,
            artifacts: Mutex::new(SizedCache::with_size(capacity.max(1))),
            manifests: Mutex::new(HashMap::new()),
            channeldata: Mutex::new(HashMap::new()),
            metadata_service: DEFAULT_METADATA_SERVICE.to_string(),
            scratch_dir: None,
        }
    }

    /// Point the second source at a different metadata service
    pub fn with_metadata_service(mut self, service: impl Into<String>) -> Self {
        self.metadata_service = service.into().trim_end_matches('/').to_string();
        self
    }

    /// Create artifact download directories under `dir`
    pub fn with_scratch_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.scratch_dir = dir;
        self
    }

    /// Run exports of the artifact `filename` served from `channel_url`
    ///
    /// `channel_url` is the subdir URL the solver reported, e.g.
    /// `https://conda.anaconda.org/conda-forge/linux-64`. `package_metadata`
    /// is the repodata record of the artifact as JSON; only its `name` is
    /// used. A second call with the same key performs no fetch.
    pub fn get_run_exports(
        &self,
        channel_url: &str,
        filename: &str,
        package_metadata: &str,
    ) -> RunExportBundle {
        let key = (channel_url.to_string(), filename.to_string());
        {
            let mut artifacts = self.artifacts.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(bundle) = artifacts.cache_get(&key) {
                return bundle.clone();
            }
        }

        let bundle = self.lookup(channel_url, filename, package_metadata);

        let mut artifacts = self.artifacts.lock().unwrap_or_else(|e| e.into_inner());
        artifacts.cache_set(key, bundle.clone());
        bundle
    }

    /// Record run exports for an artifact without consulting any source
    pub fn seed(&self, channel_url: &str, filename: &str, bundle: RunExportBundle) {
        let mut artifacts = self.artifacts.lock().unwrap_or_else(|e| e.into_inner());
        artifacts.cache_set((channel_url.to_string(), filename.to_string()), bundle);
    }

    pub fn stats(&self) -> CacheStats {
        let artifacts = self.artifacts.lock().unwrap_or_else(|e| e.into_inner());
        CacheStats {
            hits: artifacts.cache_hits().unwrap_or(0),
            misses: artifacts.cache_misses().unwrap_or(0),
            entries: artifacts.cache_size(),
        }
    }

    fn lookup(&self, channel_url: &str, filename: &str, package_metadata: &str) -> RunExportBundle {
        let (base, channel, subdir) = split_subdir_url(channel_url);
        let name = serde_json::from_str::<Value>(package_metadata)
            .ok()
            .and_then(|v| v.get("name").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default();

        // First source: the channel manifest
        let mut declaration = self
            .manifest(&format!("{base}/{subdir}/run_exports.json.zst"))
            .and_then(|manifest| {
                let key = if filename.ends_with(".conda") {
                    "packages.conda"
                } else {
                    "packages"
                };
                manifest
                    .get(key)
                    .and_then(|pkgs| pkgs.get(filename))
                    .and_then(|entry| entry.get("run_exports"))
                    .cloned()
            })
            .unwrap_or(Value::Null);

        if !is_declared(&declaration) && self.channeldata_declares(&base, &name) {
            // Second source: the metadata service
            let stem = filename
                .strip_suffix(".conda")
                .or_else(|| filename.strip_suffix(".tar.bz2"))
                .unwrap_or(filename);
            let url = format!(
                "{}/artifacts/{name}/{channel}/{subdir}/{stem}.json",
                self.metadata_service
            );
            declaration = match self.fetcher.fetch_json(&url) {
                Ok(info) => info
                    .pointer("/rendered_recipe/build/run_exports")
                    .cloned()
                    .unwrap_or(Value::Null),
                Err(e) => {
                    debug!("No artifact metadata at {}: {}", url, e);
                    Value::Null
                }
            };

            // Third source: the artifact itself
            if !is_declared(&declaration) {
                info!("RUN EXPORTS: downloading package {}/{}", channel_url, filename);
                let url = format!("{}/{}", channel_url.trim_end_matches('/'), filename);
                declaration = match artifact::download_run_exports(
                    self.fetcher.as_ref(),
                    &url,
                    filename,
                    self.scratch_dir.as_deref(),
                ) {
                    Ok(found) => found.unwrap_or(Value::Null),
                    Err(e) => {
                        debug!("Could not get run exports for {}: {}", filename, e);
                        Value::Null
                    }
                };
            }
        }

        RunExportBundle::from_declaration(&declaration)
    }

    fn manifest(&self, url: &str) -> Option<Arc<Value>> {
        memoized_json(&self.manifests, self.fetcher.as_ref(), url)
    }

    fn channeldata_declares(&self, base: &str, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }
        memoized_json(
            &self.channeldata,
            self.fetcher.as_ref(),
            &format!("{base}/channeldata.json"),
        )
        .and_then(|cd| cd.get("packages")?.get(name)?.get("run_exports").cloned())
        .is_some_and(|rx| is_declared(&rx))
    }
}

/// Fetch a JSON document once per URL; failures are remembered as `None`
fn memoized_json(
    memo: &Mutex<JsonMemo>,
    fetcher: &dyn MetadataFetcher,
    url: &str,
) -> Option<Arc<Value>> {
    if let Some(hit) = memo.lock().unwrap_or_else(|e| e.into_inner()).get(url) {
        return hit.clone();
    }

    let fetched = match fetcher.fetch_json(url) {
        Ok(value) => Some(Arc::new(value)),
        Err(e) => {
            debug!("Unable to fetch {}: {}", url, e);
            None
        }
    };

    memo.lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(url.to_string(), fetched.clone());
    fetched
}
