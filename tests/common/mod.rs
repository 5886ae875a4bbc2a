// tests/common/mod.rs

//! Shared fakes and helpers for integration tests.

#![allow(dead_code)]

use feedstock_solvable::channel::{Channel, PlatformTarget};
use feedstock_solvable::config::VariantConfig;
use feedstock_solvable::render::{RecipeRenderer, RenderedOutput};
use feedstock_solvable::repository::MetadataFetcher;
use feedstock_solvable::run_exports::{RunExportBundle, RunExportCache};
use feedstock_solvable::solver::{LinkedPackage, SolveAttempt, SolverBackend, SolverContext, SolverPool};
use feedstock_solvable::virtual_packages::VirtualPackageIndex;
use feedstock_solvable::{Error, FeedstockChecker, PropagationEngine, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Base URL every fake package is served from
pub const FAKE_CHANNEL: &str = "https://fake.invalid/fake-forge";

/// Subdir URL of a fake package
pub fn channel_url(subdir: &str) -> String {
    format!("{FAKE_CHANNEL}/{subdir}")
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Fetcher with nothing behind it; counts requests
#[derive(Default)]
pub struct FakeFetcher {
    pub requests: AtomicUsize,
}

impl MetadataFetcher for FakeFetcher {
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Err(Error::NotFoundError(url.to_string()))
    }

    fn download_file(&self, url: &str, _dest_path: &Path) -> Result<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Err(Error::NotFoundError(url.to_string()))
    }
}

/// One call the fake solver received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolveCall {
    pub subdir: String,
    pub channels: Vec<String>,
    pub specs: Vec<String>,
}

/// Solver knowing a flat catalog of packages without dependencies
///
/// A request is satisfiable when every requested name is in the catalog.
#[derive(Default)]
pub struct FakeBackend {
    catalog: BTreeMap<String, (String, String)>,
    calls: Arc<Mutex<Vec<SolveCall>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_package(mut self, name: &str, version: &str, build: &str) -> Self {
        self.catalog
            .insert(name.to_string(), (version.to_string(), build.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<SolveCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Artifact file name of a catalog package
    pub fn filename(&self, name: &str) -> String {
        let (version, build) = &self.catalog[name];
        format!("{name}-{version}-{build}.conda")
    }
}

impl SolverBackend for FakeBackend {
    fn open(&self, channels: &[Channel], target: &PlatformTarget) -> Result<Box<dyn SolverContext>> {
        Ok(Box::new(FakeContext {
            catalog: self.catalog.clone(),
            subdir: target.subdir(),
            channels: channels.iter().map(|c| c.as_str().to_string()).collect(),
            calls: self.calls.clone(),
        }))
    }
}

struct FakeContext {
    catalog: BTreeMap<String, (String, String)>,
    subdir: String,
    channels: Vec<String>,
    calls: Arc<Mutex<Vec<SolveCall>>>,
}

impl SolverContext for FakeContext {
    fn solve(&self, specs: &[String]) -> Result<SolveAttempt> {
        self.calls.lock().unwrap().push(SolveCall {
            subdir: self.subdir.clone(),
            channels: self.channels.clone(),
            specs: specs.to_vec(),
        });

        let mut linked = Vec::new();
        let mut missing = Vec::new();
        for spec in specs {
            let name = spec.split_whitespace().next().unwrap_or_default();
            match self.catalog.get(name) {
                Some((version, build)) => linked.push(LinkedPackage {
                    channel_url: channel_url(&self.subdir),
                    filename: format!("{name}-{version}-{build}.conda"),
                    name: name.to_string(),
                    version: version.clone(),
                    build: build.clone(),
                    metadata_json: format!(r#"{{"name": "{name}"}}"#),
                }),
                None => missing.push(name.to_string()),
            }
        }

        if missing.is_empty() {
            Ok(SolveAttempt::Solved(linked))
        } else {
            Ok(SolveAttempt::Unsatisfiable(format!(
                "nothing provides requested {}",
                missing.join(", ")
            )))
        }
    }
}

/// Renderer returning fixed outputs; panics for one host platform if asked
#[derive(Default)]
pub struct FakeRenderer {
    outputs: Vec<RenderedOutput>,
    panic_on: Option<String>,
    pub renders: AtomicUsize,
}

impl FakeRenderer {
    pub fn new(outputs: Vec<RenderedOutput>) -> Self {
        Self {
            outputs,
            ..Self::default()
        }
    }

    pub fn panicking_on(mut self, platform: &str) -> Self {
        self.panic_on = Some(platform.to_string());
        self
    }
}

impl RecipeRenderer for FakeRenderer {
    fn render(
        &self,
        _recipe_dir: &Path,
        host_target: &PlatformTarget,
        _build_target: &PlatformTarget,
        _variant: &VariantConfig,
    ) -> Result<Vec<RenderedOutput>> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        if self.panic_on.as_deref() == Some(host_target.platform.as_str()) {
            panic!("renderer exploded on {host_target}");
        }
        Ok(self.outputs.clone())
    }
}

/// A fake backend wired to a pool and run-export cache
pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub fetcher: Arc<FakeFetcher>,
    pub run_exports: Arc<RunExportCache>,
    pub pool: Arc<SolverPool>,
}

impl Harness {
    pub fn new(backend: FakeBackend) -> Self {
        let backend = Arc::new(backend);
        let fetcher = Arc::new(FakeFetcher::default());
        let run_exports = Arc::new(RunExportCache::new(fetcher.clone()));
        let pool = Arc::new(SolverPool::new(backend.clone(), run_exports.clone()));
        Self {
            backend,
            fetcher,
            run_exports,
            pool,
        }
    }

    /// Declare run exports of a catalog package on `subdir`
    pub fn seed(&self, subdir: &str, name: &str, bundle: RunExportBundle) {
        self.run_exports
            .seed(&channel_url(subdir), &self.backend.filename(name), bundle);
    }

    pub fn engine(&self) -> PropagationEngine {
        PropagationEngine::new(self.pool.clone())
    }

    pub fn checker(&self, renderer: Arc<FakeRenderer>) -> FeedstockChecker {
        FeedstockChecker::new(
            renderer,
            self.pool.clone(),
            VirtualPackageIndex::new(self.fetcher.clone(), None),
        )
    }
}

/// Bundle from literal bucket contents
pub fn bundle(weak: &[&str], strong: &[&str], noarch: &[&str]) -> RunExportBundle {
    RunExportBundle {
        weak: weak.iter().map(|s| s.to_string()).collect(),
        strong: strong.iter().map(|s| s.to_string()).collect(),
        noarch: noarch.iter().map(|s| s.to_string()).collect(),
    }
}

/// Feedstock directory with the given variant files and optionally a recipe
pub fn feedstock(variants: &[(&str, &str)], with_recipe: bool) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let ci = dir.path().join(".ci_support");
    fs::create_dir_all(&ci).unwrap();
    for (name, content) in variants {
        fs::write(ci.join(name), content).unwrap();
    }
    if with_recipe {
        let recipe = dir.path().join("recipe");
        fs::create_dir_all(&recipe).unwrap();
        fs::write(recipe.join("meta.yaml"), "package:\n  name: foo\n").unwrap();
    }
    dir
}
