// src/feedstock.rs

//! Feedstock-level solvability checks
//!
//! A feedstock holds one recipe (`recipe/meta.yaml`) and one variant file
//! per CI job (`.ci_support/*.yaml`). Every variant is rendered and checked
//! on its own; the verdict is the AND over all of them.

use crate::channel::{Channel, PlatformTarget};
use crate::config::{CheckOptions, VariantConfig};
use crate::error::{Error, Result};
use crate::render::{RecipeRenderer, YamlRenderer};
use crate::repository::{ChannelClient, MetadataFetcher};
use crate::resolver::PropagationEngine;
use crate::run_exports::RunExportCache;
use crate::solver::{MicromambaBackend, SolverBackend, SolverPool};
use crate::virtual_packages::VirtualPackageIndex;
use crate::worker::panic_message;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const CI_SUPPORT_DIR: &str = ".ci_support";
pub const RECIPE_DIR: &str = "recipe";

pub const NO_VARIANTS_MESSAGE: &str = "No `.ci_support/*.yaml` files found! This can happen when a rerender \
     results in no builds for a recipe (e.g., a recipe is python 2.7 only). \
     This attempted migration is being reported as not solvable.";

pub const NO_RECIPE_MESSAGE: &str =
    "No `recipe/meta.yaml` file found! This issue is quite weird and someone should investigate!";

/// Verdict of a whole feedstock
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolvabilityReport {
    pub solvable: bool,
    /// Errors of every variant, each prefixed with its variant id
    pub errors: Vec<String>,
    pub solvable_by_variant: BTreeMap<String, bool>,
}

impl SolvabilityReport {
    /// A failed check with a single error and no variant results
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            solvable: false,
            errors: vec![error.into()],
            solvable_by_variant: BTreeMap::new(),
        }
    }

    /// The fail-open result of a check that ran out of time
    pub fn timed_out() -> Self {
        Self {
            solvable: true,
            ..Self::default()
        }
    }

    fn add_variant(&mut self, variant: VariantResult) {
        self.solvable &= variant.solvable;
        self.errors.extend(variant.errors);
        self.solvable_by_variant.insert(variant.variant_id, variant.solvable);
    }
}

/// Result of one variant file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantResult {
    pub variant_id: String,
    pub solvable: bool,
    pub errors: Vec<String>,
}

/// Sorted variant files of a feedstock, after checking it has a recipe
///
/// The error is the message to report.
pub fn discover_variants(feedstock_dir: &Path) -> std::result::Result<Vec<PathBuf>, String> {
    let pattern = feedstock_dir.join(CI_SUPPORT_DIR).join("*.yaml");
    let mut variants: Vec<PathBuf> = match glob::glob(&pattern.to_string_lossy()) {
        Ok(paths) => paths.filter_map(|p| p.ok()).filter(|p| p.is_file()).collect(),
        Err(e) => {
            debug!("Bad variant pattern {}: {}", pattern.display(), e);
            Vec::new()
        }
    };
    variants.sort();

    if variants.is_empty() {
        warn!("{}", NO_VARIANTS_MESSAGE);
        return Err(NO_VARIANTS_MESSAGE.to_string());
    }
    if !feedstock_dir.join(RECIPE_DIR).join("meta.yaml").is_file() {
        warn!("{}", NO_RECIPE_MESSAGE);
        return Err(NO_RECIPE_MESSAGE.to_string());
    }
    Ok(variants)
}

/// Variant id of a variant file: its name without extension
pub fn variant_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Check a feedstock in this process with the shipped collaborators
///
/// The feedstock layout is validated before any collaborator is set up, so
/// a feedstock without variants or recipe never reaches the solver.
pub fn check_feedstock(feedstock_dir: &Path, options: &CheckOptions) -> SolvabilityReport {
    let variants = match discover_variants(feedstock_dir) {
        Ok(variants) => variants,
        Err(message) => return SolvabilityReport::failed(message),
    };
    match FeedstockChecker::from_options(options) {
        Ok(checker) => checker.check_variants(feedstock_dir, &variants, options),
        Err(e) => SolvabilityReport::failed(e.to_string()),
    }
}

/// Checks feedstocks against one set of collaborators
pub struct FeedstockChecker {
    renderer: Arc<dyn RecipeRenderer>,
    engine: PropagationEngine,
    virtual_packages: VirtualPackageIndex,
}

impl FeedstockChecker {
    pub fn new(
        renderer: Arc<dyn RecipeRenderer>,
        pool: Arc<SolverPool>,
        virtual_packages: VirtualPackageIndex,
    ) -> Self {
        Self {
            renderer,
            engine: PropagationEngine::new(pool),
            virtual_packages,
        }
    }

    /// Checker with the shipped collaborators, configured by `options`
    pub fn from_options(options: &CheckOptions) -> Result<Self> {
        let settings = &options.backend;
        let fetcher: Arc<dyn MetadataFetcher> = Arc::new(ChannelClient::new()?);

        let mut run_exports = RunExportCache::with_capacity(fetcher.clone(), settings.run_export_cache_size)
            .with_scratch_dir(options.scratch_dir.clone());
        if let Some(service) = &settings.metadata_service {
            run_exports = run_exports.with_metadata_service(service.as_str());
        }

        let mut backend = MicromambaBackend::discover(settings.solver_program.as_deref())?;
        if let Some(glibc) = &settings.glibc_override {
            backend = backend.with_glibc_override(glibc.as_str());
        }
        info!("Using solver {}", backend.program().display());
        let backend: Arc<dyn SolverBackend> = Arc::new(backend);

        Ok(Self::new(
            Arc::new(YamlRenderer::new()),
            Arc::new(SolverPool::new(backend, Arc::new(run_exports))),
            VirtualPackageIndex::new(fetcher, options.scratch_dir.clone()),
        ))
    }

    pub fn engine(&self) -> &PropagationEngine {
        &self.engine
    }

    /// Check every variant of the feedstock at `feedstock_dir`
    ///
    /// Never fails; problems end up in the report.
    pub fn check(&self, feedstock_dir: &Path, options: &CheckOptions) -> SolvabilityReport {
        match discover_variants(feedstock_dir) {
            Ok(variants) => self.check_variants(feedstock_dir, &variants, options),
            Err(message) => SolvabilityReport::failed(message),
        }
    }

    /// Check the given variant files of a feedstock
    pub fn check_variants(
        &self,
        feedstock_dir: &Path,
        variants: &[PathBuf],
        options: &CheckOptions,
    ) -> SolvabilityReport {
        let name = feedstock_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| feedstock_dir.display().to_string());
        info!("Checking feedstock: {}", name);

        let virtual_channel = match self.virtual_packages.channel() {
            Ok(channel) => channel,
            Err(e) => return SolvabilityReport::failed(e.to_string()),
        };

        let recipe_dir = feedstock_dir.join(RECIPE_DIR);
        let mut report = SolvabilityReport {
            solvable: true,
            ..SolvabilityReport::default()
        };
        for variant_file in variants {
            report.add_variant(self.check_variant(&recipe_dir, variant_file, options, &virtual_channel));
        }

        let stats = self.engine.pool().run_exports().stats();
        info!(
            "Run export cache: {} hits, {} misses, {} entries",
            stats.hits, stats.misses, stats.entries
        );
        report
    }

    /// Check one variant; failures and panics stay inside its result
    pub fn check_variant(
        &self,
        recipe_dir: &Path,
        variant_file: &Path,
        options: &CheckOptions,
        virtual_channel: &Channel,
    ) -> VariantResult {
        let variant_id = variant_id(variant_file);
        let file_name = variant_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let host = PlatformTarget::from_variant_file_name(&file_name);
        let build = options.build_target_for(&host);
        info!("Checking variant {} (host {}, build {})", variant_id, host, build);

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.solve_variant(recipe_dir, variant_file, &host, &build, options, virtual_channel)
        }));
        let (solvable, errors) = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => (false, vec![e.to_string()]),
            Err(payload) => (false, vec![panic_message(payload.as_ref())]),
        };
        if !solvable {
            debug!("Variant {} is not solvable: {:?}", variant_id, errors);
        }

        VariantResult {
            errors: errors.into_iter().map(|e| format!("{variant_id}: {e}")).collect(),
            variant_id,
            solvable,
        }
    }

    fn solve_variant(
        &self,
        recipe_dir: &Path,
        variant_file: &Path,
        host: &PlatformTarget,
        build: &PlatformTarget,
        options: &CheckOptions,
        virtual_channel: &Channel,
    ) -> Result<(bool, Vec<String>)> {
        let variant = VariantConfig::load(variant_file)?;

        let mut channels = options.additional_channels.clone();
        channels.push(virtual_channel.clone());
        channels.extend(variant.channel_sources());
        debug!("Channels for {}: {:?}", host, channels);

        let outputs = self.renderer.render(recipe_dir, host, build, &variant)?;
        if outputs.is_empty() {
            return Err(Error::RenderError("recipe produced no outputs".to_string()));
        }
        let outnames: BTreeSet<String> = outputs.iter().map(|o| o.name.clone()).collect();

        let mut solvable = true;
        let mut errors = Vec::new();
        for output in &outputs {
            let resolution = self.engine.resolve_output(output, &outnames, &channels, host, build);
            solvable &= resolution.solvable;
            errors.extend(resolution.errors);
        }
        Ok((solvable, errors))
    }
}
