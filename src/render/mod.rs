// src/render/mod.rs

//! Recipe rendering
//!
//! Turns `recipe/meta.yaml` plus one build variant into the outputs the
//! recipe would produce. The propagation engine only needs a handful of
//! facts per output, captured by [`RenderedOutput`]; anything able to
//! produce them can stand in via [`RecipeRenderer`].

mod jinja;
mod selectors;
mod yaml;

pub use selectors::{SelectorNamespace, evaluate_selector};
pub use yaml::YamlRenderer;

use crate::channel::PlatformTarget;
use crate::config::VariantConfig;
use crate::error::Result;
use crate::resolver::PinExpression;
use std::collections::BTreeMap;
use std::path::Path;

pub const BUILD_REQUIREMENTS: &str = "requirements/build";
pub const HOST_REQUIREMENTS: &str = "requirements/host";
pub const RUN_REQUIREMENTS: &str = "requirements/run";
pub const IGNORE_RUN_EXPORTS: &str = "build/ignore_run_exports";
pub const IGNORE_RUN_EXPORTS_FROM: &str = "build/ignore_run_exports_from";
pub const TEST_REQUIRES: &str = "test/requires";
pub const TEST_REQUIREMENTS: &str = "test/requirements";

/// One output of a rendered recipe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedOutput {
    pub name: String,
    /// Built on a different subdir than it runs on, or has a host section
    pub is_cross: bool,
    /// Any `build/noarch` value
    pub noarch: bool,
    /// `noarch: python` or the legacy `noarch_python: true`
    pub noarch_python: bool,
    /// Build and host environments are one and the same
    pub build_is_host: bool,
    pub pin_run_as_build: BTreeMap<String, PinExpression>,
    values: BTreeMap<String, Vec<String>>,
}

impl RenderedOutput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set a list-valued field such as `requirements/run`
    pub fn with_value<S: Into<String>>(mut self, path: &str, items: impl IntoIterator<Item = S>) -> Self {
        self.set_value(path, items.into_iter().map(Into::into).collect());
        self
    }

    pub fn set_value(&mut self, path: &str, items: Vec<String>) {
        self.values.insert(path.to_string(), items);
    }

    /// List-valued field by `section/key` path; empty when absent
    pub fn get_value(&self, path: &str) -> &[String] {
        self.values.get(path).map(Vec::as_slice).unwrap_or_default()
    }

    /// Whether either noarch flavour applies
    pub fn is_noarch(&self) -> bool {
        self.noarch || self.noarch_python
    }
}

/// Renders a recipe directory for one variant
pub trait RecipeRenderer: Send + Sync {
    /// Render `recipe_dir` for `host_target`, built on `build_target`
    fn render(
        &self,
        recipe_dir: &Path,
        host_target: &PlatformTarget,
        build_target: &PlatformTarget,
        variant: &VariantConfig,
    ) -> Result<Vec<RenderedOutput>>;
}
