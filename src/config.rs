// src/config.rs
//! Configuration for solvability checks
//!
//! Three layers:
//! - [`CheckOptions`] - what a single check is asked to do
//! - [`VariantConfig`] - one `.ci_support/*.yaml` build variant
//! - [`CheckerConfig`] - optional TOML file with site defaults, e.g.
//!
//! ```toml
//! [channels]
//! additional = ["file:///srv/local-channel"]
//!
//! [solver]
//! program = "micromamba"
//! glibc_override = "2.50"
//!
//! [run_exports]
//! metadata_service = "https://raw.githubusercontent.com/regro/libcfgraph/master"
//! cache_size = 10240
//!
//! [worker]
//! timeout_secs = 600
//! isolation = "subprocess"
//! ```

use crate::channel::{Channel, PlatformTarget};
use crate::error::{Error, Result};
use crate::resolver::PinExpression;
use crate::run_exports::RUN_EXPORT_CACHE_SIZE;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Wall-clock budget of a check unless told otherwise
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Channels used when a variant does not list `channel_sources`
pub const DEFAULT_CHANNEL_SOURCES: [&str; 3] = ["conda-forge", "defaults", "msys2"];

/// Channel always appended to a variant's channel list
pub const ALWAYS_INCLUDED_CHANNEL: &str = "msys2";

/// Environment variable naming the scratch root (set on CI runners)
pub const SCRATCH_DIR_ENV: &str = "RUNNER_TEMP";

/// Where a bounded check runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Isolation {
    /// A worker thread of this process
    #[default]
    Thread,
    /// A child process running the hidden `worker` subcommand
    Subprocess,
}

/// Settings of the shipped collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Solver program; discovered on `PATH` when unset
    pub solver_program: Option<String>,
    /// `CONDA_OVERRIDE_GLIBC` for the solver process
    pub glibc_override: Option<String>,
    /// Artifact metadata service for run exports
    pub metadata_service: Option<String>,
    pub run_export_cache_size: usize,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            solver_program: None,
            glibc_override: None,
            metadata_service: None,
            run_export_cache_size: RUN_EXPORT_CACHE_SIZE,
        }
    }
}

/// Options of one solvability check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckOptions {
    /// Channels searched before the variant's own channels
    pub additional_channels: Vec<Channel>,
    /// Wall-clock budget; `None` runs synchronously without a bound
    pub timeout: Option<Duration>,
    /// Build target per `platform_arch` host key
    pub build_platform_overrides: BTreeMap<String, PlatformTarget>,
    /// 0 (quiet) to 3 (everything)
    pub verbosity: u8,
    /// Root for temporary directories; `RUNNER_TEMP` when unset
    pub scratch_dir: Option<PathBuf>,
    pub isolation: Isolation,
    pub backend: BackendSettings,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            additional_channels: Vec::new(),
            timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            build_platform_overrides: BTreeMap::new(),
            verbosity: 1,
            scratch_dir: std::env::var_os(SCRATCH_DIR_ENV).map(PathBuf::from),
            isolation: Isolation::Thread,
            backend: BackendSettings::default(),
        }
    }
}

impl CheckOptions {
    /// Build on `build` when the host is `host` (both `platform_arch`)
    pub fn with_build_platform(mut self, host: &str, build: &str) -> Self {
        let host = PlatformTarget::from_variant_token(host);
        self.build_platform_overrides
            .insert(host.variant_key(), PlatformTarget::from_variant_token(build));
        self
    }

    /// Build target for a host target
    pub fn build_target_for(&self, host: &PlatformTarget) -> PlatformTarget {
        self.build_platform_overrides
            .get(&host.variant_key())
            .cloned()
            .unwrap_or_else(|| host.clone())
    }
}

/// One build variant, as written by conda-smithy into `.ci_support/`
///
/// Every key maps to a list of strings; nested lists (`zip_keys`) are
/// dropped. `channel_sources` and `pin_run_as_build` are kept typed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantConfig {
    values: BTreeMap<String, Vec<String>>,
    channel_sources: Option<Vec<String>>,
    pin_run_as_build: BTreeMap<String, PinExpression>,
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn scalars(value: &Value) -> Vec<String> {
    match value {
        Value::Sequence(items) => items.iter().filter_map(scalar).collect(),
        other => scalar(other).into_iter().collect(),
    }
}

impl VariantConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let doc: Value = serde_yaml::from_str(content)?;
        let map = match doc {
            Value::Null => return Ok(Self::default()),
            Value::Mapping(map) => map,
            _ => {
                return Err(Error::ParseError(
                    "variant configuration must be a mapping".to_string(),
                ));
            }
        };

        let mut config = Self::default();
        for (key, value) in map {
            let Some(key) = scalar(&key) else { continue };
            match key.as_str() {
                "pin_run_as_build" => {
                    if !value.is_null() {
                        config.pin_run_as_build = serde_yaml::from_value(value)?;
                    }
                }
                "channel_sources" => config.channel_sources = Some(scalars(&value)),
                _ => {
                    config.values.insert(key, scalars(&value));
                }
            }
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::IoError(format!("Failed to read {}: {e}", path.display())))?;
        Self::from_yaml_str(&content)
            .map_err(|e| Error::ParseError(format!("Invalid variant file {}: {e}", path.display())))
    }

    /// Set a key; used to assemble variants in code
    pub fn with_value<S: Into<String>>(mut self, key: &str, values: impl IntoIterator<Item = S>) -> Self {
        self.values
            .insert(key.to_string(), values.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_pin(mut self, name: &str, pin: PinExpression) -> Self {
        self.pin_run_as_build.insert(name.to_string(), pin);
        self
    }

    /// First value of a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key)?.first().map(String::as_str)
    }

    pub fn values(&self, key: &str) -> &[String] {
        self.values.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn pin_run_as_build(&self) -> &BTreeMap<String, PinExpression> {
        &self.pin_run_as_build
    }

    /// Channels of this variant in priority order
    ///
    /// Entries may hold several comma-separated channels. `msys2` is
    /// appended when missing.
    pub fn channel_sources(&self) -> Vec<Channel> {
        let mut names: Vec<String> = match &self.channel_sources {
            Some(sources) => sources
                .iter()
                .flat_map(|s| s.split(','))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            None => DEFAULT_CHANNEL_SOURCES.iter().map(|s| s.to_string()).collect(),
        };
        if !names.iter().any(|n| n == ALWAYS_INCLUDED_CHANNEL) {
            names.push(ALWAYS_INCLUDED_CHANNEL.to_string());
        }
        names.into_iter().map(Channel::new).collect()
    }
}

/// `[channels]` section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelsSection {
    #[serde(default)]
    pub additional: Vec<String>,
}

/// `[solver]` section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SolverSection {
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub glibc_override: Option<String>,
}

/// `[run_exports]` section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunExportsSection {
    #[serde(default)]
    pub metadata_service: Option<String>,
    #[serde(default)]
    pub cache_size: Option<usize>,
}

/// `[worker]` section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkerSection {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub isolation: Option<Isolation>,
}

/// TOML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckerConfig {
    #[serde(default)]
    pub channels: ChannelsSection,
    #[serde(default)]
    pub solver: SolverSection,
    #[serde(default)]
    pub run_exports: RunExportsSection,
    #[serde(default)]
    pub worker: WorkerSection,
}

impl CheckerConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: CheckerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.run_exports.cache_size == Some(0) {
            anyhow::bail!("run_exports.cache_size must be at least 1");
        }
        if let Some(version) = &self.solver.glibc_override
            && !version.split('.').all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
        {
            anyhow::bail!("Invalid solver.glibc_override: {version}");
        }
        Ok(())
    }

    /// Fold the file's settings into `options`
    ///
    /// Channels from the file come before those already present; scalar
    /// settings only fill in what is still unset or at its default.
    pub fn apply_to(&self, options: &mut CheckOptions) {
        let mut channels: Vec<Channel> = self.channels.additional.iter().map(Channel::new).collect();
        channels.append(&mut options.additional_channels);
        options.additional_channels = channels;

        if let Some(secs) = self.worker.timeout_secs {
            options.timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(isolation) = self.worker.isolation {
            options.isolation = isolation;
        }

        let backend = &mut options.backend;
        if backend.solver_program.is_none() {
            backend.solver_program = self.solver.program.clone();
        }
        if backend.glibc_override.is_none() {
            backend.glibc_override = self.solver.glibc_override.clone();
        }
        if backend.metadata_service.is_none() {
            backend.metadata_service = self.run_exports.metadata_service.clone();
        }
        if let Some(size) = self.run_exports.cache_size {
            backend.run_export_cache_size = size;
        }
    }
}
