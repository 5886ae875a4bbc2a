// src/virtual_packages.rs

//! Synthetic channel of virtual packages
//!
//! Recipes select on platform facts (`__glibc >=2.17`, `__cuda`, `__osx
//! >=10.13`, `__win`, ...) that no real channel publishes. This module writes
//! a throwaway on-disk channel holding one package per fact so the solver can
//! treat them as always available.

use crate::channel::{ALL_PLATFORMS, Channel};
use crate::error::{Error, Result};
use crate::repository::MetadataFetcher;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tempfile::TempDir;
use tracing::{debug, info};

/// Highest glibc minor version offered (`__glibc 2.50`)
pub const MAX_GLIBC_MINOR: u32 = 50;

/// Lowest glibc minor version offered (`__glibc 2.12`)
pub const MIN_GLIBC_MINOR: u32 = 12;

/// Package API endpoint listing every published `cuda-version`
pub const CUDA_VERSION_API: &str = "https://api.anaconda.org/package/conda-forge/cuda-version";

/// CUDA versions always offered, whatever the live query returns
pub const FALLBACK_CUDA_VERSIONS: [&str; 19] = [
    "9.2", "10.0", "10.1", "10.2", "11.0", "11.1", "11.2", "11.3", "11.4", "11.5", "11.6", "11.7",
    "11.8", "12.0", "12.1", "12.2", "12.3", "12.4", "12.5",
];

/// macOS versions before the 11.x renumbering; Intel only
const LEGACY_OSX_VERSIONS: [&str; 8] = [
    "10.9", "10.10", "10.11", "10.12", "10.13", "10.14", "10.15", "10.16",
];

/// The glibc version the solver should assume for linux targets
pub fn glibc_override() -> String {
    format!("2.{MAX_GLIBC_MINOR}")
}

/// A synthetic package standing for a platform fact
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualPackage {
    pub name: String,
    pub version: String,
    pub build_string: String,
    pub build_number: u64,
}

impl VirtualPackage {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            build_string: String::new(),
            build_number: 0,
        }
    }

    /// Build identity, `<build_string>_<number>` or just `<number>`
    pub fn build(&self) -> String {
        if self.build_string.is_empty() {
            self.build_number.to_string()
        } else {
            format!("{}_{}", self.build_string, self.build_number)
        }
    }

    pub fn filename(&self) -> String {
        format!("{}-{}-{}.tar.bz2", self.name, self.version, self.build())
    }

    fn repodata_entry(&self, subdir: &str, timestamp: i64) -> RepodataEntry {
        RepodataEntry {
            name: self.name.clone(),
            version: self.version.clone(),
            build: self.build(),
            build_string: self.build_string.clone(),
            build_number: self.build_number,
            depends: Vec::new(),
            noarch: String::new(),
            timestamp,
            subdir: subdir.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct RepodataEntry {
    name: String,
    version: String,
    build: String,
    build_string: String,
    build_number: u64,
    depends: Vec<String>,
    noarch: String,
    timestamp: i64,
    subdir: String,
}

#[derive(Debug, Serialize)]
struct RepodataInfo {
    subdir: String,
}

#[derive(Debug, Serialize)]
struct Repodata {
    info: RepodataInfo,
    packages: BTreeMap<String, RepodataEntry>,
}

/// A set of virtual packages and the subdirectories each one appears in
#[derive(Debug, Default)]
pub struct VirtualRepodata {
    packages: BTreeMap<VirtualPackage, BTreeSet<String>>,
}

impl VirtualRepodata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a package; with no subdirectories it lands in `noarch`
    pub fn add_package<S: AsRef<str>>(&mut self, package: VirtualPackage, subdirs: &[S]) {
        let entry = self.packages.entry(package).or_default();
        if subdirs.is_empty() {
            entry.insert("noarch".to_string());
        } else {
            entry.extend(subdirs.iter().map(|s| s.as_ref().to_string()));
        }
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Every subdirectory that gets a `repodata.json`
    pub fn subdirs(&self) -> BTreeSet<String> {
        let mut subdirs: BTreeSet<String> = ALL_PLATFORMS.iter().map(|s| s.to_string()).collect();
        subdirs.insert("noarch".to_string());
        for extra in self.packages.values() {
            subdirs.extend(extra.iter().cloned());
        }
        subdirs
    }

    /// Write `<root>/<subdir>/repodata.json` for every subdirectory
    pub fn write(&self, root: &Path) -> Result<()> {
        let timestamp = chrono::Utc::now().timestamp_millis();

        for subdir in self.subdirs() {
            let packages = self
                .packages
                .iter()
                .filter(|(_, subdirs)| subdirs.contains(&subdir))
                .map(|(pkg, _)| (pkg.filename(), pkg.repodata_entry(&subdir, timestamp)))
                .collect();
            let repodata = Repodata {
                info: RepodataInfo {
                    subdir: subdir.clone(),
                },
                packages,
            };

            let dir = root.join(&subdir);
            fs::create_dir_all(&dir).map_err(|e| {
                Error::IoError(format!("Failed to create {}: {e}", dir.display()))
            })?;
            fs::write(dir.join("repodata.json"), serde_json::to_vec(&repodata)?)?;
        }

        debug!("Wrote virtual package repodata to {}", root.display());
        Ok(())
    }
}

/// Assemble the full set of virtual packages
///
/// `cuda_versions` are added on top of [`FALLBACK_CUDA_VERSIONS`].
pub fn synthesize<I, S>(cuda_versions: I) -> VirtualRepodata
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut repodata = VirtualRepodata::new();
    let none: [&str; 0] = [];

    for minor in MIN_GLIBC_MINOR..=MAX_GLIBC_MINOR {
        repodata.add_package(VirtualPackage::new("__glibc", format!("2.{minor}")), &none);
    }

    let cuda: BTreeSet<String> = cuda_versions
        .into_iter()
        .map(Into::into)
        .chain(FALLBACK_CUDA_VERSIONS.iter().map(|v| v.to_string()))
        .collect();
    for version in cuda {
        repodata.add_package(VirtualPackage::new("__cuda", version), &none);
    }

    for version in LEGACY_OSX_VERSIONS {
        repodata.add_package(VirtualPackage::new("__osx", version), &["osx-64"]);
    }
    for major in 11..17 {
        for minor in 0..17 {
            repodata.add_package(
                VirtualPackage::new("__osx", format!("{major}.{minor}")),
                &["osx-64", "osx-arm64"],
            );
        }
    }

    let platforms_where = |pred: fn(&str) -> bool| -> Vec<&'static str> {
        ALL_PLATFORMS.iter().copied().filter(|s| pred(s)).collect()
    };
    repodata.add_package(
        VirtualPackage::new("__win", "0"),
        &platforms_where(|s| s.starts_with("win")),
    );
    repodata.add_package(
        VirtualPackage::new("__linux", "0"),
        &platforms_where(|s| s.starts_with("linux")),
    );
    repodata.add_package(
        VirtualPackage::new("__unix", "0"),
        &platforms_where(|s| !s.starts_with("win")),
    );

    repodata
}

/// Ask the package API which `cuda-version` releases exist
///
/// Any failure yields an empty list; the fallback versions cover the gap.
pub fn query_cuda_versions(fetcher: &dyn MetadataFetcher) -> Vec<String> {
    let versions = fetcher.fetch_json(CUDA_VERSION_API).map(|json| {
        json.get("versions")
            .and_then(|v| v.as_array())
            .map(|list| {
                list.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default()
    });

    match versions {
        Ok(versions) => {
            debug!("Found {} cuda-version releases", versions.len());
            versions
        }
        Err(e) => {
            debug!("cuda-version query failed, using fallback list: {}", e);
            Vec::new()
        }
    }
}

struct BuiltIndex {
    // Held for its Drop: the directory goes away with the index
    _dir: TempDir,
    channel: Channel,
}

/// Lazily written virtual package channel
///
/// The channel is synthesized on the first call to [`channel`](Self::channel)
/// and reused afterwards. The on-disk directory lives as long as this value.
pub struct VirtualPackageIndex {
    fetcher: Arc<dyn MetadataFetcher>,
    scratch_dir: Option<PathBuf>,
    built: OnceLock<std::result::Result<BuiltIndex, String>>,
}

impl VirtualPackageIndex {
    pub fn new(fetcher: Arc<dyn MetadataFetcher>, scratch_dir: Option<PathBuf>) -> Self {
        Self {
            fetcher,
            scratch_dir,
            built: OnceLock::new(),
        }
    }

    /// The `file://` channel holding the virtual packages
    pub fn channel(&self) -> Result<Channel> {
        self.built
            .get_or_init(|| self.build().map_err(|e| e.to_string()))
            .as_ref()
            .map(|built| built.channel.clone())
            .map_err(|e| Error::InitError(format!("virtual package index: {e}")))
    }

    fn build(&self) -> Result<BuiltIndex> {
        let dir = match &self.scratch_dir {
            Some(root) => {
                fs::create_dir_all(root)?;
                tempfile::Builder::new()
                    .prefix("virtual-packages-")
                    .tempdir_in(root)?
            }
            None => tempfile::Builder::new()
                .prefix("virtual-packages-")
                .tempdir()?,
        };

        let repodata = synthesize(query_cuda_versions(self.fetcher.as_ref()));
        repodata.write(dir.path())?;

        let path = dir.path().canonicalize()?;
        let channel = Channel::new(format!("file://{}", path.display()));
        info!("Virtual package channel ({} packages): {}", repodata.len(), channel);

        Ok(BuiltIndex { _dir: dir, channel })
    }
}
