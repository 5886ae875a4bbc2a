// src/channel.rs

//! Channels and platform targets
//!
//! A channel is addressed either by name (`conda-forge`) or by URL
//! (`https://…`, `file://…`). Channel order is solver priority.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Base URL used for channels given by bare name
pub const DEFAULT_CHANNEL_ALIAS: &str = "https://conda.anaconda.org";

/// Every platform subdirectory a feedstock can target
pub const ALL_PLATFORMS: [&str; 6] = [
    "linux-64",
    "linux-aarch64",
    "linux-ppc64le",
    "osx-64",
    "osx-arm64",
    "win-64",
];

/// Architectures that appear verbatim in variant file names.
/// Anything else is the default `64`.
pub const KNOWN_ARCHES: [&str; 5] = ["32", "aarch64", "ppc64le", "armv7l", "arm64"];

/// Default architecture for variant names without a known arch token
pub const DEFAULT_ARCH: &str = "64";

/// An ordered source of package metadata
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channel(String);

impl Channel {
    pub fn new(spec: impl Into<String>) -> Self {
        Self(spec.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this channel was given as a full URL
    pub fn is_url(&self) -> bool {
        self.0.contains("://")
    }

    /// Base URL of the channel, without a trailing slash
    pub fn base_url(&self) -> String {
        if self.is_url() {
            self.0.trim_end_matches('/').to_string()
        } else {
            format!("{}/{}", DEFAULT_CHANNEL_ALIAS, self.0.trim_matches('/'))
        }
    }

    /// URL of one platform subdirectory of the channel
    pub fn subdir_url(&self, subdir: &str) -> String {
        format!("{}/{}", self.base_url(), subdir)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Channel {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A (platform, architecture) pair such as (`linux`, `64`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlatformTarget {
    pub platform: String,
    pub arch: String,
}

impl PlatformTarget {
    pub fn new(platform: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            arch: arch.into(),
        }
    }

    /// Parse the `platform_arch` form used in variant names and build overrides
    ///
    /// A missing architecture, or one outside [`KNOWN_ARCHES`], becomes `64`.
    pub fn from_variant_token(token: &str) -> Self {
        let mut parts = token.split('_');
        let platform = parts.next().unwrap_or_default();
        let arch = match parts.next() {
            Some(arch) if KNOWN_ARCHES.contains(&arch) => arch,
            _ => DEFAULT_ARCH,
        };
        Self::new(platform, arch)
    }

    /// Derive the target from a variant configuration file name
    ///
    /// conda-smithy writes `{platform}_{arch}_…` for non-64-bit targets and
    /// `{platform}_64_…` or `{platform}_{other}…` otherwise, so only the first
    /// two tokens matter.
    pub fn from_variant_file_name(file_name: &str) -> Self {
        let stem = file_name.rsplit_once('.').map_or(file_name, |(stem, _)| stem);
        Self::from_variant_token(stem)
    }

    /// The `platform_arch` key used for build platform overrides
    pub fn variant_key(&self) -> String {
        format!("{}_{}", self.platform, self.arch)
    }

    /// The channel subdirectory, e.g. `linux-64`
    pub fn subdir(&self) -> String {
        format!("{}-{}", self.platform, self.arch)
    }

    pub fn is_windows(&self) -> bool {
        self.platform == "win"
    }

    pub fn is_linux(&self) -> bool {
        self.platform == "linux"
    }

    pub fn is_osx(&self) -> bool {
        self.platform == "osx"
    }
}

impl fmt::Display for PlatformTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.platform, self.arch)
    }
}

/// Remove an anaconda.org token segment (`/t/<token>`) from a channel URL
pub fn strip_anaconda_token(url: &str) -> String {
    let parts: Vec<&str> = url.split('/').collect();
    match parts.iter().position(|p| *p == "t") {
        Some(idx) => parts
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != idx && *i != idx + 1)
            .map(|(_, p)| *p)
            .collect::<Vec<_>>()
            .join("/"),
        None => url.to_string(),
    }
}

/// Split a channel subdirectory URL into (channel base URL, channel name, subdir)
///
/// `https://conda.anaconda.org/conda-forge/linux-64` becomes
/// (`https://conda-static.anaconda.org/conda-forge`, `conda-forge`, `linux-64`).
/// The static mirror serves the same files without the API layer in front.
pub fn split_subdir_url(full_url: &str) -> (String, String, String) {
    let trimmed = full_url.trim_end_matches('/');
    let mut segments = trimmed.rsplit('/');
    let subdir = segments.next().unwrap_or_default().to_string();
    let channel = segments.next().unwrap_or_default().to_string();

    let base = if trimmed.starts_with("https://") {
        let stripped = strip_anaconda_token(trimmed);
        let base = stripped
            .rsplit_once('/')
            .map_or(stripped.as_str(), |(b, _)| b)
            .to_string();
        base.replace("conda.anaconda.org", "conda-static.anaconda.org")
    } else {
        trimmed
            .rsplit_once('/')
            .map_or(trimmed, |(b, _)| b)
            .to_string()
    };

    (base, channel, subdir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_channel_url() {
        let ch = Channel::new("conda-forge");
        assert_eq!(ch.base_url(), "https://conda.anaconda.org/conda-forge");
        assert_eq!(
            ch.subdir_url("noarch"),
            "https://conda.anaconda.org/conda-forge/noarch"
        );
    }

    #[test]
    fn test_url_channel_kept() {
        let ch = Channel::new("file:///tmp/virtual/");
        assert!(ch.is_url());
        assert_eq!(ch.base_url(), "file:///tmp/virtual");
    }

    #[test]
    fn test_target_from_variant_file_name() {
        let t = PlatformTarget::from_variant_file_name("linux_64_python3.10.____cpython.yaml");
        assert_eq!(t, PlatformTarget::new("linux", "64"));

        let t = PlatformTarget::from_variant_file_name("linux_aarch64_numpy1.22.yaml");
        assert_eq!(t.subdir(), "linux-aarch64");

        // "python3.10" is not an architecture
        let t = PlatformTarget::from_variant_file_name("osx_python3.10.yaml");
        assert_eq!(t, PlatformTarget::new("osx", "64"));

        let t = PlatformTarget::from_variant_file_name("win_64_.yaml");
        assert!(t.is_windows());
    }

    #[test]
    fn test_strip_anaconda_token() {
        assert_eq!(
            strip_anaconda_token("https://conda.anaconda.org/t/abc-123/my-chan/linux-64"),
            "https://conda.anaconda.org/my-chan/linux-64"
        );
        assert_eq!(
            strip_anaconda_token("https://conda.anaconda.org/conda-forge"),
            "https://conda.anaconda.org/conda-forge"
        );
    }

    #[test]
    fn test_split_subdir_url() {
        let (base, name, subdir) =
            split_subdir_url("https://conda.anaconda.org/conda-forge/linux-64");
        assert_eq!(base, "https://conda-static.anaconda.org/conda-forge");
        assert_eq!(name, "conda-forge");
        assert_eq!(subdir, "linux-64");

        let (base, name, subdir) = split_subdir_url("file:///tmp/chan/noarch");
        assert_eq!(base, "file:///tmp/chan");
        assert_eq!(name, "chan");
        assert_eq!(subdir, "noarch");
    }
}
