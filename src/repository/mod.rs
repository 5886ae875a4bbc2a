// src/repository/mod.rs

//! Channel metadata access
//!
//! This module provides:
//! - The [`MetadataFetcher`] seam through which every network read goes
//! - [`ChannelClient`], the HTTP (and `file://`) implementation

mod client;

pub use client::ChannelClient;

use crate::compression::decode;
use crate::error::Result;
use std::path::Path;

/// Read access to channel metadata and artifacts
///
/// Implementations must be shareable across threads; the run-export cache
/// and the virtual package index hold them behind an `Arc`.
pub trait MetadataFetcher: Send + Sync {
    /// Fetch the raw body at `url`
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;

    /// Download `url` to `dest_path`
    fn download_file(&self, url: &str, dest_path: &Path) -> Result<()>;

    /// Fetch `url` and decompress it when the payload is compressed
    fn fetch_decompressed(&self, url: &str) -> Result<Vec<u8>> {
        decode(self.fetch_bytes(url)?)
    }

    /// Fetch `url` as (possibly compressed) JSON
    fn fetch_json(&self, url: &str) -> Result<serde_json::Value> {
        let bytes = self.fetch_decompressed(url)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
