// src/repository/client.rs

//! HTTP client for channel operations
//!
//! Wraps reqwest with retry support for fetching channel metadata and
//! downloading artifacts. `file://` URLs are served from the local disk so
//! local channels (like the virtual package index) behave like remote ones.

use crate::error::{Error, Result};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::MetadataFetcher;

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum retry attempts for failed requests
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

/// HTTP client wrapper with retry support
pub struct ChannelClient {
    client: Client,
    max_retries: u32,
}

impl ChannelClient {
    /// Create a new channel client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("feedstock-solvable/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_retries: MAX_RETRIES,
        })
    }

    /// Override the number of attempts per request
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Send a GET request, retrying transport errors and server errors
    ///
    /// Client errors (404 and friends) are returned immediately.
    fn get_with_retry(&self, url: &str) -> Result<reqwest::blocking::Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(url).send() {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                    return Err(Error::NotFoundError(url.to_string()));
                }
                Ok(response)
                    if response.status().is_server_error() && attempt < self.max_retries =>
                {
                    warn!(
                        "HTTP {} from {} (attempt {}), retrying...",
                        response.status(),
                        url,
                        attempt
                    );
                }
                Ok(response) => {
                    return Err(Error::DownloadError(format!(
                        "HTTP {} from {}",
                        response.status(),
                        url
                    )));
                }
                Err(e) if attempt < self.max_retries => {
                    warn!("Request to {} failed (attempt {}): {}, retrying...", url, attempt, e);
                }
                Err(e) => {
                    return Err(Error::DownloadError(format!(
                        "Failed to fetch {url} after {attempt} attempts: {e}"
                    )));
                }
            }
            std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
        }
    }
}

/// Map a `file://` URL to a local path
fn local_path(url: &str) -> Option<PathBuf> {
    url.strip_prefix("file://").map(PathBuf::from)
}

impl MetadataFetcher for ChannelClient {
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        if let Some(path) = local_path(url) {
            return fs::read(&path).map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => Error::NotFoundError(url.to_string()),
                _ => Error::IoError(format!("Failed to read {}: {e}", path.display())),
            });
        }

        debug!("Fetching {}", url);
        let response = self.get_with_retry(url)?;
        let bytes = response
            .bytes()
            .map_err(|e| Error::DownloadError(format!("Failed to read response: {e}")))?;
        Ok(bytes.to_vec())
    }

    fn download_file(&self, url: &str, dest_path: &Path) -> Result<()> {
        info!("Downloading {} to {}", url, dest_path.display());

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::IoError(format!("Failed to create directory {}: {e}", parent.display()))
            })?;
        }

        if let Some(path) = local_path(url) {
            fs::copy(&path, dest_path).map_err(|e| {
                Error::IoError(format!("Failed to copy {}: {e}", path.display()))
            })?;
            return Ok(());
        }

        let mut response = self.get_with_retry(url)?;
        // Partial bodies stay under a temporary name
        let staging_dir = dest_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut staged = NamedTempFile::new_in(staging_dir)?;
        io::copy(&mut response, &mut staged)
            .map_err(|e| Error::DownloadError(format!("Interrupted download of {url}: {e}")))?;
        staged
            .persist(dest_path)
            .map_err(|e| Error::IoError(format!("Failed to store {}: {}", dest_path.display(), e.error)))?;

        debug!("Downloaded {}", dest_path.display());
        Ok(())
    }
}
