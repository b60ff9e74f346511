// src/remote/http.rs

//! Default reqwest-backed collaborators
//!
//! Blocking clients with a 30 s timeout. The downloader streams to a temp
//! file, hashing as it goes and enforcing a per-resource size cap; the
//! release resolver lists GitHub release assets for a tag.

use super::{DownloadedFile, Downloader, REMOTE_TIMEOUT, ReleaseResolver};
use crate::checksum::HashingReader;
use crate::error::{Error, Result};
use crate::proc::CancelToken;
use serde::Deserialize;
use std::io::{Read, Write};
use tracing::{debug, info};

/// Default per-resource download cap (4 GiB)
const MAX_DOWNLOAD_SIZE: u64 = 4 * 1024 * 1024 * 1024;

fn network_error(url: &str, status: Option<u16>, reason: impl ToString) -> Error {
    Error::Network {
        url: url.to_string(),
        status,
        reason: reason.to_string(),
    }
}

fn build_client() -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .user_agent(concat!("tsuku/", env!("CARGO_PKG_VERSION")))
        .timeout(REMOTE_TIMEOUT)
        .build()
        .map_err(|e| Error::Io(format!("failed to build HTTP client: {}", e)))
}

/// Streaming downloader with checksum computation and a size cap
pub struct HttpDownloader {
    client: reqwest::blocking::Client,
    max_size: u64,
}

impl HttpDownloader {
    pub fn new() -> Result<Self> {
        // Downloads may take longer than an API call; the overall timeout
        // is enforced per read through the cancellation token instead.
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("tsuku/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(REMOTE_TIMEOUT)
            .build()
            .map_err(|e| Error::Io(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            max_size: MAX_DOWNLOAD_SIZE,
        })
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }
}

impl Downloader for HttpDownloader {
    fn download(&self, cancel: &CancelToken, url: &str) -> Result<DownloadedFile> {
        cancel.check()?;
        url::Url::parse(url).map_err(|e| network_error(url, None, format!("invalid URL: {}", e)))?;

        info!("downloading {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| network_error(url, e.status().map(|s| s.as_u16()), e))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(network_error(
                url,
                Some(status.as_u16()),
                "unexpected HTTP status",
            ));
        }

        let mut file = tempfile::NamedTempFile::new()
            .map_err(|e| Error::Io(format!("failed to create temp file: {}", e)))?;

        let mut reader = HashingReader::new(response);
        let mut buf = [0u8; 65536];
        let mut total: u64 = 0;
        loop {
            cancel.check()?;
            let n = reader
                .read(&mut buf)
                .map_err(|e| network_error(url, None, format!("read failed: {}", e)))?;
            if n == 0 {
                break;
            }
            total += n as u64;
            if total > self.max_size {
                return Err(network_error(
                    url,
                    None,
                    format!("resource exceeds the {} byte cap", self.max_size),
                ));
            }
            file.write_all(&buf[..n])
                .map_err(|e| Error::Io(format!("failed to write download: {}", e)))?;
        }
        file.flush()
            .map_err(|e| Error::Io(format!("failed to flush download: {}", e)))?;

        let (checksum, size) = reader.finish();
        debug!("downloaded {} bytes from {} ({})", size, url, checksum.tagged());

        Ok(DownloadedFile::temporary(file.into_temp_path(), checksum, size))
    }
}

#[derive(Deserialize)]
struct ReleasePayload {
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

#[derive(Deserialize)]
struct ReleaseAsset {
    name: String,
}

/// GitHub release asset listings
pub struct GitHubReleases {
    client: reqwest::blocking::Client,
    api_base: String,
}

impl GitHubReleases {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            api_base: "https://api.github.com".to_string(),
        })
    }

    /// Point at a different API root (mock servers in tests)
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }
}

impl ReleaseResolver for GitHubReleases {
    fn release_assets(&self, cancel: &CancelToken, repo: &str, tag: &str) -> Result<Vec<String>> {
        cancel.check()?;

        let url = format!("{}/repos/{}/releases/tags/{}", self.api_base, repo, tag);
        debug!("listing release assets: {}", url);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .map_err(|e| network_error(&url, e.status().map(|s| s.as_u16()), e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("no release {} in {}", tag, repo)));
        }
        if !status.is_success() {
            return Err(network_error(
                &url,
                Some(status.as_u16()),
                "unexpected HTTP status",
            ));
        }

        let payload: ReleasePayload = response
            .json()
            .map_err(|e| network_error(&url, None, format!("invalid release payload: {}", e)))?;

        Ok(payload.assets.into_iter().map(|a| a.name).collect())
    }
}
