// tests/common/mod.rs

//! Shared stubs and fixtures for integration tests: an in-memory
//! downloader/resolver/recipe loader and tarball builders.

// Not every test binary exercises every helper.
#![allow(dead_code)]

use flate2::Compression;
use flate2::write::GzEncoder;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tsuku::checksum::{HashAlgorithm, hash_bytes};
use tsuku::proc::CancelToken;
use tsuku::recipe::{Recipe, parse_recipe};
use tsuku::remote::{DownloadedFile, Downloader, RecipeLoader, ReleaseResolver};
use tsuku::{Error, Result};

/// Serves canned payloads by URL (or a fallback payload for any URL) and
/// counts how many real fetches happened.
pub struct StubDownloader {
    payloads: Mutex<HashMap<String, Vec<u8>>>,
    fallback: Option<Vec<u8>>,
    pub calls: AtomicUsize,
}

impl StubDownloader {
    pub fn new() -> Self {
        Self {
            payloads: Mutex::new(HashMap::new()),
            fallback: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn serving_any(payload: Vec<u8>) -> Self {
        Self {
            payloads: Mutex::new(HashMap::new()),
            fallback: Some(payload),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_url(self, url: &str, payload: Vec<u8>) -> Self {
        self.payloads
            .lock()
            .unwrap()
            .insert(url.to_string(), payload);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Downloader for StubDownloader {
    fn download(&self, cancel: &CancelToken, url: &str) -> Result<DownloadedFile> {
        cancel.check()?;
        self.calls.fetch_add(1, Ordering::SeqCst);

        let payload = {
            let payloads = self.payloads.lock().unwrap();
            payloads
                .get(url)
                .cloned()
                .or_else(|| self.fallback.clone())
        };
        let Some(payload) = payload else {
            return Err(Error::Network {
                url: url.to_string(),
                status: Some(404),
                reason: "no stubbed payload".to_string(),
            });
        };

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&payload).unwrap();
        let temp = file.into_temp_path();
        let checksum = hash_bytes(&payload, HashAlgorithm::Sha256);
        Ok(DownloadedFile::temporary(temp, checksum, payload.len() as u64))
    }
}

/// Fixed release asset listing
pub struct StubResolver(pub Vec<String>);

impl StubResolver {
    pub fn empty() -> Self {
        Self(Vec::new())
    }
}

impl ReleaseResolver for StubResolver {
    fn release_assets(&self, _cancel: &CancelToken, _repo: &str, _tag: &str) -> Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

/// Recipe loader over in-memory TOML
pub struct MapLoader(HashMap<String, String>);

impl MapLoader {
    pub fn new(recipes: &[(&str, &str)]) -> Self {
        Self(
            recipes
                .iter()
                .map(|(name, toml)| (name.to_string(), toml.to_string()))
                .collect(),
        )
    }

    pub fn empty() -> Self {
        Self(HashMap::new())
    }
}

impl RecipeLoader for MapLoader {
    fn get(&self, _cancel: &CancelToken, name: &str) -> Result<Recipe> {
        self.0
            .get(name)
            .map(|toml| parse_recipe(toml).expect("fixture recipe parses"))
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }
}

/// An in-memory tar.gz with the given (path, mode, contents) entries
pub fn targz(entries: &[(&str, u32, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, mode, contents) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(*mode);
        header.set_cksum();
        builder.append_data(&mut header, path, *contents).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// A tar.gz whose single entry name is written verbatim, bypassing the
/// builder's refusal to emit `..` components
pub fn hostile_targz(name: &str, contents: &[u8]) -> Vec<u8> {
    let mut header = [0u8; 512];
    header[..name.len()].copy_from_slice(name.as_bytes());
    header[100..108].copy_from_slice(b"0000644\0");
    header[108..116].copy_from_slice(b"0000000\0");
    header[116..124].copy_from_slice(b"0000000\0");
    let size = format!("{:011o}\0", contents.len());
    header[124..136].copy_from_slice(size.as_bytes());
    header[136..148].copy_from_slice(b"00000000000\0");
    header[156] = b'0';
    header[257..263].copy_from_slice(b"ustar\0");
    header[263..265].copy_from_slice(b"00");
    header[148..156].fill(b' ');
    let sum: u32 = header.iter().map(|b| u32::from(*b)).sum();
    let checksum = format!("{:06o}\0 ", sum);
    header[148..156].copy_from_slice(checksum.as_bytes());

    let mut raw = header.to_vec();
    raw.extend_from_slice(contents);
    raw.resize(raw.len().div_ceil(512) * 512, 0);
    raw.extend_from_slice(&[0u8; 1024]);

    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(&raw).unwrap();
    gz.finish().unwrap()
}
