// src/remote/mod.rs

//! External collaborator interfaces
//!
//! The engine consumes its network-facing collaborators through narrow
//! traits: a downloader that produces hash-verified artifacts, a release
//! resolver that lists assets for a tag, and a recipe loader for
//! transitive dependency expansion. Default implementations backed by
//! blocking reqwest live in `http`; tests substitute stubs.

mod http;

pub use http::{GitHubReleases, HttpDownloader};

use crate::checksum::{Checksum, HashAlgorithm, hash_bytes};
use crate::error::{Error, Result};
use crate::proc::CancelToken;
use crate::recipe::Recipe;
use fs2::FileExt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Timeout applied to remote API calls and lockfile-capture commands
pub const REMOTE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// A downloaded artifact: path on disk, its checksum, and its size
///
/// When backed by a temp file the file is deleted on drop; callers that
/// want to keep it move it first (or park it in the download cache).
#[derive(Debug)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub checksum: Checksum,
    pub size: u64,
    temp: Option<tempfile::TempPath>,
}

impl DownloadedFile {
    /// Wrap a temp file that should be cleaned up when dropped
    pub fn temporary(temp: tempfile::TempPath, checksum: Checksum, size: u64) -> Self {
        Self {
            path: temp.to_path_buf(),
            checksum,
            size,
            temp: Some(temp),
        }
    }

    /// Wrap a persistent file the caller owns
    pub fn persistent(path: PathBuf, checksum: Checksum, size: u64) -> Self {
        Self {
            path,
            checksum,
            size,
            temp: None,
        }
    }

    /// Move the artifact to `dest`, disarming cleanup
    pub fn persist_to(mut self, dest: &Path) -> Result<()> {
        if let Some(temp) = self.temp.take() {
            // Same-filesystem rename first; fall back to copy for temp
            // dirs mounted elsewhere.
            let src: PathBuf = temp.to_path_buf();
            if fs::rename(&src, dest).is_err() {
                fs::copy(&src, dest)
                    .map_err(|e| Error::Io(format!("failed to place {}: {}", dest.display(), e)))?;
            }
        } else {
            fs::copy(&self.path, dest)
                .map_err(|e| Error::Io(format!("failed to place {}: {}", dest.display(), e)))?;
        }
        Ok(())
    }
}

/// Produces a hash-verified artifact on disk for a URL
pub trait Downloader: Send + Sync {
    fn download(&self, cancel: &CancelToken, url: &str) -> Result<DownloadedFile>;
}

/// Lists release asset names for a repository tag
pub trait ReleaseResolver: Send + Sync {
    fn release_assets(&self, cancel: &CancelToken, repo: &str, tag: &str) -> Result<Vec<String>>;
}

/// Loads named recipes during transitive dependency resolution
pub trait RecipeLoader: Send + Sync {
    /// `Err(NotFound)` means the dependency is not recipe-managed (it is
    /// skipped as a likely system package).
    fn get(&self, cancel: &CancelToken, name: &str) -> Result<Recipe>;
}

/// Recipe loader over a directory of `<name>.toml` files
pub struct DirRecipeLoader {
    dir: PathBuf,
}

impl DirRecipeLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl RecipeLoader for DirRecipeLoader {
    fn get(&self, cancel: &CancelToken, name: &str) -> Result<Recipe> {
        cancel.check()?;
        crate::recipe::parser::validate_name(name)?;
        let path = self.dir.join(format!("{}.toml", name));
        if !path.is_file() {
            return Err(Error::NotFound(format!("no recipe for {}", name)));
        }
        crate::recipe::parse_recipe_file(&path)
    }
}

/// Cached download metadata
#[derive(Debug, Clone)]
pub struct CachedDownload {
    pub path: PathBuf,
    pub checksum: Checksum,
    pub size: u64,
}

/// URL-keyed artifact cache shared across plan evaluations
///
/// Files are stored under a directory keyed by the SHA-256 of the URL,
/// with a sidecar recording checksum and size. Writes go through
/// temp-then-rename under an advisory lock, so concurrent installs can
/// share one cache.
pub struct DownloadCache {
    dir: PathBuf,
}

impl DownloadCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn key(url: &str) -> String {
        hash_bytes(url.as_bytes(), HashAlgorithm::Sha256).value
    }

    fn lock(&self) -> Result<fs::File> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| Error::Io(format!("failed to create {}: {}", self.dir.display(), e)))?;
        let lock = fs::File::create(self.dir.join(".lock"))
            .map_err(|e| Error::Io(format!("failed to open cache lock: {}", e)))?;
        lock.lock_exclusive()
            .map_err(|e| Error::Io(format!("failed to lock cache: {}", e)))?;
        Ok(lock)
    }

    /// Look up a previous download of `url`
    pub fn get(&self, url: &str) -> Option<CachedDownload> {
        let key = Self::key(url);
        let path = self.dir.join(&key);
        let meta = self.dir.join(format!("{}.meta", key));
        if !path.is_file() {
            return None;
        }

        let raw = fs::read_to_string(&meta).ok()?;
        let (sum, size) = raw.trim().split_once(' ')?;
        let checksum = Checksum::parse(sum).ok()?;
        let size = size.parse().ok()?;

        debug!("download cache hit for {}", url);
        Some(CachedDownload {
            path,
            checksum,
            size,
        })
    }

    /// Park a downloaded artifact in the cache
    pub fn put(&self, url: &str, file: DownloadedFile) -> Result<CachedDownload> {
        let lock = self.lock()?;
        let key = Self::key(url);
        let path = self.dir.join(&key);
        let meta = self.dir.join(format!("{}.meta", key));

        let checksum = file.checksum.clone();
        let size = file.size;
        file.persist_to(&path)?;

        let tmp = self.dir.join(format!("{}.meta.tmp", key));
        fs::write(&tmp, format!("{} {}\n", checksum.tagged(), size))
            .map_err(|e| Error::Io(format!("failed to write cache metadata: {}", e)))?;
        fs::rename(&tmp, &meta)
            .map_err(|e| Error::Io(format!("failed to place cache metadata: {}", e)))?;

        drop(lock);
        Ok(CachedDownload {
            path,
            checksum,
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::hash_file;
    use std::io::Write;

    fn downloaded(contents: &[u8]) -> DownloadedFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        let temp = file.into_temp_path();
        let checksum = hash_file(&temp, HashAlgorithm::Sha256).unwrap();
        DownloadedFile::temporary(temp, checksum, contents.len() as u64)
    }

    #[test]
    fn test_cache_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DownloadCache::new(dir.path());
        let url = "https://example.com/tool.tar.gz";

        assert!(cache.get(url).is_none());

        let stored = cache.put(url, downloaded(b"artifact")).unwrap();
        let found = cache.get(url).expect("cache hit");
        assert_eq!(found.checksum, stored.checksum);
        assert_eq!(found.size, 8);
        assert_eq!(fs::read(&found.path).unwrap(), b"artifact");
    }

    #[test]
    fn test_cache_distinct_urls() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DownloadCache::new(dir.path());
        cache.put("https://a.example/x", downloaded(b"a")).unwrap();
        cache.put("https://b.example/x", downloaded(b"b")).unwrap();

        let a = cache.get("https://a.example/x").unwrap();
        let b = cache.get("https://b.example/x").unwrap();
        assert_ne!(a.checksum, b.checksum);
    }

    #[test]
    fn test_dir_recipe_loader() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("jq.toml"),
            "[metadata]\nname = \"jq\"\n",
        )
        .unwrap();

        let loader = DirRecipeLoader::new(dir.path());
        let cancel = CancelToken::new();
        assert_eq!(loader.get(&cancel, "jq").unwrap().name(), "jq");
        assert!(matches!(
            loader.get(&cancel, "missing").unwrap_err(),
            Error::NotFound(_)
        ));
        // A hostile name must not become a path component
        assert!(loader.get(&cancel, "../etc/passwd").is_err());
    }
}
