// src/actions/download.rs

//! `download_file`: fetch a pinned URL into the work directory
//!
//! The URL is fully expanded and the checksum pinned by the time this
//! runs; execution verifies the artifact matches the pin and atomically
//! places it at `work_dir/dest`.

use super::require_str;
use crate::checksum::Checksum;
use crate::error::{Error, Result};
use crate::fsutil::sanitize_filename;
use crate::params::Params;
use crate::plan::exec::ExecutionContext;
use crate::registry::{Action, PreflightResult, Registry};
use std::fs;
use tracing::debug;

pub fn register(registry: &mut Registry) {
    registry.register(Box::new(DownloadFile));
}

pub struct DownloadFile;

impl Action for DownloadFile {
    fn name(&self) -> &'static str {
        "download_file"
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        let mut result = PreflightResult::ok();

        match params.get_str("url") {
            None => result.push_error("missing required parameter \"url\""),
            Some(url) => {
                if url::Url::parse(url)
                    .map(|u| !matches!(u.scheme(), "http" | "https"))
                    .unwrap_or(true)
                {
                    result.push_error(format!("invalid download URL {:?}", url));
                }
            }
        }

        match params.get_str("dest") {
            None => result.push_error("missing required parameter \"dest\""),
            Some(dest) => {
                if sanitize_filename(dest).is_err() {
                    result.push_error(format!("dest {:?} must be a bare filename", dest));
                }
            }
        }

        if let Some(sum) = params.get_str("checksum")
            && Checksum::parse(sum).is_err()
        {
            result.push_error(format!("unparseable checksum {:?}", sum));
        } else if params.get_str("checksum").is_none() {
            result.push_warning("download is not checksum-pinned");
        }

        result
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        let url = require_str(self.name(), params, "url")?;
        let dest = sanitize_filename(require_str(self.name(), params, "dest")?)?;
        let expected = params
            .get_str("checksum")
            .map(Checksum::parse)
            .transpose()?;

        let final_path = ctx.work_dir.join(dest);

        // Warm cache from plan evaluation: verify and reuse
        if let Some(cache) = ctx.download_cache
            && let Some(hit) = cache.get(url)
        {
            if let Some(expected) = &expected
                && expected.value != hit.checksum.value
            {
                return Err(Error::ChecksumMismatch {
                    expected: expected.value.clone(),
                    actual: hit.checksum.value.clone(),
                });
            }
            debug!("using cached artifact for {}", url);
            let tmp = ctx.work_dir.join(format!(".{}.part", dest));
            fs::copy(&hit.path, &tmp)
                .map_err(|e| Error::Io(format!("failed to copy cached artifact: {}", e)))?;
            fs::rename(&tmp, &final_path)
                .map_err(|e| Error::Io(format!("failed to place {}: {}", final_path.display(), e)))?;
            return Ok(());
        }

        let file = ctx.downloader.download(&ctx.cancel, url)?;

        if let Some(expected) = &expected
            && expected.value != file.checksum.value
        {
            return Err(Error::ChecksumMismatch {
                expected: expected.value.clone(),
                actual: file.checksum.value.clone(),
            });
        }

        // Atomic placement: move to a dot-name in work_dir, then rename
        let tmp = ctx.work_dir.join(format!(".{}.part", dest));
        file.persist_to(&tmp)?;
        fs::rename(&tmp, &final_path)
            .map_err(|e| Error::Io(format!("failed to place {}: {}", final_path.display(), e)))?;

        debug!("downloaded {} to {}", url, final_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{HashAlgorithm, hash_bytes};
    use crate::platform::{Arch, Os, Platform};
    use crate::proc::CancelToken;
    use crate::recipe::parse_recipe;
    use crate::remote::{DownloadedFile, Downloader};
    use std::io::Write;
    use std::path::Path;

    struct ServeBytes(&'static [u8]);

    impl Downloader for ServeBytes {
        fn download(&self, _cancel: &CancelToken, _url: &str) -> Result<DownloadedFile> {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            file.write_all(self.0).unwrap();
            let temp = file.into_temp_path();
            let checksum = hash_bytes(self.0, HashAlgorithm::Sha256);
            Ok(DownloadedFile::temporary(temp, checksum, self.0.len() as u64))
        }
    }

    fn run_download(params: Params, payload: &'static [u8], work: &Path) -> Result<()> {
        let recipe = parse_recipe("[metadata]\nname = \"t\"\n").unwrap();
        let downloader = ServeBytes(payload);
        let mut ctx = ExecutionContext {
            cancel: CancelToken::new(),
            version: "1.0".to_string(),
            version_tag: "v1.0".to_string(),
            platform: Platform::new(Os::Linux, Arch::Amd64),
            work_dir: work.to_path_buf(),
            install_dir: work.join("install"),
            libs_dir: work.join("libs"),
            tools_dir: work.join("tools"),
            exec_paths: Vec::new(),
            downloader: &downloader,
            download_cache: None,
            recipe: &recipe,
        };
        DownloadFile.execute(&mut ctx, &params)
    }

    #[test]
    fn test_download_with_matching_checksum() {
        let work = tempfile::tempdir().unwrap();
        let sum = hash_bytes(b"content", HashAlgorithm::Sha256);
        let params = Params::new()
            .with("url", "https://example.com/a.bin")
            .with("dest", "a.bin")
            .with("checksum", sum.tagged());

        run_download(params, b"content", work.path()).unwrap();
        assert_eq!(fs::read(work.path().join("a.bin")).unwrap(), b"content");
    }

    #[test]
    fn test_download_checksum_mismatch() {
        let work = tempfile::tempdir().unwrap();
        let wrong = hash_bytes(b"different", HashAlgorithm::Sha256);
        let params = Params::new()
            .with("url", "https://example.com/a.bin")
            .with("dest", "a.bin")
            .with("checksum", wrong.tagged());

        let err = run_download(params, b"content", work.path()).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
        assert!(!work.path().join("a.bin").exists());
    }

    #[test]
    fn test_preflight_catches_bad_parameters() {
        let pf = DownloadFile.preflight(
            &Params::new()
                .with("url", "ftp://example.com/x")
                .with("dest", "../escape"),
        );
        assert_eq!(pf.errors.len(), 2);

        let pf = DownloadFile.preflight(
            &Params::new()
                .with("url", "https://example.com/x")
                .with("dest", "x"),
        );
        assert!(pf.is_ok());
        assert_eq!(pf.warnings.len(), 1);
    }
}
