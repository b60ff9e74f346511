// src/actions/patch.rs

//! Source mutation: `apply_patch_file` and `text_replace`

use super::require_str;
use crate::error::{Error, Result};
use crate::params::{Params, Value};
use crate::plan::exec::ExecutionContext;
use crate::proc::CommandRunner;
use crate::registry::{Action, PreflightResult, Registry};
use std::fs;
use tracing::debug;

pub fn register(registry: &mut Registry) {
    registry.register(Box::new(ApplyPatchFile));
    registry.register(Box::new(TextReplace));
}

pub struct ApplyPatchFile;

impl Action for ApplyPatchFile {
    fn name(&self) -> &'static str {
        "apply_patch_file"
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        let mut result = PreflightResult::ok();
        if params.get_str("patch").is_none() {
            result.push_error("missing required parameter \"patch\"");
        }
        if let Some(strip) = params.get_int("strip")
            && strip < 0
        {
            result.push_error("strip must be non-negative");
        }
        result
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        let patch_file = ctx.work_path(require_str(self.name(), params, "patch")?)?;
        let strip = params.get_int("strip").unwrap_or(1);
        if strip < 0 {
            return Err(Error::InvalidParameter {
                action: self.name().to_string(),
                reason: "strip must be non-negative".to_string(),
            });
        }
        let source_dir = match params.get_str("dir") {
            Some(dir) => ctx.work_path(dir)?,
            None => ctx.work_dir.clone(),
        };

        debug!("applying {} with -p{}", patch_file.display(), strip);

        CommandRunner::new("patch", &ctx.cancel)
            .arg(format!("-p{}", strip))
            .arg("--batch")
            .arg("-i")
            .arg(patch_file.to_string_lossy())
            .cwd(&source_dir)
            .with_paths(&ctx.exec_paths)
            .run()?;
        Ok(())
    }
}

pub struct TextReplace;

impl TextReplace {
    fn entries(params: &Params) -> Result<Vec<(String, String, String, Option<usize>)>> {
        let Some(raw) = params.get_seq("replacements") else {
            return Err(Error::InvalidParameter {
                action: "text_replace".to_string(),
                reason: "missing required parameter \"replacements\"".to_string(),
            });
        };

        let mut entries = Vec::new();
        for item in raw {
            let Value::Map(map) = item else {
                return Err(Error::InvalidParameter {
                    action: "text_replace".to_string(),
                    reason: "replacements entries must be tables".to_string(),
                });
            };
            let get = |key: &str| {
                map.get(key).and_then(Value::as_str).map(str::to_string).ok_or_else(|| {
                    Error::InvalidParameter {
                        action: "text_replace".to_string(),
                        reason: format!("replacement missing {:?}", key),
                    }
                })
            };
            let count = map.get("count").and_then(Value::as_int).map(|n| n as usize);
            entries.push((get("file")?, get("search")?, get("replace")?, count));
        }
        Ok(entries)
    }
}

impl Action for TextReplace {
    fn name(&self) -> &'static str {
        "text_replace"
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        match Self::entries(params) {
            Ok(_) => PreflightResult::ok(),
            Err(e) => PreflightResult::error(e.to_string()),
        }
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        for (file, search, replace, count) in Self::entries(params)? {
            let path = ctx.work_path(&file)?;
            let contents = fs::read_to_string(&path)
                .map_err(|e| Error::Io(format!("failed to read {}: {}", path.display(), e)))?;

            let updated = match count {
                Some(limit) => contents.replacen(&search, &replace, limit),
                None => contents.replace(&search, &replace),
            };

            if updated != contents {
                fs::write(&path, updated)
                    .map_err(|e| Error::Io(format!("failed to write {}: {}", path.display(), e)))?;
                debug!("rewrote {} ({:?} -> {:?})", file, search, replace);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Arch, Os, Platform};
    use crate::proc::CancelToken;
    use crate::recipe::parse_recipe;
    use crate::remote::{DownloadedFile, Downloader};

    struct NoDownloads;
    impl Downloader for NoDownloads {
        fn download(&self, _c: &CancelToken, url: &str) -> Result<DownloadedFile> {
            Err(Error::NotFound(url.to_string()))
        }
    }

    fn exec_ctx<'a>(
        work: &tempfile::TempDir,
        recipe: &'a crate::recipe::Recipe,
        downloader: &'a dyn Downloader,
    ) -> ExecutionContext<'a> {
        ExecutionContext {
            cancel: CancelToken::new(),
            version: "1.0".to_string(),
            version_tag: "v1.0".to_string(),
            platform: Platform::new(Os::Linux, Arch::Amd64),
            work_dir: work.path().to_path_buf(),
            install_dir: work.path().join("install"),
            libs_dir: work.path().join("libs"),
            tools_dir: work.path().join("tools"),
            exec_paths: Vec::new(),
            downloader,
            download_cache: None,
            recipe,
        }
    }

    #[test]
    fn test_text_replace_with_count() {
        let work = tempfile::tempdir().unwrap();
        fs::write(work.path().join("config.h"), "AAA AAA AAA").unwrap();
        let recipe = parse_recipe("[metadata]\nname = \"x\"\n").unwrap();
        let downloader = NoDownloads;
        let mut ctx = exec_ctx(&work, &recipe, &downloader);

        let params: Params = toml::from_str(
            r#"replacements = [{ file = "config.h", search = "AAA", replace = "BBB", count = 2 }]"#,
        )
        .unwrap();
        TextReplace.execute(&mut ctx, &params).unwrap();

        assert_eq!(
            fs::read_to_string(work.path().join("config.h")).unwrap(),
            "BBB BBB AAA"
        );
    }

    #[test]
    fn test_text_replace_literal_not_regex() {
        let work = tempfile::tempdir().unwrap();
        fs::write(work.path().join("f"), "a.c matches a.c only").unwrap();
        let recipe = parse_recipe("[metadata]\nname = \"x\"\n").unwrap();
        let downloader = NoDownloads;
        let mut ctx = exec_ctx(&work, &recipe, &downloader);

        let params: Params = toml::from_str(
            r#"replacements = [{ file = "f", search = "a.c", replace = "X" }]"#,
        )
        .unwrap();
        TextReplace.execute(&mut ctx, &params).unwrap();
        // "abc" would have matched under regex semantics
        assert_eq!(fs::read_to_string(work.path().join("f")).unwrap(), "X matches X only");
    }

    #[test]
    fn test_apply_patch_file() {
        // GNU patch is a standard build prerequisite on CI images
        if which::which("patch").is_err() {
            return;
        }
        let work = tempfile::tempdir().unwrap();
        fs::write(work.path().join("hello.txt"), "hello\n").unwrap();
        fs::write(
            work.path().join("fix.patch"),
            "--- a/hello.txt\n+++ b/hello.txt\n@@ -1 +1 @@\n-hello\n+goodbye\n",
        )
        .unwrap();

        let recipe = parse_recipe("[metadata]\nname = \"x\"\n").unwrap();
        let downloader = NoDownloads;
        let mut ctx = exec_ctx(&work, &recipe, &downloader);

        let params: Params = toml::from_str(r#"patch = "fix.patch""#).unwrap();
        ApplyPatchFile.execute(&mut ctx, &params).unwrap();
        assert_eq!(
            fs::read_to_string(work.path().join("hello.txt")).unwrap(),
            "goodbye\n"
        );
    }

    #[test]
    fn test_apply_patch_failure_is_fatal() {
        if which::which("patch").is_err() {
            return;
        }
        let work = tempfile::tempdir().unwrap();
        fs::write(work.path().join("hello.txt"), "unrelated\n").unwrap();
        fs::write(
            work.path().join("fix.patch"),
            "--- a/hello.txt\n+++ b/hello.txt\n@@ -1 +1 @@\n-hello\n+goodbye\n",
        )
        .unwrap();

        let recipe = parse_recipe("[metadata]\nname = \"x\"\n").unwrap();
        let downloader = NoDownloads;
        let mut ctx = exec_ctx(&work, &recipe, &downloader);

        let params: Params = toml::from_str(r#"patch = "fix.patch""#).unwrap();
        let err = ApplyPatchFile.execute(&mut ctx, &params).unwrap_err();
        assert!(matches!(err, Error::ProcessFailed { .. }));
    }
}
