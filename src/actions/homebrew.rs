// src/actions/homebrew.rs

//! Homebrew integration: `homebrew`, `homebrew_bottle`,
//! `homebrew_source`, and the `homebrew_relocate` primitive
//!
//! Bottles are prebuilt prefixes whose files embed `@@HOMEBREW_CELLAR@@`
//! and `@@HOMEBREW_PREFIX@@` placeholders (plus the occasional leaked
//! build-time path). `homebrew_relocate` rewrites those to the real
//! install prefix and runs the binary relocator over anything that looks
//! like a binary.

use crate::archive::ArchiveFormat;
use crate::checksum::Checksum;
use crate::error::{Error, Result};
use crate::fsutil;
use crate::params::Params;
use crate::plan::eval::EvalContext;
use crate::plan::exec::ExecutionContext;
use crate::platform::{Arch, Os, Platform};
use crate::recipe::Step;
use crate::registry::{Action, ActionDeps, ActionKind, Registry, composite_not_executable};
use crate::relocate;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

pub fn register(registry: &mut Registry) {
    registry.register(Box::new(Homebrew));
    registry.register(Box::new(HomebrewBottle));
    registry.register(Box::new(HomebrewSource));
    registry.register(Box::new(HomebrewRelocate));
}

const FORMULA_API: &str = "https://formulae.brew.sh/api/formula";

#[derive(Debug, Deserialize)]
struct Formula {
    urls: FormulaUrls,
    #[serde(default)]
    bottle: Option<FormulaBottle>,
}

#[derive(Debug, Deserialize)]
struct FormulaUrls {
    stable: StableUrl,
}

#[derive(Debug, Deserialize)]
struct StableUrl {
    url: String,
    #[serde(default)]
    checksum: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FormulaBottle {
    #[serde(default)]
    stable: Option<BottleStable>,
}

#[derive(Debug, Deserialize)]
struct BottleStable {
    #[serde(default)]
    files: HashMap<String, BottleFile>,
}

#[derive(Debug, Deserialize)]
struct BottleFile {
    url: String,
    sha256: String,
}

fn fetch_formula(eval: &EvalContext<'_>, formula: &str) -> Result<Formula> {
    super::validate_identifier(formula)?;
    let url = format!("{}/{}.json", FORMULA_API, formula);
    let text = eval.fetch_text(&url)?;
    serde_json::from_str(&text)
        .map_err(|e| Error::Parse(format!("invalid formula payload for {}: {}", formula, e)))
}

/// Bottle platform tags in preference order for a target platform
fn bottle_tags(platform: Platform) -> Vec<&'static str> {
    match (platform.os, platform.arch) {
        (Os::Linux, Arch::Amd64) => vec!["x86_64_linux", "all"],
        (Os::Linux, Arch::Arm64) => vec!["aarch64_linux", "all"],
        (Os::Darwin, Arch::Arm64) => {
            vec!["arm64_sequoia", "arm64_sonoma", "arm64_ventura", "all"]
        }
        (Os::Darwin, Arch::Amd64) => vec!["sequoia", "sonoma", "ventura", "all"],
    }
}

fn formula_name<'p>(eval: &'p EvalContext<'_>, params: &'p Params) -> &'p str {
    params.get_str("formula").unwrap_or_else(|| eval.recipe.name())
}

/// Chooses bottle or source build depending on availability
pub struct Homebrew;

impl Action for Homebrew {
    fn name(&self) -> &'static str {
        "homebrew"
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Composite
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn dependencies(&self) -> ActionDeps {
        ActionDeps {
            linux_install_time: vec!["patchelf"],
            ..Default::default()
        }
    }

    fn decompose(&self, eval: &EvalContext<'_>, params: &Params) -> Result<Vec<Step>> {
        let name = formula_name(eval, params);
        let formula = fetch_formula(eval, name)?;

        let has_bottle = formula
            .bottle
            .as_ref()
            .and_then(|b| b.stable.as_ref())
            .map(|stable| {
                bottle_tags(eval.platform)
                    .iter()
                    .any(|tag| stable.files.contains_key(*tag))
            })
            .unwrap_or(false);

        let next = if has_bottle {
            "homebrew_bottle"
        } else {
            debug!("no bottle for {} on {}, building from source", name, eval.platform);
            "homebrew_source"
        };
        Ok(vec![Step::new(next, params.clone())])
    }

    fn execute(&self, _ctx: &mut ExecutionContext<'_>, _params: &Params) -> Result<()> {
        Err(composite_not_executable(self.name()))
    }
}

/// Prebuilt bottle: download, extract, relocate, install as a tree
pub struct HomebrewBottle;

impl Action for HomebrewBottle {
    fn name(&self) -> &'static str {
        "homebrew_bottle"
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Composite
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn dependencies(&self) -> ActionDeps {
        ActionDeps {
            linux_install_time: vec!["patchelf"],
            ..Default::default()
        }
    }

    fn decompose(&self, eval: &EvalContext<'_>, params: &Params) -> Result<Vec<Step>> {
        let name = formula_name(eval, params).to_string();
        let formula = fetch_formula(eval, &name)?;

        let stable = formula
            .bottle
            .and_then(|b| b.stable)
            .ok_or_else(|| Error::NotFound(format!("formula {} has no stable bottle", name)))?;

        let file = bottle_tags(eval.platform)
            .iter()
            .find_map(|tag| stable.files.get(*tag))
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "no bottle of {} for {}",
                    name, eval.platform
                ))
            })?;

        let checksum = Checksum::parse(&file.sha256)?;
        let dest = format!("{}.bottle.tar.gz", name);

        let download = Step {
            action: "download_file".to_string(),
            params: Params::new()
                .with("url", file.url.as_str())
                .with("dest", dest.as_str())
                .with("checksum", checksum.tagged()),
            pinned_checksum: Some(checksum),
            pinned_size: None,
        };

        // Bottles nest everything under <formula>/<version>/
        let extract = Step::new(
            "extract",
            Params::new()
                .with("archive", dest)
                .with("format", "tar.gz")
                .with("strip_dirs", 2i64),
        );

        let relocate = Step::new(
            "homebrew_relocate",
            Params::new().with("formula", name.as_str()),
        );

        let mut install = Params::new().with("install_mode", "directory");
        for key in ["outputs", "executables"] {
            if let Some(value) = params.get(key) {
                install = install.with(key, value.clone());
            }
        }
        let install = Step::new("install_binaries", install);

        Ok(vec![download, extract, relocate, install])
    }

    fn execute(&self, _ctx: &mut ExecutionContext<'_>, _params: &Params) -> Result<()> {
        Err(composite_not_executable(self.name()))
    }
}

/// Source build from the formula's stable tarball
pub struct HomebrewSource;

impl Action for HomebrewSource {
    fn name(&self) -> &'static str {
        "homebrew_source"
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Composite
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn decompose(&self, eval: &EvalContext<'_>, params: &Params) -> Result<Vec<Step>> {
        let name = formula_name(eval, params);
        let formula = fetch_formula(eval, name)?;
        let stable = formula.urls.stable;

        let asset = stable
            .url
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .unwrap_or("source.tar.gz")
            .to_string();
        let format = ArchiveFormat::from_extension(&asset).unwrap_or(ArchiveFormat::TarGz);

        let mut download_params = Params::new()
            .with("url", stable.url.as_str())
            .with("dest", asset.as_str());
        let pinned = match &stable.checksum {
            Some(raw) => {
                let checksum = Checksum::parse(raw)?;
                download_params = download_params.with("checksum", checksum.tagged());
                Some(checksum)
            }
            None => {
                // Formula carries no checksum: pin one ourselves
                let (checksum, _size) = eval.pin_download(&stable.url)?;
                download_params = download_params.with("checksum", checksum.tagged());
                Some(checksum)
            }
        };

        let download = Step {
            action: "download_file".to_string(),
            params: download_params,
            pinned_checksum: pinned,
            pinned_size: None,
        };

        let extract = Step::new(
            "extract",
            Params::new()
                .with("archive", asset)
                .with("format", format.as_str())
                .with("strip_dirs", 1i64),
        );

        let mut build = Params::new();
        if let Some(args) = params.get("configure_args") {
            build = build.with("args", args.clone());
        }
        let build = Step::new("configure_make", build);

        Ok(vec![download, extract, build])
    }

    fn execute(&self, _ctx: &mut ExecutionContext<'_>, _params: &Params) -> Result<()> {
        Err(composite_not_executable(self.name()))
    }
}

/// Rewrite Homebrew placeholder paths and fix up binaries in the work tree
pub struct HomebrewRelocate;

impl HomebrewRelocate {
    fn relocate_text(
        contents: &str,
        formula: &str,
        version: &str,
        install_prefix: &str,
        cellar_root: &str,
    ) -> String {
        let versioned = format!("@@HOMEBREW_CELLAR@@/{}/{}", formula, version);
        let mut updated = contents.replace(&versioned, install_prefix);
        updated = updated.replace("@@HOMEBREW_CELLAR@@", cellar_root);
        updated = updated.replace("@@HOMEBREW_PREFIX@@", install_prefix);

        // Leaked build-stage paths: /tmp/<marker>-XXXXXXXX/.install/<f>/<v>
        let pattern = format!(
            r"/tmp/[A-Za-z0-9._-]+-[A-Za-z0-9]{{8}}/\.install/{}/{}",
            regex::escape(formula),
            regex::escape(version)
        );
        if let Ok(re) = regex::Regex::new(&pattern) {
            updated = re.replace_all(&updated, install_prefix).into_owned();
        }
        updated
    }
}

impl Action for HomebrewRelocate {
    fn name(&self) -> &'static str {
        "homebrew_relocate"
    }

    fn dependencies(&self) -> ActionDeps {
        ActionDeps {
            linux_install_time: vec!["patchelf"],
            ..Default::default()
        }
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        let formula = params
            .get_str("formula")
            .map(str::to_string)
            .unwrap_or_else(|| ctx.recipe.name().to_string());
        let install_prefix = match params.get_str("install_path") {
            Some(path) => path.to_string(),
            None => ctx.final_install_dir().to_string_lossy().into_owned(),
        };
        let cellar_root = Path::new(&install_prefix)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| ctx.tools_dir.to_string_lossy().into_owned());

        let lib_dirs = relocate::shared_lib_dirs(&ctx.work_dir);

        let entries: Vec<_> = WalkDir::new(&ctx.work_dir)
            .into_iter()
            .flatten()
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().to_path_buf())
            .collect();

        for path in entries {
            ctx.cancel.check()?;

            if fsutil::looks_binary(&path)? {
                relocate::relocate_file(&path, &ctx.work_dir, &lib_dirs, ctx.platform, &ctx.cancel)?;
                continue;
            }

            let Ok(contents) = fs::read_to_string(&path) else {
                debug!("skipping non-UTF-8 file {}", path.display());
                continue;
            };

            let updated = Self::relocate_text(
                &contents,
                &formula,
                &ctx.version,
                &install_prefix,
                &cellar_root,
            );
            if updated == contents {
                continue;
            }

            // Read-only files in bottles still need rewriting
            let permissions = path
                .metadata()
                .map_err(|e| Error::Io(format!("failed to stat {}: {}", path.display(), e)))?
                .permissions();
            let original_mode = permissions.mode();
            if original_mode & 0o200 == 0 {
                fs::set_permissions(&path, fs::Permissions::from_mode(original_mode | 0o200))?;
            }
            if let Err(e) = fs::write(&path, &updated) {
                warn!("failed to rewrite {}: {}", path.display(), e);
            }
            fs::set_permissions(&path, fs::Permissions::from_mode(original_mode))?;
            debug!("relocated {}", path.display());
        }

        Ok(())
    }
}
