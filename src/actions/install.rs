// src/actions/install.rs

//! Staging-dir population: `install_binaries`, `install_libraries`,
//! `chmod`, `link_dependencies`
//!
//! Output declarations come from recipes and are treated as untrusted:
//! no absolute paths, no `..`, symlinks always relative and placed
//! atomically.

use super::require_str;
use crate::error::{Error, Result};
use crate::fsutil;
use crate::params::{Params, Value};
use crate::plan::exec::ExecutionContext;
use crate::registry::{Action, PreflightResult, Registry};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub fn register(registry: &mut Registry) {
    registry.register(Box::new(InstallBinaries));
    registry.register(Box::new(InstallLibraries));
    registry.register(Box::new(Chmod));
    registry.register(Box::new(LinkDependencies));
}

/// One declared output: a source in the work dir and a destination in the
/// install dir
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub src: String,
    pub dest: String,
}

/// Parse the `outputs` parameter: strings or `{src, dest}` tables
///
/// A bare string `s` means `{src: s, dest: <default_dir>/basename(s)}`.
pub fn parse_outputs(action: &str, params: &Params, default_dir: &str) -> Result<Vec<Output>> {
    let Some(raw) = params.get_seq("outputs") else {
        return Ok(Vec::new());
    };

    let mut outputs = Vec::new();
    for item in raw {
        let output = match item {
            Value::Str(src) => {
                let base = Path::new(src)
                    .file_name()
                    .ok_or_else(|| Error::InvalidParameter {
                        action: action.to_string(),
                        reason: format!("output {:?} has no basename", src),
                    })?
                    .to_string_lossy();
                Output {
                    src: src.clone(),
                    dest: format!("{}/{}", default_dir, base),
                }
            }
            Value::Map(map) => {
                let src = map
                    .get("src")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::InvalidParameter {
                        action: action.to_string(),
                        reason: "output table missing \"src\"".to_string(),
                    })?;
                let dest = match map.get("dest").and_then(Value::as_str) {
                    Some(dest) => dest.to_string(),
                    None => {
                        let base = Path::new(src)
                            .file_name()
                            .map(|b| b.to_string_lossy().into_owned())
                            .unwrap_or_else(|| src.to_string());
                        format!("{}/{}", default_dir, base)
                    }
                };
                Output {
                    src: src.to_string(),
                    dest,
                }
            }
            other => {
                return Err(Error::InvalidParameter {
                    action: action.to_string(),
                    reason: format!("output entries must be strings or tables, got {:?}", other),
                });
            }
        };

        // Both sides must stay relative and contained
        fsutil::sanitize_path(&output.src)?;
        fsutil::sanitize_path(&output.dest)?;
        outputs.push(output);
    }

    Ok(outputs)
}

/// The executables list: explicit, or inferred as every dest under `bin/`
fn executables_for(params: &Params, outputs: &[Output]) -> Vec<String> {
    let explicit = params.get_str_seq("executables");
    if !explicit.is_empty() {
        return explicit.into_iter().map(str::to_string).collect();
    }
    outputs
        .iter()
        .filter(|o| o.dest.starts_with("bin/"))
        .map(|o| o.dest.clone())
        .collect()
}

pub struct InstallBinaries;

impl InstallBinaries {
    fn mode<'p>(params: &'p Params) -> &'p str {
        params.get_str("install_mode").unwrap_or("binaries")
    }

    fn install_listed(&self, ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        let outputs = parse_outputs(self.name(), params, "bin")?;
        if outputs.is_empty() {
            return Err(Error::InvalidParameter {
                action: self.name().to_string(),
                reason: "no outputs declared".to_string(),
            });
        }
        let executables = executables_for(params, &outputs);

        for output in &outputs {
            let src = ctx.work_path(&output.src)?;
            let dest = ctx.install_path(&output.dest)?;
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&src, &dest).map_err(|e| {
                Error::Io(format!(
                    "failed to install {} to {}: {}",
                    src.display(),
                    dest.display(),
                    e
                ))
            })?;
            debug!("installed {}", output.dest);
        }

        for exe in &executables {
            // Accept either the dest path or its basename
            let matching = outputs
                .iter()
                .find(|o| o.dest == *exe || o.dest.ends_with(&format!("/{}", exe)));
            if let Some(output) = matching {
                fsutil::set_executable(&ctx.install_path(&output.dest)?)?;
            }
        }
        Ok(())
    }

    fn install_directory(&self, ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        // Whole-tree installs keep their internal layout, so a broken
        // install is only detectable by running the tool.
        if ctx.recipe.verify.is_none() && !ctx.recipe.is_library() {
            return Err(Error::InvalidParameter {
                action: self.name().to_string(),
                reason: "install_mode = \"directory\" requires a [verify] command".to_string(),
            });
        }

        fsutil::copy_dir_all(&ctx.work_dir, &ctx.install_dir, &[])?;

        let outputs = parse_outputs(self.name(), params, "bin")?;
        let bin_dir = ctx.install_dir.join("bin");
        for output in &outputs {
            let target_abs = ctx.install_path(&output.src)?;
            let link_name = Path::new(&output.dest)
                .file_name()
                .ok_or_else(|| Error::InvalidParameter {
                    action: self.name().to_string(),
                    reason: format!("output {:?} has no basename", output.dest),
                })?;
            let link = bin_dir.join(link_name);
            let target = fsutil::relative_from(&bin_dir, &target_abs)?;
            fsutil::atomic_symlink(&target, &link)?;
            debug!("linked bin/{} -> {}", link_name.to_string_lossy(), target.display());
        }
        Ok(())
    }
}

impl Action for InstallBinaries {
    fn name(&self) -> &'static str {
        "install_binaries"
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        let mut result = PreflightResult::ok();

        match Self::mode(params) {
            "binaries" | "directory" => {}
            "directory_wrapped" => {
                result.push_error("install_mode \"directory_wrapped\" is reserved");
            }
            other => result.push_error(format!("unknown install_mode {:?}", other)),
        }

        if let Err(e) = parse_outputs(self.name(), params, "bin") {
            result.push_error(e.to_string());
        }
        result
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        match Self::mode(params) {
            "binaries" => self.install_listed(ctx, params),
            "directory" => self.install_directory(ctx, params),
            "directory_wrapped" => Err(Error::InvalidParameter {
                action: self.name().to_string(),
                reason: "install_mode \"directory_wrapped\" is reserved".to_string(),
            }),
            other => Err(Error::InvalidParameter {
                action: self.name().to_string(),
                reason: format!("unknown install_mode {:?}", other),
            }),
        }
    }
}

pub struct InstallLibraries;

impl Action for InstallLibraries {
    fn name(&self) -> &'static str {
        "install_libraries"
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        match parse_outputs(self.name(), params, "lib") {
            Ok(outputs) if outputs.is_empty() => {
                PreflightResult::error("no outputs declared")
            }
            Ok(_) => PreflightResult::ok(),
            Err(e) => PreflightResult::error(e.to_string()),
        }
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        let outputs = parse_outputs(self.name(), params, "lib")?;
        for output in &outputs {
            let src = ctx.work_path(&output.src)?;
            let dest = ctx.install_path(&output.dest)?;
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            if src.is_dir() {
                fsutil::copy_dir_all(&src, &dest, &[])?;
            } else {
                fs::copy(&src, &dest).map_err(|e| {
                    Error::Io(format!(
                        "failed to install {} to {}: {}",
                        src.display(),
                        dest.display(),
                        e
                    ))
                })?;
            }
        }
        Ok(())
    }
}

pub struct Chmod;

impl Action for Chmod {
    fn name(&self) -> &'static str {
        "chmod"
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        if params.get_str_seq("files").is_empty() {
            PreflightResult::error("missing required parameter \"files\"")
        } else {
            PreflightResult::ok()
        }
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        let files = params.get_str_seq("files");
        if files.is_empty() {
            return Err(Error::InvalidParameter {
                action: self.name().to_string(),
                reason: "missing required parameter \"files\"".to_string(),
            });
        }
        for file in files {
            fsutil::set_executable(&ctx.work_path(file)?)?;
        }
        Ok(())
    }
}

pub struct LinkDependencies;

impl Action for LinkDependencies {
    fn name(&self) -> &'static str {
        "link_dependencies"
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        if params.get_str_seq("dependencies").is_empty() {
            PreflightResult::error("missing required parameter \"dependencies\"")
        } else {
            PreflightResult::ok()
        }
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        let deps = params.get_str_seq("dependencies");
        if deps.is_empty() {
            return Err(Error::InvalidParameter {
                action: self.name().to_string(),
                reason: "missing required parameter \"dependencies\"".to_string(),
            });
        }
        let only: Vec<&str> = params.get_str_seq("executables");

        let bin_dir = ctx.install_dir.join("bin");
        for spec in deps {
            let (name, version) = crate::recipe::split_dep_spec(spec);
            let dep_bin = ctx.tools_dir.join(format!("{}-{}", name, version)).join("bin");
            if !dep_bin.is_dir() {
                warn!("dependency {} {} is not installed, skipping links", name, version);
                continue;
            }

            for entry in fs::read_dir(&dep_bin)
                .map_err(|e| Error::Io(format!("failed to read {}: {}", dep_bin.display(), e)))?
                .flatten()
            {
                let exe: String = entry.file_name().to_string_lossy().into_owned();
                if !only.is_empty() && !only.contains(&exe.as_str()) {
                    continue;
                }
                let link = bin_dir.join(&exe);
                let target = link_target_for(&bin_dir, &entry.path())?;
                fsutil::atomic_symlink(&target, &link)?;
                debug!("linked {} -> {}", exe, target.display());
            }
        }
        Ok(())
    }
}

fn link_target_for(bin_dir: &Path, target_abs: &Path) -> Result<PathBuf> {
    fsutil::relative_from(bin_dir, target_abs)
}
