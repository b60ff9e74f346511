// src/actions/rpath.rs

//! `set_rpath`: retag one binary's runtime search path
//!
//! Format is detected by magic, never extension: ELF goes through
//! patchelf with `--force-rpath`, Mach-O through `install_name_tool
//! -add_rpath` (duplicates tolerated). arm64 Mach-O is re-signed ad hoc
//! afterward.

use super::require_str;
use crate::error::{Error, Result};
use crate::params::Params;
use crate::plan::exec::ExecutionContext;
use crate::platform::Arch;
use crate::proc::CommandRunner;
use crate::registry::{Action, ActionDeps, PreflightResult, Registry};
use crate::relocate::{self, BinaryKind};
use tracing::warn;

pub fn register(registry: &mut Registry) {
    registry.register(Box::new(SetRpath));
}

/// Separators and newlines would smuggle extra search paths in
fn validate_rpath(value: &str) -> Result<()> {
    if value.is_empty() || value.contains([':', ';', '\n', '\r']) {
        return Err(Error::InvalidParameter {
            action: "set_rpath".to_string(),
            reason: format!("invalid rpath value {:?}", value),
        });
    }
    Ok(())
}

pub struct SetRpath;

impl Action for SetRpath {
    fn name(&self) -> &'static str {
        "set_rpath"
    }

    fn dependencies(&self) -> ActionDeps {
        ActionDeps {
            linux_install_time: vec!["patchelf"],
            ..Default::default()
        }
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        let mut result = PreflightResult::ok();
        if params.get_str("file").is_none() {
            result.push_error("missing required parameter \"file\"");
        }
        match params.get_str("rpath") {
            None => result.push_error("missing required parameter \"rpath\""),
            Some(rpath) => {
                if let Err(e) = validate_rpath(rpath) {
                    result.push_error(e.to_string());
                }
            }
        }
        result
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        let file = ctx.install_path(require_str(self.name(), params, "file")?)?;
        let rpath = require_str(self.name(), params, "rpath")?;
        validate_rpath(rpath)?;

        match relocate::detect(&file)? {
            BinaryKind::Elf => {
                let Ok(patchelf) = which::which("patchelf") else {
                    warn!("patchelf not found; cannot set rpath on {}", file.display());
                    return Ok(());
                };
                CommandRunner::new(patchelf.to_string_lossy(), &ctx.cancel)
                    .arg("--force-rpath")
                    .arg("--set-rpath")
                    .arg(rpath)
                    .arg(file.to_string_lossy())
                    .run()?;
            }
            BinaryKind::MachO | BinaryKind::MachOFat => {
                let Ok(tool) = which::which("install_name_tool") else {
                    warn!(
                        "install_name_tool not found; cannot set rpath on {}",
                        file.display()
                    );
                    return Ok(());
                };
                crate::relocate::macho::add_rpath(
                    &tool.to_string_lossy(),
                    &file,
                    rpath,
                    &ctx.cancel,
                )?;
                if ctx.platform.arch == Arch::Arm64 {
                    crate::relocate::macho::resign_adhoc(&file, &ctx.cancel)?;
                }
            }
            BinaryKind::Unknown => {
                warn!("{} is not a known binary format, skipping", file.display());
            }
        }
        Ok(())
    }
}
