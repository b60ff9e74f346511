// src/actions/env.rs

//! `set_env`: persist environment exports alongside an install
//!
//! Writes `install_dir/env.sh` with one `export NAME=VALUE` line per
//! declared variable, in declaration order. Values get `{install_dir}`,
//! `{libs_dir}`, and `{version}` substituted with the install's *final*
//! paths, since the file outlives the staging directory.

use crate::error::{Error, Result};
use crate::params::{Params, Value};
use crate::plan::exec::ExecutionContext;
use crate::registry::{Action, PreflightResult, Registry};
use std::fs;
use tracing::debug;

pub fn register(registry: &mut Registry) {
    registry.register(Box::new(SetEnv));
}

pub struct SetEnv;

impl Action for SetEnv {
    fn name(&self) -> &'static str {
        "set_env"
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        let Some(vars) = params.get_map("vars") else {
            return PreflightResult::error("missing required parameter \"vars\"");
        };

        let mut result = PreflightResult::ok();
        for (key, value) in vars.iter() {
            if key.is_empty()
                || !key
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
                || key.starts_with(|c: char| c.is_ascii_digit())
            {
                result.push_error(format!("invalid environment variable name {:?}", key));
            }
            if !matches!(value, Value::Str(_)) {
                result.push_error(format!("value of {:?} must be a string", key));
            }
        }
        result
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        let vars = params.get_map("vars").ok_or_else(|| Error::InvalidParameter {
            action: self.name().to_string(),
            reason: "missing required parameter \"vars\"".to_string(),
        })?;

        let install_dir = ctx.final_install_dir();
        let install_dir = install_dir.to_string_lossy();
        let libs_dir = ctx.libs_dir.to_string_lossy();

        let mut script = String::new();
        for (key, value) in vars.iter() {
            let Value::Str(raw) = value else {
                return Err(Error::InvalidParameter {
                    action: self.name().to_string(),
                    reason: format!("value of {:?} must be a string", key),
                });
            };
            let expanded = raw
                .replace("{install_dir}", &install_dir)
                .replace("{libs_dir}", &libs_dir)
                .replace("{version}", &ctx.version);
            script.push_str(&format!("export {}=\"{}\"\n", key, expanded));
        }

        let path = ctx.install_dir.join("env.sh");
        fs::write(&path, script)
            .map_err(|e| Error::Io(format!("failed to write {}: {}", path.display(), e)))?;
        debug!("wrote {} ({} vars)", path.display(), vars.len());
        Ok(())
    }
}
