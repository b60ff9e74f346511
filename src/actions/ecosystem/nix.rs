// src/actions/ecosystem/nix.rs

//! `nix_realize`: materialize a store path and expose its binaries

use super::{find_tool, toolchain_runner, validated_executables, verify_executables};
use crate::actions::require_str;
use crate::error::{Error, Result};
use crate::fsutil;
use crate::params::Params;
use crate::plan::exec::ExecutionContext;
use crate::registry::{Action, PreflightResult, Registry};
use std::fs;
use std::path::Path;
use tracing::info;

pub fn register(registry: &mut Registry) {
    registry.register(Box::new(NixRealize));
}

/// Store paths have a fixed shape; anything else is rejected outright
fn validate_store_path(path: &str) -> Result<()> {
    let ok = path.strip_prefix("/nix/store/").is_some_and(|rest| {
        let mut parts = rest.splitn(2, '-');
        let hash = parts.next().unwrap_or("");
        let name = parts.next().unwrap_or("");
        hash.len() == 32
            && hash.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
            && !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+'))
    });
    if !ok {
        return Err(Error::InvalidIdentifier(path.to_string()));
    }
    Ok(())
}

pub struct NixRealize;

impl Action for NixRealize {
    fn name(&self) -> &'static str {
        "nix_realize"
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        match params.get_str("store_path") {
            Some(path) if validate_store_path(path).is_ok() => PreflightResult::ok(),
            Some(path) => PreflightResult::error(format!("invalid store path {:?}", path)),
            None => PreflightResult::error("missing required parameter \"store_path\""),
        }
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        let store_path = require_str(self.name(), params, "store_path")?;
        validate_store_path(store_path)?;
        let executables = validated_executables(params)?;

        let nix_store = find_tool("nix-store", ctx)?;
        info!("realising {}", store_path);
        toolchain_runner(&nix_store, ctx)
            .arg("--realise")
            .arg(store_path)
            .run()?;

        let bin_dir = ctx.install_dir.join("bin");
        let store_bin = Path::new(store_path).join("bin");
        for exe in &executables {
            let target = store_bin.join(exe);
            if !target.is_file() {
                return Err(Error::ProcessFailed {
                    command: "nix-store --realise".to_string(),
                    exit_code: None,
                    output: format!("store path does not provide bin/{}", exe),
                });
            }
            fs::create_dir_all(&bin_dir)?;
            // Store paths are immutable and absolute; link directly
            fsutil::atomic_symlink(&target, &bin_dir.join(exe))?;
        }

        verify_executables(&ctx.install_dir, "nix-store --realise", &executables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_store_path() {
        assert!(
            validate_store_path("/nix/store/0c0m7h0zsjsdb0pmi0gkybab3ysfzq2c-ripgrep-14.1.0")
                .is_ok()
        );
        assert!(validate_store_path("/nix/store/short-x").is_err());
        assert!(validate_store_path("/etc/passwd").is_err());
        assert!(
            validate_store_path("/nix/store/0c0m7h0zsjsdb0pmi0gkybab3ysfzq2c-a;b").is_err()
        );
    }
}
