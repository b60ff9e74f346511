// src/actions/ecosystem/perl.rs

//! `cpan_install`: cpanminus into a local-lib under the install prefix
//!
//! Distribution names use the dashed form (`App-cpanminus`), which keeps
//! them inside the shared identifier allowlist.

use super::{find_tool, toolchain_runner, validated_executables, verify_executables};
use crate::actions::{require_str, validate_identifier};
use crate::error::{Error, Result};
use crate::fsutil;
use crate::params::Params;
use crate::plan::exec::ExecutionContext;
use crate::registry::{Action, PreflightResult, Registry};
use std::fs;
use tracing::info;

pub fn register(registry: &mut Registry) {
    registry.register(Box::new(CpanInstall));
}

pub struct CpanInstall;

impl Action for CpanInstall {
    fn name(&self) -> &'static str {
        "cpan_install"
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        match params.get_str("distribution") {
            Some(dist) if validate_identifier(dist).is_ok() => PreflightResult::ok(),
            Some(dist) => PreflightResult::error(format!("invalid distribution name {:?}", dist)),
            None => PreflightResult::error("missing required parameter \"distribution\""),
        }
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        let distribution = require_str(self.name(), params, "distribution")?;
        validate_identifier(distribution)?;
        let version = params.get_str("version").unwrap_or(ctx.version.as_str());
        validate_identifier(version)?;
        let executables = validated_executables(params)?;

        let cpanm = find_tool("cpanm", ctx)?;
        let local_lib = ctx.install_dir.join("perl5");

        info!("cpanm {}@{}", distribution, version);
        toolchain_runner(&cpanm, ctx)
            .arg("--notest")
            .arg("--local-lib")
            .arg(local_lib.to_string_lossy())
            .arg(format!("{}@{}", distribution, version))
            .run()?;

        // cpanm drops scripts into local-lib/bin; expose them
        let source_bin = local_lib.join("bin");
        let bin_dir = ctx.install_dir.join("bin");
        for exe in &executables {
            let target = source_bin.join(exe);
            if !target.is_file() {
                return Err(Error::ProcessFailed {
                    command: "cpanm".to_string(),
                    exit_code: None,
                    output: format!("distribution did not provide executable {}", exe),
                });
            }
            fs::create_dir_all(&bin_dir)?;
            let rel = fsutil::relative_from(&bin_dir, &target)?;
            fsutil::atomic_symlink(&rel, &bin_dir.join(exe))?;
        }

        verify_executables(&ctx.install_dir, "cpanm", &executables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preflight() {
        let params: Params = toml::from_str(r#"distribution = "App-Ack""#).unwrap();
        assert!(CpanInstall.preflight(&params).is_ok());

        let params: Params = toml::from_str(r#"distribution = "App::Ack""#).unwrap();
        assert!(!CpanInstall.preflight(&params).is_ok());

        assert!(!CpanInstall.preflight(&Params::new()).is_ok());
    }
}
