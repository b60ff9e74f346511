// src/actions/ecosystem/ruby.rs

//! Ruby installs: `gem_install` (Gemfile.lock capture), `gem_exec`
//! (bundler-driven locked install), `install_gem_direct` (plain gem)

use super::{capture_error, find_tool, toolchain_runner, validated_executables, verify_executables};
use crate::actions::{require_str, validate_identifier};
use crate::error::{Error, Result};
use crate::params::Params;
use crate::plan::eval::EvalContext;
use crate::plan::exec::ExecutionContext;
use crate::recipe::Step;
use crate::registry::{Action, ActionKind, PreflightResult, Registry, composite_not_executable};
use crate::remote::REMOTE_TIMEOUT;
use std::fs;
use tracing::info;

pub fn register(registry: &mut Registry) {
    registry.register(Box::new(GemInstall));
    registry.register(Box::new(GemExec));
    registry.register(Box::new(InstallGemDirect));
}

fn gemfile(gem: &str, version: &str) -> String {
    format!(
        "source \"https://rubygems.org\"\n\ngem \"{}\", \"{}\"\n",
        gem, version
    )
}

pub struct GemInstall;

impl Action for GemInstall {
    fn name(&self) -> &'static str {
        "gem_install"
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Composite
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn decompose(&self, eval: &EvalContext<'_>, params: &Params) -> Result<Vec<Step>> {
        let gem = params.get_str("gem").unwrap_or_else(|| eval.recipe.name());
        validate_identifier(gem)?;
        validate_identifier(&eval.version)?;

        let bundle = which::which("bundle")
            .map_err(|_| Error::LockfileCapture("bundler is not available for lockfile capture".to_string()))?;

        let capture = tempfile::tempdir()
            .map_err(|e| Error::Io(format!("failed to create capture directory: {}", e)))?;
        fs::write(capture.path().join("Gemfile"), gemfile(gem, &eval.version))?;

        info!("capturing Gemfile.lock for {} {}", gem, eval.version);
        crate::proc::CommandRunner::new(bundle.to_string_lossy(), &eval.cancel)
            .arg("lock")
            .cwd(capture.path())
            .timeout(REMOTE_TIMEOUT)
            .run()
            .map_err(|e| capture_error("bundle lock", e))?;

        let lockfile = fs::read_to_string(capture.path().join("Gemfile.lock"))
            .map_err(|e| Error::LockfileCapture(format!("unreadable Gemfile.lock: {}", e)))?;

        let mut exec = Params::new()
            .with("gem", gem)
            .with("version", eval.version.as_str())
            .with("lockfile", lockfile);
        if let Some(executables) = params.get("executables") {
            exec = exec.with("executables", executables.clone());
        }

        Ok(vec![Step::new("gem_exec", exec)])
    }

    fn execute(&self, _ctx: &mut ExecutionContext<'_>, _params: &Params) -> Result<()> {
        Err(composite_not_executable(self.name()))
    }
}

pub struct GemExec;

impl Action for GemExec {
    fn name(&self) -> &'static str {
        "gem_exec"
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        let mut result = PreflightResult::ok();
        for key in ["gem", "version", "lockfile"] {
            if params.get_str(key).is_none() {
                result.push_error(format!("missing required parameter {:?}", key));
            }
        }
        if let Some(gem) = params.get_str("gem")
            && validate_identifier(gem).is_err()
        {
            result.push_error(format!("invalid gem name {:?}", gem));
        }
        result
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        let gem = require_str(self.name(), params, "gem")?;
        validate_identifier(gem)?;
        let version = require_str(self.name(), params, "version")?;
        validate_identifier(version)?;
        let lockfile = require_str(self.name(), params, "lockfile")?;
        let executables = validated_executables(params)?;

        fs::create_dir_all(&ctx.install_dir)?;
        let gemfile_path = ctx.install_dir.join("Gemfile");
        fs::write(&gemfile_path, gemfile(gem, version))?;
        fs::write(ctx.install_dir.join("Gemfile.lock"), lockfile)?;

        let bundle = find_tool("bundle", ctx)?;
        let gem_home = ctx.install_dir.join("gems");

        info!("bundle install {} {}", gem, version);
        toolchain_runner(&bundle, ctx)
            .arg("install")
            .cwd(&ctx.install_dir)
            .env("BUNDLE_GEMFILE", gemfile_path.to_string_lossy())
            .env("BUNDLE_PATH", gem_home.to_string_lossy())
            .env("BUNDLE_FROZEN", "true")
            .env("GEM_HOME", gem_home.to_string_lossy())
            .run()?;

        toolchain_runner(&bundle, ctx)
            .arg("binstubs")
            .arg(gem)
            .arg("--path")
            .arg(ctx.install_dir.join("bin").to_string_lossy())
            .cwd(&ctx.install_dir)
            .env("BUNDLE_GEMFILE", gemfile_path.to_string_lossy())
            .env("BUNDLE_PATH", gem_home.to_string_lossy())
            .env("GEM_HOME", gem_home.to_string_lossy())
            .run()?;

        verify_executables(&ctx.install_dir, "bundle install", &executables)
    }
}

/// Plain `gem install` pinned to one version, no bundler involved
pub struct InstallGemDirect;

impl Action for InstallGemDirect {
    fn name(&self) -> &'static str {
        "install_gem_direct"
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        match params.get_str("gem") {
            Some(gem) if validate_identifier(gem).is_ok() => PreflightResult::ok(),
            Some(gem) => PreflightResult::error(format!("invalid gem name {:?}", gem)),
            None => PreflightResult::error("missing required parameter \"gem\""),
        }
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        let gem = require_str(self.name(), params, "gem")?;
        validate_identifier(gem)?;
        let version = params.get_str("version").unwrap_or(ctx.version.as_str());
        validate_identifier(version)?;
        let executables = validated_executables(params)?;

        let gem_cmd = find_tool("gem", ctx)?;
        let gem_home = ctx.install_dir.join("gems");

        info!("gem install {} -v {}", gem, version);
        toolchain_runner(&gem_cmd, ctx)
            .arg("install")
            .arg(gem)
            .arg("-v")
            .arg(version)
            .arg("--no-document")
            .arg("--install-dir")
            .arg(gem_home.to_string_lossy())
            .arg("--bindir")
            .arg(ctx.install_dir.join("bin").to_string_lossy())
            .env("GEM_HOME", gem_home.to_string_lossy())
            .run()?;

        verify_executables(&ctx.install_dir, "gem install", &executables)
    }
}
