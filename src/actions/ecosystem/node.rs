// src/actions/ecosystem/node.rs

//! `npm_install` (package-lock capture) and `npm_exec` (locked `npm ci`)
//!
//! Lifecycle scripts are disabled throughout: a locked dependency tree is
//! worthless if postinstall hooks can run arbitrary code.

use super::{capture_error, find_tool, toolchain_runner, validated_executables, verify_executables};
use crate::actions::{require_str, validate_module_path};
use crate::error::{Error, Result};
use crate::fsutil;
use crate::params::Params;
use crate::plan::eval::EvalContext;
use crate::plan::exec::ExecutionContext;
use crate::recipe::Step;
use crate::registry::{Action, ActionKind, PreflightResult, Registry, composite_not_executable};
use crate::remote::REMOTE_TIMEOUT;
use std::fs;
use tracing::info;

pub fn register(registry: &mut Registry) {
    registry.register(Box::new(NpmInstall));
    registry.register(Box::new(NpmExec));
}

fn package_json(package: &str, version: &str) -> String {
    serde_json::json!({
        "name": "tsuku-install",
        "private": true,
        "dependencies": { package: version }
    })
    .to_string()
}

pub struct NpmInstall;

impl Action for NpmInstall {
    fn name(&self) -> &'static str {
        "npm_install"
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Composite
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn decompose(&self, eval: &EvalContext<'_>, params: &Params) -> Result<Vec<Step>> {
        let package = params.get_str("package").unwrap_or_else(|| eval.recipe.name());
        validate_module_path(package)?;
        crate::actions::validate_identifier(&eval.version)?;

        let npm = which::which("npm")
            .map_err(|_| Error::LockfileCapture("npm is not available for lockfile capture".to_string()))?;

        let capture = tempfile::tempdir()
            .map_err(|e| Error::Io(format!("failed to create capture directory: {}", e)))?;
        fs::write(
            capture.path().join("package.json"),
            package_json(package, &eval.version),
        )?;

        info!("capturing package-lock.json for {}@{}", package, eval.version);
        crate::proc::CommandRunner::new(npm.to_string_lossy(), &eval.cancel)
            .arg("install")
            .arg("--package-lock-only")
            .arg("--ignore-scripts")
            .arg("--no-audit")
            .arg("--no-fund")
            .cwd(capture.path())
            .timeout(REMOTE_TIMEOUT)
            .run()
            .map_err(|e| capture_error("npm install --package-lock-only", e))?;

        let lockfile = fs::read_to_string(capture.path().join("package-lock.json"))
            .map_err(|e| Error::LockfileCapture(format!("unreadable package-lock.json: {}", e)))?;

        let mut exec = Params::new()
            .with("package", package)
            .with("version", eval.version.as_str())
            .with("lockfile", lockfile);
        if let Some(executables) = params.get("executables") {
            exec = exec.with("executables", executables.clone());
        }

        Ok(vec![Step::new("npm_exec", exec)])
    }

    fn execute(&self, _ctx: &mut ExecutionContext<'_>, _params: &Params) -> Result<()> {
        Err(composite_not_executable(self.name()))
    }
}

pub struct NpmExec;

impl Action for NpmExec {
    fn name(&self) -> &'static str {
        "npm_exec"
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        let mut result = PreflightResult::ok();
        for key in ["package", "version", "lockfile"] {
            if params.get_str(key).is_none() {
                result.push_error(format!("missing required parameter {:?}", key));
            }
        }
        if let Some(package) = params.get_str("package")
            && validate_module_path(package).is_err()
        {
            result.push_error(format!("invalid package name {:?}", package));
        }
        result
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        let package = require_str(self.name(), params, "package")?;
        validate_module_path(package)?;
        let version = require_str(self.name(), params, "version")?;
        crate::actions::validate_identifier(version)?;
        let lockfile = require_str(self.name(), params, "lockfile")?;
        let executables = validated_executables(params)?;

        // The dependency tree lives inside the install prefix
        fs::create_dir_all(&ctx.install_dir)?;
        fs::write(
            ctx.install_dir.join("package.json"),
            package_json(package, version),
        )?;
        fs::write(ctx.install_dir.join("package-lock.json"), lockfile)?;

        let npm = find_tool("npm", ctx)?;
        info!("npm ci {}@{}", package, version);
        toolchain_runner(&npm, ctx)
            .arg("ci")
            .arg("--no-audit")
            .arg("--no-fund")
            .arg("--prefer-offline")
            .arg("--ignore-scripts")
            .cwd(&ctx.install_dir)
            .run()?;

        let bin_dir = ctx.install_dir.join("bin");
        for exe in &executables {
            let target = ctx.install_dir.join("node_modules/.bin").join(exe);
            if !target.exists() {
                return Err(Error::ProcessFailed {
                    command: "npm ci".to_string(),
                    exit_code: None,
                    output: format!("package did not provide executable {}", exe),
                });
            }
            let rel = fsutil::relative_from(&bin_dir, &target)?;
            fsutil::atomic_symlink(&rel, &bin_dir.join(exe))?;
        }

        verify_executables(&ctx.install_dir, "npm ci", &executables)
    }
}
