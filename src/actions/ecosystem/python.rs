// src/actions/ecosystem/python.rs

//! Python installs: `pipx_install` (resolution capture), `pip_exec`
//! (locked venv install), `pip_install` (direct prefix install)

use super::{capture_error, find_tool, toolchain_runner, validated_executables, verify_executables};
use crate::actions::{require_str, validate_identifier};
use crate::error::{Error, Result};
use crate::fsutil;
use crate::params::Params;
use crate::plan::eval::EvalContext;
use crate::plan::exec::ExecutionContext;
use crate::recipe::Step;
use crate::registry::{Action, ActionKind, PreflightResult, Registry, composite_not_executable};
use crate::remote::REMOTE_TIMEOUT;
use serde::Deserialize;
use std::fs;
use tracing::info;

pub fn register(registry: &mut Registry) {
    registry.register(Box::new(PipxInstall));
    registry.register(Box::new(PipExec));
    registry.register(Box::new(PipInstall));
}

#[derive(Deserialize)]
struct PipReport {
    #[serde(default)]
    install: Vec<PipReportItem>,
}

#[derive(Deserialize)]
struct PipReportItem {
    metadata: PipMetadata,
}

#[derive(Deserialize)]
struct PipMetadata {
    name: String,
    version: String,
}

/// Plan-time composite: resolve the full dependency set for
/// `package==version` and pin it as requirements lines
pub struct PipxInstall;

impl Action for PipxInstall {
    fn name(&self) -> &'static str {
        "pipx_install"
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Composite
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn decompose(&self, eval: &EvalContext<'_>, params: &Params) -> Result<Vec<Step>> {
        let package = params.get_str("package").unwrap_or_else(|| eval.recipe.name());
        validate_identifier(package)?;
        validate_identifier(&eval.version)?;

        let python = which::which("python3")
            .map_err(|_| Error::LockfileCapture("python3 is not available for resolution capture".to_string()))?;

        let capture = tempfile::tempdir()
            .map_err(|e| Error::Io(format!("failed to create capture directory: {}", e)))?;
        let report_path = capture.path().join("report.json");

        info!("resolving {}=={}", package, eval.version);
        crate::proc::CommandRunner::new(python.to_string_lossy(), &eval.cancel)
            .arg("-m")
            .arg("pip")
            .arg("install")
            .arg("--quiet")
            .arg("--dry-run")
            .arg("--ignore-installed")
            .arg("--report")
            .arg(report_path.to_string_lossy())
            .arg(format!("{}=={}", package, eval.version))
            .timeout(REMOTE_TIMEOUT)
            .run()
            .map_err(|e| capture_error("pip install --dry-run --report", e))?;

        let raw = fs::read_to_string(&report_path)
            .map_err(|e| Error::LockfileCapture(format!("unreadable pip report: {}", e)))?;
        let report: PipReport = serde_json::from_str(&raw)
            .map_err(|e| Error::LockfileCapture(format!("invalid pip report: {}", e)))?;

        let mut lines: Vec<String> = report
            .install
            .iter()
            .map(|item| format!("{}=={}", item.metadata.name, item.metadata.version))
            .collect();
        lines.sort();
        let requirements = lines.join("\n") + "\n";

        let mut exec = Params::new()
            .with("package", package)
            .with("version", eval.version.as_str())
            .with("requirements", requirements);
        if let Some(executables) = params.get("executables") {
            exec = exec.with("executables", executables.clone());
        }

        Ok(vec![Step::new("pip_exec", exec)])
    }

    fn execute(&self, _ctx: &mut ExecutionContext<'_>, _params: &Params) -> Result<()> {
        Err(composite_not_executable(self.name()))
    }
}

/// Locked install into a venv under the install prefix, pipx style
pub struct PipExec;

impl Action for PipExec {
    fn name(&self) -> &'static str {
        "pip_exec"
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        let mut result = PreflightResult::ok();
        for key in ["package", "version", "requirements"] {
            if params.get_str(key).is_none() {
                result.push_error(format!("missing required parameter {:?}", key));
            }
        }
        if let Some(package) = params.get_str("package")
            && validate_identifier(package).is_err()
        {
            result.push_error(format!("invalid package name {:?}", package));
        }
        result
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        let package = require_str(self.name(), params, "package")?;
        validate_identifier(package)?;
        let version = require_str(self.name(), params, "version")?;
        validate_identifier(version)?;
        let requirements = require_str(self.name(), params, "requirements")?;
        let executables = validated_executables(params)?;

        let python = find_tool("python3", ctx)?;
        let venv = ctx.install_dir.join("venv");

        info!("creating venv for {}=={}", package, version);
        toolchain_runner(&python, ctx)
            .arg("-m")
            .arg("venv")
            .arg(venv.to_string_lossy())
            .run()?;

        let requirements_path = ctx.work_dir.join("requirements.txt");
        fs::write(&requirements_path, requirements)?;

        let pip = venv.join("bin/pip");
        toolchain_runner(&pip.to_string_lossy(), ctx)
            .arg("install")
            .arg("--no-deps")
            .arg("--requirement")
            .arg(requirements_path.to_string_lossy())
            .run()?;

        let bin_dir = ctx.install_dir.join("bin");
        for exe in &executables {
            let target = venv.join("bin").join(exe);
            if !target.is_file() {
                return Err(Error::ProcessFailed {
                    command: "pip install".to_string(),
                    exit_code: None,
                    output: format!("package did not provide executable {}", exe),
                });
            }
            let rel = fsutil::relative_from(&bin_dir, &target)?;
            fsutil::atomic_symlink(&rel, &bin_dir.join(exe))?;
        }

        verify_executables(&ctx.install_dir, "pip install", &executables)
    }
}

/// Direct `pip install --prefix` without a venv, for tools that are happy
/// with an isolated prefix
pub struct PipInstall;

impl Action for PipInstall {
    fn name(&self) -> &'static str {
        "pip_install"
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        let mut result = PreflightResult::ok();
        match params.get_str("package") {
            None => result.push_error("missing required parameter \"package\""),
            Some(package) => {
                if validate_identifier(package).is_err() {
                    result.push_error(format!("invalid package name {:?}", package));
                }
            }
        }
        result
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        let package = require_str(self.name(), params, "package")?;
        validate_identifier(package)?;
        let version = params.get_str("version").unwrap_or(ctx.version.as_str());
        validate_identifier(version)?;
        let executables = validated_executables(params)?;

        let python = find_tool("python3", ctx)?;
        info!("pip install {}=={}", package, version);
        toolchain_runner(&python, ctx)
            .arg("-m")
            .arg("pip")
            .arg("install")
            .arg("--prefix")
            .arg(ctx.install_dir.to_string_lossy())
            .arg("--no-warn-script-location")
            .arg(format!("{}=={}", package, version))
            .run()?;

        verify_executables(&ctx.install_dir, "pip install", &executables)
    }
}
