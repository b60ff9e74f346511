// src/actions/ecosystem/go.rs

//! `go_install` (go.sum capture) and `go_build` (pinned module install)

use super::{capture_error, find_tool, toolchain_runner, validated_executables, verify_executables};
use crate::actions::{require_str, validate_module_path};
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
    registry.register(Box::new(GoInstall));
    registry.register(Box::new(GoBuild));
}

const GOPROXY: &str = "https://proxy.golang.org,direct";
const GOSUMDB: &str = "sum.golang.org";

/// The module to install: explicit parameter, else the recipe's
/// `[version] module` override
fn module_for<'a>(eval: &'a EvalContext<'_>, params: &'a Params) -> Result<&'a str> {
    params
        .get_str("module")
        .or_else(|| eval.recipe.module())
        .ok_or_else(|| Error::InvalidParameter {
            action: "go_install".to_string(),
            reason: "missing \"module\" (parameter or [version] block)".to_string(),
        })
}

pub struct GoInstall;

impl Action for GoInstall {
    fn name(&self) -> &'static str {
        "go_install"
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Composite
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn decompose(&self, eval: &EvalContext<'_>, params: &Params) -> Result<Vec<Step>> {
        let module = module_for(eval, params)?;
        validate_module_path(module)?;
        if let Some(subpackage) = params.get_str("subpackage") {
            validate_module_path(subpackage)?;
        }

        let go = which::which("go")
            .map_err(|_| Error::LockfileCapture("go is not available for go.sum capture".to_string()))?;
        let go = go.to_string_lossy().into_owned();

        let capture = tempfile::tempdir()
            .map_err(|e| Error::Io(format!("failed to create capture directory: {}", e)))?;
        fs::write(
            capture.path().join("go.mod"),
            "module tsuku.invalid/capture\n\ngo 1.22\n",
        )?;

        info!("capturing go.sum for {}@{}", module, eval.version_tag);
        crate::proc::CommandRunner::new(&go, &eval.cancel)
            .arg("get")
            .arg(format!("{}@{}", module, eval.version_tag))
            .cwd(capture.path())
            .env("GOPROXY", GOPROXY)
            .env("GOSUMDB", GOSUMDB)
            .env("GOFLAGS", "-mod=mod")
            .timeout(REMOTE_TIMEOUT)
            .run()
            .map_err(|e| capture_error("go get", e))?;

        let gosum = fs::read_to_string(capture.path().join("go.sum"))
            .map_err(|e| Error::LockfileCapture(format!("unreadable go.sum: {}", e)))?;
        let gomod = fs::read_to_string(capture.path().join("go.mod"))
            .map_err(|e| Error::LockfileCapture(format!("unreadable go.mod: {}", e)))?;

        let go_version = crate::proc::CommandRunner::new(&go, &eval.cancel)
            .arg("version")
            .timeout(REMOTE_TIMEOUT)
            .run()
            .map_err(|e| capture_error("go version", e))?
            .combined
            .trim()
            .to_string();

        let mut build = Params::new()
            .with("module", module)
            .with("version", eval.version.as_str())
            .with("gomod", gomod)
            .with("gosum", gosum)
            .with("go_version", go_version);
        if let Some(subpackage) = params.get_str("subpackage") {
            build = build.with("subpackage", subpackage);
        }
        if let Some(executables) = params.get("executables") {
            build = build.with("executables", executables.clone());
        }

        Ok(vec![Step::new("go_build", build)])
    }

    fn execute(&self, _ctx: &mut ExecutionContext<'_>, _params: &Params) -> Result<()> {
        Err(composite_not_executable(self.name()))
    }
}

pub struct GoBuild;

impl Action for GoBuild {
    fn name(&self) -> &'static str {
        "go_build"
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        let mut result = PreflightResult::ok();
        for key in ["module", "version", "gosum"] {
            if params.get_str(key).is_none() {
                result.push_error(format!("missing required parameter {:?}", key));
            }
        }
        if let Some(module) = params.get_str("module")
            && validate_module_path(module).is_err()
        {
            result.push_error(format!("invalid module path {:?}", module));
        }
        result
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        let module = require_str(self.name(), params, "module")?;
        validate_module_path(module)?;
        crate::actions::validate_identifier(require_str(self.name(), params, "version")?)?;
        let gosum = require_str(self.name(), params, "gosum")?;
        let executables = validated_executables(params)?;

        let subpackage = match params.get_str("subpackage") {
            Some(sub) => {
                validate_module_path(sub)?;
                format!("{}/{}", module, sub)
            }
            None => module.to_string(),
        };

        // Stage the captured module state so the sum database cannot
        // silently drift from what was planned
        let build_dir = ctx.work_dir.join(".go-build");
        fs::create_dir_all(&build_dir)?;
        let gomod = params
            .get_str("gomod")
            .map(str::to_string)
            .unwrap_or_else(|| "module tsuku.invalid/capture\n\ngo 1.22\n".to_string());
        fs::write(build_dir.join("go.mod"), gomod)?;
        fs::write(build_dir.join("go.sum"), gosum)?;

        let go = find_tool("go", ctx)?;
        let gobin = ctx.install_dir.join("bin");
        fs::create_dir_all(&gobin)?;

        info!("go install {}@{}", subpackage, ctx.version_tag);
        toolchain_runner(&go, ctx)
            .arg("install")
            .arg(format!("{}@{}", subpackage, ctx.version_tag))
            .cwd(&build_dir)
            .env("GOBIN", gobin.to_string_lossy())
            .env("GOMODCACHE", ctx.gomodcache_dir().to_string_lossy())
            .env("CGO_ENABLED", "0")
            .env("GOPROXY", GOPROXY)
            .env("GOSUMDB", GOSUMDB)
            .env("GOFLAGS", "-mod=mod")
            .run()?;

        verify_executables(&ctx.install_dir, "go install", &executables)
    }
}
