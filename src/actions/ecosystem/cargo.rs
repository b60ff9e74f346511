// src/actions/ecosystem/cargo.rs

//! `cargo_install` (plan-time lockfile capture) and `cargo_build`
//! (locked execution)

use super::{capture_error, find_tool, toolchain_runner, validated_executables, verify_executables};
use crate::actions::{require_str, validate_identifier};
use crate::checksum::{HashAlgorithm, hash_bytes};
use crate::error::{Error, Result};
use crate::params::Params;
use crate::plan::eval::EvalContext;
use crate::plan::exec::ExecutionContext;
use crate::recipe::Step;
use crate::registry::{Action, ActionKind, PreflightResult, Registry, composite_not_executable};
use crate::remote::REMOTE_TIMEOUT;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use tracing::{debug, info};

pub fn register(registry: &mut Registry) {
    registry.register(Box::new(CargoInstall));
    registry.register(Box::new(CargoBuild));
}

/// Plan-time composite: capture a Cargo.lock for `crate = "=version"`
pub struct CargoInstall;

impl Action for CargoInstall {
    fn name(&self) -> &'static str {
        "cargo_install"
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Composite
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn decompose(&self, eval: &EvalContext<'_>, params: &Params) -> Result<Vec<Step>> {
        let crate_name = params.get_str("crate").unwrap_or_else(|| eval.recipe.name());
        validate_identifier(crate_name)?;
        validate_identifier(&eval.version)?;

        let cargo = which::which("cargo")
            .map_err(|_| Error::LockfileCapture("cargo is not available for lockfile capture".to_string()))?;

        let capture = tempfile::tempdir()
            .map_err(|e| Error::Io(format!("failed to create capture directory: {}", e)))?;

        fs::write(
            capture.path().join("Cargo.toml"),
            format!(
                "[package]\nname = \"lockfile-capture\"\nversion = \"0.0.0\"\nedition = \"2021\"\n\n[dependencies]\n{} = \"={}\"\n",
                crate_name, eval.version
            ),
        )?;
        fs::create_dir_all(capture.path().join("src"))?;
        fs::write(capture.path().join("src/main.rs"), "fn main() {}\n")?;

        info!("capturing Cargo.lock for {} {}", crate_name, eval.version);
        crate::proc::CommandRunner::new(cargo.to_string_lossy(), &eval.cancel)
            .arg("generate-lockfile")
            .cwd(capture.path())
            .timeout(REMOTE_TIMEOUT)
            .run()
            .map_err(|e| capture_error("cargo generate-lockfile", e))?;

        let lockfile = fs::read_to_string(capture.path().join("Cargo.lock"))
            .map_err(|e| Error::LockfileCapture(format!("unreadable Cargo.lock: {}", e)))?;
        let lock_checksum = hash_bytes(lockfile.as_bytes(), HashAlgorithm::Sha256);

        let rust_version = crate::proc::CommandRunner::new(cargo.to_string_lossy(), &eval.cancel)
            .arg("--version")
            .timeout(REMOTE_TIMEOUT)
            .run()
            .map_err(|e| capture_error("cargo --version", e))?
            .combined
            .trim()
            .to_string();

        let mut build = Params::new()
            .with("crate", crate_name)
            .with("version", eval.version.as_str())
            .with("lockfile", lockfile)
            .with("lockfile_checksum", lock_checksum.tagged())
            .with("rust_version", rust_version);
        if let Some(executables) = params.get("executables") {
            build = build.with("executables", executables.clone());
        }

        Ok(vec![Step::new("cargo_build", build)])
    }

    fn execute(&self, _ctx: &mut ExecutionContext<'_>, _params: &Params) -> Result<()> {
        Err(composite_not_executable(self.name()))
    }
}

/// Locked `cargo install` into the staging prefix
pub struct CargoBuild;

impl CargoBuild {
    /// Synthesize zig-backed cc/c++/ar/ranlib/ld wrappers when no system
    /// C compiler exists, so crates with C dependencies still build
    fn ensure_c_toolchain(ctx: &ExecutionContext<'_>) -> Result<Option<std::path::PathBuf>> {
        let has_cc = ["cc", "gcc", "clang"]
            .iter()
            .any(|tool| which::which(tool).is_ok());
        if has_cc {
            return Ok(None);
        }
        if which::which("zig").is_err() {
            debug!("no C compiler and no zig; proceeding without shims");
            return Ok(None);
        }

        let shim_dir = ctx.work_dir.join(".zig-toolchain");
        fs::create_dir_all(&shim_dir)?;
        let shims: &[(&str, &str)] = &[
            ("cc", "exec zig cc -fPIC -Wno-date-time \"$@\""),
            ("c++", "exec zig c++ -fPIC -Wno-date-time \"$@\""),
            ("ar", "exec zig ar \"$@\""),
            ("ranlib", "exec zig ranlib \"$@\""),
            ("ld", "exec zig ld.lld \"$@\""),
        ];
        for (name, body) in shims {
            let path = shim_dir.join(name);
            fs::write(&path, format!("#!/bin/sh\n{}\n", body))?;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        }
        info!("synthesized zig C toolchain shims in {}", shim_dir.display());
        Ok(Some(shim_dir))
    }
}

impl Action for CargoBuild {
    fn name(&self) -> &'static str {
        "cargo_build"
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        let mut result = PreflightResult::ok();
        for key in ["crate", "version", "lockfile"] {
            if params.get_str(key).is_none() {
                result.push_error(format!("missing required parameter {:?}", key));
            }
        }
        if let Some(name) = params.get_str("crate")
            && validate_identifier(name).is_err()
        {
            result.push_error(format!("invalid crate name {:?}", name));
        }
        if let Some(version) = params.get_str("version")
            && validate_identifier(version).is_err()
        {
            result.push_error(format!("invalid version {:?}", version));
        }
        result
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        let crate_name = require_str(self.name(), params, "crate")?;
        let version = require_str(self.name(), params, "version")?;
        validate_identifier(crate_name)?;
        validate_identifier(version)?;
        let executables = validated_executables(params)?;

        // Integrity of the captured lockfile carried through the plan
        let lockfile = require_str(self.name(), params, "lockfile")?;
        if let Some(expected) = params.get_str("lockfile_checksum") {
            let actual = hash_bytes(lockfile.as_bytes(), HashAlgorithm::Sha256);
            let expected = crate::checksum::Checksum::parse(expected)?;
            if actual.value != expected.value {
                return Err(Error::ChecksumMismatch {
                    expected: expected.value,
                    actual: actual.value,
                });
            }
        }

        let cargo = find_tool("cargo", ctx)?;
        let mut runner = toolchain_runner(&cargo, ctx)
            .arg("install")
            .arg("--locked")
            .arg("--root")
            .arg(ctx.install_dir.to_string_lossy())
            .arg(format!("{}@{}", crate_name, version))
            .env("CARGO_TERM_COLOR", "never");

        if let Some(shim_dir) = Self::ensure_c_toolchain(ctx)? {
            runner = runner
                .env("CC", shim_dir.join("cc").to_string_lossy())
                .env("CXX", shim_dir.join("c++").to_string_lossy())
                .with_paths(&[shim_dir]);
        }

        info!("cargo install {}@{}", crate_name, version);
        runner.run()?;

        verify_executables(&ctx.install_dir, "cargo install", &executables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preflight_requires_lockfile() {
        let params: Params = toml::from_str(
            r#"
            crate = "ripgrep"
            version = "14.1.0"
            "#,
        )
        .unwrap();
        let pf = CargoBuild.preflight(&params);
        assert!(!pf.is_ok());
        assert!(pf.errors.iter().any(|e| e.contains("lockfile")));
    }

    #[test]
    fn test_preflight_rejects_injection() {
        let params: Params = toml::from_str(
            r#"
            crate = "ripgrep; rm -rf /"
            version = "14.1.0"
            lockfile = "x"
            "#,
        )
        .unwrap();
        assert!(!CargoBuild.preflight(&params).is_ok());
    }
}
