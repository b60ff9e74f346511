// src/actions/ecosystem/cbuild.rs

//! Native build drivers: `cmake_build`, `meson_build`, `configure_make`
//!
//! Arguments come from recipes and are screened against a shell
//! metacharacter denylist before reaching any child process. Each driver
//! finishes by running the binary relocator over the installed prefix so
//! the result is position-independent.

use super::{find_tool, toolchain_runner, verify_executables};
use crate::actions::validate_build_arg;
use crate::error::{Error, Result};
use crate::params::Params;
use crate::plan::exec::ExecutionContext;
use crate::registry::{Action, PreflightResult, Registry};
use crate::relocate;
use std::path::PathBuf;
use tracing::info;

pub fn register(registry: &mut Registry) {
    registry.register(Box::new(CmakeBuild));
    registry.register(Box::new(MesonBuild));
    registry.register(Box::new(ConfigureMake));
}

const MESON_BUILDTYPES: &[&str] = &["release", "debug", "plain", "debugoptimized"];

fn validated_args(action: &str, params: &Params) -> Result<Vec<String>> {
    let mut args = Vec::new();
    for arg in params.get_str_seq("args") {
        validate_build_arg(action, arg)?;
        args.push(arg.to_string());
    }
    Ok(args)
}

fn preflight_args(action: &str, params: &Params) -> PreflightResult {
    match validated_args(action, params) {
        Ok(_) => PreflightResult::ok(),
        Err(e) => PreflightResult::error(e.to_string()),
    }
}

fn source_dir(ctx: &ExecutionContext<'_>, params: &Params) -> Result<PathBuf> {
    match params.get_str("source_dir") {
        Some(dir) => ctx.work_path(dir),
        None => Ok(ctx.work_dir.clone()),
    }
}

pub struct CmakeBuild;

impl Action for CmakeBuild {
    fn name(&self) -> &'static str {
        "cmake_build"
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        preflight_args(self.name(), params)
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        let args = validated_args(self.name(), params)?;
        let source = source_dir(ctx, params)?;
        let build = ctx.work_dir.join(".cmake-build");
        let cmake = find_tool("cmake", ctx)?;

        info!("cmake configure in {}", source.display());
        toolchain_runner(&cmake, ctx)
            .arg("-S")
            .arg(source.to_string_lossy())
            .arg("-B")
            .arg(build.to_string_lossy())
            .arg(format!(
                "-DCMAKE_INSTALL_PREFIX={}",
                ctx.install_dir.display()
            ))
            .arg("-DCMAKE_BUILD_TYPE=Release")
            .args(args)
            .run()?;

        toolchain_runner(&cmake, ctx)
            .arg("--build")
            .arg(build.to_string_lossy())
            .arg("--parallel")
            .run()?;

        toolchain_runner(&cmake, ctx)
            .arg("--install")
            .arg(build.to_string_lossy())
            .run()?;

        relocate::relocate_install_dir(&ctx.install_dir, ctx.platform, &ctx.cancel)?;
        verify_executables(
            &ctx.install_dir,
            "cmake --install",
            &params.get_str_seq("executables"),
        )
    }
}

pub struct MesonBuild;

impl Action for MesonBuild {
    fn name(&self) -> &'static str {
        "meson_build"
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        let mut result = preflight_args(self.name(), params);
        if let Some(buildtype) = params.get_str("buildtype")
            && !MESON_BUILDTYPES.contains(&buildtype)
        {
            result.push_error(format!(
                "buildtype {:?} is not one of {:?}",
                buildtype, MESON_BUILDTYPES
            ));
        }
        result
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        let args = validated_args(self.name(), params)?;
        let buildtype = params.get_str("buildtype").unwrap_or("release");
        if !MESON_BUILDTYPES.contains(&buildtype) {
            return Err(Error::InvalidParameter {
                action: self.name().to_string(),
                reason: format!("buildtype {:?} is not allowed", buildtype),
            });
        }

        let source = source_dir(ctx, params)?;
        let build = ctx.work_dir.join(".meson-build");
        let meson = find_tool("meson", ctx)?;

        info!("meson setup in {}", source.display());
        toolchain_runner(&meson, ctx)
            .arg("setup")
            .arg(build.to_string_lossy())
            .arg(source.to_string_lossy())
            .arg(format!("--prefix={}", ctx.install_dir.display()))
            .arg(format!("--buildtype={}", buildtype))
            .args(args)
            .run()?;

        toolchain_runner(&meson, ctx)
            .arg("compile")
            .arg("-C")
            .arg(build.to_string_lossy())
            .run()?;

        toolchain_runner(&meson, ctx)
            .arg("install")
            .arg("-C")
            .arg(build.to_string_lossy())
            .run()?;

        relocate::relocate_install_dir(&ctx.install_dir, ctx.platform, &ctx.cancel)?;
        verify_executables(
            &ctx.install_dir,
            "meson install",
            &params.get_str_seq("executables"),
        )
    }
}

pub struct ConfigureMake;

impl Action for ConfigureMake {
    fn name(&self) -> &'static str {
        "configure_make"
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        preflight_args(self.name(), params)
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        let args = validated_args(self.name(), params)?;
        let source = source_dir(ctx, params)?;
        let configure = source.join("configure");
        if !configure.is_file() {
            return Err(Error::NotFound(format!(
                "no configure script in {}",
                source.display()
            )));
        }

        info!("./configure --prefix={}", ctx.install_dir.display());
        toolchain_runner(&configure.to_string_lossy(), ctx)
            .arg(format!("--prefix={}", ctx.install_dir.display()))
            .args(args)
            .cwd(&source)
            .run()?;

        let make = find_tool("make", ctx)?;
        toolchain_runner(&make, ctx).cwd(&source).run()?;
        toolchain_runner(&make, ctx)
            .arg("install")
            .cwd(&source)
            .run()?;

        relocate::relocate_install_dir(&ctx.install_dir, ctx.platform, &ctx.cancel)?;
        verify_executables(
            &ctx.install_dir,
            "make install",
            &params.get_str_seq("executables"),
        )
    }
}
