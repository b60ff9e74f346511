// src/actions/ecosystem/buildenv.rs

//! `setup_build_env`: make a C toolchain available to later steps
//!
//! On hosts without cc/gcc/clang, writes wrapper scripts delegating to
//! zig and prepends their directory to the context's exec paths, so
//! subsequent build steps pick them up through the ordinary PATH
//! resolution.

use crate::error::Result;
use crate::params::Params;
use crate::plan::exec::ExecutionContext;
use crate::registry::{Action, Registry};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use tracing::{debug, info, warn};

pub fn register(registry: &mut Registry) {
    registry.register(Box::new(SetupBuildEnv));
}

const SHIMS: &[(&str, &str)] = &[
    ("cc", "exec zig cc -fPIC -Wno-date-time \"$@\""),
    ("c++", "exec zig c++ -fPIC -Wno-date-time \"$@\""),
    ("ar", "exec zig ar \"$@\""),
    ("ranlib", "exec zig ranlib \"$@\""),
    ("ld", "exec zig ld.lld \"$@\""),
];

pub struct SetupBuildEnv;

impl Action for SetupBuildEnv {
    fn name(&self) -> &'static str {
        "setup_build_env"
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, _params: &Params) -> Result<()> {
        let has_cc = ["cc", "gcc", "clang"]
            .iter()
            .any(|tool| which::which(tool).is_ok());
        if has_cc {
            debug!("system C compiler present, no shims needed");
            return Ok(());
        }
        if which::which("zig").is_err() {
            warn!("no C compiler and no zig; native builds will likely fail");
            return Ok(());
        }

        let shim_dir = ctx.work_dir.join(".toolchain");
        fs::create_dir_all(&shim_dir)?;
        for (name, body) in SHIMS {
            let path = shim_dir.join(name);
            fs::write(&path, format!("#!/bin/sh\n{}\n", body))?;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        }

        info!("zig toolchain shims available in {}", shim_dir.display());
        ctx.exec_paths.insert(0, shim_dir);
        Ok(())
    }
}
