// src/actions/ecosystem/mod.rs

//! Ecosystem primitives and their planning composites
//!
//! Every primitive here drives an external toolchain and shares one
//! contract: it receives a lockfile captured at plan time, rejects
//! command-injection characters in names/versions/executables before any
//! child process is spawned, scrubs unrelated toolchain variables from
//! the environment, sets SOURCE_DATE_EPOCH, runs under the pre-resolved
//! dependency PATH, and verifies afterward that every declared executable
//! exists under `install_dir/bin`.

mod buildenv;
mod cargo;
mod cbuild;
mod go;
mod nix;
mod node;
mod perl;
mod python;
mod ruby;

use crate::error::{Error, Result};
use crate::params::Params;
use crate::plan::exec::ExecutionContext;
use crate::proc::CommandRunner;
use crate::registry::Registry;
use std::path::Path;

pub fn register(registry: &mut Registry) {
    cargo::register(registry);
    go::register(registry);
    node::register(registry);
    python::register(registry);
    ruby::register(registry);
    perl::register(registry);
    cbuild::register(registry);
    nix::register(registry);
    buildenv::register(registry);
}

/// Environment prefixes scrubbed before invoking any external toolchain
pub(crate) const SCRUB_PREFIXES: &[&str] = &["GO", "NODE_", "PYTHON", "BUNDLE_"];

/// SOURCE_DATE_EPOCH for reproducible builds: honor an existing value,
/// default to 0
pub(crate) fn source_date_epoch() -> String {
    std::env::var("SOURCE_DATE_EPOCH").unwrap_or_else(|_| "0".to_string())
}

/// A command runner with the shared ecosystem contract applied
pub(crate) fn toolchain_runner(program: &str, ctx: &ExecutionContext<'_>) -> CommandRunner {
    CommandRunner::new(program, &ctx.cancel)
        .scrub_env(SCRUB_PREFIXES)
        .with_paths(&ctx.exec_paths)
        .env("SOURCE_DATE_EPOCH", source_date_epoch())
}

/// Locate a toolchain binary on the pre-resolved PATH, then the system
pub(crate) fn find_tool(name: &str, ctx: &ExecutionContext<'_>) -> Result<String> {
    for dir in &ctx.exec_paths {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Ok(candidate.to_string_lossy().into_owned());
        }
    }
    which::which(name)
        .map(|p| p.to_string_lossy().into_owned())
        .map_err(|_| Error::NotFound(format!("required tool {} is not available", name)))
}

/// Validate the declared executables list and return it
pub(crate) fn validated_executables<'p>(params: &'p Params) -> Result<Vec<&'p str>> {
    let executables = params.get_str_seq("executables");
    for exe in &executables {
        super::validate_identifier(exe)?;
    }
    Ok(executables)
}

/// Post-build check: every declared executable exists under bin/
pub(crate) fn verify_executables(install_dir: &Path, tool: &str, executables: &[&str]) -> Result<()> {
    for exe in executables {
        let path = install_dir.join("bin").join(exe);
        if !path.is_file() {
            return Err(Error::ProcessFailed {
                command: tool.to_string(),
                exit_code: None,
                output: format!("expected executable bin/{} was not produced", exe),
            });
        }
    }
    Ok(())
}

/// Map a lockfile-capture subprocess failure into the right error kind
pub(crate) fn capture_error(what: &str, source: Error) -> Error {
    match source {
        Error::Cancelled => Error::Cancelled,
        Error::ProcessFailed { output, .. } => {
            Error::LockfileCapture(format!("{}: {}", what, output))
        }
        other => Error::LockfileCapture(format!("{}: {}", what, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validated_executables_rejects_injection() {
        for bad in ["rg;id", "rg`id`", "rg$(id)", "../rg", "rg id"] {
            let params: Params =
                toml::from_str(&format!("executables = [{:?}]", bad)).unwrap();
            assert!(validated_executables(&params).is_err(), "{bad:?}");
        }

        let params: Params = toml::from_str(r#"executables = ["rg", "cargo-fmt"]"#).unwrap();
        assert_eq!(validated_executables(&params).unwrap(), vec!["rg", "cargo-fmt"]);
    }

    #[test]
    fn test_verify_executables() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::fs::write(dir.path().join("bin/rg"), b"elf").unwrap();

        assert!(verify_executables(dir.path(), "cargo install", &["rg"]).is_ok());
        let err = verify_executables(dir.path(), "cargo install", &["rg", "missing"]).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_source_date_epoch_defaults_to_zero() {
        if std::env::var_os("SOURCE_DATE_EPOCH").is_none() {
            assert_eq!(source_date_epoch(), "0");
        }
    }
}
