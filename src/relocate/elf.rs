// src/relocate/elf.rs

//! ELF rpath and interpreter fixup via patchelf
//!
//! RPATHs are rewritten to `$ORIGIN`-relative entries pointing at the
//! install's shared library directories. The interpreter is replaced with
//! the platform system loader only when the current one carries a
//! relocation placeholder (as Homebrew bottles do); binaries already
//! pointing at a real loader are left alone.

use super::origin_rpaths;
use crate::error::{Error, Result};
use crate::platform::Arch;
use crate::proc::{CancelToken, CommandRunner};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Marker found in the interpreter of relocatable bottle binaries
const PLACEHOLDER_MARKER: &str = "@@";

/// The system dynamic loader path for an architecture
pub fn system_interpreter(arch: Arch) -> &'static str {
    match arch {
        Arch::Amd64 => "/lib64/ld-linux-x86-64.so.2",
        Arch::Arm64 => "/lib/ld-linux-aarch64.so.1",
    }
}

/// Rewrite an ELF binary's rpath (and placeholder interpreter) in place
pub fn fix_elf(path: &Path, lib_dirs: &[PathBuf], arch: Arch, cancel: &CancelToken) -> Result<()> {
    let Ok(patchelf) = which::which("patchelf") else {
        warn!(
            "patchelf not found; skipping ELF relocation of {}",
            path.display()
        );
        return Ok(());
    };
    let patchelf = patchelf.to_string_lossy().into_owned();

    let binary_dir = path
        .parent()
        .ok_or_else(|| Error::Relocation {
            path: path.to_path_buf(),
            reason: "binary has no parent directory".to_string(),
        })?;
    let rpaths = origin_rpaths(binary_dir, lib_dirs);

    if !rpaths.is_empty() {
        let joined = rpaths.join(":");
        debug!("setting rpath of {} to {}", path.display(), joined);

        CommandRunner::new(&patchelf, cancel)
            .arg("--remove-rpath")
            .arg(path.to_string_lossy())
            .run()
            .map_err(|e| relocation_error(path, e))?;

        CommandRunner::new(&patchelf, cancel)
            .arg("--force-rpath")
            .arg("--set-rpath")
            .arg(&joined)
            .arg(path.to_string_lossy())
            .run()
            .map_err(|e| relocation_error(path, e))?;
    }

    // Interpreter rewrite, only for placeholder loaders
    if let Some(current) = read_interpreter(path)?
        && current.contains(PLACEHOLDER_MARKER)
    {
        let loader = system_interpreter(arch);
        debug!("setting interpreter of {} to {}", path.display(), loader);
        CommandRunner::new(&patchelf, cancel)
            .arg("--set-interpreter")
            .arg(loader)
            .arg(path.to_string_lossy())
            .run()
            .map_err(|e| relocation_error(path, e))?;
    }

    Ok(())
}

/// The PT_INTERP path of an ELF binary, if it has one
///
/// Shared libraries and static executables have none.
pub fn read_interpreter(path: &Path) -> Result<Option<String>> {
    let bytes = std::fs::read(path)
        .map_err(|e| Error::Io(format!("failed to read {}: {}", path.display(), e)))?;
    match goblin::elf::Elf::parse(&bytes) {
        Ok(elf) => Ok(elf.interpreter.map(str::to_string)),
        Err(e) => {
            // Truncated or malformed ELF: not fatal, just unfixable
            debug!("cannot parse {} as ELF: {}", path.display(), e);
            Ok(None)
        }
    }
}

fn relocation_error(path: &Path, source: Error) -> Error {
    match source {
        Error::Cancelled => Error::Cancelled,
        other => Error::Relocation {
            path: path.to_path_buf(),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_interpreter() {
        assert_eq!(system_interpreter(Arch::Amd64), "/lib64/ld-linux-x86-64.so.2");
        assert_eq!(system_interpreter(Arch::Arm64), "/lib/ld-linux-aarch64.so.1");
    }

    #[test]
    fn test_read_interpreter_non_elf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script");
        std::fs::write(&path, b"#!/bin/sh\n").unwrap();
        assert_eq!(read_interpreter(&path).unwrap(), None);
    }
}
