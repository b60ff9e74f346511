// src/relocate/macho.rs

//! Mach-O load command fixup via install_name_tool
//!
//! Load commands pointing into the install prefix are rewritten to
//! `@rpath/<basename>`, an `@loader_path`-relative rpath is added, dylibs
//! get their id rewritten, and on arm64 the binary is re-signed ad hoc
//! (the kernel refuses to run arm64 binaries whose signature no longer
//! matches after load-command edits).

use crate::error::{Error, Result};
use crate::platform::Arch;
use crate::proc::{CancelToken, CommandRunner};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Rewrite a Mach-O binary's load commands and rpaths in place
pub fn fix_macho(
    path: &Path,
    install_dir: &Path,
    lib_dirs: &[PathBuf],
    arch: Arch,
    cancel: &CancelToken,
) -> Result<()> {
    let Ok(tool) = which::which("install_name_tool") else {
        warn!(
            "install_name_tool not found; skipping Mach-O relocation of {}",
            path.display()
        );
        return Ok(());
    };
    let tool = tool.to_string_lossy().into_owned();

    // Rewrite load commands that point inside the install prefix
    for load_path in list_load_commands(path, cancel)? {
        if !Path::new(&load_path).starts_with(install_dir) {
            continue;
        }
        let basename = Path::new(&load_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| load_path.clone());
        let replacement = format!("@rpath/{}", basename);
        debug!(
            "rewriting load command {} -> {} in {}",
            load_path,
            replacement,
            path.display()
        );
        CommandRunner::new(&tool, cancel)
            .arg("-change")
            .arg(&load_path)
            .arg(&replacement)
            .arg(path.to_string_lossy())
            .run()
            .map_err(|e| relocation_error(path, e))?;
    }

    // Add @loader_path rpaths for each library directory
    let binary_dir = path.parent().ok_or_else(|| Error::Relocation {
        path: path.to_path_buf(),
        reason: "binary has no parent directory".to_string(),
    })?;
    for lib_dir in lib_dirs {
        let rpath = match pathdiff::diff_paths(lib_dir, binary_dir) {
            Some(rel) if rel.as_os_str().is_empty() => "@loader_path".to_string(),
            Some(rel) => format!("@loader_path/{}", rel.to_string_lossy()),
            None => continue,
        };
        add_rpath(&tool, path, &rpath, cancel)?;
    }

    // Dylibs advertise themselves relative to the consumer's rpath
    if path.extension().is_some_and(|e| e == "dylib")
        && let Some(basename) = path.file_name()
    {
        CommandRunner::new(&tool, cancel)
            .arg("-id")
            .arg(format!("@rpath/{}", basename.to_string_lossy()))
            .arg(path.to_string_lossy())
            .run()
            .map_err(|e| relocation_error(path, e))?;
    }

    if arch == Arch::Arm64 {
        resign_adhoc(path, cancel)?;
    }

    Ok(())
}

/// Parse `otool -L` output into load command paths
pub fn list_load_commands(path: &Path, cancel: &CancelToken) -> Result<Vec<String>> {
    let Ok(otool) = which::which("otool") else {
        warn!("otool not found; cannot inspect {}", path.display());
        return Ok(Vec::new());
    };

    let output = CommandRunner::new(otool.to_string_lossy(), cancel)
        .arg("-L")
        .arg(path.to_string_lossy())
        .run()
        .map_err(|e| relocation_error(path, e))?;

    Ok(parse_otool_output(&output.combined))
}

/// Extract load paths from `otool -L` text
///
/// The first line names the inspected file; each following line is
/// `\t<path> (compatibility version ..., current version ...)`.
fn parse_otool_output(text: &str) -> Vec<String> {
    let mut paths = Vec::new();
    for line in text.lines().skip(1) {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || !line.starts_with(['\t', ' ']) {
            continue;
        }
        let path = trimmed
            .split_once(" (")
            .map(|(p, _)| p)
            .unwrap_or(trimmed)
            .trim();
        if !path.is_empty() {
            paths.push(path.to_string());
        }
    }
    paths
}

/// `install_name_tool -add_rpath`, tolerating duplicates
pub(crate) fn add_rpath(tool: &str, path: &Path, rpath: &str, cancel: &CancelToken) -> Result<()> {
    let output = CommandRunner::new(tool, cancel)
        .arg("-add_rpath")
        .arg(rpath)
        .arg(path.to_string_lossy())
        .run_unchecked()?;

    if output.success() {
        return Ok(());
    }
    if output.combined.contains("would duplicate") {
        debug!("rpath {} already present in {}", rpath, path.display());
        return Ok(());
    }
    Err(Error::Relocation {
        path: path.to_path_buf(),
        reason: format!("add_rpath {} failed: {}", rpath, output.tail(4096)),
    })
}

/// Ad-hoc re-sign after load-command surgery
pub(crate) fn resign_adhoc(path: &Path, cancel: &CancelToken) -> Result<()> {
    let Ok(codesign) = which::which("codesign") else {
        warn!("codesign not found; {} may fail to launch", path.display());
        return Ok(());
    };

    CommandRunner::new(codesign.to_string_lossy(), cancel)
        .arg("-f")
        .arg("-s")
        .arg("-")
        .arg(path.to_string_lossy())
        .run()
        .map_err(|e| relocation_error(path, e))?;
    Ok(())
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
