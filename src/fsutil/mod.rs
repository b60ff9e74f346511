// src/fsutil/mod.rs

//! Filesystem primitives shared by actions and the executor
//!
//! Copying trees, creating relative symlinks atomically, computing the
//! relative paths embedded in symlinks and rpaths, and the final atomic
//! promotion of a staged install.

pub mod path;

pub use path::{safe_join, sanitize_filename, sanitize_path, validate_link_target};

use crate::error::{Error, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Recursively copy a directory tree
///
/// Symlinks are recreated as symlinks (not followed); file modes are
/// preserved. `exclude` names direct children of `src` to skip.
pub fn copy_dir_all(src: &Path, dst: &Path, exclude: &[&Path]) -> Result<()> {
    fs::create_dir_all(dst)
        .map_err(|e| Error::Io(format!("failed to create {}: {}", dst.display(), e)))?;

    for entry in WalkDir::new(src).min_depth(1).into_iter() {
        let entry = entry.map_err(|e| Error::Io(format!("walk failed under {}: {}", src.display(), e)))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| Error::Io(format!("walk escaped {}", src.display())))?;

        if exclude.iter().any(|ex| rel.starts_with(ex)) {
            continue;
        }

        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .map_err(|e| Error::Io(format!("failed to create {}: {}", target.display(), e)))?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())
                .map_err(|e| Error::Io(format!("failed to read link {}: {}", entry.path().display(), e)))?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            atomic_symlink(&link, &target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target).map_err(|e| {
                Error::Io(format!(
                    "failed to copy {} to {}: {}",
                    entry.path().display(),
                    target.display(),
                    e
                ))
            })?;
        }
    }

    Ok(())
}

/// Create or replace a symlink atomically: link a temp name, then rename
pub fn atomic_symlink(target: &Path, link: &Path) -> Result<()> {
    let parent = link
        .parent()
        .ok_or_else(|| Error::Io(format!("symlink {} has no parent", link.display())))?;
    fs::create_dir_all(parent)?;

    let file_name = link
        .file_name()
        .ok_or_else(|| Error::Io(format!("symlink {} has no file name", link.display())))?;
    let tmp = parent.join(format!(".{}.tmp", file_name.to_string_lossy()));
    let _ = fs::remove_file(&tmp);

    std::os::unix::fs::symlink(target, &tmp)
        .map_err(|e| Error::Io(format!("failed to create symlink {}: {}", tmp.display(), e)))?;
    fs::rename(&tmp, link).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        Error::Io(format!("failed to place symlink {}: {}", link.display(), e))
    })?;
    Ok(())
}

/// Relative path from `from_dir` to `to`, as pure string arithmetic
///
/// Both paths must be absolute or both relative; no filesystem access and
/// no shell involved.
pub fn relative_from(from_dir: &Path, to: &Path) -> Result<PathBuf> {
    pathdiff::diff_paths(to, from_dir).ok_or_else(|| {
        Error::Io(format!(
            "cannot express {} relative to {}",
            to.display(),
            from_dir.display()
        ))
    })
}

/// Atomically promote a staged directory to its final location
///
/// Uses `rename(2)`, which is atomic on a single filesystem. An existing
/// destination from a previous install of the same version is replaced.
pub fn promote(staging: &Path, final_path: &Path) -> Result<()> {
    if let Some(parent) = final_path.parent() {
        fs::create_dir_all(parent)?;
    }

    if final_path.exists() {
        debug!("replacing existing install at {}", final_path.display());
        let name = final_path
            .file_name()
            .ok_or_else(|| Error::Io(format!("{} has no file name", final_path.display())))?;
        let doomed = final_path.with_file_name(format!(".{}.replaced", name.to_string_lossy()));
        let _ = fs::remove_dir_all(&doomed);
        fs::rename(final_path, &doomed)
            .map_err(|e| Error::Io(format!("failed to displace {}: {}", final_path.display(), e)))?;
        let result = fs::rename(staging, final_path);
        match result {
            Ok(()) => {
                let _ = fs::remove_dir_all(&doomed);
            }
            Err(e) => {
                // Put the previous install back before failing
                let _ = fs::rename(&doomed, final_path);
                return Err(Error::Io(format!(
                    "failed to promote {}: {}",
                    final_path.display(),
                    e
                )));
            }
        }
    } else {
        fs::rename(staging, final_path).map_err(|e| {
            Error::Io(format!("failed to promote {}: {}", final_path.display(), e))
        })?;
    }

    Ok(())
}

/// chmod 0755
pub fn set_executable(path: &Path) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .map_err(|e| Error::Io(format!("failed to chmod {}: {}", path.display(), e)))
}

/// Whether the first 8 KiB contain a NUL byte (binary heuristic)
pub fn looks_binary(path: &Path) -> Result<bool> {
    use std::io::Read;
    let mut file = fs::File::open(path)
        .map_err(|e| Error::Io(format!("failed to open {}: {}", path.display(), e)))?;
    let mut buf = [0u8; 8192];
    let n = file.read(&mut buf)?;
    Ok(buf[..n].contains(&0))
}
