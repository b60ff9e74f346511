// src/fsutil/path.rs

//! Path sanitization for untrusted inputs
//!
//! Archive entries, recipe output declarations, and symlink targets all
//! originate outside the engine. These helpers reduce them to clean
//! relative paths or reject them, so nothing the engine writes can land
//! outside its containment directory.

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Reduce an untrusted path to a clean relative path
///
/// Leading slashes are stripped, `.` components are dropped, and any `..`
/// component is rejected outright. Empty results are errors.
pub fn sanitize_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let raw = path.as_ref().to_string_lossy();
    let relative = raw.trim_start_matches('/');

    let mut clean = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(c) => clean.push(c),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::PathEscape(raw.to_string()));
            }
            // Leading slashes were already stripped; prefixes cannot occur
            // in the unix paths archives carry.
            Component::Prefix(_) | Component::RootDir => {}
        }
    }

    if clean.as_os_str().is_empty() {
        return Err(Error::PathEscape(format!(
            "empty path after cleaning: {:?}",
            raw
        )));
    }

    Ok(clean)
}

/// Join an untrusted path onto a containment root
///
/// Sanitizes first, then double-checks against the canonicalized root when
/// the joined path already exists on disk.
pub fn safe_join(root: impl AsRef<Path>, path: impl AsRef<Path>) -> Result<PathBuf> {
    let root = root.as_ref();
    let joined = root.join(sanitize_path(path)?);

    if let (Ok(canonical_root), Ok(canonical_joined)) = (root.canonicalize(), joined.canonicalize())
        && !canonical_joined.starts_with(&canonical_root)
    {
        return Err(Error::PathEscape(format!(
            "{} escapes {}",
            joined.display(),
            root.display()
        )));
    }

    Ok(joined)
}

/// Validate a single filename: no separators, no traversal, non-empty
pub fn sanitize_filename(name: &str) -> Result<&str> {
    if name.contains('/') || name.contains('\\') {
        return Err(Error::PathEscape(format!(
            "filename contains separator: {}",
            name
        )));
    }
    if name.is_empty() || name == "." || name == ".." {
        return Err(Error::PathEscape(format!("invalid filename: {:?}", name)));
    }
    Ok(name)
}

/// Check a symlink or hardlink target resolves inside `root`
///
/// `link_dir` is the directory containing the link, relative to `root`.
/// Absolute targets are rejected; relative targets are joined to the
/// link's directory and the result must not climb above the root.
pub fn validate_link_target(root_relative_link_dir: &Path, target: &str) -> Result<PathBuf> {
    if target.starts_with('/') {
        return Err(Error::PathEscape(format!(
            "absolute link target: {}",
            target
        )));
    }

    let mut depth: i64 = root_relative_link_dir.components().count() as i64;
    let mut resolved = root_relative_link_dir.to_path_buf();

    for component in Path::new(target).components() {
        match component {
            Component::Normal(c) => {
                depth += 1;
                resolved.push(c);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return Err(Error::PathEscape(format!(
                        "link target climbs out of the extraction root: {}",
                        target
                    )));
                }
                resolved.pop();
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(Error::PathEscape(format!(
                    "absolute link target: {}",
                    target
                )));
            }
        }
    }

    Ok(resolved)
}
