// src/relocate/mod.rs

//! Binary relocation
//!
//! After a build produces executables linked against libraries under the
//! install prefix, their embedded load paths are rewritten so the whole
//! installation can be moved: `$ORIGIN`-relative RPATHs on ELF,
//! `@rpath`/`@loader_path` load commands on Mach-O. Format detection is
//! by magic bytes, never file extension. Unknown formats are skipped
//! silently and relocation warnings never abort an install.

pub(crate) mod elf;
pub(crate) mod macho;

pub use elf::{fix_elf, system_interpreter};
pub use macho::fix_macho;

use crate::error::{Error, Result};
use crate::platform::{Arch, Os, Platform};
use crate::proc::CancelToken;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Executable container format, identified by magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryKind {
    Elf,
    MachO,
    /// Multi-architecture Mach-O (universal binary)
    MachOFat,
    Unknown,
}

/// Identify a file's binary format from its leading magic
pub fn detect(path: &Path) -> Result<BinaryKind> {
    let mut file = File::open(path)
        .map_err(|e| Error::Io(format!("failed to open {}: {}", path.display(), e)))?;
    let mut magic = [0u8; 4];
    let n = file.read(&mut magic)?;
    if n < 4 {
        return Ok(BinaryKind::Unknown);
    }
    Ok(detect_magic(&magic))
}

fn detect_magic(magic: &[u8; 4]) -> BinaryKind {
    match magic {
        [0x7f, b'E', b'L', b'F'] => BinaryKind::Elf,
        // 32/64-bit Mach-O in either byte order
        [0xfe, 0xed, 0xfa, 0xce]
        | [0xfe, 0xed, 0xfa, 0xcf]
        | [0xce, 0xfa, 0xed, 0xfe]
        | [0xcf, 0xfa, 0xed, 0xfe] => BinaryKind::MachO,
        [0xca, 0xfe, 0xba, 0xbe] | [0xbe, 0xba, 0xfe, 0xca] => BinaryKind::MachOFat,
        _ => BinaryKind::Unknown,
    }
}

/// Directories under `install_dir/lib` that contain shared libraries
pub fn shared_lib_dirs(install_dir: &Path) -> Vec<PathBuf> {
    let lib_root = install_dir.join("lib");
    if !lib_root.is_dir() {
        return Vec::new();
    }

    let mut dirs = Vec::new();
    for entry in WalkDir::new(&lib_root).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        let is_shared = name.contains(".so") || name.ends_with(".dylib");
        if is_shared
            && let Some(parent) = entry.path().parent()
            && !dirs.iter().any(|d| d == parent)
        {
            dirs.push(parent.to_path_buf());
        }
    }
    dirs
}

/// Relocate every binary under `install_dir/bin` and the shared library
/// directories themselves
///
/// Files that are not ELF or Mach-O are skipped. Fixup problems from the
/// underlying tools surface as errors; missing optional tools degrade to
/// warnings inside the per-format fixers.
pub fn relocate_install_dir(
    install_dir: &Path,
    platform: Platform,
    cancel: &CancelToken,
) -> Result<()> {
    let lib_dirs = shared_lib_dirs(install_dir);

    let mut targets: Vec<PathBuf> = Vec::new();
    let bin_dir = install_dir.join("bin");
    if bin_dir.is_dir() {
        for entry in WalkDir::new(&bin_dir).into_iter().flatten() {
            if entry.file_type().is_file() {
                targets.push(entry.path().to_path_buf());
            }
        }
    }
    for dir in &lib_dirs {
        for entry in WalkDir::new(dir).max_depth(1).into_iter().flatten() {
            if entry.file_type().is_file() {
                targets.push(entry.path().to_path_buf());
            }
        }
    }

    for target in targets {
        cancel.check()?;
        relocate_file(&target, install_dir, &lib_dirs, platform, cancel)?;
    }
    Ok(())
}

/// Relocate a single file according to its detected format
pub fn relocate_file(
    path: &Path,
    install_dir: &Path,
    lib_dirs: &[PathBuf],
    platform: Platform,
    cancel: &CancelToken,
) -> Result<()> {
    match detect(path)? {
        BinaryKind::Elf => {
            if platform.os == Os::Linux {
                fix_elf(path, lib_dirs, platform.arch, cancel)?;
            }
        }
        BinaryKind::MachO | BinaryKind::MachOFat => {
            if platform.os == Os::Darwin {
                fix_macho(path, install_dir, lib_dirs, platform.arch, cancel)?;
            }
        }
        BinaryKind::Unknown => {
            debug!("skipping {} (not a known binary format)", path.display());
        }
    }
    Ok(())
}

/// The `$ORIGIN`-relative rpath entries for a binary at `binary_dir`
pub fn origin_rpaths(binary_dir: &Path, lib_dirs: &[PathBuf]) -> Vec<String> {
    let mut rpaths = Vec::new();
    for lib_dir in lib_dirs {
        if let Some(rel) = pathdiff::diff_paths(lib_dir, binary_dir) {
            let rel = rel.to_string_lossy();
            if rel.is_empty() || rel == "." {
                rpaths.push("$ORIGIN".to_string());
            } else {
                rpaths.push(format!("$ORIGIN/{}", rel));
            }
        }
    }
    rpaths
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_detect_magic() {
        assert_eq!(detect_magic(&[0x7f, b'E', b'L', b'F']), BinaryKind::Elf);
        assert_eq!(detect_magic(&[0xcf, 0xfa, 0xed, 0xfe]), BinaryKind::MachO);
        assert_eq!(detect_magic(&[0xfe, 0xed, 0xfa, 0xce]), BinaryKind::MachO);
        assert_eq!(detect_magic(&[0xca, 0xfe, 0xba, 0xbe]), BinaryKind::MachOFat);
        assert_eq!(detect_magic(b"#!/b"), BinaryKind::Unknown);
    }

    #[test]
    fn test_detect_short_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny");
        fs::write(&path, b"ab").unwrap();
        assert_eq!(detect(&path).unwrap(), BinaryKind::Unknown);
    }

    #[test]
    fn test_shared_lib_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("lib/engine")).unwrap();
        fs::write(dir.path().join("lib/libz.so.1"), b"x").unwrap();
        fs::write(dir.path().join("lib/engine/libcore.so"), b"x").unwrap();
        fs::write(dir.path().join("lib/README"), b"x").unwrap();

        let dirs = shared_lib_dirs(dir.path());
        assert_eq!(dirs.len(), 2);
        assert!(dirs.contains(&dir.path().join("lib")));
        assert!(dirs.contains(&dir.path().join("lib/engine")));
    }

    #[test]
    fn test_origin_rpaths() {
        let rpaths = origin_rpaths(
            Path::new("/prefix/tools/x-1.0/bin"),
            &[PathBuf::from("/prefix/tools/x-1.0/lib")],
        );
        assert_eq!(rpaths, vec!["$ORIGIN/../lib"]);

        let same = origin_rpaths(
            Path::new("/prefix/tools/x-1.0/lib"),
            &[PathBuf::from("/prefix/tools/x-1.0/lib")],
        );
        assert_eq!(same, vec!["$ORIGIN"]);
    }

    #[test]
    fn test_relocate_skips_unknown_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("bin")).unwrap();
        fs::write(dir.path().join("bin/script"), b"#!/bin/sh\necho hi\n").unwrap();

        relocate_install_dir(
            dir.path(),
            Platform::new(Os::Linux, Arch::Amd64),
            &CancelToken::new(),
        )
        .unwrap();
    }
}
