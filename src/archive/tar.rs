// src/archive/tar.rs

//! Safe streaming tar extraction
//!
//! Decodes gz/xz/bz2 in-process; lzip has no maintained decoder crate, so
//! `tar.lz` pipes through an external `lzip -dc` child first.

use super::{ExtractOptions, check_containment, cleaned_entry_path, entry_mtime};
use crate::error::{Error, Result};
use crate::fsutil::validate_link_target;
use crate::proc::CancelToken;
use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;
use tar::EntryType;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Entries larger than this are skipped with a warning
const MAX_ENTRY_SIZE: u64 = 8 * 1024 * 1024 * 1024;

pub(super) fn extract_tar(
    archive: &Path,
    format: super::ArchiveFormat,
    dest: &Path,
    options: &ExtractOptions,
    cancel: &CancelToken,
) -> Result<()> {
    use super::ArchiveFormat::*;

    let file = File::open(archive)
        .map_err(|e| Error::Io(format!("failed to open {}: {}", archive.display(), e)))?;

    match format {
        TarGz => extract_entries(flate2::read::GzDecoder::new(file), dest, options, cancel),
        TarXz => extract_entries(xz2::read::XzDecoder::new(file), dest, options, cancel),
        TarBz2 => extract_entries(bzip2::read::BzDecoder::new(file), dest, options, cancel),
        Tar => extract_entries(file, dest, options, cancel),
        TarLz => {
            let plain = decompress_lzip(archive, cancel)?;
            let file = File::open(plain.path())
                .map_err(|e| Error::Io(format!("failed to reopen decompressed tar: {}", e)))?;
            extract_entries(file, dest, options, cancel)
        }
        Zip => unreachable!("zip extraction is handled separately"),
    }
}

fn extract_entries<R: Read>(
    reader: R,
    dest: &Path,
    options: &ExtractOptions,
    cancel: &CancelToken,
) -> Result<()> {
    let canonical_dest = dest
        .canonicalize()
        .map_err(|e| Error::Io(format!("failed to resolve {}: {}", dest.display(), e)))?;

    let mut archive = tar::Archive::new(reader);
    // unpack() is deliberately not used: every entry goes through our own
    // containment and link checks below.
    for entry in archive
        .entries()
        .map_err(|e| Error::Io(format!("failed to read tar entries: {}", e)))?
    {
        cancel.check()?;

        let mut entry = entry.map_err(|e| Error::Io(format!("corrupt tar entry: {}", e)))?;
        let raw_path = String::from_utf8_lossy(&entry.path_bytes()).into_owned();

        let Some(rel) = cleaned_entry_path(&raw_path, options.strip_dirs)? else {
            continue;
        };
        let final_path = canonical_dest.join(&rel);

        let header = entry.header();
        let entry_type = header.entry_type();
        let mode = header.mode().unwrap_or(0o644) & 0o777;
        let mtime = header.mtime().unwrap_or(0) as i64;

        match entry_type {
            EntryType::Directory => {
                fs::create_dir_all(&final_path)
                    .map_err(|e| Error::Io(format!("failed to create {}: {}", final_path.display(), e)))?;
                let canonical = final_path.canonicalize().map_err(|e| {
                    Error::Io(format!("failed to resolve {}: {}", final_path.display(), e))
                })?;
                if !canonical.starts_with(&canonical_dest) {
                    return Err(Error::PathEscape(format!(
                        "{} resolves outside the extraction root",
                        final_path.display()
                    )));
                }
                // Keep directories traversable for the remaining entries
                fs::set_permissions(&final_path, fs::Permissions::from_mode(mode | 0o700))?;
            }
            EntryType::Regular | EntryType::Continuous => {
                if entry.size() > MAX_ENTRY_SIZE {
                    warn!("skipping oversized entry {} ({} bytes)", raw_path, entry.size());
                    continue;
                }
                prepare_parent(&canonical_dest, &final_path)?;

                let mut out = File::create(&final_path)
                    .map_err(|e| Error::Io(format!("failed to create {}: {}", final_path.display(), e)))?;
                io::copy(&mut entry, &mut out)
                    .map_err(|e| Error::Io(format!("failed to write {}: {}", final_path.display(), e)))?;
                drop(out);

                fs::set_permissions(&final_path, fs::Permissions::from_mode(mode))?;
                let _ = filetime::set_file_mtime(&final_path, entry_mtime(mtime));
            }
            EntryType::Symlink => {
                let target = link_target(&entry)?;
                let link_dir = rel.parent().unwrap_or(Path::new(""));
                validate_link_target(link_dir, &target)?;
                prepare_parent(&canonical_dest, &final_path)?;
                let _ = fs::remove_file(&final_path);
                std::os::unix::fs::symlink(&target, &final_path).map_err(|e| {
                    Error::Io(format!("failed to create symlink {}: {}", final_path.display(), e))
                })?;
            }
            EntryType::Link => {
                let target = link_target(&entry)?;
                let link_dir = rel.parent().unwrap_or(Path::new(""));
                let resolved = validate_link_target(link_dir, &target)?;
                prepare_parent(&canonical_dest, &final_path)?;
                let source = canonical_dest.join(resolved);
                fs::hard_link(&source, &final_path).map_err(|e| {
                    Error::Io(format!(
                        "failed to hardlink {} -> {}: {}",
                        final_path.display(),
                        source.display(),
                        e
                    ))
                })?;
            }
            other => {
                // Character/block devices, fifos: never materialized
                debug!("skipping tar entry {} of type {:?}", raw_path, other);
            }
        }
    }

    Ok(())
}

fn prepare_parent(canonical_dest: &Path, final_path: &Path) -> Result<()> {
    if let Some(parent) = final_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::Io(format!("failed to create {}: {}", parent.display(), e)))?;
    }
    check_containment(canonical_dest, final_path)
}

fn link_target<R: Read>(entry: &tar::Entry<R>) -> Result<String> {
    let target = entry
        .link_name()
        .map_err(|e| Error::Io(format!("unreadable link target: {}", e)))?
        .ok_or_else(|| Error::Io("link entry without target".to_string()))?;
    Ok(target.to_string_lossy().into_owned())
}

/// Decompress a `.tar.lz` to a plain tar in a temp file via `lzip -dc`
fn decompress_lzip(archive: &Path, cancel: &CancelToken) -> Result<tempfile::NamedTempFile> {
    cancel.check()?;

    let lzip = which::which("lzip")
        .map_err(|_| Error::NotFound("lzip is required to extract tar.lz archives".to_string()))?;

    let out = tempfile::NamedTempFile::new()
        .map_err(|e| Error::Io(format!("failed to create temp file: {}", e)))?;
    let sink = out
        .reopen()
        .map_err(|e| Error::Io(format!("failed to reopen temp file: {}", e)))?;

    debug!("decompressing {} with lzip", archive.display());

    let mut child = Command::new(&lzip)
        .arg("-dc")
        .arg(archive)
        .stdin(Stdio::null())
        .stdout(Stdio::from(sink))
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Io(format!("failed to spawn lzip: {}", e)))?;

    let status = loop {
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Cancelled);
        }
        match child.wait_timeout(Duration::from_millis(100)) {
            Ok(Some(status)) => break status,
            Ok(None) => continue,
            Err(e) => return Err(Error::Io(format!("failed to wait on lzip: {}", e))),
        }
    };

    if !status.success() {
        let mut stderr = String::new();
        if let Some(mut pipe) = child.stderr.take() {
            let _ = pipe.read_to_string(&mut stderr);
        }
        return Err(Error::ProcessFailed {
            command: format!("lzip -dc {}", archive.display()),
            exit_code: status.code(),
            output: stderr,
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::super::{ArchiveFormat, ExtractOptions, extract};
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::path::PathBuf;

    /// Build a tar.gz from (path, mode, contents) triples
    fn make_targz(entries: &[(&str, u32, &[u8])]) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        let gz = GzEncoder::new(file.reopen().unwrap(), Compression::default());
        let mut builder = tar::Builder::new(gz);
        for (path, mode, contents) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(*mode);
            header.set_cksum();
            builder.append_data(&mut header, path, *contents).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
        file
    }

    /// Hand-assemble a tar.gz whose single entry carries a hostile name
    /// (the tar builder itself refuses to write `..` components)
    fn make_hostile_targz(name: &str, contents: &[u8]) -> tempfile::NamedTempFile {
        let mut header = [0u8; 512];
        header[..name.len()].copy_from_slice(name.as_bytes());
        header[100..108].copy_from_slice(b"0000644\0");
        header[108..116].copy_from_slice(b"0000000\0");
        header[116..124].copy_from_slice(b"0000000\0");
        let size = format!("{:011o}\0", contents.len());
        header[124..136].copy_from_slice(size.as_bytes());
        header[136..148].copy_from_slice(b"00000000000\0");
        header[156] = b'0';
        header[257..263].copy_from_slice(b"ustar\0");
        header[263..265].copy_from_slice(b"00");
        header[148..156].fill(b' ');
        let sum: u32 = header.iter().map(|b| u32::from(*b)).sum();
        let checksum = format!("{:06o}\0 ", sum);
        header[148..156].copy_from_slice(checksum.as_bytes());

        let mut raw = header.to_vec();
        raw.extend_from_slice(contents);
        raw.resize(raw.len().div_ceil(512) * 512, 0);
        raw.extend_from_slice(&[0u8; 1024]);

        let file = tempfile::NamedTempFile::new().unwrap();
        let mut gz = GzEncoder::new(file.reopen().unwrap(), Compression::default());
        std::io::Write::write_all(&mut gz, &raw).unwrap();
        gz.finish().unwrap();
        file
    }

    #[test]
    fn test_extract_basic() {
        let archive = make_targz(&[
            ("bin/kubectl", 0o755, b"#!/bin/sh\n" as &[u8]),
            ("README", 0o644, b"docs"),
        ]);
        let dest = tempfile::tempdir().unwrap();
        extract(
            archive.path(),
            ArchiveFormat::TarGz,
            dest.path(),
            &ExtractOptions::default(),
            &CancelToken::new(),
        )
        .unwrap();

        let kubectl = dest.path().join("bin/kubectl");
        assert!(kubectl.is_file());
        let mode = kubectl.metadata().unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
        assert_eq!(fs::read(dest.path().join("README")).unwrap(), b"docs");
    }

    #[test]
    fn test_extract_strip_dirs() {
        let archive = make_targz(&[("jq-1.7.1/bin/jq", 0o755, b"x" as &[u8])]);
        let dest = tempfile::tempdir().unwrap();
        extract(
            archive.path(),
            ArchiveFormat::TarGz,
            dest.path(),
            &ExtractOptions { strip_dirs: 1 },
            &CancelToken::new(),
        )
        .unwrap();
        assert!(dest.path().join("bin/jq").is_file());
        assert!(!dest.path().join("jq-1.7.1").exists());
    }

    #[test]
    fn test_extract_masks_setuid() {
        let archive = make_targz(&[("sudo-ish", 0o4755, b"x" as &[u8])]);
        let dest = tempfile::tempdir().unwrap();
        extract(
            archive.path(),
            ArchiveFormat::TarGz,
            dest.path(),
            &ExtractOptions::default(),
            &CancelToken::new(),
        )
        .unwrap();
        let mode = dest
            .path()
            .join("sudo-ish")
            .metadata()
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o7000, 0, "setuid/setgid must be stripped");
    }

    #[test]
    fn test_extract_rejects_traversal_entry() {
        let archive = make_hostile_targz("../evil", b"x");
        let dest = tempfile::tempdir().unwrap();
        let err = extract(
            archive.path(),
            ArchiveFormat::TarGz,
            dest.path(),
            &ExtractOptions::default(),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::PathEscape(_)));
        assert!(!dest.path().parent().unwrap().join("evil").exists());
    }

    #[test]
    fn test_extract_rejects_absolute_symlink() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let gz = GzEncoder::new(file.reopen().unwrap(), Compression::default());
        let mut builder = tar::Builder::new(gz);
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        header.set_mode(0o777);
        builder
            .append_link(&mut header, "evil-link", "/etc/passwd")
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let dest = tempfile::tempdir().unwrap();
        let err = extract(
            file.path(),
            ArchiveFormat::TarGz,
            dest.path(),
            &ExtractOptions::default(),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::PathEscape(_)));
    }

    #[test]
    fn test_extract_rejects_escaping_relative_symlink() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let gz = GzEncoder::new(file.reopen().unwrap(), Compression::default());
        let mut builder = tar::Builder::new(gz);
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        header.set_mode(0o777);
        builder
            .append_link(&mut header, "up", "../../outside")
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let dest = tempfile::tempdir().unwrap();
        let err = extract(
            file.path(),
            ArchiveFormat::TarGz,
            dest.path(),
            &ExtractOptions::default(),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::PathEscape(_)));
    }

    #[test]
    fn test_extract_allows_inside_symlink() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let gz = GzEncoder::new(file.reopen().unwrap(), Compression::default());
        let mut builder = tar::Builder::new(gz);

        let mut header = tar::Header::new_gnu();
        header.set_size(1);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, "bin/tool-1.2", b"x" as &[u8])
            .unwrap();

        let mut link = tar::Header::new_gnu();
        link.set_entry_type(EntryType::Symlink);
        link.set_size(0);
        link.set_mode(0o777);
        builder.append_link(&mut link, "bin/tool", "tool-1.2").unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let dest = tempfile::tempdir().unwrap();
        extract(
            file.path(),
            ArchiveFormat::TarGz,
            dest.path(),
            &ExtractOptions::default(),
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(
            fs::read_link(dest.path().join("bin/tool")).unwrap(),
            PathBuf::from("tool-1.2")
        );
    }

    #[test]
    fn test_extract_sets_epoch_mtime_without_sde() {
        // The test environment does not define SOURCE_DATE_EPOCH
        if std::env::var_os("SOURCE_DATE_EPOCH").is_some() {
            return;
        }
        let archive = make_targz(&[("file", 0o644, b"x" as &[u8])]);
        let dest = tempfile::tempdir().unwrap();
        extract(
            archive.path(),
            ArchiveFormat::TarGz,
            dest.path(),
            &ExtractOptions::default(),
            &CancelToken::new(),
        )
        .unwrap();
        let mtime = filetime::FileTime::from_last_modification_time(
            &dest.path().join("file").metadata().unwrap(),
        );
        assert_eq!(mtime.unix_seconds(), 0);
    }

    #[test]
    fn test_extract_cancelled() {
        let archive = make_targz(&[("file", 0o644, b"x" as &[u8])]);
        let dest = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = extract(
            archive.path(),
            ArchiveFormat::TarGz,
            dest.path(),
            &ExtractOptions::default(),
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
