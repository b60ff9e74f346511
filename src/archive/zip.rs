// src/archive/zip.rs

//! Safe zip extraction
//!
//! Applies the same containment, link, and mode rules as the tar path.
//! Symlinks are stored in zip as regular entries whose unix mode carries
//! S_IFLNK and whose contents are the target.

use super::{ExtractOptions, check_containment, cleaned_entry_path, entry_mtime};
use crate::error::{Error, Result};
use crate::fsutil::validate_link_target;
use crate::proc::CancelToken;
use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::debug;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

pub(super) fn extract_zip(
    archive: &Path,
    dest: &Path,
    options: &ExtractOptions,
    cancel: &CancelToken,
) -> Result<()> {
    let canonical_dest = dest
        .canonicalize()
        .map_err(|e| Error::Io(format!("failed to resolve {}: {}", dest.display(), e)))?;

    let file = File::open(archive)
        .map_err(|e| Error::Io(format!("failed to open {}: {}", archive.display(), e)))?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| Error::Io(format!("failed to read zip {}: {}", archive.display(), e)))?;

    for index in 0..zip.len() {
        cancel.check()?;

        let mut entry = zip
            .by_index(index)
            .map_err(|e| Error::Io(format!("corrupt zip entry {}: {}", index, e)))?;
        let raw_name = entry.name().to_string();

        let Some(rel) = cleaned_entry_path(&raw_name, options.strip_dirs)? else {
            continue;
        };
        let final_path = canonical_dest.join(&rel);

        let unix_mode = entry.unix_mode().unwrap_or(0o644);
        let mode = unix_mode & 0o777;
        let mtime = entry
            .last_modified()
            .map(|dt| datetime_to_unix(&dt))
            .unwrap_or(0);

        if entry.is_dir() {
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
            fs::set_permissions(&final_path, fs::Permissions::from_mode(mode | 0o700))?;
            continue;
        }

        if unix_mode & S_IFMT == S_IFLNK {
            let mut target = String::new();
            entry
                .read_to_string(&mut target)
                .map_err(|e| Error::Io(format!("unreadable symlink entry {}: {}", raw_name, e)))?;
            let link_dir = rel.parent().unwrap_or(Path::new(""));
            validate_link_target(link_dir, &target)?;

            if let Some(parent) = final_path.parent() {
                fs::create_dir_all(parent)?;
            }
            check_containment(&canonical_dest, &final_path)?;
            let _ = fs::remove_file(&final_path);
            std::os::unix::fs::symlink(&target, &final_path).map_err(|e| {
                Error::Io(format!("failed to create symlink {}: {}", final_path.display(), e))
            })?;
            continue;
        }

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }
        check_containment(&canonical_dest, &final_path)?;

        let mut out = File::create(&final_path)
            .map_err(|e| Error::Io(format!("failed to create {}: {}", final_path.display(), e)))?;
        io::copy(&mut entry, &mut out)
            .map_err(|e| Error::Io(format!("failed to write {}: {}", final_path.display(), e)))?;
        drop(out);

        fs::set_permissions(&final_path, fs::Permissions::from_mode(mode))?;
        let _ = filetime::set_file_mtime(&final_path, entry_mtime(mtime));

        debug!("extracted {}", rel.display());
    }

    Ok(())
}

/// MS-DOS zip datetime fields to a unix timestamp (UTC, civil calendar)
fn datetime_to_unix(dt: &zip::DateTime) -> i64 {
    let days = days_from_civil(dt.year() as i64, dt.month() as i64, dt.day() as i64);
    days * 86_400 + dt.hour() as i64 * 3_600 + dt.minute() as i64 * 60 + dt.second() as i64
}

/// Days since 1970-01-01 for a proleptic Gregorian date
fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (month + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

#[cfg(test)]
mod tests {
    use super::super::{ArchiveFormat, ExtractOptions, extract};
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn make_zip(entries: &[(&str, u32, &[u8])]) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut writer = zip::ZipWriter::new(file.reopen().unwrap());
        for (name, mode, contents) in entries {
            let options = SimpleFileOptions::default().unix_permissions(*mode);
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents).unwrap();
        }
        writer.finish().unwrap();
        file
    }

    #[test]
    fn test_extract_zip_basic() {
        let archive = make_zip(&[
            ("terraform", 0o755, b"binary" as &[u8]),
            ("LICENSE.txt", 0o644, b"text"),
        ]);
        let dest = tempfile::tempdir().unwrap();
        extract(
            archive.path(),
            ArchiveFormat::Zip,
            dest.path(),
            &ExtractOptions::default(),
            &CancelToken::new(),
        )
        .unwrap();

        let bin = dest.path().join("terraform");
        assert!(bin.is_file());
        assert_eq!(bin.metadata().unwrap().permissions().mode() & 0o777, 0o755);
    }

    #[test]
    fn test_extract_zip_strip_dirs() {
        let archive = make_zip(&[("pkg-2.0/bin/tool", 0o755, b"x" as &[u8])]);
        let dest = tempfile::tempdir().unwrap();
        extract(
            archive.path(),
            ArchiveFormat::Zip,
            dest.path(),
            &ExtractOptions { strip_dirs: 1 },
            &CancelToken::new(),
        )
        .unwrap();
        assert!(dest.path().join("bin/tool").is_file());
    }

    #[test]
    fn test_extract_zip_rejects_traversal() {
        let archive = make_zip(&[("../evil", 0o644, b"x" as &[u8])]);
        let dest = tempfile::tempdir().unwrap();
        let err = extract(
            archive.path(),
            ArchiveFormat::Zip,
            dest.path(),
            &ExtractOptions::default(),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::PathEscape(_)));
    }

    #[test]
    fn test_extract_zip_masks_special_bits() {
        let archive = make_zip(&[("tool", 0o6755, b"x" as &[u8])]);
        let dest = tempfile::tempdir().unwrap();
        extract(
            archive.path(),
            ArchiveFormat::Zip,
            dest.path(),
            &ExtractOptions::default(),
            &CancelToken::new(),
        )
        .unwrap();
        let mode = dest.path().join("tool").metadata().unwrap().permissions().mode();
        assert_eq!(mode & 0o7000, 0);
    }

    #[test]
    fn test_days_from_civil() {
        assert_eq!(days_from_civil(1970, 1, 1), 0);
        assert_eq!(days_from_civil(1970, 1, 2), 1);
        assert_eq!(days_from_civil(2000, 3, 1), 11017);
    }
}
