// src/checksum.rs

//! Checksum values for artifact verification
//!
//! Checksums are canonicalized to lowercase hex with the algorithm carried
//! separately. Input may be bare hex or prefixed (`sha256:...`,
//! `sha512:...`); the prefix is stripped at the boundary and never stored.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

/// Supported hash algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    /// SHA-256, the default for release assets
    #[default]
    Sha256,
    /// SHA-512, used by some upstream checksum files
    Sha512,
}

impl HashAlgorithm {
    /// Hex string length for this algorithm
    #[inline]
    pub const fn hex_len(&self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }

    /// Algorithm name as used in `algo:` prefixes
    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "sha512" | "sha-512" => Ok(Self::Sha512),
            _ => Err(Error::Parse(format!("unknown hash algorithm: {}", s))),
        }
    }
}

/// A checksum value with its algorithm
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum {
    pub algorithm: HashAlgorithm,
    /// Lowercase hex digest
    pub value: String,
}

impl Checksum {
    /// Construct from an algorithm and a hex digest, validating the hex
    pub fn new(algorithm: HashAlgorithm, value: impl Into<String>) -> Result<Self> {
        let value: String = value.into();
        let value = value.to_lowercase();

        if value.len() != algorithm.hex_len() {
            return Err(Error::Parse(format!(
                "invalid {} digest length: expected {}, got {}",
                algorithm,
                algorithm.hex_len(),
                value.len()
            )));
        }
        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::Parse(format!("invalid hex in digest: {}", value)));
        }

        Ok(Self { algorithm, value })
    }

    /// Parse a checksum string, with or without an `algo:` prefix
    ///
    /// Bare hex is interpreted by length: 64 chars is SHA-256, 128 chars
    /// SHA-512.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some((prefix, digest)) = s.split_once(':') {
            let algorithm = prefix.parse()?;
            return Self::new(algorithm, digest);
        }

        match s.len() {
            64 => Self::new(HashAlgorithm::Sha256, s),
            128 => Self::new(HashAlgorithm::Sha512, s),
            n => Err(Error::Parse(format!(
                "cannot infer hash algorithm from {}-char digest",
                n
            ))),
        }
    }

    /// Render with the algorithm prefix, e.g. `sha256:ab12...`
    pub fn tagged(&self) -> String {
        format!("{}:{}", self.algorithm, self.value)
    }

    /// Verify a file on disk against this checksum
    pub fn verify_file(&self, path: &Path) -> Result<()> {
        let actual = hash_file(path, self.algorithm)?;
        if actual.value != self.value {
            return Err(Error::ChecksumMismatch {
                expected: self.value.clone(),
                actual: actual.value,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Hash a byte slice
pub fn hash_bytes(data: &[u8], algorithm: HashAlgorithm) -> Checksum {
    let value = match algorithm {
        HashAlgorithm::Sha256 => hex::encode(Sha256::digest(data)),
        HashAlgorithm::Sha512 => hex::encode(Sha512::digest(data)),
    };
    Checksum { algorithm, value }
}

/// Hash a file by streaming its contents
pub fn hash_file(path: &Path, algorithm: HashAlgorithm) -> Result<Checksum> {
    let mut file = File::open(path)
        .map_err(|e| Error::Io(format!("failed to open {} for hashing: {}", path.display(), e)))?;

    let value = match algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            io::copy(&mut file, &mut hasher)
                .map_err(|e| Error::Io(format!("failed to read {}: {}", path.display(), e)))?;
            hex::encode(hasher.finalize())
        }
        HashAlgorithm::Sha512 => {
            let mut hasher = Sha512::new();
            io::copy(&mut file, &mut hasher)
                .map_err(|e| Error::Io(format!("failed to read {}: {}", path.display(), e)))?;
            hex::encode(hasher.finalize())
        }
    };

    Ok(Checksum { algorithm, value })
}

/// A hasher that digests bytes as they stream through a reader
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    bytes: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    /// Finish and return the SHA-256 checksum plus the byte count
    pub fn finish(self) -> (Checksum, u64) {
        let value = hex::encode(self.hasher.finalize());
        (
            Checksum {
                algorithm: HashAlgorithm::Sha256,
                value,
            },
            self.bytes,
        )
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // sha256 of the ASCII bytes "hello"
    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_hash_bytes_sha256() {
        let sum = hash_bytes(b"hello", HashAlgorithm::Sha256);
        assert_eq!(sum.value, HELLO_SHA256);
    }

    #[test]
    fn test_parse_with_prefix() {
        let sum = Checksum::parse(&format!("sha256:{}", HELLO_SHA256)).unwrap();
        assert_eq!(sum.algorithm, HashAlgorithm::Sha256);
        assert_eq!(sum.value, HELLO_SHA256);
    }

    #[test]
    fn test_parse_bare_hex_infers_algorithm() {
        let sum = Checksum::parse(HELLO_SHA256).unwrap();
        assert_eq!(sum.algorithm, HashAlgorithm::Sha256);

        let sha512 = "a".repeat(128);
        let sum = Checksum::parse(&sha512).unwrap();
        assert_eq!(sum.algorithm, HashAlgorithm::Sha512);
    }

    #[test]
    fn test_parse_canonicalizes_case() {
        let sum = Checksum::parse(&HELLO_SHA256.to_uppercase()).unwrap();
        assert_eq!(sum.value, HELLO_SHA256);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Checksum::parse("sha256:xyz").is_err());
        assert!(Checksum::parse("abc123").is_err());
        assert!(Checksum::parse("md5:d41d8cd98f00b204e9800998ecf8427e").is_err());
        assert!(Checksum::parse(&"g".repeat(64)).is_err());
    }

    #[test]
    fn test_verify_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"hello").unwrap();

        let sum = Checksum::parse(HELLO_SHA256).unwrap();
        assert!(sum.verify_file(&path).is_ok());

        std::fs::write(&path, b"hellp").unwrap();
        let err = sum.verify_file(&path).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_hashing_reader() {
        let mut reader = HashingReader::new(&b"hello"[..]);
        let mut out = Vec::new();
        io::Read::read_to_end(&mut reader, &mut out).unwrap();
        let (sum, bytes) = reader.finish();
        assert_eq!(out, b"hello");
        assert_eq!(bytes, 5);
        assert_eq!(sum.value, HELLO_SHA256);
    }
}
