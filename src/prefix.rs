// src/prefix.rs

//! User prefix layout
//!
//! Everything tsuku materializes lives under one per-user root (default
//! `~/.tsuku`, overridable with `TSUKU_HOME`):
//!
//! ```text
//! tools/<name>-<version>/   installed tools (bin/, lib/, env.sh)
//! libs/<name>-<version>/    installed libraries (lib/, include/)
//! downloads/                URL-keyed artifact cache
//! .gomodcache/              shared Go module cache
//! ```

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// The per-user installation root
#[derive(Debug, Clone)]
pub struct Prefix {
    root: PathBuf,
}

impl Prefix {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve from `TSUKU_HOME`, falling back to `~/.tsuku`
    pub fn from_env() -> Result<Self> {
        if let Some(home) = std::env::var_os("TSUKU_HOME") {
            return Ok(Self::new(PathBuf::from(home)));
        }
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Io("cannot determine home directory".to_string()))?;
        Ok(Self::new(home.join(".tsuku")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.root.join("tools")
    }

    pub fn libs_dir(&self) -> PathBuf {
        self.root.join("libs")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join("downloads")
    }

    pub fn gomodcache_dir(&self) -> PathBuf {
        self.root.join(".gomodcache")
    }

    /// Final install location for a tool at a version
    pub fn tool_path(&self, name: &str, version: &str) -> PathBuf {
        self.tools_dir().join(format!("{}-{}", name, version))
    }

    /// Final install location for a library at a version
    pub fn lib_path(&self, name: &str, version: &str) -> PathBuf {
        self.libs_dir().join(format!("{}-{}", name, version))
    }

    /// The bin directory of an installed tool, if present
    pub fn installed_bin_dir(&self, name: &str, version: &str) -> Option<PathBuf> {
        let bin = self.tool_path(name, version).join("bin");
        bin.is_dir().then_some(bin)
    }

    /// All installed versions of a tool, newest directory entries last
    pub fn installed_versions(&self, name: &str) -> Vec<String> {
        let prefix = format!("{}-", name);
        let mut versions = Vec::new();
        let Ok(entries) = std::fs::read_dir(self.tools_dir()) else {
            return versions;
        };
        for entry in entries.flatten() {
            if let Some(stem) = entry.file_name().to_str()
                && let Some(version) = stem.strip_prefix(&prefix)
                && entry.path().is_dir()
            {
                versions.push(version.to_string());
            }
        }
        versions.sort();
        versions
    }
}
