// src/error.rs

//! Central error type for the recipe engine
//!
//! Every component reports through this enum so the executor can attach
//! step context and a front-end can map failures onto process exit codes.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Engine-wide error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid parameter for {action}: {reason}")]
    InvalidParameter { action: String, reason: String },

    #[error("invalid identifier {0:?}: only letters, digits, '-', '_', '.', '+', '@' are allowed")]
    InvalidIdentifier(String),

    #[error("path escapes containment: {0}")]
    PathEscape(String),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("network error for {url}{}: {reason}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Network {
        url: String,
        status: Option<u16>,
        reason: String,
    },

    #[error("missing system packages [{}] for {family}; run: {suggested_command}", .packages.join(", "))]
    DependencyMissing {
        family: String,
        packages: Vec<String>,
        suggested_command: String,
    },

    #[error("command failed{}: {command}\n{output}", .exit_code.map(|c| format!(" (exit {c})")).unwrap_or_default())]
    ProcessFailed {
        command: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("cyclic dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("dependency chain exceeds maximum depth: {}", .0.join(" -> "))]
    MaxDepthExceeded(Vec<String>),

    #[error("asset pattern {pattern:?} matches {} candidates: {}", .candidates.len(), .candidates.join(", "))]
    AmbiguousAsset {
        pattern: String,
        candidates: Vec<String>,
    },

    #[error("lockfile capture failed: {0}")]
    LockfileCapture(String),

    #[error("relocation failed for {path}: {reason}")]
    Relocation { path: PathBuf, reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("step {index} ({action}): {source}")]
    Step {
        index: usize,
        action: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap an error with the step that produced it
    pub fn in_step(self, index: usize, action: &str) -> Self {
        Self::Step {
            index,
            action: action.to_string(),
            source: Box::new(self),
        }
    }

    /// Map this error onto the process exit code a CLI driver would use
    ///
    /// 0 is success and never produced here; 1 validation, 2 network,
    /// 3 build, 4 missing system dependency, 130 cancelled.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Step { source, .. } => source.exit_code(),
            Self::InvalidParameter { .. }
            | Self::InvalidIdentifier(_)
            | Self::PathEscape(_)
            | Self::Parse(_)
            | Self::NotFound(_)
            | Self::CyclicDependency(_)
            | Self::MaxDepthExceeded(_) => 1,
            Self::Network { .. } | Self::ChecksumMismatch { .. } | Self::AmbiguousAsset { .. } => 2,
            Self::ProcessFailed { .. }
            | Self::LockfileCapture(_)
            | Self::Relocation { .. }
            | Self::Io(_) => 3,
            Self::DependencyMissing { .. } => 4,
            Self::Cancelled => 130,
        }
    }

    /// The innermost error, with step wrappers peeled off
    pub fn root(&self) -> &Error {
        match self {
            Self::Step { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
