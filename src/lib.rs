// src/lib.rs

//! Tsuku recipe engine
//!
//! The core of a declarative, reproducible developer-tool installer: a
//! user declares `kubectl 1.29.3` and the engine materializes an
//! isolated, relocatable installation under a per-user prefix, without
//! root and without touching the system.
//!
//! # Architecture
//!
//! - Two-phase pipeline: a plan *evaluator* expands composite recipe
//!   steps into a pinned graph of primitives (resolving asset globs,
//!   computing checksums, capturing lockfiles), then a sequential
//!   *executor* runs the pinned plan.
//! - Action registry: the fixed vocabulary of primitive, composite, and
//!   system-managed actions, with capability metadata.
//! - Safety first: archive extraction with path-traversal defenses,
//!   identifier allowlists ahead of every child process, atomic
//!   staging-then-rename installs.
//! - Relocatable results: ELF RPATHs and Mach-O load commands rewritten
//!   so installs are position-independent under the prefix.

pub mod actions;
pub mod archive;
pub mod checksum;
pub mod deps;
mod error;
pub mod fsutil;
pub mod params;
pub mod plan;
pub mod platform;
pub mod prefix;
pub mod proc;
pub mod recipe;
pub mod registry;
pub mod relocate;
pub mod remote;

pub use archive::{ArchiveFormat, ExtractOptions};
pub use checksum::{Checksum, HashAlgorithm, hash_bytes, hash_file};
pub use deps::{MAX_DEPTH, ResolvedDeps, resolve_dependencies, resolve_transitive};
pub use error::{Error, Result};
pub use params::{Params, Value, ValueMap};
pub use plan::{
    EvalContext, ExecutionContext, Executor, Installer, Plan, decompose_to_primitives, evaluate,
};
pub use platform::{Arch, Constraint, LinuxFamily, Os, Platform};
pub use prefix::Prefix;
pub use proc::{CancelToken, CommandRunner};
pub use recipe::{Recipe, Step, parse_recipe, parse_recipe_file, validate_recipe};
pub use registry::{Action, ActionDeps, ActionKind, PreflightResult, Registry};
pub use relocate::{BinaryKind, relocate_install_dir};
pub use remote::{
    DownloadCache, DownloadedFile, Downloader, GitHubReleases, HttpDownloader, RecipeLoader,
    ReleaseResolver,
};
