// src/plan/exec.rs

//! Plan execution
//!
//! Single-threaded and sequential: steps run in plan order, a failure
//! aborts the remainder, and the executor attaches `{step_index, action}`
//! context to whatever surfaces. Before any side effect, every step's
//! preflight runs; errors abort the whole plan, warnings are logged.
//!
//! `Installer` owns the install lifecycle around the executor: a fresh
//! scratch `work_dir`, an empty staging `install_dir`, and on success an
//! atomic rename to `tools/<name>-<version>` (or `libs/...`). A failed
//! install leaves nothing behind outside the scratch directory.

use crate::error::{Error, Result};
use crate::fsutil;
use crate::platform::Platform;
use crate::prefix::Prefix;
use crate::proc::CancelToken;
use crate::recipe::Recipe;
use crate::registry::Registry;
use crate::remote::{DownloadCache, Downloader};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::eval::Plan;

/// Mutable context threaded through every executing step
pub struct ExecutionContext<'a> {
    pub cancel: CancelToken,
    /// Resolved version, no prefix
    pub version: String,
    /// Tag form, possibly `v`-prefixed
    pub version_tag: String,
    pub platform: Platform,
    /// Per-step scratch directory
    pub work_dir: PathBuf,
    /// Staging directory, atomically promoted on success
    pub install_dir: PathBuf,
    /// User-prefix library root
    pub libs_dir: PathBuf,
    /// User-prefix tool root
    pub tools_dir: PathBuf,
    /// bin directories of already-installed dependencies, prepended to
    /// PATH for every child process
    pub exec_paths: Vec<PathBuf>,
    /// Artifact fetcher for pinned `download_file` steps
    pub downloader: &'a dyn Downloader,
    /// URL-keyed cache warmed during plan evaluation
    pub download_cache: Option<&'a DownloadCache>,
    pub recipe: &'a Recipe,
}

impl<'a> ExecutionContext<'a> {
    /// Join an untrusted relative path onto the work dir
    pub fn work_path(&self, rel: &str) -> Result<PathBuf> {
        fsutil::safe_join(&self.work_dir, rel)
    }

    /// Join an untrusted relative path onto the install dir
    pub fn install_path(&self, rel: &str) -> Result<PathBuf> {
        fsutil::safe_join(&self.install_dir, rel)
    }

    /// The path this install will occupy after promotion
    ///
    /// `env.sh` and other persisted artifacts must reference this, not the
    /// staging path in `install_dir`.
    pub fn final_install_dir(&self) -> PathBuf {
        let stem = format!("{}-{}", self.recipe.name(), self.version);
        if self.recipe.is_library() {
            self.libs_dir.join(stem)
        } else {
            self.tools_dir.join(stem)
        }
    }

    /// The shared Go module cache under the user prefix
    pub fn gomodcache_dir(&self) -> PathBuf {
        self.tools_dir
            .parent()
            .map(|root| root.join(".gomodcache"))
            .unwrap_or_else(|| self.tools_dir.join(".gomodcache"))
    }
}

/// Sequential step executor
pub struct Executor<'r> {
    registry: &'r Registry,
}

impl<'r> Executor<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self { registry }
    }

    /// Run every step's preflight; the first error aborts with step
    /// context, warnings are logged and suppressed
    pub fn preflight(&self, plan: &Plan) -> Result<()> {
        for (index, step) in plan.steps.iter().enumerate() {
            let action = self
                .registry
                .require(&step.action)
                .map_err(|e| e.in_step(index, &step.action))?;

            let result = action.preflight(&step.params);
            for warning in &result.warnings {
                warn!("step {} ({}): {}", index, step.action, warning);
            }
            if let Some(reason) = result.errors.into_iter().next() {
                return Err(Error::InvalidParameter {
                    action: step.action.clone(),
                    reason,
                }
                .in_step(index, &step.action));
            }
        }
        Ok(())
    }

    /// Preflight, then execute the plan in order
    pub fn execute(&self, plan: &Plan, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        self.preflight(plan)?;

        for (index, step) in plan.steps.iter().enumerate() {
            ctx.cancel.check().map_err(|e| e.in_step(index, &step.action))?;

            let action = self
                .registry
                .require(&step.action)
                .map_err(|e| e.in_step(index, &step.action))?;

            debug!("executing step {}: {}", index, step.action);
            action
                .execute(ctx, &step.params)
                .map_err(|e| e.in_step(index, &step.action))?;
        }

        Ok(())
    }
}

/// Drives one complete install: scratch dirs, execution, promotion
pub struct Installer<'r> {
    registry: &'r Registry,
    prefix: Prefix,
}

impl<'r> Installer<'r> {
    pub fn new(registry: &'r Registry, prefix: Prefix) -> Self {
        Self { registry, prefix }
    }

    /// Execute `plan` for `recipe` and promote the result
    ///
    /// Returns the final install path. On any failure the staging and
    /// scratch directories are removed and nothing outside them has been
    /// touched.
    #[allow(clippy::too_many_arguments)]
    pub fn install(
        &self,
        recipe: &Recipe,
        plan: &Plan,
        version: &str,
        version_tag: &str,
        platform: Platform,
        exec_paths: Vec<PathBuf>,
        downloader: &dyn Downloader,
        download_cache: Option<&DownloadCache>,
        cancel: &CancelToken,
    ) -> Result<PathBuf> {
        let final_path = if recipe.is_library() {
            self.prefix.lib_path(recipe.name(), version)
        } else {
            self.prefix.tool_path(recipe.name(), version)
        };

        // Staging lives next to the final path so the promotion rename
        // stays on one filesystem.
        let staging_parent = final_path
            .parent()
            .ok_or_else(|| Error::Io(format!("{} has no parent", final_path.display())))?;
        fs::create_dir_all(staging_parent)
            .map_err(|e| Error::Io(format!("failed to create {}: {}", staging_parent.display(), e)))?;
        let staging = tempfile::Builder::new()
            .prefix(&format!(".staging-{}-", recipe.name()))
            .tempdir_in(staging_parent)
            .map_err(|e| Error::Io(format!("failed to create staging directory: {}", e)))?;

        let work = tempfile::Builder::new()
            .prefix("tsuku-work-")
            .tempdir()
            .map_err(|e| Error::Io(format!("failed to create work directory: {}", e)))?;

        let mut ctx = ExecutionContext {
            cancel: cancel.clone(),
            version: version.to_string(),
            version_tag: version_tag.to_string(),
            platform,
            work_dir: work.path().to_path_buf(),
            install_dir: staging.path().to_path_buf(),
            libs_dir: self.prefix.libs_dir(),
            tools_dir: self.prefix.tools_dir(),
            exec_paths,
            downloader,
            download_cache,
            recipe,
        };

        info!(
            "installing {} {} into {}",
            recipe.name(),
            version,
            final_path.display()
        );

        let executor = Executor::new(self.registry);
        // TempDir guards remove work_dir and the staging dir on any
        // early return below.
        executor.execute(plan, &mut ctx)?;

        let staging_path = staging.keep();
        if let Err(e) = fsutil::promote(&staging_path, &final_path) {
            let _ = fs::remove_dir_all(&staging_path);
            return Err(e);
        }

        info!("installed {} {}", recipe.name(), version);
        Ok(final_path)
    }

    pub fn prefix(&self) -> &Prefix {
        &self.prefix
    }
}

/// Compute the PATH entries for a set of installed runtime dependencies
pub fn resolve_exec_paths(prefix: &Prefix, deps: &[(String, String)]) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for (name, version) in deps {
        if let Some(bin) = prefix.installed_bin_dir(name, version) {
            paths.push(bin);
        }
    }
    paths
}

/// Remove anything a crashed install might have left staged
pub fn sweep_stale_staging(dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        if let Some(name) = entry.file_name().to_str()
            && name.starts_with(".staging-")
        {
            debug!("removing stale staging dir {}", entry.path().display());
            let _ = fs::remove_dir_all(entry.path());
        }
    }
}
