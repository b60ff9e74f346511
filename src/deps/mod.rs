// src/deps/mod.rs

//! Recipe dependency resolution
//!
//! Direct resolution folds five precedence phases, applied per step and
//! then per recipe (later phases overwrite earlier ones):
//!
//! 1. action-implicit dependencies (cross-platform + the target OS slice)
//! 2. step-level extend (`extra_dependencies`, `extra_runtime_dependencies`)
//! 3. step-level replace (`dependencies`, `runtime_dependencies`)
//! 4. recipe-level replace (`metadata.dependencies`, `metadata.runtime_dependencies`)
//! 5. recipe-level extend (`extra_*`)
//!
//! Self-references are silently skipped to break harmless self-loops
//! (patchelf's recipe uses an action that itself depends on patchelf).
//!
//! Transitive expansion walks the install-time and runtime graphs
//! independently, loading dependency recipes through the external loader.
//! A name reappearing on the active path is a cycle; missing recipes are
//! skipped as likely system packages; the first-encountered version of a
//! name wins (there is no constraint solving).

use crate::error::{Error, Result};
use crate::platform::Os;
use crate::proc::CancelToken;
use crate::recipe::{Recipe, split_dep_spec};
use crate::registry::Registry;
use crate::remote::RecipeLoader;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Maximum transitive dependency depth
pub const MAX_DEPTH: usize = 10;

/// `dep name -> version spec` ("latest" when unspecified)
pub type DepMap = BTreeMap<String, String>;

/// Which dependency graph a walk follows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DepKind {
    InstallTime,
    Runtime,
}

/// Resolved direct dependencies of one recipe
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedDeps {
    pub install_time: DepMap,
    pub runtime: DepMap,
}

/// Apply the five precedence phases to one recipe
pub fn resolve_dependencies(recipe: &Recipe, os: Os, registry: &Registry) -> ResolvedDeps {
    let mut install_time = DepMap::new();
    let mut runtime = DepMap::new();

    for step in &recipe.steps {
        let mut step_install = DepMap::new();
        let mut step_runtime = DepMap::new();

        // Phase 1: action-implicit
        if let Some(action) = registry.get(&step.action) {
            let deps = action.dependencies();
            for spec in deps.install_time_for(os) {
                insert_spec(&mut step_install, spec, recipe.name());
            }
            for spec in deps.runtime_for(os) {
                insert_spec(&mut step_runtime, spec, recipe.name());
            }
        }

        // Phase 2: step-level extend
        for spec in step.params.get_str_seq("extra_dependencies") {
            insert_spec(&mut step_install, spec, recipe.name());
        }
        for spec in step.params.get_str_seq("extra_runtime_dependencies") {
            insert_spec(&mut step_runtime, spec, recipe.name());
        }

        // Phase 3: step-level replace discards phases 1-2 for that step
        if step.params.contains_key("dependencies") {
            step_install.clear();
            for spec in step.params.get_str_seq("dependencies") {
                insert_spec(&mut step_install, spec, recipe.name());
            }
        }
        if step.params.contains_key("runtime_dependencies") {
            step_runtime.clear();
            for spec in step.params.get_str_seq("runtime_dependencies") {
                insert_spec(&mut step_runtime, spec, recipe.name());
            }
        }

        install_time.extend(step_install);
        runtime.extend(step_runtime);
    }

    // Phase 4: recipe-level replace
    if !recipe.metadata.dependencies.is_empty() {
        install_time.clear();
        for spec in &recipe.metadata.dependencies {
            insert_spec(&mut install_time, spec, recipe.name());
        }
    }
    if !recipe.metadata.runtime_dependencies.is_empty() {
        runtime.clear();
        for spec in &recipe.metadata.runtime_dependencies {
            insert_spec(&mut runtime, spec, recipe.name());
        }
    }

    // Phase 5: recipe-level extend
    for spec in &recipe.metadata.extra_dependencies {
        insert_spec(&mut install_time, spec, recipe.name());
    }
    for spec in &recipe.metadata.extra_runtime_dependencies {
        insert_spec(&mut runtime, spec, recipe.name());
    }

    ResolvedDeps {
        install_time,
        runtime,
    }
}

fn insert_spec(map: &mut DepMap, spec: &str, self_name: &str) {
    let (name, version) = split_dep_spec(spec);
    if name == self_name {
        debug!("skipping self-dependency {} in {}", name, self_name);
        return;
    }
    map.insert(name.to_string(), version.to_string());
}

/// Expand direct dependencies into the transitive closure
///
/// Walks install-time and runtime graphs separately, loading each named
/// recipe through `loader`. Cycles fail with the offending path; chains
/// deeper than [`MAX_DEPTH`] fail; unknown names are skipped.
pub fn resolve_transitive(
    recipe: &Recipe,
    os: Os,
    registry: &Registry,
    loader: &dyn RecipeLoader,
    cancel: &CancelToken,
) -> Result<ResolvedDeps> {
    let direct = resolve_dependencies(recipe, os, registry);

    let mut install_time = DepMap::new();
    let mut path = vec![recipe.name().to_string()];
    expand(
        &direct.install_time,
        DepKind::InstallTime,
        os,
        registry,
        loader,
        cancel,
        &mut install_time,
        &mut path,
    )?;

    let mut runtime = DepMap::new();
    let mut path = vec![recipe.name().to_string()];
    expand(
        &direct.runtime,
        DepKind::Runtime,
        os,
        registry,
        loader,
        cancel,
        &mut runtime,
        &mut path,
    )?;

    Ok(ResolvedDeps {
        install_time,
        runtime,
    })
}

#[allow(clippy::too_many_arguments)]
fn expand(
    deps: &DepMap,
    kind: DepKind,
    os: Os,
    registry: &Registry,
    loader: &dyn RecipeLoader,
    cancel: &CancelToken,
    accumulated: &mut DepMap,
    path: &mut Vec<String>,
) -> Result<()> {
    for (name, version) in deps {
        cancel.check()?;

        if path.contains(name) {
            let mut cycle = path.clone();
            cycle.push(name.clone());
            return Err(Error::CyclicDependency(cycle));
        }

        // First-encountered version wins; an already-settled name is
        // not expanded again.
        if accumulated.contains_key(name) {
            continue;
        }
        accumulated.insert(name.clone(), version.clone());

        if path.len() >= MAX_DEPTH {
            let mut chain = path.clone();
            chain.push(name.clone());
            return Err(Error::MaxDepthExceeded(chain));
        }

        let dep_recipe = match loader.get(cancel, name) {
            Ok(recipe) => recipe,
            Err(Error::NotFound(_)) => {
                // Likely a system package; the system-managed actions in
                // the dependent recipe will surface instructions.
                warn!("no recipe for dependency {}, skipping expansion", name);
                continue;
            }
            Err(other) => return Err(other),
        };

        let resolved = resolve_dependencies(&dep_recipe, os, registry);
        let next = match kind {
            DepKind::InstallTime => &resolved.install_time,
            DepKind::Runtime => &resolved.runtime,
        };

        path.push(name.clone());
        expand(next, kind, os, registry, loader, cancel, accumulated, path)?;
        path.pop();
    }

    Ok(())
}
