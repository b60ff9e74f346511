// src/registry/mod.rs

//! Action registry
//!
//! The catalog of named actions a recipe step may invoke. Each action is
//! tagged primitive, composite, or system-managed, and carries capability
//! metadata: determinism, network use, implicit platform constraint, and
//! implied tool dependencies. The registry is populated once at startup
//! and immutable afterward; tests inject their own registry through the
//! `EvalContext` handle instead of mutating the global one.

use crate::error::{Error, Result};
use crate::params::Params;
use crate::plan::eval::EvalContext;
use crate::plan::exec::ExecutionContext;
use crate::platform::{Constraint, Os};
use crate::recipe::Step;
use std::collections::HashMap;
use std::sync::OnceLock;

/// How the engine treats an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Terminal vocabulary: executed as-is, never decomposed
    Primitive,
    /// Expanded into primitives at evaluation time
    Composite,
    /// Descriptive only: names system packages the user must install
    System,
}

/// Tool dependencies implied by using an action
///
/// Lists are unordered; a bare name means the latest version.
#[derive(Debug, Clone, Default)]
pub struct ActionDeps {
    pub install_time: Vec<&'static str>,
    pub runtime: Vec<&'static str>,
    pub linux_install_time: Vec<&'static str>,
    pub darwin_install_time: Vec<&'static str>,
    pub linux_runtime: Vec<&'static str>,
    pub darwin_runtime: Vec<&'static str>,
}

impl ActionDeps {
    /// Cross-platform plus the platform-specific slice for `os`
    pub fn install_time_for(&self, os: Os) -> Vec<&'static str> {
        let mut deps = self.install_time.clone();
        match os {
            Os::Linux => deps.extend(&self.linux_install_time),
            Os::Darwin => deps.extend(&self.darwin_install_time),
        }
        deps
    }

    pub fn runtime_for(&self, os: Os) -> Vec<&'static str> {
        let mut deps = self.runtime.clone();
        match os {
            Os::Linux => deps.extend(&self.linux_runtime),
            Os::Darwin => deps.extend(&self.darwin_runtime),
        }
        deps
    }
}

/// Outcome of side-effect-free step validation
#[derive(Debug, Default)]
pub struct PreflightResult {
    /// Fatal: the plan must not execute
    pub errors: Vec<String>,
    /// Advisory: logged, execution proceeds
    pub warnings: Vec<String>,
}

impl PreflightResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
            warnings: Vec::new(),
        }
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn push_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// One entry in the action catalog
pub trait Action: Send + Sync {
    /// Registry key, lowercase snake case
    fn name(&self) -> &'static str;

    fn kind(&self) -> ActionKind {
        ActionKind::Primitive
    }

    /// Imperative effect against the execution context
    fn execute(&self, ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()>;

    /// Side-effect-free parameter validation
    fn preflight(&self, _params: &Params) -> PreflightResult {
        PreflightResult::ok()
    }

    fn dependencies(&self) -> ActionDeps {
        ActionDeps::default()
    }

    /// True iff re-running with identical inputs reproduces identical
    /// disk state bit-for-bit
    fn is_deterministic(&self) -> bool {
        true
    }

    fn requires_network(&self) -> bool {
        false
    }

    /// Platform gate; non-matching steps are dropped at plan time
    fn implicit_constraint(&self) -> Option<Constraint> {
        None
    }

    /// Expand into constituent steps, pinning non-deterministic inputs.
    /// Only composite actions implement this.
    fn decompose(&self, _eval: &EvalContext<'_>, _params: &Params) -> Result<Vec<Step>> {
        Err(Error::InvalidParameter {
            action: self.name().to_string(),
            reason: "action is not decomposable".to_string(),
        })
    }

    /// Copy-pasteable shell hint for system-managed actions
    fn describe(&self, _params: &Params) -> Option<String> {
        None
    }
}

/// The error every composite's `execute` returns: composites exist only
/// at plan time and must have been decomposed away.
pub fn composite_not_executable(name: &str) -> Error {
    Error::InvalidParameter {
        action: name.to_string(),
        reason: "composite actions cannot execute directly; evaluate the plan first".to_string(),
    }
}

/// Immutable action catalog
pub struct Registry {
    actions: HashMap<&'static str, Box<dyn Action>>,
}

impl Registry {
    /// An empty registry, for tests that assemble their own vocabulary
    pub fn empty() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// The full built-in vocabulary
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        crate::actions::register_all(&mut registry);
        registry
    }

    pub fn register(&mut self, action: Box<dyn Action>) {
        let name = action.name();
        debug_assert!(
            !self.actions.contains_key(name),
            "duplicate action registration: {name}"
        );
        self.actions.insert(name, action);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Action> {
        self.actions.get(name).map(|a| a.as_ref())
    }

    /// Lookup that errors with the standard message
    pub fn require(&self, name: &str) -> Result<&dyn Action> {
        self.get(name)
            .ok_or_else(|| Error::NotFound(format!("unknown action: {}", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn is_primitive(&self, name: &str) -> bool {
        self.get(name)
            .map(|a| a.kind() == ActionKind::Primitive)
            .unwrap_or(false)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.actions.keys().copied()
    }
}

/// Process-wide registry, initialized on first use
pub fn global() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(Registry::builtin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_has_core_vocabulary() {
        let registry = global();
        for name in [
            "download_file",
            "extract",
            "install_binaries",
            "github_archive",
            "cargo_install",
            "dnf_install",
            "set_rpath",
        ] {
            assert!(registry.contains(name), "missing action {name}");
        }
    }

    #[test]
    fn test_kind_tags() {
        let registry = global();
        assert_eq!(registry.get("download_file").unwrap().kind(), ActionKind::Primitive);
        assert_eq!(registry.get("github_archive").unwrap().kind(), ActionKind::Composite);
        assert_eq!(registry.get("apt_install").unwrap().kind(), ActionKind::System);
        assert!(registry.is_primitive("extract"));
        assert!(!registry.is_primitive("github_archive"));
    }

    #[test]
    fn test_platform_dep_slices() {
        let deps = ActionDeps {
            install_time: vec!["curl"],
            linux_install_time: vec!["patchelf"],
            darwin_install_time: vec!["lipo"],
            ..Default::default()
        };
        assert_eq!(deps.install_time_for(Os::Linux), vec!["curl", "patchelf"]);
        assert_eq!(deps.install_time_for(Os::Darwin), vec!["curl", "lipo"]);
    }

    #[test]
    fn test_ecosystem_actions_not_deterministic() {
        let registry = global();
        assert!(registry.get("download_file").unwrap().is_deterministic());
        assert!(!registry.get("cargo_build").unwrap().is_deterministic());
        assert!(!registry.get("go_build").unwrap().is_deterministic());
    }
}
