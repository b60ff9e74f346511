// src/actions/mod.rs

//! The action vocabulary
//!
//! Core primitives perform one narrow, deterministic effect. Ecosystem
//! primitives drive external toolchains under captured lockfiles.
//! Composites expand into primitives at plan time, pinning every
//! non-deterministic input. System-managed actions only describe what a
//! user would run with sudo.

pub mod download;
pub mod ecosystem;
pub mod env;
pub mod extract;
pub mod github;
pub mod homebrew;
pub mod install;
pub mod patch;
pub mod rpath;
pub mod system;

use crate::error::{Error, Result};
use crate::params::Params;
use crate::registry::Registry;

/// Register the whole built-in vocabulary
pub fn register_all(registry: &mut Registry) {
    download::register(registry);
    extract::register(registry);
    install::register(registry);
    env::register(registry);
    patch::register(registry);
    rpath::register(registry);
    github::register(registry);
    homebrew::register(registry);
    ecosystem::register(registry);
    system::register(registry);
}

/// Fetch a required string parameter or fail with `InvalidParameter`
pub(crate) fn require_str<'p>(action: &str, params: &'p Params, key: &str) -> Result<&'p str> {
    params.get_str(key).ok_or_else(|| Error::InvalidParameter {
        action: action.to_string(),
        reason: format!("missing required parameter {:?}", key),
    })
}

/// Character-class allowlist for names, versions, and executables
///
/// Letters, digits, `-`, `_`, `.`, `+`, `@`. Anything else (shell
/// metacharacters, path separators, whitespace) is rejected before any
/// child process is spawned.
pub(crate) fn validate_identifier(value: &str) -> Result<()> {
    let ok = !value.is_empty()
        && !value.starts_with('-')
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+' | '@'))
        && !value.contains("..");
    if !ok {
        return Err(Error::InvalidIdentifier(value.to_string()));
    }
    Ok(())
}

/// Like [`validate_identifier`] but permitting `/` between segments, for
/// module paths (`golang.org/x/tools/gopls`) and scoped npm packages
/// (`@scope/name`)
pub(crate) fn validate_module_path(value: &str) -> Result<()> {
    if value.is_empty() || value.starts_with('/') || value.ends_with('/') {
        return Err(Error::InvalidIdentifier(value.to_string()));
    }
    for segment in value.split('/') {
        validate_identifier(segment)?;
    }
    Ok(())
}

/// Shell metacharacters never allowed in build-system arguments
pub(crate) fn validate_build_arg(action: &str, value: &str) -> Result<()> {
    const DENYLIST: &[char] = &[';', '&', '|', '`', '$', '(', ')', '{', '}', '\n', '\r'];
    if value.chars().any(|c| DENYLIST.contains(&c)) {
        return Err(Error::InvalidParameter {
            action: action.to_string(),
            reason: format!("argument {:?} contains shell metacharacters", value),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier() {
        for ok in ["ripgrep", "go1.22", "node@20", "c++", "x_y-z.1"] {
            assert!(validate_identifier(ok).is_ok(), "{ok} should pass");
        }
        for bad in [
            "", "a;b", "a b", "a`b", "$(x)", "a/b", "..", "a..b", "-rf", "a\nb", "a'b",
        ] {
            assert!(validate_identifier(bad).is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn test_validate_module_path() {
        assert!(validate_module_path("golang.org/x/tools/gopls").is_ok());
        assert!(validate_module_path("@scope/pkg").is_ok());
        assert!(validate_module_path("/abs").is_err());
        assert!(validate_module_path("a//b").is_err());
        assert!(validate_module_path("a/../b").is_err());
        assert!(validate_module_path("trailing/").is_err());
    }

    #[test]
    fn test_validate_build_arg() {
        assert!(validate_build_arg("cmake_build", "-DWITH_SSL=ON").is_ok());
        assert!(validate_build_arg("cmake_build", "--enable-shared").is_ok());
        for bad in ["a;b", "a|b", "`id`", "$(id)", "{x}", "a\nb"] {
            assert!(validate_build_arg("cmake_build", bad).is_err(), "{bad:?}");
        }
    }
}
