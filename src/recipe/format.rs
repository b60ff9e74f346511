// src/recipe/format.rs

//! Recipe file format definitions
//!
//! A recipe is a TOML document describing how to install one tool at one
//! version: a metadata block, an ordered `[[steps]]` array whose entries
//! carry inline action parameters, an optional `[verify]` command, and an
//! optional `[version]` block for tag/module overrides.

use crate::checksum::Checksum;
use crate::params::{Params, Value, ValueMap};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A complete recipe for installing a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    /// Name, type, and dependency declarations
    pub metadata: Metadata,

    /// Version tag/module overrides (optional)
    #[serde(default)]
    pub version: Option<VersionBlock>,

    /// Ordered install steps (`[[steps]]`, with `[[step]]` accepted)
    #[serde(default, alias = "step")]
    pub steps: Vec<Step>,

    /// Post-install verification command (optional)
    #[serde(default)]
    pub verify: Option<VerifyBlock>,
}

impl Recipe {
    /// Shorthand for the recipe name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Whether this recipe installs a library rather than a tool
    pub fn is_library(&self) -> bool {
        self.metadata.kind == RecipeType::Library
    }

    /// The tag template for this recipe, defaulting to `v{version}`
    pub fn tag_template(&self) -> &str {
        self.version
            .as_ref()
            .and_then(|v| v.tag.as_deref())
            .unwrap_or("v{version}")
    }

    /// Go module override, when the recipe installs a module subpackage
    pub fn module(&self) -> Option<&str> {
        self.version.as_ref().and_then(|v| v.module.as_deref())
    }
}

/// Recipe metadata block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Recipe name (also the install directory stem)
    pub name: String,

    /// Semantic type: tool (default) or library
    #[serde(rename = "type", default)]
    pub kind: RecipeType,

    /// Default version to install when the caller does not pick one
    #[serde(default)]
    pub version: Option<String>,

    /// Install-time dependency replace list (`name` or `name@ver`)
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Runtime dependency replace list
    #[serde(default)]
    pub runtime_dependencies: Vec<String>,

    /// Install-time dependency extend list
    #[serde(default)]
    pub extra_dependencies: Vec<String>,

    /// Runtime dependency extend list
    #[serde(default)]
    pub extra_runtime_dependencies: Vec<String>,
}

/// Tool or library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecipeType {
    #[default]
    Tool,
    Library,
}

impl RecipeType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Library => "library",
        }
    }
}

/// Version tag and module overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionBlock {
    /// Tag template, e.g. `v{version}` or `jq-{version}`
    #[serde(default)]
    pub tag: Option<String>,

    /// Go module path override for subpackage installs
    #[serde(default)]
    pub module: Option<String>,
}

/// Post-install verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyBlock {
    /// Command run from the installed bin directory, e.g. `jq --version`
    pub command: String,
}

/// A single step: an action invocation with inline parameters
///
/// The `action`, `pinned_checksum`, and `pinned_size` keys are lifted out
/// of the inline table; everything else is the action's parameter map.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub action: String,
    pub params: Params,
    /// Checksum pinned at evaluation time
    pub pinned_checksum: Option<Checksum>,
    /// Download size pinned at evaluation time
    pub pinned_size: Option<u64>,
}

impl Step {
    pub fn new(action: impl Into<String>, params: Params) -> Self {
        Self {
            action: action.into(),
            params,
            pinned_checksum: None,
            pinned_size: None,
        }
    }

    pub fn with_pin(mut self, checksum: Checksum, size: u64) -> Self {
        self.pinned_checksum = Some(checksum);
        self.pinned_size = Some(size);
        self
    }

    /// Stable content hash over the action name and canonical parameters
    pub fn content_hash(&self) -> String {
        self.params.content_hash(&self.action)
    }
}

impl<'de> Deserialize<'de> for Step {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct StepVisitor;

        impl<'de> Visitor<'de> for StepVisitor {
            type Value = Step;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a step table with an `action` key")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Step, A::Error> {
                let mut action = None;
                let mut pinned_checksum = None;
                let mut pinned_size = None;
                let mut params = ValueMap::new();

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "action" => action = Some(map.next_value::<String>()?),
                        "pinned_checksum" => {
                            let raw = map.next_value::<String>()?;
                            pinned_checksum =
                                Some(Checksum::parse(&raw).map_err(de::Error::custom)?);
                        }
                        "pinned_size" => pinned_size = Some(map.next_value::<u64>()?),
                        _ => {
                            let value = map.next_value::<Value>()?;
                            params.insert(key, value);
                        }
                    }
                }

                let action = action.ok_or_else(|| de::Error::missing_field("action"))?;
                Ok(Step {
                    action,
                    params: Params(params),
                    pinned_checksum,
                    pinned_size,
                })
            }
        }

        deserializer.deserialize_map(StepVisitor)
    }
}

impl Serialize for Step {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let extra = 1
            + usize::from(self.pinned_checksum.is_some())
            + usize::from(self.pinned_size.is_some());
        let mut map = serializer.serialize_map(Some(self.params.0.len() + extra))?;
        map.serialize_entry("action", &self.action)?;
        for (key, value) in self.params.0.iter() {
            map.serialize_entry(key, value)?;
        }
        if let Some(sum) = &self.pinned_checksum {
            map.serialize_entry("pinned_checksum", &sum.tagged())?;
        }
        if let Some(size) = self.pinned_size {
            map.serialize_entry("pinned_size", &size)?;
        }
        map.end()
    }
}

/// Split a dependency spec into `(name, version)`; bare names mean latest
pub fn split_dep_spec(spec: &str) -> (&str, &str) {
    match spec.split_once('@') {
        Some((name, version)) if !version.is_empty() => (name, version),
        _ => (spec, "latest"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KUBECTL: &str = r#"
        [metadata]
        name = "kubectl"
        type = "tool"

        [[steps]]
        action = "github_archive"
        repo = "kubernetes/kubectl"
        asset_pattern = "kubectl_{version}_{os}_{arch}.tar.gz"
        executables = ["kubectl"]

        [verify]
        command = "kubectl version --client"
    "#;

    #[test]
    fn test_parse_recipe_toml() {
        let recipe: Recipe = toml::from_str(KUBECTL).unwrap();
        assert_eq!(recipe.name(), "kubectl");
        assert_eq!(recipe.metadata.kind, RecipeType::Tool);
        assert_eq!(recipe.steps.len(), 1);

        let step = &recipe.steps[0];
        assert_eq!(step.action, "github_archive");
        assert_eq!(step.params.get_str("repo"), Some("kubernetes/kubectl"));
        assert_eq!(step.params.get_str_seq("executables"), vec!["kubectl"]);
        assert!(step.pinned_checksum.is_none());

        assert_eq!(recipe.verify.unwrap().command, "kubectl version --client");
    }

    #[test]
    fn test_step_pin_roundtrip() {
        let toml = r#"
            action = "download_file"
            url = "https://example.com/a.tar.gz"
            dest = "a.tar.gz"
            pinned_checksum = "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
            pinned_size = 5
        "#;
        let step: Step = toml::from_str(toml).unwrap();
        assert_eq!(step.action, "download_file");
        assert_eq!(step.pinned_size, Some(5));
        assert!(step.pinned_checksum.is_some());
        // The lifted keys must not leak into the parameter map
        assert!(!step.params.contains_key("action"));
        assert!(!step.params.contains_key("pinned_checksum"));
    }

    #[test]
    fn test_tag_template_default() {
        let recipe: Recipe = toml::from_str(KUBECTL).unwrap();
        assert_eq!(recipe.tag_template(), "v{version}");

        let with_tag: Recipe = toml::from_str(
            r#"
            [metadata]
            name = "jq"

            [version]
            tag = "jq-{version}"
            "#,
        )
        .unwrap();
        assert_eq!(with_tag.tag_template(), "jq-{version}");
    }

    #[test]
    fn test_split_dep_spec() {
        assert_eq!(split_dep_spec("patchelf"), ("patchelf", "latest"));
        assert_eq!(split_dep_spec("go@1.22.0"), ("go", "1.22.0"));
        assert_eq!(split_dep_spec("weird@"), ("weird@", "latest"));
    }

    #[test]
    fn test_library_type() {
        let recipe: Recipe = toml::from_str(
            r#"
            [metadata]
            name = "libcurl"
            type = "library"
            "#,
        )
        .unwrap();
        assert!(recipe.is_library());
    }
}
