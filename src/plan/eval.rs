// src/plan/eval.rs

//! Plan evaluation: composite decomposition and pinning
//!
//! `decompose_to_primitives` recursively expands composite steps into the
//! primitive vocabulary, in stable preorder. Network side effects happen
//! only inside composite `decompose` implementations, and every one of
//! them pins its result (a URL, a checksum, a lockfile) into the emitted
//! primitive steps, so the evaluated plan is byte-identical across runs
//! given a warm download cache.

use crate::checksum::Checksum;
use crate::error::{Error, Result};
use crate::params::{Params, ValueMap};
use crate::platform::Platform;
use crate::proc::CancelToken;
use crate::recipe::{Recipe, Step};
use crate::registry::{ActionKind, Registry};
use crate::remote::{DownloadCache, Downloader, RecipeLoader, ReleaseResolver};
use tracing::debug;

/// Read-only context for plan evaluation
///
/// A superset of what execution needs: the resolver for asset listings,
/// the downloader for checksum pinning, an optional URL-keyed cache, and
/// the recipe loader for transitive dependency expansion.
pub struct EvalContext<'a> {
    pub cancel: CancelToken,
    /// Resolved version, no `v` prefix
    pub version: String,
    /// Tag form of the version, e.g. `v1.29.3`
    pub version_tag: String,
    pub platform: Platform,
    pub registry: &'a Registry,
    pub resolver: &'a dyn ReleaseResolver,
    pub downloader: &'a dyn Downloader,
    pub cache: Option<&'a DownloadCache>,
    pub recipes: &'a dyn RecipeLoader,
    /// The recipe being evaluated
    pub recipe: &'a Recipe,
}

impl<'a> EvalContext<'a> {
    /// Download a URL (or hit the cache) and return its pinned checksum
    /// and size
    pub fn pin_download(&self, url: &str) -> Result<(Checksum, u64)> {
        if let Some(cache) = self.cache
            && let Some(hit) = cache.get(url)
        {
            return Ok((hit.checksum, hit.size));
        }

        let file = self.downloader.download(&self.cancel, url)?;
        let checksum = file.checksum.clone();
        let size = file.size;

        if let Some(cache) = self.cache {
            cache.put(url, file)?;
        }
        Ok((checksum, size))
    }

    /// Download a small document and return its text (formula JSON,
    /// registry metadata)
    pub fn fetch_text(&self, url: &str) -> Result<String> {
        if let Some(cache) = self.cache
            && let Some(hit) = cache.get(url)
        {
            return std::fs::read_to_string(&hit.path)
                .map_err(|e| Error::Io(format!("failed to read cached {}: {}", url, e)));
        }

        let file = self.downloader.download(&self.cancel, url)?;
        let text = std::fs::read_to_string(&file.path)
            .map_err(|e| Error::Io(format!("failed to read download of {}: {}", url, e)))?;

        if let Some(cache) = self.cache {
            cache.put(url, file)?;
        }
        Ok(text)
    }

    /// Expand `{version}`, `{version_tag}`, `{os}`, `{arch}` placeholders
    ///
    /// `os_mapping`/`arch_mapping` rename the platform tokens for upstream
    /// naming schemes (e.g. `darwin -> macos`, `amd64 -> x86_64`).
    pub fn expand_template(
        &self,
        template: &str,
        os_mapping: Option<&ValueMap>,
        arch_mapping: Option<&ValueMap>,
    ) -> String {
        let os = self.platform.os.as_str();
        let os = os_mapping
            .and_then(|m| m.get(os))
            .and_then(|v| v.as_str())
            .unwrap_or(os);
        let arch = self.platform.arch.as_str();
        let arch = arch_mapping
            .and_then(|m| m.get(arch))
            .and_then(|v| v.as_str())
            .unwrap_or(arch);

        template
            .replace("{version}", &self.version)
            .replace("{version_tag}", &self.version_tag)
            .replace("{os}", os)
            .replace("{arch}", arch)
    }
}

/// An evaluated plan: ordered primitive (or system) steps, fully pinned
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub steps: Vec<Step>,
}

impl Plan {
    /// Stable content hashes of every step, in order
    pub fn step_hashes(&self) -> Vec<String> {
        self.steps.iter().map(Step::content_hash).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Evaluate a whole recipe into a pinned plan
pub fn evaluate(eval: &EvalContext<'_>) -> Result<Plan> {
    let mut steps = Vec::new();
    for step in &eval.recipe.steps {
        eval.cancel.check()?;
        let mut path = Vec::new();
        decompose_step(eval, step, &mut path, &mut steps)?;
    }
    Ok(Plan { steps })
}

/// Recursively decompose one action invocation into primitive steps
pub fn decompose_to_primitives(
    eval: &EvalContext<'_>,
    action_name: &str,
    params: &Params,
) -> Result<Vec<Step>> {
    let mut out = Vec::new();
    let mut path = Vec::new();
    decompose_step(eval, &Step::new(action_name, params.clone()), &mut path, &mut out)?;
    Ok(out)
}

fn decompose_step(
    eval: &EvalContext<'_>,
    step: &Step,
    path: &mut Vec<(String, String)>,
    out: &mut Vec<Step>,
) -> Result<()> {
    let action = eval.registry.require(&step.action).map_err(|_| {
        Error::Parse(format!(
            "step action {:?} is neither primitive nor decomposable",
            step.action
        ))
    })?;

    // Platform gate: a step whose action cannot apply to the target is
    // dropped here, not at execution time.
    if let Some(constraint) = action.implicit_constraint()
        && !constraint.matches(&eval.platform)
    {
        debug!(
            "dropping {} step: constraint does not match {}",
            step.action, eval.platform
        );
        return Ok(());
    }

    match action.kind() {
        ActionKind::Primitive | ActionKind::System => {
            out.push(step.clone());
            Ok(())
        }
        ActionKind::Composite => {
            let key = (step.action.clone(), step.content_hash());
            if path.contains(&key) {
                let mut cycle: Vec<String> = path.iter().map(|(name, _)| name.clone()).collect();
                cycle.push(step.action.clone());
                return Err(Error::CyclicDependency(cycle));
            }

            path.push(key);
            let expanded = action.decompose(eval, &step.params)?;
            for child in &expanded {
                decompose_step(eval, child, path, out)?;
            }
            path.pop();
            Ok(())
        }
    }
}

/// Resolve the version tag for a recipe version using its tag template
pub fn render_tag(recipe: &Recipe, version: &str) -> String {
    recipe.tag_template().replace("{version}", version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Arch, Os};
    use crate::recipe::parse_recipe;
    use crate::remote::DownloadedFile;

    struct NoopDownloader;
    impl Downloader for NoopDownloader {
        fn download(&self, _cancel: &CancelToken, url: &str) -> Result<DownloadedFile> {
            Err(Error::Network {
                url: url.to_string(),
                status: None,
                reason: "network disabled in test".to_string(),
            })
        }
    }

    struct NoopResolver;
    impl ReleaseResolver for NoopResolver {
        fn release_assets(
            &self,
            _cancel: &CancelToken,
            repo: &str,
            _tag: &str,
        ) -> Result<Vec<String>> {
            Err(Error::NotFound(repo.to_string()))
        }
    }

    struct NoopLoader;
    impl RecipeLoader for NoopLoader {
        fn get(&self, _cancel: &CancelToken, name: &str) -> Result<Recipe> {
            Err(Error::NotFound(name.to_string()))
        }
    }

    fn context<'a>(registry: &'a Registry, recipe: &'a Recipe) -> EvalContext<'a> {
        EvalContext {
            cancel: CancelToken::new(),
            version: "1.0.0".to_string(),
            version_tag: "v1.0.0".to_string(),
            platform: Platform::new(Os::Linux, Arch::Amd64),
            registry,
            resolver: &NoopResolver,
            downloader: &NoopDownloader,
            cache: None,
            recipes: &NoopLoader,
            recipe,
        }
    }

    #[test]
    fn test_expand_template() {
        let registry = Registry::empty();
        let recipe = parse_recipe("[metadata]\nname = \"x\"\n").unwrap();
        let eval = context(&registry, &recipe);

        assert_eq!(
            eval.expand_template("tool_{version}_{os}_{arch}.tar.gz", None, None),
            "tool_1.0.0_linux_amd64.tar.gz"
        );

        let mut os_map = ValueMap::new();
        os_map.insert("linux", "Linux");
        let mut arch_map = ValueMap::new();
        arch_map.insert("amd64", "x86_64");
        assert_eq!(
            eval.expand_template("{os}-{arch}", Some(&os_map), Some(&arch_map)),
            "Linux-x86_64"
        );
    }

    #[test]
    fn test_unknown_action_fails() {
        let registry = Registry::empty();
        let recipe = parse_recipe(
            "[metadata]\nname = \"x\"\n\n[[steps]]\naction = \"no_such_action\"\n",
        )
        .unwrap();
        let eval = context(&registry, &recipe);
        let err = evaluate(&eval).unwrap_err();
        assert!(err.to_string().contains("neither primitive nor decomposable"));
    }

    #[test]
    fn test_render_tag() {
        let recipe = parse_recipe("[metadata]\nname = \"x\"\n").unwrap();
        assert_eq!(render_tag(&recipe, "1.2.3"), "v1.2.3");
    }
}
