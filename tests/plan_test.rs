// tests/plan_test.rs

//! Plan evaluation: composite expansion, pinning, platform gating,
//! determinism with a warm cache, and decomposition cycle detection.

mod common;

use common::{MapLoader, StubDownloader, StubResolver, targz};
use tsuku::params::Params;
use tsuku::plan::eval::{EvalContext, evaluate};
use tsuku::platform::{Arch, LinuxFamily, Os, Platform};
use tsuku::proc::CancelToken;
use tsuku::recipe::{Recipe, Step, parse_recipe};
use tsuku::registry::{Action, ActionKind, Registry, composite_not_executable};
use tsuku::remote::DownloadCache;
use tsuku::{Error, Result};

const KUBECTL_RECIPE: &str = r#"
    [metadata]
    name = "kubectl"

    [[steps]]
    action = "github_archive"
    repo = "kubernetes/kubectl"
    asset_pattern = "kubectl_{version}_{os}_{arch}.tar.gz"
    executables = ["kubectl"]

    [verify]
    command = "kubectl version --client"
"#;

fn eval_ctx<'a>(
    registry: &'a Registry,
    recipe: &'a Recipe,
    downloader: &'a StubDownloader,
    resolver: &'a StubResolver,
    loader: &'a MapLoader,
    cache: Option<&'a DownloadCache>,
    platform: Platform,
) -> EvalContext<'a> {
    EvalContext {
        cancel: CancelToken::new(),
        version: "1.29.3".to_string(),
        version_tag: "v1.29.3".to_string(),
        platform,
        registry,
        resolver,
        downloader,
        cache,
        recipes: loader,
        recipe,
    }
}

#[test]
fn test_github_archive_plan_is_pinned() {
    let registry = Registry::builtin();
    let recipe = parse_recipe(KUBECTL_RECIPE).unwrap();
    let payload = targz(&[("kubectl", 0o755, b"#!/bin/sh\necho kubectl\n" as &[u8])]);
    let downloader = StubDownloader::serving_any(payload.clone());
    let resolver = StubResolver::empty();
    let loader = MapLoader::empty();

    let eval = eval_ctx(
        &registry,
        &recipe,
        &downloader,
        &resolver,
        &loader,
        None,
        Platform::new(Os::Linux, Arch::Amd64),
    );
    let plan = evaluate(&eval).unwrap();

    let actions: Vec<&str> = plan.steps.iter().map(|s| s.action.as_str()).collect();
    assert_eq!(
        actions,
        vec!["download_file", "extract", "chmod", "install_binaries"]
    );

    let download = &plan.steps[0];
    assert_eq!(
        download.params.get_str("url"),
        Some(
            "https://github.com/kubernetes/kubectl/releases/download/v1.29.3/kubectl_1.29.3_linux_amd64.tar.gz"
        )
    );
    let pinned = download.pinned_checksum.as_ref().expect("pinned checksum");
    assert_eq!(
        pinned.value,
        tsuku::hash_bytes(&payload, tsuku::HashAlgorithm::Sha256).value
    );
    assert_eq!(download.pinned_size, Some(payload.len() as u64));
}

#[test]
fn test_plan_evaluation_is_deterministic_with_warm_cache() {
    let registry = Registry::builtin();
    let recipe = parse_recipe(KUBECTL_RECIPE).unwrap();
    let payload = targz(&[("kubectl", 0o755, b"bin" as &[u8])]);
    let downloader = StubDownloader::serving_any(payload);
    let resolver = StubResolver::empty();
    let loader = MapLoader::empty();

    let cache_dir = tempfile::tempdir().unwrap();
    let cache = DownloadCache::new(cache_dir.path());

    let fingerprint = |plan: &tsuku::Plan| -> Vec<(String, String)> {
        plan.steps
            .iter()
            .map(|s| (s.action.clone(), s.params.canonical_json()))
            .collect()
    };

    let eval = eval_ctx(
        &registry,
        &recipe,
        &downloader,
        &resolver,
        &loader,
        Some(&cache),
        Platform::new(Os::Linux, Arch::Amd64),
    );
    let first = evaluate(&eval).unwrap();
    assert_eq!(downloader.call_count(), 1);

    let second = evaluate(&eval).unwrap();
    // Warm cache: no new network traffic, byte-identical plan
    assert_eq!(downloader.call_count(), 1);
    assert_eq!(fingerprint(&first), fingerprint(&second));
    assert_eq!(first.step_hashes(), second.step_hashes());
}

#[test]
fn test_wrong_os_system_step_is_dropped_at_plan_time() {
    let registry = Registry::builtin();
    let recipe = parse_recipe(
        r#"
        [metadata]
        name = "opensslish"

        [[steps]]
        action = "dnf_install"
        packages = ["openssl"]
        "#,
    )
    .unwrap();
    let downloader = StubDownloader::new();
    let resolver = StubResolver::empty();
    let loader = MapLoader::empty();

    // On macOS the rhel-gated step vanishes from the plan entirely
    let eval = eval_ctx(
        &registry,
        &recipe,
        &downloader,
        &resolver,
        &loader,
        None,
        Platform::new(Os::Darwin, Arch::Arm64),
    );
    let plan = evaluate(&eval).unwrap();
    assert!(plan.is_empty());

    // On RHEL it stays, as a system step awaiting execution
    let eval = eval_ctx(
        &registry,
        &recipe,
        &downloader,
        &resolver,
        &loader,
        None,
        Platform::new(Os::Linux, Arch::Amd64).with_family(LinuxFamily::Rhel),
    );
    let plan = evaluate(&eval).unwrap();
    assert_eq!(plan.steps.len(), 1);
    assert_eq!(plan.steps[0].action, "dnf_install");
}

/// A composite that expands to itself, for cycle detection
struct SelfLoop;

impl Action for SelfLoop {
    fn name(&self) -> &'static str {
        "self_loop"
    }
    fn kind(&self) -> ActionKind {
        ActionKind::Composite
    }
    fn decompose(
        &self,
        _eval: &EvalContext<'_>,
        params: &Params,
    ) -> Result<Vec<Step>> {
        Ok(vec![Step::new("self_loop", params.clone())])
    }
    fn execute(
        &self,
        _ctx: &mut tsuku::ExecutionContext<'_>,
        _params: &Params,
    ) -> Result<()> {
        Err(composite_not_executable(self.name()))
    }
}

#[test]
fn test_decomposition_cycle_is_detected() {
    let mut registry = Registry::empty();
    registry.register(Box::new(SelfLoop));

    let recipe = parse_recipe(
        r#"
        [metadata]
        name = "looper"

        [[steps]]
        action = "self_loop"
        "#,
    )
    .unwrap();
    let downloader = StubDownloader::new();
    let resolver = StubResolver::empty();
    let loader = MapLoader::empty();

    let eval = eval_ctx(
        &registry,
        &recipe,
        &downloader,
        &resolver,
        &loader,
        None,
        Platform::new(Os::Linux, Arch::Amd64),
    );
    let err = evaluate(&eval).unwrap_err();
    match err {
        Error::CyclicDependency(path) => {
            assert_eq!(path, vec!["self_loop", "self_loop"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_cargo_install_lockfile_capture_is_deterministic() {
    // Exercised fully only where cargo and the crates.io index are
    // reachable; otherwise the capture fails and the test ends early.
    if which::which("cargo").is_err() {
        return;
    }
    let registry = Registry::builtin();
    let recipe = parse_recipe(
        r#"
        [metadata]
        name = "ripgrep"

        [[steps]]
        action = "cargo_install"
        crate = "ripgrep"
        executables = ["rg"]
        "#,
    )
    .unwrap();
    let downloader = StubDownloader::new();
    let resolver = StubResolver::empty();
    let loader = MapLoader::empty();

    let eval = EvalContext {
        cancel: CancelToken::new(),
        version: "14.1.0".to_string(),
        version_tag: "v14.1.0".to_string(),
        platform: Platform::new(Os::Linux, Arch::Amd64),
        registry: &registry,
        resolver: &resolver,
        downloader: &downloader,
        cache: None,
        recipes: &loader,
        recipe: &recipe,
    };

    let first = match evaluate(&eval) {
        Ok(plan) => plan,
        Err(Error::LockfileCapture(_)) | Err(Error::Cancelled) => return,
        Err(other) => panic!("unexpected error: {other:?}"),
    };
    let second = evaluate(&eval).unwrap();

    assert_eq!(first.steps.len(), 1);
    assert_eq!(first.steps[0].action, "cargo_build");
    // Identical Cargo.lock bytes across runs
    assert_eq!(
        first.steps[0].params.get_str("lockfile"),
        second.steps[0].params.get_str("lockfile")
    );
    assert_eq!(
        first.steps[0].params.get_str("lockfile_checksum"),
        second.steps[0].params.get_str("lockfile_checksum")
    );
}

#[test]
fn test_glob_ambiguity_fails_evaluation() {
    let registry = Registry::builtin();
    let recipe = parse_recipe(
        r#"
        [metadata]
        name = "jq"

        [[steps]]
        action = "github_archive"
        repo = "jqlang/jq"
        asset_pattern = "jq-*{os}*{arch}*.tar.gz"
        "#,
    )
    .unwrap();
    let downloader = StubDownloader::new();
    let resolver = StubResolver(vec![
        "jq-linux-amd64.tar.gz".to_string(),
        "jq-static-linux-amd64.tar.gz".to_string(),
    ]);
    let loader = MapLoader::empty();

    let eval = eval_ctx(
        &registry,
        &recipe,
        &downloader,
        &resolver,
        &loader,
        None,
        Platform::new(Os::Linux, Arch::Amd64),
    );
    let err = evaluate(&eval).unwrap_err();
    assert!(matches!(err, Error::AmbiguousAsset { .. }));
}
