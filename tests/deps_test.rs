// tests/deps_test.rs

//! Dependency resolution across recipes: action-implied tools, cycle
//! detection, and the self-reference escape hatch.

mod common;

use common::MapLoader;
use tsuku::platform::Os;
use tsuku::proc::CancelToken;
use tsuku::registry::Registry;
use tsuku::remote::RecipeLoader;
use tsuku::{Error, resolve_dependencies, resolve_transitive};

#[test]
fn test_action_implied_platform_deps() {
    let registry = Registry::builtin();
    let loader = MapLoader::new(&[(
        "libcurl",
        r#"
        [metadata]
        name = "libcurl"
        type = "library"

        [[steps]]
        action = "homebrew"
        formula = "curl"
        "#,
    )]);
    let recipe = loader.get(&CancelToken::new(), "libcurl").unwrap();

    // homebrew needs patchelf to relocate bottles, but only on Linux
    let linux = resolve_dependencies(&recipe, Os::Linux, &registry);
    assert!(linux.install_time.contains_key("patchelf"));

    let darwin = resolve_dependencies(&recipe, Os::Darwin, &registry);
    assert!(!darwin.install_time.contains_key("patchelf"));
}

#[test]
fn test_patchelf_self_loop_is_harmless() {
    let registry = Registry::builtin();
    let loader = MapLoader::new(&[(
        "patchelf",
        r#"
        [metadata]
        name = "patchelf"

        [[steps]]
        action = "homebrew"
        formula = "patchelf"
        "#,
    )]);
    let recipe = loader.get(&CancelToken::new(), "patchelf").unwrap();

    // The homebrew action implies patchelf, but a recipe never depends
    // on itself
    let resolved = resolve_dependencies(&recipe, Os::Linux, &registry);
    assert!(!resolved.install_time.contains_key("patchelf"));

    let transitive = resolve_transitive(
        &recipe,
        Os::Linux,
        &registry,
        &loader,
        &CancelToken::new(),
    )
    .unwrap();
    assert!(!transitive.install_time.contains_key("patchelf"));
}

#[test]
fn test_mutual_cycle_reports_full_path() {
    let registry = Registry::builtin();
    let loader = MapLoader::new(&[
        (
            "a",
            r#"
            [metadata]
            name = "a"
            runtime_dependencies = ["b"]
            "#,
        ),
        (
            "b",
            r#"
            [metadata]
            name = "b"
            runtime_dependencies = ["a"]
            "#,
        ),
    ]);
    let recipe = loader.get(&CancelToken::new(), "a").unwrap();

    let err = resolve_transitive(&recipe, Os::Linux, &registry, &loader, &CancelToken::new())
        .unwrap_err();
    match err {
        Error::CyclicDependency(path) => assert_eq!(path, vec!["a", "b", "a"]),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_transitive_superset_of_direct() {
    let registry = Registry::builtin();
    let loader = MapLoader::new(&[
        (
            "top",
            r#"
            [metadata]
            name = "top"
            runtime_dependencies = ["mid@2.0"]
            "#,
        ),
        (
            "mid",
            r#"
            [metadata]
            name = "mid"
            runtime_dependencies = ["leaf"]
            "#,
        ),
        ("leaf", "[metadata]\nname = \"leaf\"\n"),
    ]);
    let recipe = loader.get(&CancelToken::new(), "top").unwrap();

    let direct = resolve_dependencies(&recipe, Os::Linux, &registry);
    let transitive = resolve_transitive(&recipe, Os::Linux, &registry, &loader, &CancelToken::new())
        .unwrap();

    for name in direct.runtime.keys() {
        assert!(transitive.runtime.contains_key(name), "missing {name}");
    }
    assert!(transitive.runtime.contains_key("leaf"));
    assert_eq!(transitive.runtime["mid"], "2.0");
}
