// tests/relocate_test.rs

//! Homebrew bottle relocation against a real work tree.

mod common;

use common::StubDownloader;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use tsuku::params::Params;
use tsuku::plan::exec::ExecutionContext;
use tsuku::platform::{Arch, Os, Platform};
use tsuku::proc::CancelToken;
use tsuku::recipe::parse_recipe;
use tsuku::registry::Registry;

#[test]
fn test_homebrew_relocate_rewrites_placeholder_paths() {
    let registry = Registry::builtin();
    let recipe = parse_recipe("[metadata]\nname = \"libcurl\"\ntype = \"library\"\n").unwrap();
    let work = tempfile::tempdir().unwrap();
    let install = tempfile::tempdir().unwrap();
    let prefix = tempfile::tempdir().unwrap();
    let downloader = StubDownloader::new();

    // A bottle-style text file with placeholder paths, read-only as
    // bottles often ship them
    fs::create_dir_all(work.path().join("bin")).unwrap();
    let script = work.path().join("bin/curl-config");
    fs::write(
        &script,
        "#!/bin/sh\nprefix=@@HOMEBREW_CELLAR@@/curl/8.17.0\nexec @@HOMEBREW_CELLAR@@/curl/8.17.0/bin/curl-config\n",
    )
    .unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o555)).unwrap();

    let mut ctx = ExecutionContext {
        cancel: CancelToken::new(),
        version: "8.17.0".to_string(),
        version_tag: "v8.17.0".to_string(),
        platform: Platform::new(Os::Linux, Arch::Amd64),
        work_dir: work.path().to_path_buf(),
        install_dir: install.path().to_path_buf(),
        libs_dir: prefix.path().join("libs"),
        tools_dir: prefix.path().join("tools"),
        exec_paths: Vec::new(),
        downloader: &downloader,
        download_cache: None,
        recipe: &recipe,
    };

    let action = registry.get("homebrew_relocate").unwrap();
    let params = Params::new()
        .with("formula", "curl")
        .with("install_path", "/tmp/prefix/libcurl-8.17.0");
    action.execute(&mut ctx, &params).unwrap();

    let rewritten = fs::read_to_string(&script).unwrap();
    assert!(rewritten.contains("/tmp/prefix/libcurl-8.17.0/bin/curl-config"));
    assert!(rewritten.contains("prefix=/tmp/prefix/libcurl-8.17.0"));
    assert!(!rewritten.contains("@@HOMEBREW"));

    // Original mode restored after the forced-writable rewrite
    let mode = script.metadata().unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o555);
}

#[test]
fn test_homebrew_relocate_leaves_binaries_to_the_relocator() {
    let registry = Registry::builtin();
    let recipe = parse_recipe("[metadata]\nname = \"tool\"\n").unwrap();
    let work = tempfile::tempdir().unwrap();
    let install = tempfile::tempdir().unwrap();
    let prefix = tempfile::tempdir().unwrap();
    let downloader = StubDownloader::new();

    // A fake binary: ELF magic plus a NUL byte; with no patchelf work to
    // do (no lib dirs), relocation must leave it untouched
    let binary = work.path().join("bin-blob");
    let contents = b"\x7fELF\x00fake-binary-with-placeholder @@HOMEBREW_PREFIX@@".to_vec();
    fs::write(&binary, &contents).unwrap();

    let mut ctx = ExecutionContext {
        cancel: CancelToken::new(),
        version: "1.0".to_string(),
        version_tag: "v1.0".to_string(),
        platform: Platform::new(Os::Linux, Arch::Amd64),
        work_dir: work.path().to_path_buf(),
        install_dir: install.path().to_path_buf(),
        libs_dir: prefix.path().join("libs"),
        tools_dir: prefix.path().join("tools"),
        exec_paths: Vec::new(),
        downloader: &downloader,
        download_cache: None,
        recipe: &recipe,
    };

    let action = registry.get("homebrew_relocate").unwrap();
    action.execute(&mut ctx, &Params::new()).unwrap();

    // Text replacement must never run on binaries
    assert_eq!(fs::read(&binary).unwrap(), contents);
}
