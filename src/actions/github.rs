// src/actions/github.rs

//! Release-download composites: `github_archive`, `github_file`,
//! `download_archive`, `hashicorp_release`
//!
//! All four expand URL templates with the platform tokens, resolve glob
//! asset patterns against the release listing, pin the download checksum
//! through the evaluator's downloader, and emit the standard
//! `download_file` / `extract` / `chmod` / `install_binaries` tail.

use super::require_str;
use crate::archive::ArchiveFormat;
use crate::error::{Error, Result};
use crate::params::{Params, Value};
use crate::plan::eval::EvalContext;
use crate::plan::exec::ExecutionContext;
use crate::recipe::Step;
use crate::registry::{Action, ActionKind, PreflightResult, Registry, composite_not_executable};
use tracing::debug;

pub fn register(registry: &mut Registry) {
    registry.register(Box::new(GithubArchive));
    registry.register(Box::new(GithubFile));
    registry.register(Box::new(DownloadArchive));
    registry.register(Box::new(HashicorpRelease));
}

/// Expand an asset pattern and, when it still contains glob wildcards,
/// resolve it against the release's asset listing
fn resolve_asset(eval: &EvalContext<'_>, repo: &str, pattern: &str, params: &Params) -> Result<String> {
    let expanded = eval.expand_template(
        pattern,
        params.get_map("os_mapping"),
        params.get_map("arch_mapping"),
    );

    if !expanded.contains(['*', '?', '[']) {
        return Ok(expanded);
    }

    let matcher = glob::Pattern::new(&expanded)
        .map_err(|e| Error::Parse(format!("invalid asset pattern {:?}: {}", expanded, e)))?;
    let assets = eval
        .resolver
        .release_assets(&eval.cancel, repo, &eval.version_tag)?;

    let mut matches: Vec<String> = assets
        .into_iter()
        .filter(|name| matcher.matches(name))
        .collect();

    match matches.len() {
        0 => Err(Error::NotFound(format!(
            "no release asset matches {:?} in {} {}",
            expanded, repo, eval.version_tag
        ))),
        1 => Ok(matches.remove(0)),
        _ => Err(Error::AmbiguousAsset {
            pattern: expanded,
            candidates: matches,
        }),
    }
}

/// Copy the install-shaping parameters a composite forwards verbatim
fn forward_install_params(src: &Params, dst: Params) -> Params {
    let mut dst = dst;
    for key in ["outputs", "executables", "install_mode"] {
        if let Some(value) = src.get(key) {
            dst = dst.with(key, value.clone());
        }
    }
    dst
}

/// Default outputs derived from the executables list
fn ensure_outputs(params: Params, executables: &[&str]) -> Params {
    if params.contains_key("outputs") || executables.is_empty() {
        return params;
    }
    let outputs: Vec<Value> = executables.iter().map(|e| Value::from(*e)).collect();
    params.with("outputs", outputs)
}

/// The shared download-extract-install tail
fn archive_steps(
    eval: &EvalContext<'_>,
    url: String,
    asset: String,
    format: ArchiveFormat,
    params: &Params,
) -> Result<Vec<Step>> {
    let (checksum, size) = eval.pin_download(&url)?;
    debug!("pinned {} ({} bytes, {})", url, size, checksum.tagged());

    let executables = params.get_str_seq("executables");

    let download = Step::new(
        "download_file",
        Params::new()
            .with("url", url)
            .with("dest", asset.clone())
            .with("checksum", checksum.tagged()),
    )
    .with_pin(checksum, size);

    let mut extract = Params::new()
        .with("archive", asset)
        .with("format", format.as_str());
    if let Some(strip) = params.get_int("strip_dirs") {
        extract = extract.with("strip_dirs", strip);
    }

    let mut steps = vec![download, Step::new("extract", extract)];

    if !executables.is_empty() {
        let files: Vec<Value> = executables.iter().map(|e| Value::from(*e)).collect();
        steps.push(Step::new("chmod", Params::new().with("files", files)));
    }

    let install = ensure_outputs(forward_install_params(params, Params::new()), &executables);
    steps.push(Step::new("install_binaries", install));

    Ok(steps)
}

fn preflight_template(params: &Params, required: &[&str]) -> PreflightResult {
    let mut result = PreflightResult::ok();
    for key in required {
        if params.get_str(key).is_none() {
            result.push_error(format!("missing required parameter {:?}", key));
        }
    }
    result
}

pub struct GithubArchive;

impl Action for GithubArchive {
    fn name(&self) -> &'static str {
        "github_archive"
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Composite
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        preflight_template(params, &["repo", "asset_pattern"])
    }

    fn decompose(&self, eval: &EvalContext<'_>, params: &Params) -> Result<Vec<Step>> {
        let repo = require_str(self.name(), params, "repo")?;
        let pattern = require_str(self.name(), params, "asset_pattern")?;

        let asset = resolve_asset(eval, repo, pattern, params)?;
        let format = match params.get_str("format") {
            Some(format) => ArchiveFormat::parse(format).ok_or_else(|| Error::InvalidParameter {
                action: self.name().to_string(),
                reason: format!("unsupported archive format {:?}", format),
            })?,
            None => ArchiveFormat::from_extension(&asset).ok_or_else(|| Error::InvalidParameter {
                action: self.name().to_string(),
                reason: format!("cannot infer archive format of {:?}", asset),
            })?,
        };

        let url = format!(
            "https://github.com/{}/releases/download/{}/{}",
            repo, eval.version_tag, asset
        );
        archive_steps(eval, url, asset, format, params)
    }

    fn execute(&self, _ctx: &mut ExecutionContext<'_>, _params: &Params) -> Result<()> {
        Err(composite_not_executable(self.name()))
    }
}

pub struct GithubFile;

impl Action for GithubFile {
    fn name(&self) -> &'static str {
        "github_file"
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Composite
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        preflight_template(params, &["repo", "asset_pattern"])
    }

    fn decompose(&self, eval: &EvalContext<'_>, params: &Params) -> Result<Vec<Step>> {
        let repo = require_str(self.name(), params, "repo")?;
        let pattern = require_str(self.name(), params, "asset_pattern")?;

        let asset = resolve_asset(eval, repo, pattern, params)?;
        let url = format!(
            "https://github.com/{}/releases/download/{}/{}",
            repo, eval.version_tag, asset
        );
        let (checksum, size) = eval.pin_download(&url)?;

        // Single raw binary: no archive, the asset itself is the tool
        let binary = params
            .get_str("binary")
            .unwrap_or_else(|| eval.recipe.name());

        let download = Step::new(
            "download_file",
            Params::new()
                .with("url", url)
                .with("dest", asset.clone())
                .with("checksum", checksum.tagged()),
        )
        .with_pin(checksum, size);

        let chmod = Step::new(
            "chmod",
            Params::new().with("files", vec![Value::from(asset.as_str())]),
        );

        let mut output = crate::params::ValueMap::new();
        output.insert("src", asset.as_str());
        output.insert("dest", format!("bin/{}", binary));
        let install = Step::new(
            "install_binaries",
            Params::new().with("outputs", vec![Value::Map(output)]),
        );

        Ok(vec![download, chmod, install])
    }

    fn execute(&self, _ctx: &mut ExecutionContext<'_>, _params: &Params) -> Result<()> {
        Err(composite_not_executable(self.name()))
    }
}

pub struct DownloadArchive;

impl Action for DownloadArchive {
    fn name(&self) -> &'static str {
        "download_archive"
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Composite
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        preflight_template(params, &["url"])
    }

    fn decompose(&self, eval: &EvalContext<'_>, params: &Params) -> Result<Vec<Step>> {
        let template = require_str(self.name(), params, "url")?;
        let url = eval.expand_template(
            template,
            params.get_map("os_mapping"),
            params.get_map("arch_mapping"),
        );

        let asset = url
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::InvalidParameter {
                action: self.name().to_string(),
                reason: format!("cannot derive a filename from {:?}", url),
            })?
            .to_string();

        let format = match params.get_str("format") {
            Some(format) => ArchiveFormat::parse(format).ok_or_else(|| Error::InvalidParameter {
                action: self.name().to_string(),
                reason: format!("unsupported archive format {:?}", format),
            })?,
            None => ArchiveFormat::from_extension(&asset).unwrap_or(ArchiveFormat::TarGz),
        };

        archive_steps(eval, url, asset, format, params)
    }

    fn execute(&self, _ctx: &mut ExecutionContext<'_>, _params: &Params) -> Result<()> {
        Err(composite_not_executable(self.name()))
    }
}

/// Alias composite: rewrites itself to `download_archive` with the
/// canonical HashiCorp release URL template
pub struct HashicorpRelease;

impl HashicorpRelease {
    const URL_TEMPLATE: &'static str =
        "https://releases.hashicorp.com/{name}/{version}/{name}_{version}_{os}_{arch}.zip";
}

impl Action for HashicorpRelease {
    fn name(&self) -> &'static str {
        "hashicorp_release"
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Composite
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn decompose(&self, eval: &EvalContext<'_>, params: &Params) -> Result<Vec<Step>> {
        let name = params.get_str("name").unwrap_or_else(|| eval.recipe.name());
        super::validate_identifier(name)?;

        let url = Self::URL_TEMPLATE.replace("{name}", name);
        let mut forwarded = Params::new().with("url", url);
        for key in [
            "outputs",
            "executables",
            "install_mode",
            "strip_dirs",
            "os_mapping",
            "arch_mapping",
        ] {
            if let Some(value) = params.get(key) {
                forwarded = forwarded.with(key, value.clone());
            }
        }

        Ok(vec![Step::new("download_archive", forwarded)])
    }

    fn execute(&self, _ctx: &mut ExecutionContext<'_>, _params: &Params) -> Result<()> {
        Err(composite_not_executable(self.name()))
    }
}
