// src/actions/extract.rs

//! `extract`: unpack an archive inside the work directory

use super::require_str;
use crate::archive::{ArchiveFormat, ExtractOptions};
use crate::error::{Error, Result};
use crate::params::Params;
use crate::plan::exec::ExecutionContext;
use crate::registry::{Action, PreflightResult, Registry};
use tracing::debug;

pub fn register(registry: &mut Registry) {
    registry.register(Box::new(Extract));
}

pub struct Extract;

impl Action for Extract {
    fn name(&self) -> &'static str {
        "extract"
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        let mut result = PreflightResult::ok();

        if params.get_str("archive").is_none() {
            result.push_error("missing required parameter \"archive\"");
        }
        match params.get_str("format") {
            None => result.push_error("missing required parameter \"format\""),
            Some(format) => {
                if ArchiveFormat::parse(format).is_none() {
                    result.push_error(format!("unsupported archive format {:?}", format));
                }
            }
        }
        if let Some(strip) = params.get_int("strip_dirs")
            && strip < 0
        {
            result.push_error("strip_dirs must be non-negative");
        }

        result
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        let archive = require_str(self.name(), params, "archive")?;
        let format = ArchiveFormat::parse(require_str(self.name(), params, "format")?)
            .ok_or_else(|| Error::InvalidParameter {
                action: self.name().to_string(),
                reason: format!("unsupported archive format {:?}", params.get_str("format")),
            })?;
        let strip_dirs = params.get_int("strip_dirs").unwrap_or(0);
        if strip_dirs < 0 {
            return Err(Error::InvalidParameter {
                action: self.name().to_string(),
                reason: "strip_dirs must be non-negative".to_string(),
            });
        }

        let archive_path = ctx.work_path(archive)?;
        let dest = match params.get_str("dest") {
            Some(dest) => ctx.work_path(dest)?,
            None => ctx.work_dir.clone(),
        };

        debug!(
            "extracting {} ({}) into {}",
            archive_path.display(),
            format,
            dest.display()
        );

        crate::archive::extract(
            &archive_path,
            format,
            &dest,
            &ExtractOptions {
                strip_dirs: strip_dirs as usize,
            },
            &ctx.cancel,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preflight() {
        let ok = Extract.preflight(
            &Params::new()
                .with("archive", "a.tar.gz")
                .with("format", "tar.gz")
                .with("strip_dirs", 1i64),
        );
        assert!(ok.is_ok());

        let bad = Extract.preflight(&Params::new().with("format", "rar"));
        assert_eq!(bad.errors.len(), 2);

        let negative = Extract.preflight(
            &Params::new()
                .with("archive", "a.tar")
                .with("format", "tar")
                .with("strip_dirs", -1i64),
        );
        assert!(!negative.is_ok());
    }
}
