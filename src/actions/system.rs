// src/actions/system.rs

//! System-managed actions
//!
//! These never mutate the host. They validate their inputs, check whether
//! the requirement is already satisfied, and otherwise fail with
//! `DependencyMissing` carrying the exact command a user would run with
//! sudo. The platform gate lives in `implicit_constraint`, so plans for
//! other targets drop these steps entirely.

use super::validate_identifier;
use crate::error::{Error, Result};
use crate::params::Params;
use crate::plan::exec::ExecutionContext;
use crate::platform::{Constraint, LinuxFamily, Os};
use crate::proc::CommandRunner;
use crate::registry::{Action, ActionKind, PreflightResult, Registry};
use tracing::debug;

pub fn register(registry: &mut Registry) {
    for manager in PACKAGE_MANAGERS {
        registry.register(Box::new(PackageInstall { spec: manager }));
    }
    registry.register(Box::new(GroupAdd));
    registry.register(Box::new(ServiceAction { start: false }));
    registry.register(Box::new(ServiceAction { start: true }));
    registry.register(Box::new(Manual));
    registry.register(Box::new(RequireSystem));
    registry.register(Box::new(RequireCommand));
}

/// One distro package manager's identity
struct ManagerSpec {
    action: &'static str,
    constraint: Constraint,
    family: &'static str,
    install: &'static str,
    /// Query command returning success when a package is installed
    query: &'static [&'static str],
}

const PACKAGE_MANAGERS: &[&ManagerSpec] = &[
    &ManagerSpec {
        action: "apt_install",
        constraint: Constraint::linux_family(LinuxFamily::Debian),
        family: "debian",
        install: "sudo apt-get install -y",
        query: &["dpkg", "-s"],
    },
    &ManagerSpec {
        action: "dnf_install",
        constraint: Constraint::linux_family(LinuxFamily::Rhel),
        family: "rhel",
        install: "sudo dnf install -y",
        query: &["rpm", "-q"],
    },
    &ManagerSpec {
        action: "pacman_install",
        constraint: Constraint::linux_family(LinuxFamily::Arch),
        family: "arch",
        install: "sudo pacman -S --noconfirm",
        query: &["pacman", "-Qi"],
    },
    &ManagerSpec {
        action: "apk_install",
        constraint: Constraint::linux_family(LinuxFamily::Alpine),
        family: "alpine",
        install: "sudo apk add",
        query: &["apk", "info", "-e"],
    },
    &ManagerSpec {
        action: "zypper_install",
        constraint: Constraint::linux_family(LinuxFamily::Suse),
        family: "suse",
        install: "sudo zypper install -y",
        query: &["rpm", "-q"],
    },
    &ManagerSpec {
        action: "brew_install",
        constraint: Constraint::os(Os::Darwin),
        family: "darwin",
        install: "brew install",
        query: &["brew", "list", "--versions"],
    },
];

fn validated_packages(action: &str, params: &Params) -> Result<Vec<String>> {
    let packages = params.get_str_seq("packages");
    if packages.is_empty() {
        return Err(Error::InvalidParameter {
            action: action.to_string(),
            reason: "missing required parameter \"packages\"".to_string(),
        });
    }
    packages
        .into_iter()
        .map(|p| validate_identifier(p).map(|_| p.to_string()))
        .collect()
}

struct PackageInstall {
    spec: &'static ManagerSpec,
}

impl PackageInstall {
    fn suggested_command(&self, packages: &[String]) -> String {
        format!("{} {}", self.spec.install, packages.join(" "))
    }

    /// Which of `packages` the distro says are not installed
    fn missing_packages(&self, ctx: &ExecutionContext<'_>, packages: &[String]) -> Vec<String> {
        let (query_bin, query_args) = match self.spec.query.split_first() {
            Some(split) => split,
            None => return packages.to_vec(),
        };
        if which::which(query_bin).is_err() {
            return packages.to_vec();
        }

        packages
            .iter()
            .filter(|package| {
                let present = CommandRunner::new(*query_bin, &ctx.cancel)
                    .args(query_args.iter().copied())
                    .arg(package.as_str())
                    .run_unchecked()
                    .map(|out| out.success())
                    .unwrap_or(false);
                !present
            })
            .cloned()
            .collect()
    }
}

impl Action for PackageInstall {
    fn name(&self) -> &'static str {
        self.spec.action
    }

    fn kind(&self) -> ActionKind {
        ActionKind::System
    }

    fn implicit_constraint(&self) -> Option<Constraint> {
        Some(self.spec.constraint)
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        match validated_packages(self.name(), params) {
            Ok(_) => PreflightResult::ok(),
            Err(e) => PreflightResult::error(e.to_string()),
        }
    }

    fn describe(&self, params: &Params) -> Option<String> {
        let packages = validated_packages(self.name(), params).ok()?;
        Some(self.suggested_command(&packages))
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        let packages = validated_packages(self.name(), params)?;
        let missing = self.missing_packages(ctx, &packages);
        if missing.is_empty() {
            debug!("all {} packages already present", self.name());
            return Ok(());
        }
        Err(Error::DependencyMissing {
            family: self.spec.family.to_string(),
            suggested_command: self.suggested_command(&missing),
            packages: missing,
        })
    }
}

struct GroupAdd;

impl Action for GroupAdd {
    fn name(&self) -> &'static str {
        "group_add"
    }

    fn kind(&self) -> ActionKind {
        ActionKind::System
    }

    fn implicit_constraint(&self) -> Option<Constraint> {
        Some(Constraint::os(Os::Linux))
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        match params.get_str("group") {
            Some(group) if validate_identifier(group).is_ok() => PreflightResult::ok(),
            Some(group) => PreflightResult::error(format!("invalid group name {:?}", group)),
            None => PreflightResult::error("missing required parameter \"group\""),
        }
    }

    fn describe(&self, params: &Params) -> Option<String> {
        let group = params.get_str("group")?;
        Some(format!("sudo usermod -aG {} \"$USER\"", group))
    }

    fn execute(&self, _ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        let group = super::require_str(self.name(), params, "group")?;
        validate_identifier(group)?;
        Err(Error::DependencyMissing {
            family: "system".to_string(),
            packages: vec![group.to_string()],
            suggested_command: format!("sudo usermod -aG {} \"$USER\"", group),
        })
    }
}

struct ServiceAction {
    start: bool,
}

impl ServiceAction {
    fn verb(&self) -> &'static str {
        if self.start { "start" } else { "enable" }
    }
}

impl Action for ServiceAction {
    fn name(&self) -> &'static str {
        if self.start { "service_start" } else { "service_enable" }
    }

    fn kind(&self) -> ActionKind {
        ActionKind::System
    }

    fn implicit_constraint(&self) -> Option<Constraint> {
        Some(Constraint::os(Os::Linux))
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        match params.get_str("service") {
            Some(service) if validate_identifier(service).is_ok() => PreflightResult::ok(),
            Some(service) => PreflightResult::error(format!("invalid service name {:?}", service)),
            None => PreflightResult::error("missing required parameter \"service\""),
        }
    }

    fn describe(&self, params: &Params) -> Option<String> {
        let service = params.get_str("service")?;
        Some(format!("sudo systemctl {} {}", self.verb(), service))
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        let service = super::require_str(self.name(), params, "service")?;
        validate_identifier(service)?;

        // Already satisfied?
        if which::which("systemctl").is_ok() {
            let check = if self.start { "is-active" } else { "is-enabled" };
            let satisfied = CommandRunner::new("systemctl", &ctx.cancel)
                .arg(check)
                .arg(service)
                .run_unchecked()
                .map(|out| out.success())
                .unwrap_or(false);
            if satisfied {
                return Ok(());
            }
        }

        Err(Error::DependencyMissing {
            family: "system".to_string(),
            packages: vec![service.to_string()],
            suggested_command: format!("sudo systemctl {} {}", self.verb(), service),
        })
    }
}

struct Manual;

impl Action for Manual {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn kind(&self) -> ActionKind {
        ActionKind::System
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        if params.get_str("instructions").is_none() {
            PreflightResult::error("missing required parameter \"instructions\"")
        } else {
            PreflightResult::ok()
        }
    }

    fn describe(&self, params: &Params) -> Option<String> {
        params.get_str("instructions").map(str::to_string)
    }

    fn execute(&self, _ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        let instructions = super::require_str(self.name(), params, "instructions")?;
        Err(Error::DependencyMissing {
            family: "manual".to_string(),
            packages: Vec::new(),
            suggested_command: instructions.to_string(),
        })
    }
}

struct RequireSystem;

impl Action for RequireSystem {
    fn name(&self) -> &'static str {
        "require_system"
    }

    fn kind(&self) -> ActionKind {
        ActionKind::System
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        if params.get_str_seq("files").is_empty() && params.get_str_seq("commands").is_empty() {
            PreflightResult::error("require_system needs \"files\" or \"commands\"")
        } else {
            PreflightResult::ok()
        }
    }

    fn execute(&self, _ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        let mut missing = Vec::new();

        for file in params.get_str_seq("files") {
            if !std::path::Path::new(file).exists() {
                missing.push(file.to_string());
            }
        }
        for command in params.get_str_seq("commands") {
            validate_identifier(command)?;
            if which::which(command).is_err() {
                missing.push(command.to_string());
            }
        }

        if missing.is_empty() {
            return Ok(());
        }
        Err(Error::DependencyMissing {
            family: "system".to_string(),
            suggested_command: params
                .get_str("hint")
                .unwrap_or("install the listed prerequisites with your system package manager")
                .to_string(),
            packages: missing,
        })
    }
}

struct RequireCommand;

impl RequireCommand {
    /// Component-wise numeric version comparison: `a >= b`
    fn version_at_least(actual: &str, minimum: &str) -> bool {
        let parse = |s: &str| -> Vec<u64> {
            s.split('.')
                .map(|part| {
                    part.chars()
                        .take_while(|c| c.is_ascii_digit())
                        .collect::<String>()
                        .parse()
                        .unwrap_or(0)
                })
                .collect()
        };
        let actual = parse(actual);
        let minimum = parse(minimum);
        for i in 0..actual.len().max(minimum.len()) {
            let a = actual.get(i).copied().unwrap_or(0);
            let m = minimum.get(i).copied().unwrap_or(0);
            if a != m {
                return a > m;
            }
        }
        true
    }
}

impl Action for RequireCommand {
    fn name(&self) -> &'static str {
        "require_command"
    }

    fn kind(&self) -> ActionKind {
        ActionKind::System
    }

    fn preflight(&self, params: &Params) -> PreflightResult {
        let mut result = PreflightResult::ok();
        match params.get_str("command") {
            None => result.push_error("missing required parameter \"command\""),
            Some(command) => {
                if validate_identifier(command).is_err() {
                    result.push_error(format!("invalid command name {:?}", command));
                }
            }
        }
        if let Some(pattern) = params.get_str("version_regex")
            && regex::Regex::new(pattern).is_err()
        {
            result.push_error(format!("invalid version_regex {:?}", pattern));
        }
        result
    }

    fn describe(&self, params: &Params) -> Option<String> {
        params.get_str("hint").map(str::to_string)
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>, params: &Params) -> Result<()> {
        let command = super::require_str(self.name(), params, "command")?;
        validate_identifier(command)?;

        let missing = || Error::DependencyMissing {
            family: "system".to_string(),
            packages: vec![command.to_string()],
            suggested_command: params
                .get_str("hint")
                .map(str::to_string)
                .unwrap_or_else(|| format!("install {} with your system package manager", command)),
        };

        if which::which(command).is_err() {
            return Err(missing());
        }

        // Version floor: only enforced when all three knobs are supplied
        let (Some(minimum), Some(flag), Some(pattern)) = (
            params.get_str("min_version"),
            params.get_str("version_flag"),
            params.get_str("version_regex"),
        ) else {
            return Ok(());
        };

        let re = regex::Regex::new(pattern)
            .map_err(|e| Error::Parse(format!("invalid version_regex: {}", e)))?;
        let output = CommandRunner::new(command, &ctx.cancel)
            .arg(flag)
            .with_paths(&ctx.exec_paths)
            .run_unchecked()?;

        let Some(captured) = re
            .captures(&output.combined)
            .and_then(|c| c.get(1).or_else(|| c.get(0)))
        else {
            debug!("could not extract {} version from output", command);
            return Err(missing());
        };

        if !Self::version_at_least(captured.as_str(), minimum) {
            return Err(missing());
        }
        Ok(())
    }
}
