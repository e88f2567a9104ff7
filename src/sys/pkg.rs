//! Host capability probe.
//!
//! Decides which package-management family the host carries by probing
//! for the manager binaries in a fixed order: apt, then dnf, then yum.
//! The probe re-runs on every procedure instead of being cached; a few
//! redundant `test -f` calls buy freedom from stale-state bugs.

use crate::sys::exec::{file_exists, ActionResult, CommandRunner};

pub const UNSUPPORTED_DISTRO: &str = "Unsupported Linux distribution";

/// Standard failure for hosts where no known package manager exists.
/// Emitted before any side-effecting command runs.
pub fn unsupported_distro() -> ActionResult {
    ActionResult::fail(UNSUPPORTED_DISTRO, "unsupported package manager")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkgFamily {
    Apt,
    Dnf,
    Yum,
}

impl PkgFamily {
    /// First match wins; all absent yields `None` rather than a guess.
    pub async fn detect(runner: &dyn CommandRunner) -> Option<Self> {
        if file_exists(runner, "/usr/bin/apt").await {
            return Some(Self::Apt);
        }
        if file_exists(runner, "/usr/bin/dnf").await {
            return Some(Self::Dnf);
        }
        if file_exists(runner, "/usr/bin/yum").await {
            return Some(Self::Yum);
        }
        None
    }

    pub fn manager(&self) -> &'static str {
        match self {
            Self::Apt => "apt",
            Self::Dnf => "dnf",
            Self::Yum => "yum",
        }
    }

    pub fn is_debian_family(&self) -> bool {
        matches!(self, Self::Apt)
    }

    /// Refresh the package index. Only the apt family needs an explicit
    /// update pass before installing; dnf/yum resolve on demand.
    pub async fn refresh_index(&self, runner: &dyn CommandRunner) -> ActionResult {
        match self {
            Self::Apt => runner.run("apt", &["update"]).await,
            Self::Dnf | Self::Yum => ActionResult::ok("Package index is resolved on demand"),
        }
    }

    pub async fn install(&self, runner: &dyn CommandRunner, packages: &[&str]) -> ActionResult {
        let mut args = vec!["install", "-y"];
        args.extend_from_slice(packages);
        runner.run(self.manager(), &args).await
    }

    /// Full removal including config files on the apt family.
    pub async fn remove(&self, runner: &dyn CommandRunner, packages: &[&str]) -> ActionResult {
        let mut args = match self {
            Self::Apt => vec!["purge", "-y"],
            Self::Dnf | Self::Yum => vec!["remove", "-y"],
        };
        args.extend_from_slice(packages);
        runner.run(self.manager(), &args).await
    }
}
