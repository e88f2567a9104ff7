//! Service lifecycle control against systemd.
//!
//! Thin mapping onto `systemctl`; failure is signaled purely by the
//! underlying command's exit status. A unit name the manager does not
//! recognize fails the same way as a query that itself failed; the two
//! are deliberately not distinguished.

use serde::Serialize;
use std::sync::Arc;

use crate::sys::exec::{ActionData, ActionResult, CommandRunner};

/// Units the panel surfaces in status overviews and accepts over the
/// API. FPM units are matched separately by their `phpX.Y-fpm` shape.
pub const MANAGED_SERVICES: &[&str] = &[
    "apache2",
    "httpd",
    "nginx",
    "mariadb",
    "postgresql",
    "cron",
    "crond",
    "fail2ban",
];

/// Transient snapshot of one service, reconstructed on each query.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceState {
    pub name: String,
    pub status: String,
    pub enabled: bool,
}

pub struct ServiceController {
    runner: Arc<dyn CommandRunner>,
}

impl ServiceController {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Folds `is-active` and `is-enabled` into one [`ServiceState`].
    pub async fn status(&self, name: &str) -> ActionResult {
        let active = self.runner.run("systemctl", &["is-active", name]).await;
        if !active.success {
            return active;
        }

        let enabled_query = self.runner.run("systemctl", &["is-enabled", name]).await;
        let enabled = enabled_query.success && enabled_query.message.trim() == "enabled";

        let state = ServiceState {
            name: name.to_string(),
            status: active.message.trim().to_string(),
            enabled,
        };

        ActionResult::ok(format!("Service {} is {}", name, state.status))
            .with_data(ActionData::Service(state))
    }

    pub async fn start(&self, name: &str) -> ActionResult {
        self.runner.run("systemctl", &["start", name]).await
    }

    pub async fn stop(&self, name: &str) -> ActionResult {
        self.runner.run("systemctl", &["stop", name]).await
    }

    pub async fn restart(&self, name: &str) -> ActionResult {
        self.runner.run("systemctl", &["restart", name]).await
    }

    pub async fn reload(&self, name: &str) -> ActionResult {
        self.runner.run("systemctl", &["reload", name]).await
    }

    pub async fn enable(&self, name: &str) -> ActionResult {
        self.runner.run("systemctl", &["enable", name]).await
    }

    pub async fn disable(&self, name: &str) -> ActionResult {
        self.runner.run("systemctl", &["disable", name]).await
    }
}
