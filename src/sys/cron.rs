//! Cron procedures: per-user crontab mutation, system-wide cron.d
//! files, logrotate policy and maintenance schedules.
//!
//! The crontab is mutated read-modify-write: read the full store,
//! filter or append in memory, write the whole store back. There is no
//! locking; two concurrent writers can lose an update. Accepted
//! limitation, inherited from the crontab tool itself.

use std::sync::Arc;
use tracing::info;

use crate::sys::exec::{write_file, ActionResult, CommandRunner};
use crate::sys::service::ServiceController;

/// A schedule is exactly five whitespace-separated fields:
/// minute hour day month weekday.
fn valid_schedule(schedule: &str) -> bool {
    schedule.split_whitespace().count() == 5
}

fn valid_job_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub struct CronAction {
    runner: Arc<dyn CommandRunner>,
    services: ServiceController,
}

impl CronAction {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        let services = ServiceController::new(runner.clone());
        Self { runner, services }
    }

    // ==========================================================================
    // 1. Per-user crontab
    // ==========================================================================

    pub async fn list(&self) -> ActionResult {
        self.runner.run("crontab", &["-l"]).await
    }

    pub async fn list_system(&self) -> ActionResult {
        let mut result = self.runner.run("cat", &["/etc/crontab"]).await;
        if !result.success {
            return result;
        }

        let cron_d = self.runner.run("ls", &["-la", "/etc/cron.d/"]).await;
        if cron_d.success {
            result.message.push_str("\n\n--- /etc/cron.d/ ---\n");
            result.message.push_str(&cron_d.message);
        }

        result
    }

    pub async fn add(&self, schedule: &str, command: &str, description: &str) -> ActionResult {
        if !valid_schedule(schedule) {
            return ActionResult::fail("Invalid cron schedule format", "invalid schedule format");
        }

        // Missing crontab reads as empty; the write below creates it.
        let current = self.runner.run("crontab", &["-l"]).await;
        let mut content = if current.success {
            current.message
        } else {
            String::new()
        };
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }

        if !description.is_empty() {
            content.push_str(&format!("# {}\n", description));
        }
        content.push_str(&format!("{} {}\n", schedule, command));

        let written = self.runner.run_with_stdin("crontab", &["-"], &content).await;
        if !written.success {
            return written;
        }

        ActionResult::ok(format!("Cron job added: {} {}", schedule, command))
    }

    /// Drops every line containing `command` as a literal substring;
    /// all other lines keep their relative order.
    pub async fn remove(&self, command: &str) -> ActionResult {
        let current = self.runner.run("crontab", &["-l"]).await;
        if !current.success {
            return ActionResult::fail("No crontab found", "no crontab exists");
        }

        let filtered: Vec<&str> = current
            .message
            .lines()
            .filter(|line| !line.contains(command))
            .collect();

        let mut content = filtered.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }

        let written = self.runner.run_with_stdin("crontab", &["-"], &content).await;
        if !written.success {
            return written;
        }

        ActionResult::ok(format!("Removed cron jobs matching: {}", command))
    }

    // ==========================================================================
    // 2. Cron service (unit name varies: cron on Debian, crond on RHEL)
    // ==========================================================================

    pub async fn enable_service(&self) -> ActionResult {
        let result = self.services.enable("cron").await;
        if result.success {
            return result;
        }
        self.services.enable("crond").await
    }

    pub async fn start_service(&self) -> ActionResult {
        let result = self.services.start("cron").await;
        if result.success {
            return result;
        }
        self.services.start("crond").await
    }

    pub async fn status(&self) -> ActionResult {
        let result = self.services.status("cron").await;
        if result.success {
            return result;
        }
        self.services.status("crond").await
    }

    // ==========================================================================
    // 3. System-wide jobs
    // ==========================================================================

    pub async fn add_system_job(
        &self,
        name: &str,
        schedule: &str,
        user: &str,
        command: &str,
        description: &str,
    ) -> ActionResult {
        if !valid_job_name(name) {
            return ActionResult::fail(format!("Invalid job name: '{}'", name), "invalid job name");
        }
        if !valid_schedule(schedule) {
            return ActionResult::fail("Invalid cron schedule format", "invalid schedule format");
        }

        let content = format!("# {}\n{} {} {}\n", description, schedule, user, command);
        write_file(self.runner.as_ref(), &format!("/etc/cron.d/{}", name), &content).await
    }

    pub async fn remove_system_job(&self, name: &str) -> ActionResult {
        if !valid_job_name(name) {
            return ActionResult::fail(format!("Invalid job name: '{}'", name), "invalid job name");
        }
        self.runner
            .run("rm", &["-f", &format!("/etc/cron.d/{}", name)])
            .await
    }

    // ==========================================================================
    // 4. Convenience schedules
    // ==========================================================================

    pub async fn add_daily(&self, hour: u8, minute: u8, command: &str, description: &str) -> ActionResult {
        self.add(&format!("{} {} * * *", minute, hour), command, description)
            .await
    }

    pub async fn add_weekly(
        &self,
        weekday: u8,
        hour: u8,
        minute: u8,
        command: &str,
        description: &str,
    ) -> ActionResult {
        self.add(&format!("{} {} * * {}", minute, hour, weekday), command, description)
            .await
    }

    pub async fn add_monthly(
        &self,
        day: u8,
        hour: u8,
        minute: u8,
        command: &str,
        description: &str,
    ) -> ActionResult {
        self.add(&format!("{} {} {} * *", minute, hour, day), command, description)
            .await
    }

    // ==========================================================================
    // 5. Panel housekeeping
    // ==========================================================================

    pub async fn setup_log_rotation(&self, log_dir: &str) -> ActionResult {
        let policy = format!(
            r#"{log_dir}/*.log {{
    daily
    rotate 30
    compress
    delaycompress
    missingok
    notifempty
    create 644 root root
    postrotate
        systemctl reload ironpanel 2>/dev/null || true
    endscript
}}"#
        );

        write_file(self.runner.as_ref(), "/etc/logrotate.d/ironpanel", &policy).await
    }

    pub async fn setup_system_maintenance(&self) -> ActionResult {
        info!("installing system maintenance schedules");

        let update_check = self
            .add_weekly(
                0,
                2,
                0,
                "/usr/bin/apt update && /usr/bin/apt list --upgradable",
                "Weekly system update check",
            )
            .await;
        if !update_check.success {
            return update_check;
        }

        let log_cleanup = self
            .add_daily(
                1,
                0,
                "find /var/log -name '*.log' -mtime +30 -delete",
                "Daily old log cleanup",
            )
            .await;
        if !log_cleanup.success {
            return log_cleanup;
        }

        let tmp_cleanup = self
            .add_daily(
                1,
                30,
                "find /tmp -type f -mtime +7 -delete",
                "Daily temporary file cleanup",
            )
            .await;
        if !tmp_cleanup.success {
            return tmp_cleanup;
        }

        ActionResult::ok("System maintenance cron jobs added successfully")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::testing::MockRunner;

    #[tokio::test]
    async fn add_then_list_round_trips_the_entry() {
        let runner = Arc::new(MockRunner::with_crontab(None));
        let action = CronAction::new(runner.clone());

        let added = action
            .add("0 3 * * *", "/usr/local/bin/backup.sh", "Nightly backup")
            .await;
        assert!(added.success);

        let listing = action.list().await;
        assert!(listing.success);
        let lines: Vec<&str> = listing.message.lines().collect();
        assert_eq!(lines[0], "# Nightly backup");
        assert_eq!(lines[1], "0 3 * * * /usr/local/bin/backup.sh");
    }

    #[tokio::test]
    async fn add_without_description_omits_comment() {
        let runner = Arc::new(MockRunner::with_crontab(None));
        let action = CronAction::new(runner.clone());

        action.add("*/5 * * * *", "/usr/bin/uptime", "").await;
        let listing = action.list().await;
        assert_eq!(listing.message, "*/5 * * * * /usr/bin/uptime\n");
    }

    #[tokio::test]
    async fn schedule_must_have_exactly_five_fields() {
        let runner = Arc::new(MockRunner::with_crontab(None));
        let action = CronAction::new(runner.clone());

        for bad in ["* * * *", "* * * * * *", "", "daily"] {
            let result = action.add(bad, "/usr/bin/true", "").await;
            assert!(!result.success, "accepted {:?}", bad);
            assert_eq!(result.message, "Invalid cron schedule format");
        }
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn remove_filters_matching_lines_preserving_order() {
        let initial = "# keep me\n\
                       0 1 * * * /usr/bin/keep-first\n\
                       # Nightly backup\n\
                       0 3 * * * /usr/local/bin/backup.sh\n\
                       0 5 * * * /usr/bin/keep-second\n";
        let runner = Arc::new(MockRunner::with_crontab(Some(initial)));
        let action = CronAction::new(runner.clone());

        let removed = action.remove("backup.sh").await;
        assert!(removed.success);

        // Only the line containing the literal substring goes; the
        // orphaned comment and every other line keep their order.
        let listing = action.list().await;
        assert_eq!(
            listing.message,
            "# keep me\n\
             0 1 * * * /usr/bin/keep-first\n\
             # Nightly backup\n\
             0 5 * * * /usr/bin/keep-second\n"
        );
    }

    #[tokio::test]
    async fn remove_without_crontab_fails_cleanly() {
        let runner = Arc::new(MockRunner::with_crontab(None));
        let action = CronAction::new(runner.clone());

        let result = action.remove("anything").await;
        assert!(!result.success);
        assert_eq!(result.message, "No crontab found");
    }

    #[tokio::test]
    async fn service_ops_fall_back_to_crond() {
        let runner = Arc::new(MockRunner::with_handler(|_, args, _| {
            if args.contains(&"cron") {
                ActionResult::fail("", "systemctl exited with exit status: 5")
            } else {
                ActionResult::ok("")
            }
        }));
        let action = CronAction::new(runner.clone());

        let result = action.start_service().await;
        assert!(result.success);
        assert_eq!(
            runner.invocations(),
            vec!["systemctl start cron", "systemctl start crond"]
        );
    }

    #[tokio::test]
    async fn system_job_is_written_to_cron_d() {
        let runner = Arc::new(MockRunner::permissive());
        let action = CronAction::new(runner.clone());

        let result = action
            .add_system_job("certwatch", "0 6 * * *", "root", "/usr/bin/certbot renew", "Renew certs")
            .await;
        assert!(result.success);
        assert_eq!(runner.invocations()[0], "tee /etc/cron.d/certwatch");
    }

    #[tokio::test]
    async fn convenience_schedules_expand_correctly() {
        let runner = Arc::new(MockRunner::with_crontab(None));
        let action = CronAction::new(runner.clone());

        action.add_daily(4, 30, "/usr/bin/task-a", "").await;
        action.add_weekly(1, 2, 15, "/usr/bin/task-b", "").await;
        action.add_monthly(1, 0, 0, "/usr/bin/task-c", "").await;

        let listing = action.list().await.message;
        assert!(listing.contains("30 4 * * * /usr/bin/task-a"));
        assert!(listing.contains("15 2 * * 1 /usr/bin/task-b"));
        assert!(listing.contains("0 0 1 * * /usr/bin/task-c"));
    }

    #[tokio::test]
    async fn logrotate_policy_targets_the_panel_log_dir() {
        let runner = Arc::new(MockRunner::with_handler(|program, args, stdin| {
            if program == "tee" {
                assert_eq!(args, ["/etc/logrotate.d/ironpanel"]);
                assert!(stdin.unwrap().starts_with("/var/log/ironpanel/*.log {"));
            }
            ActionResult::ok("")
        }));
        let action = CronAction::new(runner.clone());

        let result = action.setup_log_rotation("/var/log/ironpanel").await;
        assert!(result.success);
        assert_eq!(runner.invocations(), vec!["tee /etc/logrotate.d/ironpanel"]);
    }

    #[tokio::test]
    async fn maintenance_installs_three_jobs() {
        let runner = Arc::new(MockRunner::with_crontab(None));
        let action = CronAction::new(runner.clone());

        let result = action.setup_system_maintenance().await;
        assert!(result.success);

        let listing = action.list().await.message;
        assert!(listing.contains("Weekly system update check"));
        assert!(listing.contains("Daily old log cleanup"));
        assert!(listing.contains("Daily temporary file cleanup"));
    }
}
