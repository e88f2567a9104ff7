//! Backup procedures: file-tree archives, database dumps, full-system
//! snapshots and scheduled backup scripts.

use chrono::Local;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::sys::cron::CronAction;
use crate::sys::database::DbEngine;
use crate::sys::exec::{create_directory, dir_exists, file_exists, write_file, ActionResult, CommandRunner};

/// What a scheduled backup script archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupKind {
    Files,
    Database,
    Full,
}

impl FromStr for BackupKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "files" => Ok(Self::Files),
            "database" | "db" => Ok(Self::Database),
            "full" => Ok(Self::Full),
            other => Err(format!("Unsupported backup type: {}", other)),
        }
    }
}

fn valid_backup_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

pub struct BackupAction {
    runner: Arc<dyn CommandRunner>,
    cron: CronAction,
}

impl BackupAction {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        let cron = CronAction::new(runner.clone());
        Self { runner, cron }
    }

    // ==========================================================================
    // 1. One-shot backups
    // ==========================================================================

    pub async fn create_file_backup(&self, source: &str, dest_dir: &str, name: &str) -> ActionResult {
        if !valid_backup_name(name) {
            return ActionResult::fail(format!("Invalid backup name: '{}'", name), "invalid backup name");
        }
        if !dir_exists(self.runner.as_ref(), source).await {
            return ActionResult::fail(
                format!("Source directory does not exist: {}", source),
                "source directory not found",
            );
        }

        let created = create_directory(self.runner.as_ref(), dest_dir).await;
        if !created.success {
            return created;
        }

        let archive = format!("{}/{}_{}.tar.gz", dest_dir, name, timestamp());
        info!(source, archive = archive.as_str(), "creating file backup");

        let result = self
            .runner
            .run("tar", &["-czf", &archive, "-C", source, "."])
            .await;
        if !result.success {
            return result;
        }

        ActionResult::ok(format!("Backup created: {}", archive))
    }

    pub async fn create_database_backup(
        &self,
        name: &str,
        engine: DbEngine,
        dest_dir: &str,
    ) -> ActionResult {
        if !valid_backup_name(name) {
            return ActionResult::fail(format!("Invalid database name: '{}'", name), "invalid backup name");
        }

        let created = create_directory(self.runner.as_ref(), dest_dir).await;
        if !created.success {
            return created;
        }

        let dump = format!("{}/{}_{}.sql", dest_dir, name, timestamp());
        // Redirection needs a shell; the dump itself streams to disk.
        let command = match engine {
            DbEngine::MariaDb => format!("mysqldump {} > '{}'", name, dump),
            DbEngine::PostgreSql => format!("sudo -u postgres pg_dump {} > '{}'", name, dump),
        };

        let result = self.runner.run("sh", &["-c", &command]).await;
        if !result.success {
            return result;
        }

        ActionResult::ok(format!("Database backup created: {}", dump))
    }

    /// Snapshot of the root filesystem minus pseudo-filesystems, mounts
    /// and the backup destination itself.
    pub async fn create_full_backup(&self, dest_dir: &str) -> ActionResult {
        let created = create_directory(self.runner.as_ref(), dest_dir).await;
        if !created.success {
            return created;
        }

        let archive = format!("{}/full_backup_{}.tar.gz", dest_dir, timestamp());
        info!(archive = archive.as_str(), "creating full system backup");

        let exclude_dest = format!("--exclude={}", dest_dir);
        let result = self
            .runner
            .run(
                "tar",
                &[
                    "-czpf",
                    &archive,
                    "--exclude=/proc",
                    "--exclude=/tmp",
                    "--exclude=/mnt",
                    "--exclude=/dev",
                    "--exclude=/sys",
                    "--exclude=/run",
                    "--exclude=/media",
                    "--exclude=/lost+found",
                    &exclude_dest,
                    "-C",
                    "/",
                    ".",
                ],
            )
            .await;
        if !result.success {
            return result;
        }

        ActionResult::ok(format!("Full system backup created: {}", archive))
    }

    // ==========================================================================
    // 2. Restore + housekeeping
    // ==========================================================================

    pub async fn restore_file_backup(&self, archive: &str, target_dir: &str) -> ActionResult {
        if !file_exists(self.runner.as_ref(), archive).await {
            return ActionResult::fail(
                format!("Backup file does not exist: {}", archive),
                "backup file not found",
            );
        }

        let created = create_directory(self.runner.as_ref(), target_dir).await;
        if !created.success {
            return created;
        }

        let result = self
            .runner
            .run("tar", &["-xzf", archive, "-C", target_dir])
            .await;
        if !result.success {
            return result;
        }

        ActionResult::ok(format!("Backup restored to: {}", target_dir))
    }

    pub async fn list_backups(&self, dir: &str) -> ActionResult {
        if !dir_exists(self.runner.as_ref(), dir).await {
            return ActionResult::fail(
                format!("Backup directory does not exist: {}", dir),
                "backup directory not found",
            );
        }
        self.runner.run("ls", &["-la", dir]).await
    }

    pub async fn clean_old_backups(&self, dir: &str, keep_days: u32) -> ActionResult {
        if !dir_exists(self.runner.as_ref(), dir).await {
            return ActionResult::fail(
                format!("Backup directory does not exist: {}", dir),
                "backup directory not found",
            );
        }

        let age = format!("+{}", keep_days);
        let result = self
            .runner
            .run("find", &[dir, "-type", "f", "-mtime", &age, "-delete"])
            .await;
        if !result.success {
            return result;
        }

        ActionResult::ok(format!("Backups older than {} days removed", keep_days))
    }

    // ==========================================================================
    // 3. Scheduled backups
    // ==========================================================================

    /// Installs a backup script under /opt/ironpanel/scripts and wires
    /// it into the crontab. For [`BackupKind::Database`], `source` is
    /// the database name; for [`BackupKind::Full`], it is ignored.
    pub async fn setup_automatic_backup(
        &self,
        name: &str,
        kind: BackupKind,
        source: &str,
        dest_dir: &str,
        schedule: &str,
    ) -> ActionResult {
        if !valid_backup_name(name) {
            return ActionResult::fail(format!("Invalid backup name: '{}'", name), "invalid backup name");
        }

        let created = create_directory(self.runner.as_ref(), "/opt/ironpanel/scripts").await;
        if !created.success {
            return created;
        }

        let body = match kind {
            BackupKind::Files => format!(
                "tar -czf \"{dest}/{name}_$(date +%Y%m%d_%H%M%S).tar.gz\" -C \"{source}\" .",
                dest = dest_dir,
                name = name,
                source = source,
            ),
            BackupKind::Database => format!(
                "mysqldump {source} > \"{dest}/{name}_$(date +%Y%m%d_%H%M%S).sql\"",
                dest = dest_dir,
                name = name,
                source = source,
            ),
            BackupKind::Full => format!(
                "tar -czpf \"{dest}/full_backup_$(date +%Y%m%d_%H%M%S).tar.gz\" \
                 --exclude=/proc --exclude=/tmp --exclude=/mnt --exclude=/dev \
                 --exclude=/sys --exclude=/run --exclude=/media --exclude=/lost+found \
                 --exclude={dest} -C / .",
                dest = dest_dir,
            ),
        };

        let script = format!(
            "#!/bin/sh\n# Automatic backup: {}\nmkdir -p \"{}\"\n{}\n",
            name, dest_dir, body
        );
        let script_path = format!("/opt/ironpanel/scripts/backup_{}.sh", name);

        let written = write_file(self.runner.as_ref(), &script_path, &script).await;
        if !written.success {
            return written;
        }

        let chmod = self.runner.run("chmod", &["+x", &script_path]).await;
        if !chmod.success {
            return chmod;
        }

        let scheduled = self
            .cron
            .add(schedule, &script_path, &format!("Automatic backup: {}", name))
            .await;
        if !scheduled.success {
            return scheduled;
        }

        ActionResult::ok(format!("Automatic backup '{}' scheduled: {}", name, schedule))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::testing::MockRunner;

    #[tokio::test]
    async fn file_backup_archives_into_timestamped_tarball() {
        let runner = Arc::new(MockRunner::permissive());
        let action = BackupAction::new(runner.clone());

        let result = action
            .create_file_backup("/var/www/site", "/backups", "site")
            .await;
        assert!(result.success);
        assert!(result.message.starts_with("Backup created: /backups/site_"));

        let calls = runner.invocations();
        assert_eq!(calls[0], "test -d /var/www/site");
        assert_eq!(calls[1], "mkdir -p /backups");
        let tar = &calls[2];
        assert!(tar.starts_with("tar -czf /backups/site_"));
        assert!(tar.ends_with(".tar.gz -C /var/www/site ."));
    }

    #[tokio::test]
    async fn missing_source_fails_before_any_mutation() {
        let runner = Arc::new(MockRunner::with_handler(|program, _, _| {
            if program == "test" {
                ActionResult::fail("", "test exited with exit status: 1")
            } else {
                ActionResult::ok("")
            }
        }));
        let action = BackupAction::new(runner.clone());

        let result = action.create_file_backup("/nope", "/backups", "x").await;
        assert!(!result.success);
        assert_eq!(runner.call_count(), 1);
    }

    #[tokio::test]
    async fn database_backup_dumps_through_a_shell() {
        let runner = Arc::new(MockRunner::permissive());
        let action = BackupAction::new(runner.clone());

        let result = action
            .create_database_backup("shop", DbEngine::MariaDb, "/backups")
            .await;
        assert!(result.success);

        let dump = runner
            .invocations()
            .into_iter()
            .find(|c| c.starts_with("sh -c"))
            .unwrap();
        assert!(dump.contains("mysqldump shop > '/backups/shop_"));
    }

    #[tokio::test]
    async fn full_backup_excludes_pseudo_filesystems_and_destination() {
        let runner = Arc::new(MockRunner::permissive());
        let action = BackupAction::new(runner.clone());

        let result = action.create_full_backup("/backups").await;
        assert!(result.success);

        let tar = runner
            .invocations()
            .into_iter()
            .find(|c| c.starts_with("tar"))
            .unwrap();
        assert!(tar.contains("--exclude=/proc"));
        assert!(tar.contains("--exclude=/sys"));
        assert!(tar.contains("--exclude=/backups"));
    }

    #[tokio::test]
    async fn restore_requires_existing_archive() {
        let runner = Arc::new(MockRunner::with_present_files(&[]));
        let action = BackupAction::new(runner.clone());

        let result = action.restore_file_backup("/backups/gone.tar.gz", "/restore").await;
        assert!(!result.success);
        assert!(result.message.contains("does not exist"));
    }

    #[tokio::test]
    async fn clean_old_backups_uses_mtime_filter() {
        let runner = Arc::new(MockRunner::permissive());
        let action = BackupAction::new(runner.clone());

        let result = action.clean_old_backups("/backups", 14).await;
        assert!(result.success);
        assert!(runner
            .invocations()
            .contains(&"find /backups -type f -mtime +14 -delete".to_string()));
    }

    #[tokio::test]
    async fn automatic_backup_installs_script_and_cron_entry() {
        let runner = Arc::new(MockRunner::with_crontab(None));
        let action = BackupAction::new(runner.clone());

        let result = action
            .setup_automatic_backup("nightly", BackupKind::Files, "/var/www", "/backups", "0 3 * * *")
            .await;
        assert!(result.success);

        let calls = runner.invocations();
        assert!(calls.contains(&"mkdir -p /opt/ironpanel/scripts".to_string()));
        assert!(calls.contains(&"tee /opt/ironpanel/scripts/backup_nightly.sh".to_string()));
        assert!(calls.contains(&"chmod +x /opt/ironpanel/scripts/backup_nightly.sh".to_string()));

        let crontab = action.cron.list().await.message;
        assert!(crontab.contains("# Automatic backup: nightly"));
        assert!(crontab.contains("0 3 * * * /opt/ironpanel/scripts/backup_nightly.sh"));
    }

    #[test]
    fn backup_kind_parses_aliases() {
        assert_eq!("files".parse::<BackupKind>().unwrap(), BackupKind::Files);
        assert_eq!("db".parse::<BackupKind>().unwrap(), BackupKind::Database);
        assert_eq!("FULL".parse::<BackupKind>().unwrap(), BackupKind::Full);
        assert!("tape".parse::<BackupKind>().is_err());
    }
}
