//! PHP runtime procedures: multi-version install, FPM pools, default
//! interpreter selection.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::sys::exec::{file_exists, write_file, ActionData, ActionResult, CommandRunner};
use crate::sys::pkg::{unsupported_distro, PkgFamily};
use crate::sys::service::ServiceController;

/// Versions the panel knows how to install and probe for.
pub const AVAILABLE_VERSIONS: &[&str] = &[
    "5.6", "7.0", "7.1", "7.2", "7.3", "7.4", "8.0", "8.1", "8.2", "8.3", "8.4",
];

/// Read-model for one installed PHP runtime, derived from filesystem
/// probes and the FPM unit state.
#[derive(Debug, Clone, Serialize)]
pub struct PhpVersion {
    pub version: String,
    pub installed: bool,
    pub fpm_running: bool,
    pub config_path: String,
    pub fpm_path: String,
}

fn known_version(version: &str) -> bool {
    AVAILABLE_VERSIONS.contains(&version)
}

fn major_of(version: &str) -> u32 {
    version.split('.').next().and_then(|m| m.parse().ok()).unwrap_or(0)
}

pub struct PhpAction {
    runner: Arc<dyn CommandRunner>,
    services: ServiceController,
}

impl PhpAction {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        let services = ServiceController::new(runner.clone());
        Self { runner, services }
    }

    // ==========================================================================
    // 1. Install
    // ==========================================================================

    pub async fn install(&self, version: &str) -> ActionResult {
        if !known_version(version) {
            return ActionResult::fail(
                format!("Unknown PHP version: {}", version),
                "unknown PHP version",
            );
        }

        let Some(family) = PkgFamily::detect(self.runner.as_ref()).await else {
            return unsupported_distro();
        };

        info!(version, family = family.manager(), "installing PHP");

        if family.is_debian_family() {
            self.install_debian(family, version).await
        } else {
            self.install_rhel(family, version).await
        }
    }

    async fn install_debian(&self, family: PkgFamily, version: &str) -> ActionResult {
        // Multiple coexisting versions come from the ondrej PPA.
        if !file_exists(self.runner.as_ref(), "/etc/apt/sources.list.d/ondrej-ubuntu-php.list").await
        {
            let repo = self
                .runner
                .run("add-apt-repository", &["-y", "ppa:ondrej/php"])
                .await;
            if !repo.success {
                return repo;
            }

            let refresh = family.refresh_index(self.runner.as_ref()).await;
            if !refresh.success {
                return refresh;
            }
        }

        let mut packages: Vec<String> = [
            "", "-fpm", "-cli", "-common", "-mysql", "-pgsql", "-sqlite3", "-curl", "-gd",
            "-mbstring", "-xml", "-zip", "-bcmath", "-intl", "-json", "-opcache", "-readline",
        ]
        .iter()
        .map(|ext| format!("php{}{}", version, ext))
        .collect();

        // json is built in from PHP 8.0 and has no separate package.
        if major_of(version) >= 8 {
            packages.retain(|p| !p.ends_with("-json"));
        }

        let refs: Vec<&str> = packages.iter().map(String::as_str).collect();
        let install = family.install(self.runner.as_ref(), &refs).await;
        if !install.success {
            return install;
        }

        self.enable_and_start(&format!("php{}-fpm", version)).await
    }

    async fn install_rhel(&self, family: PkgFamily, version: &str) -> ActionResult {
        if !file_exists(self.runner.as_ref(), "/etc/yum.repos.d/epel.repo").await {
            let epel = family.install(self.runner.as_ref(), &["epel-release"]).await;
            if !epel.success {
                return epel;
            }
        }

        if !file_exists(self.runner.as_ref(), "/etc/yum.repos.d/remi.repo").await {
            let remi = family
                .install(
                    self.runner.as_ref(),
                    &["https://rpms.remirepo.net/enterprise/remi-release-8.rpm"],
                )
                .await;
            if !remi.success {
                return remi;
            }
        }

        let stream = format!("remi-php{}", version.replace('.', ""));
        let enabled = self
            .runner
            .run(family.manager(), &["config-manager", "--enable", &stream])
            .await;
        if !enabled.success {
            return enabled;
        }

        let packages = [
            "php", "php-fpm", "php-cli", "php-common", "php-mysqlnd", "php-pgsql", "php-curl",
            "php-gd", "php-mbstring", "php-xml", "php-zip", "php-bcmath", "php-intl",
            "php-opcache",
        ];
        let install = family.install(self.runner.as_ref(), &packages).await;
        if !install.success {
            return install;
        }

        self.enable_and_start("php-fpm").await
    }

    async fn enable_and_start(&self, unit: &str) -> ActionResult {
        let enable = self.services.enable(unit).await;
        if !enable.success {
            warn!(unit, "enable failed, attempting start anyway");
        }
        self.services.start(unit).await
    }

    // ==========================================================================
    // 2. Introspection
    // ==========================================================================

    pub async fn installed_versions(&self) -> ActionResult {
        let mut versions = Vec::new();

        for version in AVAILABLE_VERSIONS {
            let binary = format!("/usr/bin/php{}", version);
            if !file_exists(self.runner.as_ref(), &binary).await {
                continue;
            }

            let unit = format!("php{}-fpm", version);
            let status = self.services.status(&unit).await;
            let fpm_running = match &status.data {
                Some(ActionData::Service(state)) => state.status == "active",
                _ => false,
            };

            versions.push(PhpVersion {
                version: version.to_string(),
                installed: true,
                fpm_running,
                config_path: format!("/etc/php/{}", version),
                fpm_path: format!("/etc/php/{}/fpm", version),
            });
        }

        ActionResult::ok(format!("Found {} installed PHP versions", versions.len()))
            .with_data(ActionData::PhpVersions(versions))
    }

    // ==========================================================================
    // 3. FPM pools + default interpreter
    // ==========================================================================

    pub async fn configure_fpm_pool(&self, version: &str, pool_name: &str) -> ActionResult {
        if !known_version(version) {
            return ActionResult::fail(
                format!("Unknown PHP version: {}", version),
                "unknown PHP version",
            );
        }
        if pool_name.is_empty()
            || !pool_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return ActionResult::fail(
                format!("Invalid pool name: '{}'", pool_name),
                "invalid pool name",
            );
        }

        let pool = format!(
            r#"[{pool_name}]
user = www-data
group = www-data
listen = /var/run/php/php{version}-fpm-{pool_name}.sock
listen.owner = www-data
listen.group = www-data
listen.mode = 0660

pm = dynamic
pm.max_children = 50
pm.start_servers = 5
pm.min_spare_servers = 5
pm.max_spare_servers = 35
pm.max_requests = 500

php_admin_value[sendmail_path] = /usr/sbin/sendmail -t -i -f www@localhost
php_flag[display_errors] = off
php_admin_value[error_log] = /var/log/fpm-php.www.log
php_admin_flag[log_errors] = on
"#
        );

        let pool_path = format!("/etc/php/{}/fpm/pool.d/{}.conf", version, pool_name);
        let written = write_file(self.runner.as_ref(), &pool_path, &pool).await;
        if !written.success {
            return written;
        }

        // Pool changes need a full FPM restart, not a reload.
        self.services.restart(&format!("php{}-fpm", version)).await
    }

    pub async fn set_default_version(&self, version: &str) -> ActionResult {
        let binary = format!("/usr/bin/php{}", version);
        if !file_exists(self.runner.as_ref(), &binary).await {
            return ActionResult::fail(
                format!("PHP {} is not installed", version),
                "PHP version not found",
            );
        }

        let registered = self
            .runner
            .run(
                "update-alternatives",
                &["--install", "/usr/bin/php", "php", &binary, "1"],
            )
            .await;
        if !registered.success {
            return registered;
        }

        self.runner
            .run("update-alternatives", &["--set", "php", &binary])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::testing::MockRunner;

    #[tokio::test]
    async fn debian_install_drops_json_for_php8() {
        let runner = Arc::new(MockRunner::with_present_files(&[
            "/usr/bin/apt",
            "/etc/apt/sources.list.d/ondrej-ubuntu-php.list",
        ]));
        let action = PhpAction::new(runner.clone());

        let result = action.install("8.2").await;
        assert!(result.success);

        let install_line = runner
            .invocations()
            .into_iter()
            .find(|c| c.starts_with("apt install"))
            .unwrap();
        assert!(install_line.contains("php8.2-fpm"));
        assert!(!install_line.contains("php8.2-json"));
    }

    #[tokio::test]
    async fn debian_install_keeps_json_for_php7() {
        let runner = Arc::new(MockRunner::with_present_files(&[
            "/usr/bin/apt",
            "/etc/apt/sources.list.d/ondrej-ubuntu-php.list",
        ]));
        let action = PhpAction::new(runner.clone());

        action.install("7.4").await;
        let install_line = runner
            .invocations()
            .into_iter()
            .find(|c| c.starts_with("apt install"))
            .unwrap();
        assert!(install_line.contains("php7.4-json"));
    }

    #[tokio::test]
    async fn rhel_install_enables_remi_stream() {
        let runner = Arc::new(MockRunner::with_present_files(&[
            "/usr/bin/dnf",
            "/etc/yum.repos.d/epel.repo",
            "/etc/yum.repos.d/remi.repo",
        ]));
        let action = PhpAction::new(runner.clone());

        let result = action.install("8.1").await;
        assert!(result.success);
        assert!(runner
            .invocations()
            .contains(&"dnf config-manager --enable remi-php81".to_string()));
    }

    #[tokio::test]
    async fn unknown_version_is_rejected_up_front() {
        let runner = Arc::new(MockRunner::permissive());
        let action = PhpAction::new(runner.clone());

        let result = action.install("9.9").await;
        assert!(!result.success);
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn installed_versions_probe_binaries_and_fpm() {
        let runner = Arc::new(MockRunner::with_handler(|program, args, _| {
            if program == "test" && args == ["-f", "/usr/bin/php8.2"] {
                return ActionResult::ok("");
            }
            if program == "test" {
                return ActionResult::fail("", "test exited with exit status: 1");
            }
            if program == "systemctl" && args.first() == Some(&"is-active") {
                return ActionResult::ok("active\n");
            }
            if program == "systemctl" && args.first() == Some(&"is-enabled") {
                return ActionResult::ok("enabled\n");
            }
            ActionResult::ok("")
        }));
        let action = PhpAction::new(runner.clone());

        let result = action.installed_versions().await;
        assert_eq!(result.message, "Found 1 installed PHP versions");
        match result.data {
            Some(ActionData::PhpVersions(versions)) => {
                assert_eq!(versions.len(), 1);
                assert_eq!(versions[0].version, "8.2");
                assert!(versions[0].fpm_running);
                assert_eq!(versions[0].fpm_path, "/etc/php/8.2/fpm");
            }
            other => panic!("expected php versions payload, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn fpm_pool_written_then_fpm_restarted() {
        let runner = Arc::new(MockRunner::permissive());
        let action = PhpAction::new(runner.clone());

        let result = action.configure_fpm_pool("8.2", "shop").await;
        assert!(result.success);

        let calls = runner.invocations();
        assert_eq!(calls[0], "tee /etc/php/8.2/fpm/pool.d/shop.conf");
        assert_eq!(calls[1], "systemctl restart php8.2-fpm");
    }

    #[tokio::test]
    async fn default_switch_requires_installed_binary() {
        let runner = Arc::new(MockRunner::with_present_files(&[]));
        let action = PhpAction::new(runner.clone());

        let result = action.set_default_version("8.2").await;
        assert!(!result.success);
        assert!(result.message.contains("not installed"));
    }
}
