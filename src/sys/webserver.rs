//! Web server procedures: Apache and Nginx install, virtual hosts,
//! full uninstall.
//!
//! Install follows the standard template: probe the package family,
//! install the family's package, enable + start the unit. Vhost
//! configuration renders a literal skeleton, writes it through the
//! executor and reloads with the minimal service action.

use std::sync::Arc;
use tracing::{info, warn};

use crate::sys::exec::{write_file, ActionResult, CommandRunner};
use crate::sys::pkg::{unsupported_distro, PkgFamily};
use crate::sys::service::ServiceController;

/// Rejects identifiers that could escape the config path or inject
/// directives into a rendered skeleton.
pub fn validate_domain(domain: &str) -> Result<(), String> {
    if domain.is_empty() {
        return Err("Domain cannot be empty".to_string());
    }
    if domain.contains("..") || domain.contains('/') || domain.contains('\\') {
        return Err(format!("Path traversal detected in domain: '{}'", domain));
    }
    if !domain
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
    {
        return Err(format!("Invalid characters in domain name: '{}'", domain));
    }
    Ok(())
}

pub struct WebServerAction {
    runner: Arc<dyn CommandRunner>,
    services: ServiceController,
}

impl WebServerAction {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        let services = ServiceController::new(runner.clone());
        Self { runner, services }
    }

    // ==========================================================================
    // 1. Install
    // ==========================================================================

    pub async fn install_apache(&self) -> ActionResult {
        let Some(family) = PkgFamily::detect(self.runner.as_ref()).await else {
            return unsupported_distro();
        };

        info!(family = family.manager(), "installing Apache");

        // Package and unit names differ per family: apache2 vs httpd.
        let (package, unit) = if family.is_debian_family() {
            ("apache2", "apache2")
        } else {
            ("httpd", "httpd")
        };

        let refresh = family.refresh_index(self.runner.as_ref()).await;
        if !refresh.success {
            return refresh;
        }

        let install = family.install(self.runner.as_ref(), &[package]).await;
        if !install.success {
            return install;
        }

        self.enable_and_start(unit).await
    }

    pub async fn install_nginx(&self) -> ActionResult {
        let Some(family) = PkgFamily::detect(self.runner.as_ref()).await else {
            return unsupported_distro();
        };

        info!(family = family.manager(), "installing Nginx");

        let refresh = family.refresh_index(self.runner.as_ref()).await;
        if !refresh.success {
            return refresh;
        }

        let install = family.install(self.runner.as_ref(), &["nginx"]).await;
        if !install.success {
            return install;
        }

        self.enable_and_start("nginx").await
    }

    async fn enable_and_start(&self, unit: &str) -> ActionResult {
        let enable = self.services.enable(unit).await;
        if !enable.success {
            warn!(unit, "enable failed, attempting start anyway");
        }
        self.services.start(unit).await
    }

    // ==========================================================================
    // 2. Virtual hosts
    // ==========================================================================

    pub async fn configure_apache_vhost(&self, domain: &str, docroot: &str) -> ActionResult {
        if let Err(e) = validate_domain(domain) {
            return ActionResult::fail(e, "invalid domain");
        }

        let vhost = format!(
            r#"<VirtualHost *:80>
    ServerName {domain}
    ServerAlias www.{domain}
    DocumentRoot {docroot}

    <Directory {docroot}>
        Options -Indexes +FollowSymLinks
        AllowOverride All
        Require all granted
    </Directory>

    ErrorLog ${{APACHE_LOG_DIR}}/{domain}_error.log
    CustomLog ${{APACHE_LOG_DIR}}/{domain}_access.log combined
</VirtualHost>"#
        );

        let config_path = format!("/etc/apache2/sites-available/{}.conf", domain);
        let written = write_file(self.runner.as_ref(), &config_path, &vhost).await;
        if !written.success {
            return written;
        }

        let enabled = self.runner.run("a2ensite", &[domain]).await;
        if !enabled.success {
            return enabled;
        }

        self.services.reload("apache2").await
    }

    pub async fn configure_nginx_vhost(&self, domain: &str, docroot: &str) -> ActionResult {
        if let Err(e) = validate_domain(domain) {
            return ActionResult::fail(e, "invalid domain");
        }

        let vhost = format!(
            r#"server {{
    listen 80;
    server_name {domain} www.{domain};
    root {docroot};
    index index.php index.html index.htm;

    location / {{
        try_files $uri $uri/ =404;
    }}

    location ~ \.php$ {{
        include snippets/fastcgi-php.conf;
        fastcgi_pass unix:/var/run/php/php-fpm.sock;
    }}

    location ~ /\.ht {{
        deny all;
    }}

    access_log /var/log/nginx/{domain}_access.log;
    error_log /var/log/nginx/{domain}_error.log;
}}"#
        );

        let config_path = format!("/etc/nginx/sites-available/{}", domain);
        let written = write_file(self.runner.as_ref(), &config_path, &vhost).await;
        if !written.success {
            return written;
        }

        let enabled_link = format!("/etc/nginx/sites-enabled/{}", domain);
        let linked = self
            .runner
            .run("ln", &["-sf", &config_path, &enabled_link])
            .await;
        if !linked.success {
            return linked;
        }

        // Refuse to reload over a broken config.
        let checked = self.runner.run("nginx", &["-t"]).await;
        if !checked.success {
            return checked;
        }

        self.services.reload("nginx").await
    }

    // ==========================================================================
    // 3. Uninstall (terminal, irreversible)
    // ==========================================================================

    pub async fn uninstall_apache(&self, confirmation: &str) -> ActionResult {
        if confirmation != "yes" {
            return ActionResult::cancelled("Apache uninstall cancelled");
        }

        let Some(family) = PkgFamily::detect(self.runner.as_ref()).await else {
            return unsupported_distro();
        };

        let (packages, unit, config_dir): (&[&str], &str, &str) = if family.is_debian_family() {
            (&["apache2", "apache2-utils"], "apache2", "/etc/apache2")
        } else {
            (&["httpd", "httpd-tools"], "httpd", "/etc/httpd")
        };

        self.teardown(family, packages, unit, config_dir).await
    }

    pub async fn uninstall_nginx(&self, confirmation: &str) -> ActionResult {
        if confirmation != "yes" {
            return ActionResult::cancelled("Nginx uninstall cancelled");
        }

        let Some(family) = PkgFamily::detect(self.runner.as_ref()).await else {
            return unsupported_distro();
        };

        self.teardown(family, &["nginx"], "nginx", "/etc/nginx").await
    }

    async fn teardown(
        &self,
        family: PkgFamily,
        packages: &[&str],
        unit: &str,
        config_dir: &str,
    ) -> ActionResult {
        info!(unit, "uninstalling web server");

        // Best effort: a dead unit must not block package removal.
        let _ = self.services.stop(unit).await;
        let _ = self.services.disable(unit).await;

        let removed = family.remove(self.runner.as_ref(), packages).await;
        if !removed.success {
            return removed;
        }

        let purged = self.runner.run("rm", &["-rf", config_dir]).await;
        if !purged.success {
            return purged;
        }

        ActionResult::ok(format!("{} removed including configuration", unit))
    }
}
