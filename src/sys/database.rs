//! Database procedures: MariaDB and PostgreSQL.
//!
//! Engine selection is a closed enum so an unsupported engine is a
//! construction-time error at the front end, not a runtime default case.

use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::sys::exec::{ActionResult, CommandRunner};
use crate::sys::pkg::{unsupported_distro, PkgFamily};
use crate::sys::service::ServiceController;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbEngine {
    MariaDb,
    PostgreSql,
}

impl DbEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MariaDb => "mariadb",
            Self::PostgreSql => "postgresql",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Self::MariaDb => "mariadb",
            Self::PostgreSql => "postgresql",
        }
    }
}

impl FromStr for DbEngine {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Self::MariaDb),
            "postgres" | "postgresql" => Ok(Self::PostgreSql),
            other => Err(format!("Unsupported database type: {}", other)),
        }
    }
}

/// SQL identifiers are interpolated into statements run through the
/// executor; restrict them to a safe alphabet up front.
fn valid_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn valid_password(password: &str) -> bool {
    !password.is_empty() && !password.contains('\'') && !password.contains('\\')
}

pub struct DatabaseAction {
    runner: Arc<dyn CommandRunner>,
    services: ServiceController,
}

impl DatabaseAction {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        let services = ServiceController::new(runner.clone());
        Self { runner, services }
    }

    // ==========================================================================
    // 1. Install
    // ==========================================================================

    pub async fn install(&self, engine: DbEngine) -> ActionResult {
        let Some(family) = PkgFamily::detect(self.runner.as_ref()).await else {
            return unsupported_distro();
        };

        info!(engine = engine.as_str(), family = family.manager(), "installing database engine");

        let refresh = family.refresh_index(self.runner.as_ref()).await;
        if !refresh.success {
            return refresh;
        }

        match engine {
            DbEngine::MariaDb => self.install_mariadb(family).await,
            DbEngine::PostgreSql => self.install_postgresql(family).await,
        }
    }

    async fn install_mariadb(&self, family: PkgFamily) -> ActionResult {
        let packages: &[&str] = if family.is_debian_family() {
            &["mariadb-server", "mariadb-client"]
        } else {
            &["mariadb-server", "mariadb"]
        };

        let install = family.install(self.runner.as_ref(), packages).await;
        if !install.success {
            return install;
        }

        let enable = self.services.enable("mariadb").await;
        if !enable.success {
            warn!("mariadb enable failed, attempting start anyway");
        }
        let start = self.services.start("mariadb").await;
        if !start.success {
            return start;
        }

        self.secure_installation().await
    }

    /// Non-interactive subset of mysql_secure_installation: drop
    /// anonymous accounts and the test database.
    async fn secure_installation(&self) -> ActionResult {
        self.runner
            .run(
                "mysql",
                &[
                    "-e",
                    "DELETE FROM mysql.user WHERE User=''; DROP DATABASE IF EXISTS test; FLUSH PRIVILEGES;",
                ],
            )
            .await
    }

    async fn install_postgresql(&self, family: PkgFamily) -> ActionResult {
        let packages: &[&str] = if family.is_debian_family() {
            &["postgresql", "postgresql-contrib"]
        } else {
            &["postgresql-server", "postgresql-contrib"]
        };

        let install = family.install(self.runner.as_ref(), packages).await;
        if !install.success {
            return install;
        }

        // RHEL ships without an initialized cluster.
        if !family.is_debian_family() {
            let init = self.runner.run("postgresql-setup", &["initdb"]).await;
            if !init.success {
                return init;
            }
        }

        let enable = self.services.enable("postgresql").await;
        if !enable.success {
            warn!("postgresql enable failed, attempting start anyway");
        }
        self.services.start("postgresql").await
    }

    // ==========================================================================
    // 2. Database + user management
    // ==========================================================================

    pub async fn create_database(
        &self,
        name: &str,
        engine: DbEngine,
        username: &str,
        password: &str,
    ) -> ActionResult {
        if !valid_identifier(name) || !valid_identifier(username) {
            return ActionResult::fail(
                format!("Invalid database or user name: '{}' / '{}'", name, username),
                "invalid identifier",
            );
        }
        if !valid_password(password) {
            return ActionResult::fail("Password contains forbidden characters", "invalid password");
        }

        match engine {
            DbEngine::MariaDb => {
                let create = self
                    .runner
                    .run("mysql", &["-e", &format!("CREATE DATABASE IF NOT EXISTS {};", name)])
                    .await;
                if !create.success {
                    return create;
                }

                let grant = format!(
                    "CREATE USER IF NOT EXISTS '{user}'@'localhost' IDENTIFIED BY '{pass}'; \
                     GRANT ALL PRIVILEGES ON {name}.* TO '{user}'@'localhost'; FLUSH PRIVILEGES;",
                    user = username,
                    pass = password,
                    name = name,
                );
                self.runner.run("mysql", &["-e", &grant]).await
            }
            DbEngine::PostgreSql => {
                let user = self
                    .runner
                    .run("sudo", &["-u", "postgres", "createuser", username])
                    .await;
                if !user.success {
                    return user;
                }

                let db = self
                    .runner
                    .run("sudo", &["-u", "postgres", "createdb", "-O", username, name])
                    .await;
                if !db.success {
                    return db;
                }

                let alter = format!("ALTER USER {} PASSWORD '{}';", username, password);
                self.runner
                    .run("sudo", &["-u", "postgres", "psql", "-c", &alter])
                    .await
            }
        }
    }

    pub async fn drop_database(&self, name: &str, engine: DbEngine) -> ActionResult {
        if !valid_identifier(name) {
            return ActionResult::fail(format!("Invalid database name: '{}'", name), "invalid identifier");
        }

        match engine {
            DbEngine::MariaDb => {
                self.runner
                    .run("mysql", &["-e", &format!("DROP DATABASE IF EXISTS {};", name)])
                    .await
            }
            DbEngine::PostgreSql => {
                self.runner
                    .run("sudo", &["-u", "postgres", "dropdb", name])
                    .await
            }
        }
    }

    pub async fn list_databases(&self, engine: DbEngine) -> ActionResult {
        match engine {
            DbEngine::MariaDb => self.runner.run("mysql", &["-e", "SHOW DATABASES;"]).await,
            DbEngine::PostgreSql => {
                self.runner
                    .run("sudo", &["-u", "postgres", "psql", "-l"])
                    .await
            }
        }
    }

    // ==========================================================================
    // 3. Dump / restore
    // ==========================================================================

    pub async fn backup_database(&self, name: &str, engine: DbEngine, path: &str) -> ActionResult {
        if !valid_identifier(name) {
            return ActionResult::fail(format!("Invalid database name: '{}'", name), "invalid identifier");
        }

        // Redirection needs a shell; the dump itself streams to disk.
        let command = match engine {
            DbEngine::MariaDb => format!("mysqldump {} > '{}'", name, path),
            DbEngine::PostgreSql => format!("sudo -u postgres pg_dump {} > '{}'", name, path),
        };
        self.runner.run("sh", &["-c", &command]).await
    }

    pub async fn restore_database(&self, name: &str, engine: DbEngine, path: &str) -> ActionResult {
        if !valid_identifier(name) {
            return ActionResult::fail(format!("Invalid database name: '{}'", name), "invalid identifier");
        }

        let command = match engine {
            DbEngine::MariaDb => format!("mysql {} < '{}'", name, path),
            DbEngine::PostgreSql => format!("sudo -u postgres psql {} < '{}'", name, path),
        };
        self.runner.run("sh", &["-c", &command]).await
    }

    // ==========================================================================
    // 4. phpMyAdmin + uninstall
    // ==========================================================================

    /// Debian-only: preseeds debconf so the install runs unattended.
    pub async fn install_phpmyadmin(&self) -> ActionResult {
        let Some(family) = PkgFamily::detect(self.runner.as_ref()).await else {
            return unsupported_distro();
        };

        if !family.is_debian_family() {
            return ActionResult::fail(
                "Manual phpMyAdmin installation required for this distribution",
                "automatic installation not supported",
            );
        }

        let preseed = "phpmyadmin phpmyadmin/dbconfig-install boolean true\n\
                       phpmyadmin phpmyadmin/reconfigure-webserver multiselect apache2\n";
        let seeded = self
            .runner
            .run_with_stdin("debconf-set-selections", &[], preseed)
            .await;
        if !seeded.success {
            return seeded;
        }

        family
            .install(
                self.runner.as_ref(),
                &["phpmyadmin", "php-mbstring", "php-zip", "php-gd", "php-curl"],
            )
            .await
    }

    pub async fn uninstall(&self, engine: DbEngine, confirmation: &str) -> ActionResult {
        if confirmation != "yes" {
            return ActionResult::cancelled(format!("{} uninstall cancelled", engine.as_str()));
        }

        let Some(family) = PkgFamily::detect(self.runner.as_ref()).await else {
            return unsupported_distro();
        };

        info!(engine = engine.as_str(), "uninstalling database engine");

        let _ = self.services.stop(engine.unit()).await;
        let _ = self.services.disable(engine.unit()).await;

        let packages: &[&str] = match engine {
            DbEngine::MariaDb => &["mariadb-server"],
            DbEngine::PostgreSql => {
                if family.is_debian_family() {
                    &["postgresql"]
                } else {
                    &["postgresql-server"]
                }
            }
        };

        let removed = family.remove(self.runner.as_ref(), packages).await;
        if !removed.success {
            return removed;
        }

        ActionResult::ok(format!("{} removed", engine.as_str()))
    }
}
