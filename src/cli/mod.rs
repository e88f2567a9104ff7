//! Command-line surface. Every subcommand maps onto one orchestration
//! procedure; output is the rendered [`ActionResult`].

use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::sync::Arc;

use crate::auth::{require_root, PrivilegeError};
use crate::config::PanelConfig;
use crate::sys::backup::{BackupAction, BackupKind};
use crate::sys::cron::CronAction;
use crate::sys::database::{DatabaseAction, DbEngine};
use crate::sys::exec::{ActionResult, CommandRunner};
use crate::sys::firewall::{FirewallAction, IpSetKind, Protocol, RuleAction};
use crate::sys::php::PhpAction;
use crate::sys::service::{ServiceController, MANAGED_SERVICES};
use crate::sys::ssl::{DnsProvider, SslAction};
use crate::sys::webserver::WebServerAction;

#[derive(Parser)]
#[command(name = "ironpanel", version, about = "Single-host Linux server administration panel")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Apache web server management
    Apache {
        #[command(subcommand)]
        action: WebServerCommand,
    },
    /// Nginx web server management
    Nginx {
        #[command(subcommand)]
        action: WebServerCommand,
    },
    /// PHP runtime management
    Php {
        #[command(subcommand)]
        action: PhpCommand,
    },
    /// Database management
    Db {
        #[command(subcommand)]
        action: DbCommand,
    },
    /// SSL certificate management
    Ssl {
        #[command(subcommand)]
        action: SslCommand,
    },
    /// Firewall, fail2ban and ipset management
    Firewall {
        #[command(subcommand)]
        action: FirewallCommand,
    },
    /// Cron job management
    Cron {
        #[command(subcommand)]
        action: CronCommand,
    },
    /// Backup management
    Backup {
        #[command(subcommand)]
        action: BackupCommand,
    },
    /// Status overview of managed services
    Status,
    /// Start the web panel
    Web {
        /// Bind address, overriding IRONPANEL_LISTEN_ADDR
        #[arg(long)]
        host: Option<String>,
        /// Bind port, overriding IRONPANEL_LISTEN_ADDR
        #[arg(long)]
        port: Option<u16>,
    },
}

impl Command {
    /// Read-only commands skip the root gate; everything that mutates
    /// the host requires effective UID 0.
    fn requires_root(&self) -> bool {
        match self {
            Command::Status => false,
            Command::Php { action: PhpCommand::List } => false,
            Command::Db { action: DbCommand::List { .. } } => false,
            Command::Ssl { action: SslCommand::List } => false,
            Command::Firewall {
                action: FirewallCommand::List | FirewallCommand::Fail2banStatus | FirewallCommand::IpsetList,
            } => false,
            Command::Cron {
                action: CronCommand::List | CronCommand::ListSystem | CronCommand::Status,
            } => false,
            Command::Backup { action: BackupCommand::List { .. } } => false,
            _ => true,
        }
    }
}

#[derive(Subcommand)]
pub enum WebServerCommand {
    /// Install the web server and start it
    Install,
    /// Configure a virtual host
    Vhost { domain: String, docroot: String },
    /// Remove the web server and its configuration
    Uninstall,
}

#[derive(Subcommand)]
pub enum PhpCommand {
    /// Install a PHP version with the common extension set
    Install { version: String },
    /// List installed PHP versions
    List,
    /// Configure an FPM pool
    Pool { version: String, name: String },
    /// Switch the default php binary
    Default { version: String },
}

#[derive(Subcommand)]
pub enum DbCommand {
    /// Install a database engine
    Install { engine: DbEngine },
    /// Create a database and grant a user access
    Create {
        name: String,
        engine: DbEngine,
        username: String,
        password: String,
    },
    /// Drop a database
    Drop { name: String, engine: DbEngine },
    /// List databases
    List { engine: DbEngine },
    /// Dump a database to a file
    Backup {
        name: String,
        engine: DbEngine,
        path: String,
    },
    /// Restore a database from a dump
    Restore {
        name: String,
        engine: DbEngine,
        path: String,
    },
    /// Install phpMyAdmin (Debian family only)
    Phpmyadmin,
    /// Remove a database engine
    Uninstall { engine: DbEngine },
}

#[derive(Subcommand)]
pub enum SslCommand {
    /// Install certbot
    Install,
    /// Issue a certificate via webroot challenge
    Issue {
        domain: String,
        email: String,
        webroot: String,
    },
    /// Issue a wildcard certificate via DNS challenge
    Wildcard {
        domain: String,
        email: String,
        provider: DnsProvider,
    },
    /// Renew all certificates
    Renew,
    /// List certificates known to certbot
    List,
    /// Revoke a certificate
    Revoke { domain: String },
    /// Install the daily renewal cron job
    AutoRenew,
}

#[derive(Subcommand)]
pub enum FirewallCommand {
    /// Install iptables tooling and apply the baseline rule set
    Install,
    /// Apply the baseline rule set
    BasicRules,
    /// Add a filter rule
    Add {
        action: RuleAction,
        protocol: Protocol,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        source: Option<String>,
    },
    /// Remove an INPUT rule by number
    Remove { rule_number: u32 },
    /// List rules with numbers
    List,
    /// Persist the active rule set
    Save,
    /// Restore the persisted rule set
    Restore,
    /// Flush all rules and open the default policies
    Flush,
    /// Install fail2ban
    Fail2banInstall,
    /// Write the jail configuration and restart fail2ban
    Fail2banConfigure,
    /// Show fail2ban status
    Fail2banStatus,
    /// Ban an address in a jail
    Ban {
        ip: String,
        #[arg(long, default_value = "sshd")]
        jail: String,
    },
    /// Unban an address
    Unban {
        ip: String,
        #[arg(long, default_value = "sshd")]
        jail: String,
    },
    /// Install ipset
    IpsetInstall,
    /// Create a named set
    IpsetCreate { name: String, kind: IpSetKind },
    /// Add an address to a set
    IpsetAdd { name: String, ip: String },
    /// Remove an address from a set
    IpsetDel { name: String, ip: String },
    /// List sets
    IpsetList,
}

#[derive(Subcommand)]
pub enum CronCommand {
    /// Show the root crontab
    List,
    /// Show /etc/crontab and /etc/cron.d
    ListSystem,
    /// Add a crontab entry
    Add {
        schedule: String,
        command: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Remove entries containing a command substring
    Remove { command: String },
    /// Enable the cron service
    Enable,
    /// Start the cron service
    Start,
    /// Show cron service status
    Status,
    /// Install a /etc/cron.d job
    SystemAdd {
        name: String,
        schedule: String,
        user: String,
        command: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Remove a /etc/cron.d job
    SystemRemove { name: String },
    /// Install the panel logrotate policy
    Logrotate,
    /// Install maintenance schedules
    Maintenance,
}

#[derive(Subcommand)]
pub enum BackupCommand {
    /// Archive a directory
    Files {
        source: String,
        name: String,
        #[arg(long)]
        dest: Option<String>,
    },
    /// Dump a database
    Database {
        name: String,
        engine: DbEngine,
        #[arg(long)]
        dest: Option<String>,
    },
    /// Snapshot the root filesystem
    Full {
        #[arg(long)]
        dest: Option<String>,
    },
    /// Unpack an archive into a directory
    Restore { archive: String, target: String },
    /// List backup archives
    List {
        #[arg(long)]
        dir: Option<String>,
    },
    /// Delete archives older than N days
    Clean {
        #[arg(long)]
        dir: Option<String>,
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    /// Install a scheduled backup script
    Schedule {
        name: String,
        kind: BackupKind,
        source: String,
        schedule: String,
        #[arg(long)]
        dest: Option<String>,
    },
}

// ==============================================================================
// Dispatch
// ==============================================================================

/// Renders one result and maps it to a process exit code.
fn handle_result(result: &ActionResult) -> i32 {
    if result.success {
        println!("✓ {}", result.message.trim_end());
        if let Some(data) = &result.data {
            match serde_json::to_string_pretty(data) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("failed to render payload: {}", e),
            }
        }
        0
    } else {
        eprintln!("✗ {}", result.message.trim_end());
        if let Some(error) = &result.error {
            eprintln!("  {}", error);
        }
        1
    }
}

/// Reads the confirmation line for destructive commands.
fn read_confirmation(prompt: &str) -> String {
    println!("{}", prompt);
    println!("Type 'yes' to continue:");
    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line).is_err() {
        return String::new();
    }
    line.trim().to_string()
}

pub async fn execute(cli: Cli, runner: Arc<dyn CommandRunner>, config: PanelConfig) -> i32 {
    execute_with_gate(cli, runner, config, require_root).await
}

/// Dispatch with the privilege gate injected, so the precondition can
/// be exercised without changing the process UID.
async fn execute_with_gate(
    cli: Cli,
    runner: Arc<dyn CommandRunner>,
    config: PanelConfig,
    gate: fn() -> Result<(), PrivilegeError>,
) -> i32 {
    if cli.command.requires_root() {
        if let Err(e) = gate() {
            eprintln!("✗ {}", e);
            return 1;
        }
    }

    let result = match cli.command {
        Command::Apache { action } => {
            let web = WebServerAction::new(runner);
            match action {
                WebServerCommand::Install => web.install_apache().await,
                WebServerCommand::Vhost { domain, docroot } => {
                    web.configure_apache_vhost(&domain, &docroot).await
                }
                WebServerCommand::Uninstall => {
                    let confirmation =
                        read_confirmation("This removes Apache and its configuration.");
                    web.uninstall_apache(&confirmation).await
                }
            }
        }
        Command::Nginx { action } => {
            let web = WebServerAction::new(runner);
            match action {
                WebServerCommand::Install => web.install_nginx().await,
                WebServerCommand::Vhost { domain, docroot } => {
                    web.configure_nginx_vhost(&domain, &docroot).await
                }
                WebServerCommand::Uninstall => {
                    let confirmation =
                        read_confirmation("This removes Nginx and its configuration.");
                    web.uninstall_nginx(&confirmation).await
                }
            }
        }
        Command::Php { action } => {
            let php = PhpAction::new(runner);
            match action {
                PhpCommand::Install { version } => php.install(&version).await,
                PhpCommand::List => php.installed_versions().await,
                PhpCommand::Pool { version, name } => php.configure_fpm_pool(&version, &name).await,
                PhpCommand::Default { version } => php.set_default_version(&version).await,
            }
        }
        Command::Db { action } => {
            let db = DatabaseAction::new(runner);
            match action {
                DbCommand::Install { engine } => db.install(engine).await,
                DbCommand::Create {
                    name,
                    engine,
                    username,
                    password,
                } => db.create_database(&name, engine, &username, &password).await,
                DbCommand::Drop { name, engine } => db.drop_database(&name, engine).await,
                DbCommand::List { engine } => db.list_databases(engine).await,
                DbCommand::Backup { name, engine, path } => {
                    db.backup_database(&name, engine, &path).await
                }
                DbCommand::Restore { name, engine, path } => {
                    db.restore_database(&name, engine, &path).await
                }
                DbCommand::Phpmyadmin => db.install_phpmyadmin().await,
                DbCommand::Uninstall { engine } => {
                    let confirmation = read_confirmation(
                        "This removes the database engine. Data directories are kept.",
                    );
                    db.uninstall(engine, &confirmation).await
                }
            }
        }
        Command::Ssl { action } => {
            let ssl = SslAction::new(runner);
            match action {
                SslCommand::Install => ssl.install_certbot().await,
                SslCommand::Issue {
                    domain,
                    email,
                    webroot,
                } => ssl.issue_certificate(&domain, &email, &webroot).await,
                SslCommand::Wildcard {
                    domain,
                    email,
                    provider,
                } => ssl.issue_wildcard(&domain, &email, provider).await,
                SslCommand::Renew => ssl.renew_all().await,
                SslCommand::List => ssl.list_certificates().await,
                SslCommand::Revoke { domain } => ssl.revoke(&domain).await,
                SslCommand::AutoRenew => ssl.setup_auto_renewal().await,
            }
        }
        Command::Firewall { action } => {
            let firewall = FirewallAction::new(runner);
            match action {
                FirewallCommand::Install => firewall.install().await,
                FirewallCommand::BasicRules => firewall.setup_basic_rules().await,
                FirewallCommand::Add {
                    action,
                    protocol,
                    port,
                    source,
                } => firewall.add_rule(action, protocol, port, source.as_deref()).await,
                FirewallCommand::Remove { rule_number } => firewall.remove_rule(rule_number).await,
                FirewallCommand::List => firewall.list_rules().await,
                FirewallCommand::Save => firewall.save_rules().await,
                FirewallCommand::Restore => firewall.restore_rules().await,
                FirewallCommand::Flush => firewall.flush_rules().await,
                FirewallCommand::Fail2banInstall => firewall.install_fail2ban().await,
                FirewallCommand::Fail2banConfigure => firewall.configure_fail2ban().await,
                FirewallCommand::Fail2banStatus => firewall.fail2ban_status().await,
                FirewallCommand::Ban { ip, jail } => firewall.ban_ip(&ip, &jail).await,
                FirewallCommand::Unban { ip, jail } => firewall.unban_ip(&ip, &jail).await,
                FirewallCommand::IpsetInstall => firewall.install_ipset().await,
                FirewallCommand::IpsetCreate { name, kind } => {
                    firewall.create_set(&name, kind).await
                }
                FirewallCommand::IpsetAdd { name, ip } => firewall.add_to_set(&name, &ip).await,
                FirewallCommand::IpsetDel { name, ip } => {
                    firewall.remove_from_set(&name, &ip).await
                }
                FirewallCommand::IpsetList => firewall.list_sets().await,
            }
        }
        Command::Cron { action } => {
            let cron = CronAction::new(runner);
            match action {
                CronCommand::List => cron.list().await,
                CronCommand::ListSystem => cron.list_system().await,
                CronCommand::Add {
                    schedule,
                    command,
                    description,
                } => cron.add(&schedule, &command, &description).await,
                CronCommand::Remove { command } => cron.remove(&command).await,
                CronCommand::Enable => cron.enable_service().await,
                CronCommand::Start => cron.start_service().await,
                CronCommand::Status => cron.status().await,
                CronCommand::SystemAdd {
                    name,
                    schedule,
                    user,
                    command,
                    description,
                } => {
                    cron.add_system_job(&name, &schedule, &user, &command, &description)
                        .await
                }
                CronCommand::SystemRemove { name } => cron.remove_system_job(&name).await,
                CronCommand::Logrotate => cron.setup_log_rotation(&config.log_dir).await,
                CronCommand::Maintenance => cron.setup_system_maintenance().await,
            }
        }
        Command::Backup { action } => {
            let backup = BackupAction::new(runner);
            let default_dir = config.backup_dir.clone();
            match action {
                BackupCommand::Files { source, name, dest } => {
                    backup
                        .create_file_backup(&source, dest.as_deref().unwrap_or(&default_dir), &name)
                        .await
                }
                BackupCommand::Database { name, engine, dest } => {
                    backup
                        .create_database_backup(&name, engine, dest.as_deref().unwrap_or(&default_dir))
                        .await
                }
                BackupCommand::Full { dest } => {
                    backup
                        .create_full_backup(dest.as_deref().unwrap_or(&default_dir))
                        .await
                }
                BackupCommand::Restore { archive, target } => {
                    backup.restore_file_backup(&archive, &target).await
                }
                BackupCommand::List { dir } => {
                    backup.list_backups(dir.as_deref().unwrap_or(&default_dir)).await
                }
                BackupCommand::Clean { dir, days } => {
                    backup
                        .clean_old_backups(dir.as_deref().unwrap_or(&default_dir), days)
                        .await
                }
                BackupCommand::Schedule {
                    name,
                    kind,
                    source,
                    schedule,
                    dest,
                } => {
                    backup
                        .setup_automatic_backup(
                            &name,
                            kind,
                            &source,
                            dest.as_deref().unwrap_or(&default_dir),
                            &schedule,
                        )
                        .await
                }
            }
        }
        Command::Status => return status_overview(runner).await,
        Command::Web { host, port } => {
            let mut config = config;
            if let Some(host) = host {
                match host.parse() {
                    Ok(ip) => config.listen_addr.set_ip(ip),
                    Err(_) => {
                        eprintln!("✗ invalid host: {}", host);
                        return 1;
                    }
                }
            }
            if let Some(port) = port {
                config.listen_addr.set_port(port);
            }
            return serve_panel(runner, config).await;
        }
    };

    handle_result(&result)
}

async fn status_overview(runner: Arc<dyn CommandRunner>) -> i32 {
    let controller = ServiceController::new(runner);

    for name in MANAGED_SERVICES {
        let result = controller.status(name).await;
        if result.success {
            println!("✓ {}", result.message.trim_end());
        } else {
            println!("✗ Service {} is inactive or not installed", name);
        }
    }

    0
}

async fn serve_panel(runner: Arc<dyn CommandRunner>, config: PanelConfig) -> i32 {
    let oracle = Arc::new(crate::auth::PamOracle::new(config.pam_service.clone()));
    let state = Arc::new(crate::web::AppState::new(runner, oracle, config));

    match crate::web::serve(state).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("✗ web panel failed: {}", e);
            1
        }
    }
}
