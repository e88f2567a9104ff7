//! Firewall procedures: iptables rule composition, fail2ban jails,
//! ipset address lists.

use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::sys::exec::{file_exists, write_file, ActionResult, CommandRunner};
use crate::sys::pkg::{unsupported_distro, PkgFamily};
use crate::sys::service::ServiceController;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    Allow,
    Deny,
}

impl RuleAction {
    fn target(&self) -> &'static str {
        match self {
            Self::Allow => "ACCEPT",
            Self::Deny => "DROP",
        }
    }
}

impl FromStr for RuleAction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "deny" => Ok(Self::Deny),
            other => Err(format!("Unsupported rule action: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            other => Err(format!("Unsupported protocol: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpSetKind {
    HashIp,
    HashNet,
}

impl IpSetKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::HashIp => "hash:ip",
            Self::HashNet => "hash:net",
        }
    }
}

impl FromStr for IpSetKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "hash:ip" | "ip" => Ok(Self::HashIp),
            "hash:net" | "net" => Ok(Self::HashNet),
            other => Err(format!("Unsupported ipset type: {}", other)),
        }
    }
}

fn valid_address(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_hexdigit() || c == '.' || c == ':' || c == '/')
}

fn valid_name(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub struct FirewallAction {
    runner: Arc<dyn CommandRunner>,
    services: ServiceController,
}

impl FirewallAction {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        let services = ServiceController::new(runner.clone());
        Self { runner, services }
    }

    // ==========================================================================
    // 1. iptables
    // ==========================================================================

    pub async fn install(&self) -> ActionResult {
        let Some(family) = PkgFamily::detect(self.runner.as_ref()).await else {
            return unsupported_distro();
        };

        // RHEL persists rules through its own service; only the apt
        // family needs the persistence package.
        if family.is_debian_family() {
            let persist = family
                .install(self.runner.as_ref(), &["iptables-persistent"])
                .await;
            if !persist.success {
                return persist;
            }
        }

        self.setup_basic_rules().await
    }

    /// Baseline policy: loopback + established in, SSH/HTTP/HTTPS and
    /// the panel port open, everything else dropped.
    pub async fn setup_basic_rules(&self) -> ActionResult {
        info!("applying baseline firewall policy");

        let rules: &[&[&str]] = &[
            &["-A", "INPUT", "-i", "lo", "-j", "ACCEPT"],
            &["-A", "INPUT", "-m", "state", "--state", "ESTABLISHED,RELATED", "-j", "ACCEPT"],
            &["-A", "INPUT", "-p", "tcp", "--dport", "22", "-j", "ACCEPT"],
            &["-A", "INPUT", "-p", "tcp", "--dport", "80", "-j", "ACCEPT"],
            &["-A", "INPUT", "-p", "tcp", "--dport", "443", "-j", "ACCEPT"],
            &["-A", "INPUT", "-p", "tcp", "--dport", "8080", "-j", "ACCEPT"],
            &["-P", "INPUT", "DROP"],
            &["-P", "OUTPUT", "ACCEPT"],
            &["-P", "FORWARD", "ACCEPT"],
        ];

        for rule in rules {
            let applied = self.runner.run("iptables", rule).await;
            if !applied.success {
                return applied;
            }
        }

        self.save_rules().await
    }

    pub async fn add_rule(
        &self,
        action: RuleAction,
        protocol: Protocol,
        port: Option<u16>,
        source: Option<&str>,
    ) -> ActionResult {
        if let Some(source) = source {
            if !valid_address(source) {
                return ActionResult::fail(
                    format!("Invalid source address: '{}'", source),
                    "invalid source",
                );
            }
        }

        let mut args: Vec<String> = vec![
            "-A".into(),
            "INPUT".into(),
            "-p".into(),
            protocol.as_str().into(),
        ];
        if let Some(port) = port {
            args.push("--dport".into());
            args.push(port.to_string());
        }
        if let Some(source) = source {
            args.push("-s".into());
            args.push(source.into());
        }
        args.push("-j".into());
        args.push(action.target().into());

        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let applied = self.runner.run("iptables", &refs).await;
        if !applied.success {
            return applied;
        }

        self.save_rules().await
    }

    /// Removes one INPUT rule by its `--line-numbers` position.
    pub async fn remove_rule(&self, rule_number: u32) -> ActionResult {
        let removed = self
            .runner
            .run("iptables", &["-D", "INPUT", &rule_number.to_string()])
            .await;
        if !removed.success {
            return removed;
        }

        self.save_rules().await
    }

    pub async fn list_rules(&self) -> ActionResult {
        self.runner
            .run("iptables", &["-L", "-n", "--line-numbers"])
            .await
    }

    pub async fn save_rules(&self) -> ActionResult {
        if file_exists(self.runner.as_ref(), "/usr/sbin/iptables-save").await {
            return self
                .runner
                .run("sh", &["-c", "iptables-save > /etc/iptables/rules.v4"])
                .await;
        }
        ActionResult::ok("Rules saved in memory")
    }

    pub async fn restore_rules(&self) -> ActionResult {
        if !file_exists(self.runner.as_ref(), "/etc/iptables/rules.v4").await {
            return ActionResult::fail("No saved rules found", "rules file not found");
        }
        self.runner
            .run("iptables-restore", &["/etc/iptables/rules.v4"])
            .await
    }

    /// Opens the policies before flushing so the host is not locked out
    /// mid-flush.
    pub async fn flush_rules(&self) -> ActionResult {
        for chain in ["INPUT", "OUTPUT", "FORWARD"] {
            let opened = self.runner.run("iptables", &["-P", chain, "ACCEPT"]).await;
            if !opened.success {
                warn!(chain, "failed to open policy before flush");
            }
        }

        let flushed = self.runner.run("iptables", &["-F"]).await;
        if !flushed.success {
            return flushed;
        }

        self.runner.run("iptables", &["-X"]).await
    }

    // ==========================================================================
    // 2. fail2ban
    // ==========================================================================

    pub async fn install_fail2ban(&self) -> ActionResult {
        let Some(family) = PkgFamily::detect(self.runner.as_ref()).await else {
            return unsupported_distro();
        };

        info!(family = family.manager(), "installing fail2ban");

        let install = family.install(self.runner.as_ref(), &["fail2ban"]).await;
        if !install.success {
            return install;
        }

        self.configure_fail2ban().await
    }

    pub async fn configure_fail2ban(&self) -> ActionResult {
        let jails = r#"[DEFAULT]
bantime = 3600
findtime = 600
maxretry = 5
backend = auto

[sshd]
enabled = true
port = ssh
filter = sshd
logpath = /var/log/auth.log
maxretry = 3

[apache-auth]
enabled = true
port = http,https
filter = apache-auth
logpath = /var/log/apache2/*error.log
maxretry = 6

[apache-badbots]
enabled = true
port = http,https
filter = apache-badbots
logpath = /var/log/apache2/*access.log
maxretry = 2

[nginx-http-auth]
enabled = true
port = http,https
filter = nginx-http-auth
logpath = /var/log/nginx/error.log
maxretry = 6

[nginx-badbots]
enabled = true
port = http,https
filter = nginx-badbots
logpath = /var/log/nginx/*access.log
maxretry = 2"#;

        let written = write_file(self.runner.as_ref(), "/etc/fail2ban/jail.local", jails).await;
        if !written.success {
            return written;
        }

        let enable = self.services.enable("fail2ban").await;
        if !enable.success {
            warn!("fail2ban enable failed, attempting start anyway");
        }
        self.services.start("fail2ban").await
    }

    pub async fn fail2ban_status(&self) -> ActionResult {
        self.runner.run("fail2ban-client", &["status"]).await
    }

    pub async fn ban_ip(&self, ip: &str, jail: &str) -> ActionResult {
        if !valid_address(ip) || !valid_name(jail) {
            return ActionResult::fail(
                format!("Invalid ip or jail: '{}' / '{}'", ip, jail),
                "invalid argument",
            );
        }
        self.runner
            .run("fail2ban-client", &["set", jail, "banip", ip])
            .await
    }

    pub async fn unban_ip(&self, ip: &str, jail: &str) -> ActionResult {
        if !valid_address(ip) || !valid_name(jail) {
            return ActionResult::fail(
                format!("Invalid ip or jail: '{}' / '{}'", ip, jail),
                "invalid argument",
            );
        }
        self.runner
            .run("fail2ban-client", &["set", jail, "unbanip", ip])
            .await
    }

    // ==========================================================================
    // 3. ipset
    // ==========================================================================

    pub async fn install_ipset(&self) -> ActionResult {
        let Some(family) = PkgFamily::detect(self.runner.as_ref()).await else {
            return unsupported_distro();
        };
        family.install(self.runner.as_ref(), &["ipset"]).await
    }

    pub async fn create_set(&self, name: &str, kind: IpSetKind) -> ActionResult {
        if !valid_name(name) {
            return ActionResult::fail(format!("Invalid set name: '{}'", name), "invalid set name");
        }
        self.runner
            .run("ipset", &["create", name, kind.as_str()])
            .await
    }

    pub async fn add_to_set(&self, name: &str, ip: &str) -> ActionResult {
        if !valid_name(name) || !valid_address(ip) {
            return ActionResult::fail(
                format!("Invalid set or ip: '{}' / '{}'", name, ip),
                "invalid argument",
            );
        }
        self.runner.run("ipset", &["add", name, ip]).await
    }

    pub async fn remove_from_set(&self, name: &str, ip: &str) -> ActionResult {
        if !valid_name(name) || !valid_address(ip) {
            return ActionResult::fail(
                format!("Invalid set or ip: '{}' / '{}'", name, ip),
                "invalid argument",
            );
        }
        self.runner.run("ipset", &["del", name, ip]).await
    }

    pub async fn list_sets(&self) -> ActionResult {
        self.runner.run("ipset", &["list"]).await
    }
}
