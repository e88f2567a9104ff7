//! Certificate procedures around certbot: install, issue, renew,
//! revoke, and a tolerant parser for `certbot certificates` output.

use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::sys::exec::{file_exists, ActionData, ActionResult, CommandRunner};
use crate::sys::pkg::{unsupported_distro, PkgFamily};
use crate::sys::webserver::validate_domain;

/// Read-model parsed from `certbot certificates`; certbot remains the
/// system of record.
#[derive(Debug, Clone, Serialize)]
pub struct Certificate {
    pub domain: String,
    pub cert_type: String,
    pub issuer: String,
    pub valid_until: String,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsProvider {
    Cloudflare,
    Route53,
    DigitalOcean,
}

impl DnsProvider {
    fn plugin_package(&self) -> &'static str {
        match self {
            Self::Cloudflare => "python3-certbot-dns-cloudflare",
            Self::Route53 => "python3-certbot-dns-route53",
            Self::DigitalOcean => "python3-certbot-dns-digitalocean",
        }
    }

    fn challenge_flag(&self) -> &'static str {
        match self {
            Self::Cloudflare => "--dns-cloudflare",
            Self::Route53 => "--dns-route53",
            Self::DigitalOcean => "--dns-digitalocean",
        }
    }
}

impl FromStr for DnsProvider {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "cloudflare" => Ok(Self::Cloudflare),
            "route53" => Ok(Self::Route53),
            "digitalocean" => Ok(Self::DigitalOcean),
            other => Err(format!("Unsupported DNS provider: {}", other)),
        }
    }
}

pub struct SslAction {
    runner: Arc<dyn CommandRunner>,
}

impl SslAction {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    // ==========================================================================
    // 1. Install + issue
    // ==========================================================================

    pub async fn install_certbot(&self) -> ActionResult {
        let Some(family) = PkgFamily::detect(self.runner.as_ref()).await else {
            return unsupported_distro();
        };

        info!(family = family.manager(), "installing certbot");

        if family.is_debian_family() {
            let refresh = family.refresh_index(self.runner.as_ref()).await;
            if !refresh.success {
                return refresh;
            }
        } else {
            // certbot lives in EPEL on the RHEL family.
            let epel = family.install(self.runner.as_ref(), &["epel-release"]).await;
            if !epel.success {
                return epel;
            }
        }

        family.install(self.runner.as_ref(), &["certbot"]).await
    }

    async fn ensure_certbot(&self) -> ActionResult {
        if file_exists(self.runner.as_ref(), "/usr/bin/certbot").await {
            return ActionResult::ok("certbot present");
        }
        self.install_certbot().await
    }

    pub async fn issue_certificate(&self, domain: &str, email: &str, webroot: &str) -> ActionResult {
        if let Err(e) = validate_domain(domain) {
            return ActionResult::fail(e, "invalid domain");
        }

        let ready = self.ensure_certbot().await;
        if !ready.success {
            return ready;
        }

        self.runner
            .run(
                "certbot",
                &[
                    "certonly",
                    "--webroot",
                    "-w",
                    webroot,
                    "-d",
                    domain,
                    "--email",
                    email,
                    "--agree-tos",
                    "--non-interactive",
                ],
            )
            .await
    }

    pub async fn issue_wildcard(
        &self,
        domain: &str,
        email: &str,
        provider: DnsProvider,
    ) -> ActionResult {
        if let Err(e) = validate_domain(domain) {
            return ActionResult::fail(e, "invalid domain");
        }

        let ready = self.ensure_certbot().await;
        if !ready.success {
            return ready;
        }

        let Some(family) = PkgFamily::detect(self.runner.as_ref()).await else {
            return unsupported_distro();
        };
        let plugin = family
            .install(self.runner.as_ref(), &[provider.plugin_package()])
            .await;
        if !plugin.success {
            return plugin;
        }

        let wildcard = format!("*.{}", domain);
        self.runner
            .run(
                "certbot",
                &[
                    "certonly",
                    provider.challenge_flag(),
                    "-d",
                    &wildcard,
                    "-d",
                    domain,
                    "--email",
                    email,
                    "--agree-tos",
                    "--non-interactive",
                ],
            )
            .await
    }

    // ==========================================================================
    // 2. Introspection + lifecycle
    // ==========================================================================

    pub async fn renew_all(&self) -> ActionResult {
        self.runner.run("certbot", &["renew", "--quiet"]).await
    }

    pub async fn list_certificates(&self) -> ActionResult {
        let listing = self.runner.run("certbot", &["certificates"]).await;
        if !listing.success {
            return listing;
        }

        let certificates = parse_certificates(&listing.message);
        ActionResult::ok(format!("Found {} certificates", certificates.len()))
            .with_data(ActionData::Certificates(certificates))
    }

    pub async fn revoke(&self, domain: &str) -> ActionResult {
        if let Err(e) = validate_domain(domain) {
            return ActionResult::fail(e, "invalid domain");
        }
        self.runner
            .run("certbot", &["revoke", "--cert-name", domain])
            .await
    }

    /// Installs a daily renew crontab entry; idempotent if one exists.
    pub async fn setup_auto_renewal(&self) -> ActionResult {
        let current = self.runner.run("crontab", &["-l"]).await;
        if current.success && current.message.contains("certbot renew") {
            return ActionResult::ok("Auto-renewal is already configured");
        }

        let mut content = if current.success {
            current.message.clone()
        } else {
            String::new()
        };
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str("0 12 * * * /usr/bin/certbot renew --quiet\n");

        self.runner.run_with_stdin("crontab", &["-"], &content).await
    }
}

// ==============================================================================
// 3. Listing parser
// ==============================================================================

/// Line-oriented, prefix-matched and tolerant: unknown lines are
/// skipped; a record is flushed when the next `Certificate Name:`
/// header is seen or input ends.
pub fn parse_certificates(output: &str) -> Vec<Certificate> {
    let mut certificates = Vec::new();
    let mut current: Option<Certificate> = None;

    for line in output.lines() {
        let line = line.trim();

        if let Some(name) = line.strip_prefix("Certificate Name:") {
            if let Some(done) = current.take() {
                certificates.push(done);
            }
            current = Some(Certificate {
                domain: name.trim().to_string(),
                cert_type: String::new(),
                issuer: "Let's Encrypt".to_string(),
                valid_until: String::new(),
                status: String::new(),
            });
        } else if let Some(cert) = current.as_mut() {
            if let Some(domains) = line.strip_prefix("Domains:") {
                let domains = domains.trim();
                cert.cert_type = if domains.contains('*') {
                    "wildcard".to_string()
                } else if domains.contains(' ') {
                    "multi-domain".to_string()
                } else {
                    "single".to_string()
                };
            } else if let Some(expiry) = line.strip_prefix("Expiry Date:") {
                cert.valid_until = expiry.trim().to_string();
                cert.status = "valid".to_string();
            }
        }
    }

    if let Some(done) = current.take() {
        certificates.push(done);
    }

    certificates
}
