//! Panel configuration, loaded from the environment with defaults
//! suitable for a stock single-host install.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid listen address '{0}'")]
    ListenAddr(String),
    #[error("IRONPANEL_SESSION_SECRET must be at least 32 bytes")]
    SessionSecretTooShort,
}

#[derive(Debug, Clone)]
pub struct PanelConfig {
    /// Address the web panel binds to.
    pub listen_addr: std::net::SocketAddr,
    /// Secret for signing session cookies. When unset a fresh random
    /// key is generated at startup, invalidating sessions on restart.
    pub session_secret: Option<String>,
    /// PAM service name used for login verification.
    pub pam_service: String,
    /// Default destination for backup archives.
    pub backup_dir: String,
    /// Directory the logrotate policy covers.
    pub log_dir: String,
}

impl PanelConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let listen_raw =
            std::env::var("IRONPANEL_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let listen_addr = listen_raw
            .parse()
            .map_err(|_| ConfigError::ListenAddr(listen_raw.clone()))?;

        let session_secret = std::env::var("IRONPANEL_SESSION_SECRET").ok();
        if let Some(secret) = &session_secret {
            if secret.len() < 32 {
                return Err(ConfigError::SessionSecretTooShort);
            }
        }

        Ok(Self {
            listen_addr,
            session_secret,
            pam_service: std::env::var("IRONPANEL_PAM_SERVICE")
                .unwrap_or_else(|_| "login".to_string()),
            backup_dir: std::env::var("IRONPANEL_BACKUP_DIR")
                .unwrap_or_else(|_| "/var/backups/ironpanel".to_string()),
            log_dir: std::env::var("IRONPANEL_LOG_DIR")
                .unwrap_or_else(|_| "/var/log/ironpanel".to_string()),
        })
    }
}
