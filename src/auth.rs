//! Authentication and privilege checks.
//!
//! The panel only ever manipulates the host as root; every mutating
//! entry point calls [`require_root`] before touching the executor.
//! Login credentials are verified against the host's PAM stack,
//! isolated behind [`CredentialOracle`] so the web layer can be tested
//! without a PAM conversation.

use async_trait::async_trait;
use nix::unistd::Uid;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
#[error("This command must be run as root")]
pub struct PrivilegeError;

pub fn require_root() -> Result<(), PrivilegeError> {
    require_root_from(Uid::effective())
}

fn require_root_from(uid: Uid) -> Result<(), PrivilegeError> {
    if uid.is_root() {
        Ok(())
    } else {
        Err(PrivilegeError)
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// Deliberately indistinguishable between unknown user and wrong
    /// password.
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("authentication backend unavailable: {0}")]
    Backend(String),
}

#[async_trait]
pub trait CredentialOracle: Send + Sync {
    async fn verify(&self, username: &str, password: &str) -> Result<(), AuthError>;
}

/// Verifies against the host PAM stack. The PAM conversation is
/// synchronous, so it runs on the blocking pool.
pub struct PamOracle {
    service: String,
}

impl PamOracle {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

#[async_trait]
impl CredentialOracle for PamOracle {
    async fn verify(&self, username: &str, password: &str) -> Result<(), AuthError> {
        let service = self.service.clone();
        let username = username.to_string();
        let password = password.to_string();

        let outcome = tokio::task::spawn_blocking(move || {
            let mut authenticator = pam::Authenticator::with_password(&service)
                .map_err(|e| AuthError::Backend(e.to_string()))?;
            authenticator
                .get_handler()
                .set_credentials(username.as_str(), password.as_str());
            authenticator
                .authenticate()
                .map_err(|_| AuthError::InvalidCredentials)
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "PAM verification task failed");
                Err(AuthError::Backend(e.to_string()))
            }
        }
    }
}
