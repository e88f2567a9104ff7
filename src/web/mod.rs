//! Web surface: session-gated HTML pages and a JSON API over the same
//! orchestration layer the CLI uses.

pub mod error;
pub mod handlers;

use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
    routing::{get, post},
    Router,
};
use axum_extra::extract::cookie::{Key, SignedCookieJar};
use std::sync::Arc;
use tracing::info;

use crate::auth::CredentialOracle;
use crate::config::PanelConfig;
use crate::sys::exec::CommandRunner;
use error::ApiError;

pub const SESSION_COOKIE: &str = "ironpanel_session";

pub struct AppState {
    pub runner: Arc<dyn CommandRunner>,
    pub oracle: Arc<dyn CredentialOracle>,
    pub key: Key,
    pub config: PanelConfig,
}

impl AppState {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        oracle: Arc<dyn CredentialOracle>,
        config: PanelConfig,
    ) -> Self {
        let key = match &config.session_secret {
            Some(secret) => Key::derive_from(secret.as_bytes()),
            None => Key::generate(),
        };
        Self {
            runner,
            oracle,
            key,
            config,
        }
    }
}

/// Local wrapper so the signing key can be extracted from `Arc<AppState>`
/// without an orphan `FromRef` impl on the foreign `Key` type.
#[derive(Clone)]
pub struct SessionKey(Key);

impl FromRef<Arc<AppState>> for SessionKey {
    fn from_ref(state: &Arc<AppState>) -> SessionKey {
        SessionKey(state.key.clone())
    }
}

impl From<SessionKey> for Key {
    fn from(key: SessionKey) -> Key {
        key.0
    }
}

/// Extractor gating every page and API route behind a signed session
/// cookie. The cookie is the session; there is no server-side store.
/// Page routes bounce to the login form, API routes get a 401.
pub struct RequireSession {
    pub username: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let redirect = !parts.uri.path().starts_with("/panel/api");

        let jar = SignedCookieJar::<SessionKey>::from_request_parts(parts, state)
            .await
            .map_err(|_| ApiError::Unauthorized { redirect })?;

        match jar.get(SESSION_COOKIE) {
            Some(cookie) if !cookie.value().is_empty() => Ok(RequireSession {
                username: cookie.value().to_string(),
            }),
            _ => Err(ApiError::Unauthorized { redirect }),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::home))
        .route("/login", get(handlers::login_form).post(handlers::login))
        .route("/logout", get(handlers::logout).post(handlers::logout))
        .route("/panel", get(handlers::dashboard))
        .route("/panel/services", get(handlers::services_page))
        .route("/panel/services/apache", get(handlers::apache_page))
        .route("/panel/services/nginx", get(handlers::nginx_page))
        .route("/panel/services/php", get(handlers::php_page))
        .route("/panel/domains", get(handlers::domains_page))
        .route("/panel/ssl", get(handlers::ssl_page))
        .route("/panel/databases", get(handlers::databases_page))
        .route("/panel/settings", get(handlers::settings_page))
        .route("/panel/api/services/status", get(handlers::services_status))
        .route("/panel/api/services/:service/start", post(handlers::service_start))
        .route("/panel/api/services/:service/stop", post(handlers::service_stop))
        .route("/panel/api/services/:service/restart", post(handlers::service_restart))
        .route("/panel/api/services/:service/uninstall", post(handlers::service_uninstall))
        .route("/panel/api/ssl/certificates", get(handlers::certificates))
        .route("/panel/api/php/versions", get(handlers::php_versions))
        .route("/panel/api/system/stats", get(handlers::system_stats))
        .with_state(state)
}

pub async fn serve(state: Arc<AppState>) -> std::io::Result<()> {
    let addr = state.config.listen_addr;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "panel listening");
    axum::serve(listener, router(state)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthError;
    use crate::sys::exec::ActionResult;
    use crate::sys::testing::MockRunner;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    struct StubOracle {
        accept: bool,
    }

    #[async_trait]
    impl CredentialOracle for StubOracle {
        async fn verify(&self, _username: &str, _password: &str) -> Result<(), AuthError> {
            if self.accept {
                Ok(())
            } else {
                Err(AuthError::InvalidCredentials)
            }
        }
    }

    fn test_state(accept: bool) -> Arc<AppState> {
        let config = PanelConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            session_secret: Some("0123456789abcdef0123456789abcdef".to_string()),
            pam_service: "login".to_string(),
            backup_dir: "/tmp".to_string(),
            log_dir: "/tmp".to_string(),
        };
        Arc::new(AppState::new(
            Arc::new(MockRunner::permissive()),
            Arc::new(StubOracle { accept }),
            config,
        ))
    }

    #[tokio::test]
    async fn unauthenticated_page_redirects_to_login() {
        let app = router(test_state(true));
        let response = app
            .oneshot(Request::builder().uri("/panel").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()["location"], "/login");
    }

    #[tokio::test]
    async fn unauthenticated_api_gets_401_json() {
        let app = router(test_state(true));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/panel/api/services/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn successful_login_sets_session_cookie() {
        let app = router(test_state(true));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/login")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from("username=root&password=hunter2"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()["location"], "/panel");
        let cookie = response.headers()["set-cookie"].to_str().unwrap();
        assert!(cookie.starts_with(SESSION_COOKIE));
    }

    #[tokio::test]
    async fn failed_login_does_not_set_a_cookie() {
        let app = router(test_state(false));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/login")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from("username=root&password=wrong"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()["location"], "/login?error=1");
        assert!(response.headers().get("set-cookie").is_none());
    }

    /// Logs in against the app and returns the session cookie pair.
    async fn session_cookie(app: &Router) -> String {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/login")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from("username=root&password=hunter2"))
                    .unwrap(),
            )
            .await
            .unwrap();
        let set_cookie = response.headers()["set-cookie"].to_str().unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    #[tokio::test]
    async fn unknown_service_name_is_rejected() {
        let app = router(test_state(true));
        let cookie = session_cookie(&app).await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/panel/api/services/rm%20-rf/start")
                    .header("cookie", cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn subsystem_pages_require_a_session() {
        let app = router(test_state(true));

        for path in [
            "/panel/services",
            "/panel/services/apache",
            "/panel/services/nginx",
            "/panel/services/php",
            "/panel/domains",
            "/panel/ssl",
            "/panel/databases",
            "/panel/settings",
        ] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::SEE_OTHER, "{path}");
            assert_eq!(response.headers()["location"], "/login", "{path}");
        }
    }

    #[tokio::test]
    async fn services_page_renders_every_managed_unit() {
        let app = router(test_state(true));
        let cookie = session_cookie(&app).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/panel/services")
                    .header("cookie", cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        for unit in crate::sys::service::MANAGED_SERVICES {
            assert!(html.contains(unit), "missing {unit}");
        }
    }

    #[tokio::test]
    async fn ssl_page_lists_parsed_certificates() {
        let config = PanelConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            session_secret: Some("0123456789abcdef0123456789abcdef".to_string()),
            pam_service: "login".to_string(),
            backup_dir: "/tmp".to_string(),
            log_dir: "/tmp".to_string(),
        };
        let runner = MockRunner::with_handler(|program, args, _| {
            if program == "certbot" && args == ["certificates"] {
                return ActionResult::ok(
                    "Certificate Name: example.com\n\
                     Domains: example.com www.example.com\n\
                     Expiry Date: 2025-01-01\n",
                );
            }
            ActionResult::ok("")
        });
        let state = Arc::new(AppState::new(
            Arc::new(runner),
            Arc::new(StubOracle { accept: true }),
            config,
        ));

        let app = router(state);
        let cookie = session_cookie(&app).await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/panel/ssl")
                    .header("cookie", cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("example.com"));
        assert!(html.contains("multi-domain"));
        assert!(html.contains("2025-01-01"));
    }

    #[tokio::test]
    async fn uninstall_without_confirmation_token_cancels() {
        let app = router(test_state(true));
        let cookie = session_cookie(&app).await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/panel/api/services/nginx/uninstall")
                    .header("cookie", cookie)
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], true);
        assert!(json["message"].as_str().unwrap().contains("cancelled"));
    }

    #[tokio::test]
    async fn services_status_returns_the_full_overview() {
        let app = router(test_state(true));
        let cookie = session_cookie(&app).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/panel/api/services/status")
                    .header("cookie", cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], true);
        assert!(json["data"]["items"].as_array().is_some());
    }
}
