//! HTTP handlers: login flow, dashboard page and the JSON API.

use axum::{
    extract::{Path, Query, State},
    response::{Html, IntoResponse, Redirect, Response},
    Form, Json,
};
use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::error::{ApiError, ApiResult};
use super::{AppState, RequireSession, SessionKey, SESSION_COOKIE};
use crate::sys::database::{DatabaseAction, DbEngine};
use crate::sys::exec::{ActionData, ActionResult};
use crate::sys::php::PhpAction;
use crate::sys::service::{ServiceController, ServiceState, MANAGED_SERVICES};
use crate::sys::ssl::SslAction;
use crate::sys::webserver::WebServerAction;

/// Arbitrary unit names are rejected before they reach systemctl.
fn managed_service(name: &str) -> bool {
    MANAGED_SERVICES.contains(&name) || (name.starts_with("php") && name.ends_with("-fpm"))
}

// ==============================================================================
// 1. Session flow
// ==============================================================================

pub async fn home() -> Redirect {
    Redirect::to("/panel")
}

#[derive(Deserialize)]
pub struct LoginQuery {
    error: Option<String>,
}

pub async fn login_form(Query(query): Query<LoginQuery>) -> Html<String> {
    let notice = if query.error.is_some() {
        "<p class=\"error\">Invalid username or password</p>"
    } else {
        ""
    };

    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>ironpanel login</title></head>
<body>
<h1>ironpanel</h1>
{notice}
<form method="post" action="/login">
  <label>Username <input type="text" name="username" autofocus></label>
  <label>Password <input type="password" name="password"></label>
  <button type="submit">Sign in</button>
</form>
</body>
</html>"#
    ))
}

#[derive(Deserialize)]
pub struct LoginForm {
    username: String,
    password: String,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: SignedCookieJar<SessionKey>,
    Form(form): Form<LoginForm>,
) -> Response {
    match state.oracle.verify(&form.username, &form.password).await {
        Ok(()) => {
            info!(username = form.username.as_str(), "login succeeded");
            let cookie = Cookie::build((SESSION_COOKIE, form.username))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax)
                .build();
            (jar.add(cookie), Redirect::to("/panel")).into_response()
        }
        Err(e) => {
            warn!(username = form.username.as_str(), error = %e, "login failed");
            Redirect::to("/login?error=1").into_response()
        }
    }
}

pub async fn logout(jar: SignedCookieJar<SessionKey>) -> impl IntoResponse {
    let cookie = Cookie::build(SESSION_COOKIE).path("/").build();
    (jar.remove(cookie), Redirect::to("/login"))
}

// ==============================================================================
// 2. Pages
// ==============================================================================

/// Shared literal-HTML skeleton for every panel page.
fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>ironpanel · {title}</title></head>
<body>
<h1>ironpanel</h1>
<p>
  <a href="/panel">Dashboard</a> ·
  <a href="/panel/services">Services</a> ·
  <a href="/panel/domains">Domains</a> ·
  <a href="/panel/ssl">SSL</a> ·
  <a href="/panel/databases">Databases</a> ·
  <a href="/panel/settings">Settings</a> ·
  <a href="/logout">Sign out</a>
</p>
<h2>{title}</h2>
{body}
</body>
</html>"#
    ))
}

/// Command output is untrusted text; escape it before interpolation.
fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

pub async fn dashboard(session: RequireSession) -> Html<String> {
    let body = format!(
        r#"<p>Signed in as <strong>{username}</strong></p>
<ul>
  <li><a href="/panel/services/apache">Apache</a></li>
  <li><a href="/panel/services/nginx">Nginx</a></li>
  <li><a href="/panel/services/php">PHP</a></li>
  <li><a href="/panel/api/system/stats">System stats</a></li>
</ul>"#,
        username = escape(&session.username)
    );
    page("Dashboard", &body)
}

pub async fn services_page(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
) -> Html<String> {
    let controller = ServiceController::new(state.runner.clone());

    let mut rows = String::new();
    for name in MANAGED_SERVICES {
        let result = controller.status(name).await;
        let (status, enabled) = match result.data {
            Some(ActionData::Service(service)) => {
                (service.status, if service.enabled { "enabled" } else { "disabled" })
            }
            _ => ("inactive".to_string(), "disabled"),
        };
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            name,
            escape(&status),
            enabled
        ));
    }

    let body = format!(
        "<table>\n<tr><th>Service</th><th>Status</th><th>Boot</th></tr>\n{rows}</table>"
    );
    page("Services", &body)
}

async fn unit_page(state: Arc<AppState>, title: &str, units: &[&str]) -> Html<String> {
    let controller = ServiceController::new(state.runner.clone());

    let mut items = String::new();
    for unit in units {
        let result = controller.status(unit).await;
        items.push_str(&format!("<li>{}</li>\n", escape(result.message.trim())));
    }

    page(title, &format!("<ul>\n{items}</ul>"))
}

pub async fn apache_page(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
) -> Html<String> {
    unit_page(state, "Apache", &["apache2", "httpd"]).await
}

pub async fn nginx_page(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
) -> Html<String> {
    unit_page(state, "Nginx", &["nginx"]).await
}

pub async fn php_page(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
) -> Html<String> {
    let result = PhpAction::new(state.runner.clone()).installed_versions().await;

    let mut items = String::new();
    if let Some(ActionData::PhpVersions(versions)) = result.data {
        for version in versions {
            items.push_str(&format!(
                "<li>PHP {} · FPM {}</li>\n",
                escape(&version.version),
                if version.fpm_running { "running" } else { "stopped" }
            ));
        }
    }
    if items.is_empty() {
        items.push_str("<li>No PHP versions installed</li>\n");
    }

    page("PHP", &format!("<ul>\n{items}</ul>"))
}

pub async fn domains_page(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
) -> Html<String> {
    let mut sections = String::new();
    for (server, dir) in [
        ("Apache", "/etc/apache2/sites-enabled/"),
        ("Nginx", "/etc/nginx/sites-enabled/"),
    ] {
        let listing = state.runner.run("ls", &[dir]).await;
        let content = if listing.success && !listing.message.trim().is_empty() {
            escape(listing.message.trim())
        } else {
            "none".to_string()
        };
        sections.push_str(&format!("<h3>{server}</h3>\n<pre>{content}</pre>\n"));
    }

    page("Domains", &sections)
}

pub async fn ssl_page(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
) -> Html<String> {
    let result = SslAction::new(state.runner.clone()).list_certificates().await;

    let mut rows = String::new();
    if let Some(ActionData::Certificates(certificates)) = result.data {
        for cert in certificates {
            rows.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                escape(&cert.domain),
                escape(&cert.cert_type),
                escape(&cert.valid_until),
                escape(&cert.status)
            ));
        }
    }
    if rows.is_empty() {
        rows.push_str("<tr><td colspan=\"4\">No certificates found</td></tr>\n");
    }

    let body = format!(
        "<table>\n<tr><th>Domain</th><th>Type</th><th>Expires</th><th>Status</th></tr>\n{rows}</table>"
    );
    page("SSL certificates", &body)
}

pub async fn databases_page(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
) -> Html<String> {
    let action = DatabaseAction::new(state.runner.clone());

    let mut sections = String::new();
    for engine in [DbEngine::MariaDb, DbEngine::PostgreSql] {
        let listing = action.list_databases(engine).await;
        let content = if listing.success && !listing.message.trim().is_empty() {
            escape(listing.message.trim())
        } else {
            "not available".to_string()
        };
        sections.push_str(&format!("<h3>{}</h3>\n<pre>{content}</pre>\n", engine.as_str()));
    }

    page("Databases", &sections)
}

pub async fn settings_page(
    session: RequireSession,
    State(state): State<Arc<AppState>>,
) -> Html<String> {
    let config = &state.config;
    let body = format!(
        r#"<ul>
  <li>Operator: {}</li>
  <li>Listen address: {}</li>
  <li>PAM service: {}</li>
  <li>Backup directory: {}</li>
  <li>Log directory: {}</li>
</ul>"#,
        escape(&session.username),
        config.listen_addr,
        escape(&config.pam_service),
        escape(&config.backup_dir),
        escape(&config.log_dir)
    );
    page("Settings", &body)
}

// ==============================================================================
// 3. JSON API
// ==============================================================================

pub async fn services_status(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
) -> Json<ActionResult> {
    let controller = ServiceController::new(state.runner.clone());

    let mut states = Vec::with_capacity(MANAGED_SERVICES.len());
    for name in MANAGED_SERVICES {
        let result = controller.status(name).await;
        match result.data {
            Some(ActionData::Service(service)) => states.push(service),
            // Inactive and unknown units both land here.
            _ => states.push(ServiceState {
                name: name.to_string(),
                status: match result.message.trim() {
                    "" => "inactive".to_string(),
                    other => other.to_string(),
                },
                enabled: false,
            }),
        }
    }

    Json(
        ActionResult::ok(format!("Queried {} services", states.len()))
            .with_data(ActionData::Services(states)),
    )
}

async fn service_verb(
    state: Arc<AppState>,
    service: String,
    verb: &str,
) -> ApiResult<Json<ActionResult>> {
    if !managed_service(&service) {
        return Err(ApiError::bad_request(format!(
            "Service '{}' is not managed by this panel",
            service
        )));
    }

    let controller = ServiceController::new(state.runner.clone());
    let result = match verb {
        "start" => controller.start(&service).await,
        "stop" => controller.stop(&service).await,
        _ => controller.restart(&service).await,
    };

    // Command failure still answers 200; the envelope carries the flag.
    Ok(Json(result))
}

pub async fn service_start(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
) -> ApiResult<Json<ActionResult>> {
    service_verb(state, service, "start").await
}

pub async fn service_stop(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
) -> ApiResult<Json<ActionResult>> {
    service_verb(state, service, "stop").await
}

pub async fn service_restart(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
) -> ApiResult<Json<ActionResult>> {
    service_verb(state, service, "restart").await
}

#[derive(Deserialize)]
pub struct UninstallRequest {
    #[serde(default)]
    confirmation: String,
}

/// Uninstall over the API carries the same confirmation token the CLI
/// reads from stdin; anything but "yes" cancels.
pub async fn service_uninstall(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
    Json(request): Json<UninstallRequest>,
) -> ApiResult<Json<ActionResult>> {
    let result = match service.as_str() {
        "apache2" | "httpd" => {
            WebServerAction::new(state.runner.clone())
                .uninstall_apache(&request.confirmation)
                .await
        }
        "nginx" => {
            WebServerAction::new(state.runner.clone())
                .uninstall_nginx(&request.confirmation)
                .await
        }
        "mariadb" | "postgresql" => {
            let engine: DbEngine = service.parse().map_err(ApiError::bad_request)?;
            DatabaseAction::new(state.runner.clone())
                .uninstall(engine, &request.confirmation)
                .await
        }
        _ => {
            return Err(ApiError::bad_request(format!(
                "Service '{}' cannot be uninstalled from the panel",
                service
            )))
        }
    };

    Ok(Json(result))
}

pub async fn certificates(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
) -> Json<ActionResult> {
    Json(SslAction::new(state.runner.clone()).list_certificates().await)
}

pub async fn php_versions(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
) -> Json<ActionResult> {
    Json(PhpAction::new(state.runner.clone()).installed_versions().await)
}

pub async fn system_stats(_session: RequireSession) -> ApiResult<Json<serde_json::Value>> {
    // sysinfo probes /proc synchronously.
    let stats = tokio::task::spawn_blocking(collect_stats)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(stats))
}

fn collect_stats() -> serde_json::Value {
    use sysinfo::{Disks, System};

    let mut sys = System::new_all();
    sys.refresh_all();

    let load = System::load_average();
    let disks: Vec<serde_json::Value> = Disks::new_with_refreshed_list()
        .list()
        .iter()
        .map(|disk| {
            serde_json::json!({
                "mount_point": disk.mount_point().to_string_lossy(),
                "total_bytes": disk.total_space(),
                "available_bytes": disk.available_space(),
            })
        })
        .collect();

    serde_json::json!({
        "hostname": System::host_name(),
        "os": System::long_os_version(),
        "kernel": System::kernel_version(),
        "uptime_seconds": System::uptime(),
        "load_average": { "one": load.one, "five": load.five, "fifteen": load.fifteen },
        "cpu_count": sys.cpus().len(),
        "cpu_usage_percent": sys.global_cpu_info().cpu_usage(),
        "memory": {
            "total_bytes": sys.total_memory(),
            "used_bytes": sys.used_memory(),
            "swap_total_bytes": sys.total_swap(),
            "swap_used_bytes": sys.used_swap(),
        },
        "disks": disks,
    })
}
