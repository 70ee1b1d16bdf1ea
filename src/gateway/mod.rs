//! Axum HTTP gateway for the contact directory.
//!
//! - Request body size limit (64KB max)
//! - Request timeout (30s)
//! - Key derivation and file I/O run on the blocking pool

pub mod pages;
pub mod session;

use crate::auth::{AuthError, CredentialStore};
use crate::config::Config;
use crate::records::xlsx::XLSX_CONTENT_TYPE;
use crate::records::{Connection, RecordError, RecordStore};
use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Redirect, Response},
    routing::get,
    Form, Router,
};
use pages::FormMode;
use serde::Deserialize;
use session::{CurrentUser, RequireUser, SessionSigner};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size (64KB)
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout (30s)
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

const DOWNLOAD_FILENAME: &str = "connections.xlsx";

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub credentials: Arc<CredentialStore>,
    pub records: Arc<RecordStore>,
    pub sessions: Arc<SessionSigner>,
    /// Send bootstrap-password logins to `/change-password`.
    pub force_password_change: bool,
}

impl AppState {
    pub fn from_config(config: &Config) -> Result<Self> {
        let sessions = SessionSigner::from_config(&config.gateway)
            .map_err(|e| anyhow::anyhow!("Invalid session secret: {e}"))?;
        Ok(Self {
            credentials: Arc::new(CredentialStore::open(
                &config.auth.users_file,
                config.bootstrap_account(),
            )),
            records: Arc::new(RecordStore::open(&config.records.data_file)),
            sessions: Arc::new(sessions),
            force_password_change: config.auth.force_password_change,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_index))
        .route("/health", get(handle_health))
        .route("/login", get(handle_login_page).post(handle_login_submit))
        .route("/logout", get(handle_logout))
        .route("/add", get(handle_add_page).post(handle_add_submit))
        .route(
            "/update/{idx}",
            get(handle_update_page).post(handle_update_submit),
        )
        .route("/download", get(handle_download))
        .route(
            "/change-password",
            get(handle_change_password_page).post(handle_change_password_submit),
        )
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
}

/// Run the HTTP gateway until Ctrl-C.
pub async fn run_gateway(config: Config) -> Result<()> {
    let state = AppState::from_config(&config)?;

    // Fail at start-up rather than on the first request.
    let credentials = state.credentials.clone();
    let records = state.records.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        credentials
            .ensure_initialized()
            .with_context(|| format!("Failed to initialize {}", credentials.location()))?;
        credentials
            .load()
            .with_context(|| format!("Failed to read {}", credentials.location()))?;
        records
            .ensure_initialized()
            .with_context(|| format!("Failed to initialize {}", records.path().display()))?;
        Ok(())
    })
    .await??;

    let host = &config.gateway.host;
    let addr: SocketAddr = format!("{host}:{}", config.gateway.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_port = listener.local_addr()?.port();
    let display_addr = format!("{host}:{actual_port}");

    println!("📇 ConnectionDB listening on http://{display_addr}");
    println!("  Credentials: {}", config.auth.users_file.display());
    println!("  Data file:   {}", config.records.data_file.display());
    println!("  GET  /            list / search");
    println!("  GET  /login       sign in");
    println!("  GET  /add         add a connection");
    println!("  GET  /download    export spreadsheet");
    println!("  GET  /health      health check");
    println!("  Press Ctrl+C to stop.\n");
    tracing::info!(addr = %display_addr, "Gateway started");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {e}");
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ══════════════════════════════════════════════════════════════════════════════

/// Store or runtime failure surfaced as a generic 500 page.
#[derive(Debug, thiserror::Error)]
enum GatewayError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Records(#[from] RecordError),
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        tracing::error!("Request failed: {self}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html(pages::render_error(
                "Something went wrong",
                "The server could not complete this request. Please try again later.",
            )),
        )
            .into_response()
    }
}

async fn run_blocking<T, E, F>(f: F) -> Result<T, GatewayError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<GatewayError> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?.map_err(Into::into)
}

/// Accept only same-site relative paths as a post-login target.
fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(path)
            if path.starts_with('/')
                && !path.starts_with("//")
                && !path.contains('\\')
                && !path.chars().any(char::is_control) =>
        {
            path
        }
        _ => "/",
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// AXUM HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// GET /health (public)
async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

/// GET /?q= (public listing and search)
async fn handle_index(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<SearchQuery>,
) -> Result<Html<String>, GatewayError> {
    let q = query.q.unwrap_or_default();
    let store = state.records.clone();
    let needle = q.clone();
    let hits = run_blocking(move || store.search(&needle)).await?;
    Ok(Html(pages::render_index(&hits, &q, user.as_deref())))
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    pub next: Option<String>,
}

/// GET /login
async fn handle_login_page(Query(query): Query<LoginQuery>) -> Html<String> {
    Html(pages::render_login(safe_next(query.next.as_deref()), None))
}

/// POST /login
async fn handle_login_submit(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<Response, GatewayError> {
    let next = safe_next(form.next.as_deref()).to_string();
    let LoginForm {
        username, password, ..
    } = form;

    let store = state.credentials.clone();
    let outcome = run_blocking(move || match store.authenticate(&username, &password) {
        Ok(user) => Ok(Some((user, store.is_bootstrap_password(&password)))),
        Err(e) if e.is_rejection() => Ok(None),
        Err(e) => Err(e),
    })
    .await?;

    let Some((user, bootstrap_password)) = outcome else {
        tracing::warn!("Rejected login attempt");
        return Ok((
            StatusCode::UNAUTHORIZED,
            Html(pages::render_login(&next, Some("Invalid credentials"))),
        )
            .into_response());
    };

    tracing::info!(username = %user.username, "Login succeeded");
    let target = if state.force_password_change && bootstrap_password {
        "/change-password"
    } else {
        next.as_str()
    };
    let cookie = state.sessions.issue(&user.username);
    Ok(([(header::SET_COOKIE, cookie)], Redirect::to(target)).into_response())
}

/// GET /logout
async fn handle_logout(State(state): State<AppState>) -> impl IntoResponse {
    ([(header::SET_COOKIE, state.sessions.clear())], Redirect::to("/"))
}

#[derive(Debug, Deserialize)]
pub struct ConnectionForm {
    pub name: String,
    pub company: String,
    pub connection_link: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: String,
}

impl From<ConnectionForm> for Connection {
    fn from(form: ConnectionForm) -> Self {
        Self {
            name: form.name.trim().to_string(),
            company: form.company.trim().to_string(),
            connection_link: form.connection_link.trim().to_string(),
            email: form.email.trim().to_string(),
            phone: form
                .phone
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty()),
            role: form.role.trim().to_string(),
            extra: Vec::new(),
        }
    }
}

fn invalid_record_page(mode: FormMode, record: &Connection, error: &RecordError) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Html(pages::render_connection_form(
            mode,
            record,
            Some(&error.to_string()),
        )),
    )
        .into_response()
}

/// GET /add
async fn handle_add_page(RequireUser(_user): RequireUser) -> Html<String> {
    Html(pages::render_connection_form(
        FormMode::Add,
        &Connection::default(),
        None,
    ))
}

/// POST /add
async fn handle_add_submit(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Form(form): Form<ConnectionForm>,
) -> Result<Response, GatewayError> {
    let record = Connection::from(form);
    if let Err(e) = record.validate() {
        return Ok(invalid_record_page(FormMode::Add, &record, &e));
    }

    let store = state.records.clone();
    let idx = run_blocking(move || store.add(record)).await?;
    tracing::info!(username = %user, idx, "Connection added");
    Ok(Redirect::to("/").into_response())
}

/// GET /update/{idx}
async fn handle_update_page(
    State(state): State<AppState>,
    RequireUser(_user): RequireUser,
    Path(idx): Path<usize>,
) -> Result<Response, GatewayError> {
    let store = state.records.clone();
    let record = run_blocking(move || store.get(idx)).await?;
    Ok(match record {
        Some(record) => Html(pages::render_connection_form(
            FormMode::Update(idx),
            &record,
            None,
        ))
        .into_response(),
        None => Redirect::to("/").into_response(),
    })
}

/// POST /update/{idx}
async fn handle_update_submit(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(idx): Path<usize>,
    Form(form): Form<ConnectionForm>,
) -> Result<Response, GatewayError> {
    let record = Connection::from(form);
    if let Err(e) = record.validate() {
        return Ok(invalid_record_page(FormMode::Update(idx), &record, &e));
    }

    let store = state.records.clone();
    if run_blocking(move || store.update(idx, record)).await? {
        tracing::info!(username = %user, idx, "Connection updated");
    } else {
        tracing::debug!(idx, "Update for missing row ignored");
    }
    Ok(Redirect::to("/").into_response())
}

/// GET /download: the data file as an attachment
async fn handle_download(
    State(state): State<AppState>,
    RequireUser(_user): RequireUser,
) -> Result<Response, GatewayError> {
    let store = state.records.clone();
    let bytes = run_blocking(move || store.read_bytes()).await?;
    Ok((
        [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{DOWNLOAD_FILENAME}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordForm {
    pub current: String,
    pub new_password: String,
    pub confirm: String,
}

/// GET /change-password
async fn handle_change_password_page(RequireUser(user): RequireUser) -> Html<String> {
    Html(pages::render_change_password(&user, None, None))
}

/// POST /change-password
async fn handle_change_password_submit(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Form(form): Form<ChangePasswordForm>,
) -> Result<Response, GatewayError> {
    let store = state.credentials.clone();
    let username = user.clone();
    let result = tokio::task::spawn_blocking(move || {
        store.change_password(&username, &form.current, &form.new_password, &form.confirm)
    })
    .await?;

    let message = match result {
        Ok(()) => {
            return Ok(Html(pages::render_change_password(
                &user,
                None,
                Some("Password updated"),
            ))
            .into_response())
        }
        Err(AuthError::PasswordMismatch) => "Passwords do not match",
        Err(e) if e.is_rejection() => "Current password incorrect",
        Err(e) => return Err(e.into()),
    };
    tracing::warn!(username = %user, "Password change rejected: {message}");
    Ok((
        StatusCode::BAD_REQUEST,
        Html(pages::render_change_password(&user, Some(message), None)),
    )
        .into_response())
}
