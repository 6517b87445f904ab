//! In-process stand-in for the dashboard backend.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use dashboard_client::{ClientConfig, DashboardClient, LoginRedirect};
use dashboard_session::{CredentialPair, TokenStore, now_unix_ms};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};

pub const USERNAME: &str = "ada";
pub const PASSWORD: &str = "correct-horse";

/// How the refresh endpoint answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshReply {
    /// `{access, refresh}`
    Plain,
    /// `{data: {access, refresh}}`
    Data,
    /// `{status: "success", data: {data: {access, refresh}}}`
    Nested,
    /// `{status: "error", ...}` with a 200.
    Rejected,
    Fail(StatusCode),
}

#[derive(Debug, Default)]
pub struct RecordingRedirect {
    targets: std::sync::Mutex<Vec<String>>,
}

impl RecordingRedirect {
    pub fn targets(&self) -> Vec<String> {
        self.targets
            .lock()
            .map(|targets| targets.clone())
            .unwrap_or_default()
    }
}

impl LoginRedirect for RecordingRedirect {
    fn redirect_to_login(&self, login_path: &str) {
        if let Ok(mut targets) = self.targets.lock() {
            targets.push(login_path.to_string());
        }
    }
}

#[derive(Debug)]
struct BackendInner {
    accepted_access: Mutex<String>,
    accepted_refresh: Mutex<String>,
    next_pair: Mutex<CredentialPair>,
    refresh_reply: Mutex<RefreshReply>,
    refresh_gate: AtomicUsize,
    refresh_calls: AtomicUsize,
    unauthorized: AtomicUsize,
    bearers: Mutex<Vec<String>>,
    refresh_bodies: Mutex<Vec<Value>>,
}

#[derive(Debug, Clone)]
pub struct Backend {
    inner: Arc<BackendInner>,
}

impl Backend {
    pub fn refresh_calls(&self) -> usize {
        self.inner.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn unauthorized(&self) -> usize {
        self.inner.unauthorized.load(Ordering::SeqCst)
    }

    /// Bearer tokens seen on requests the backend accepted.
    pub async fn accepted_bearers(&self) -> Vec<String> {
        self.inner.bearers.lock().await.clone()
    }

    pub async fn refresh_bodies(&self) -> Vec<Value> {
        self.inner.refresh_bodies.lock().await.clone()
    }

    pub async fn set_refresh_reply(&self, reply: RefreshReply) {
        *self.inner.refresh_reply.lock().await = reply;
    }

    /// The refresh endpoint holds its answer until this many 401s were sent.
    pub fn hold_refresh_until_unauthorized(&self, count: usize) {
        self.inner.refresh_gate.store(count, Ordering::SeqCst);
    }

    /// Credentials the backend currently accepts.
    pub async fn current_pair(&self) -> CredentialPair {
        CredentialPair::new(
            self.inner.accepted_access.lock().await.clone(),
            self.inner.accepted_refresh.lock().await.clone(),
        )
    }

    /// Credentials the next refresh will issue.
    pub async fn next_pair(&self) -> CredentialPair {
        self.inner.next_pair.lock().await.clone()
    }

    async fn authorize(&self, headers: &HeaderMap) -> Result<(), Response> {
        let bearer = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::to_string);
        let accepted = self.inner.accepted_access.lock().await.clone();
        match bearer {
            Some(token) if token == accepted => {
                self.inner.bearers.lock().await.push(token);
                Ok(())
            }
            _ => {
                self.inner.unauthorized.fetch_add(1, Ordering::SeqCst);
                Err((
                    StatusCode::UNAUTHORIZED,
                    Json(json!({ "detail": "token_not_valid" })),
                )
                    .into_response())
            }
        }
    }
}

pub struct MockBackend {
    pub base_url: String,
    pub backend: Backend,
    shutdown: Option<oneshot::Sender<()>>,
}

impl MockBackend {
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }

    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(format!("{}/api", self.base_url));
        config.timeout_ms = 5_000;
        config
    }

    pub fn client(&self, tokens: TokenStore) -> Result<(DashboardClient, Arc<RecordingRedirect>)> {
        let redirect = Arc::new(RecordingRedirect::default());
        let client = DashboardClient::with_redirect(self.config(), tokens, redirect.clone())?;
        Ok((client, redirect))
    }
}

pub fn token(username: &str, expires_in_seconds: i64, nonce: &str) -> String {
    let exp = now_unix_ms() / 1000 + expires_in_seconds;
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = json!({ "exp": exp, "username": username, "user_id": 7, "jti": nonce });
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}

/// A store holding a pair the backend no longer accepts for API calls.
pub async fn stale_store(backend: &Backend) -> Result<TokenStore> {
    let tokens = TokenStore::in_memory();
    let refresh = backend.current_pair().await.refresh;
    tokens.set_tokens(&token(USERNAME, 3600, "stale"), &refresh, None)?;
    Ok(tokens)
}

pub async fn spawn_backend() -> Result<MockBackend> {
    let backend = Backend {
        inner: Arc::new(BackendInner {
            accepted_access: Mutex::new(token(USERNAME, 3600, "current")),
            accepted_refresh: Mutex::new("refresh-1".to_string()),
            next_pair: Mutex::new(CredentialPair::new(
                token(USERNAME, 3600, "renewed"),
                "refresh-2",
            )),
            refresh_reply: Mutex::new(RefreshReply::Plain),
            refresh_gate: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            unauthorized: AtomicUsize::new(0),
            bearers: Mutex::new(Vec::new()),
            refresh_bodies: Mutex::new(Vec::new()),
        }),
    };

    let app = Router::new()
        .route("/api/login", post(login))
        .route("/api/refresh-token", post(refresh_token))
        .route("/api/profile", get(profile))
        .route("/api/projects", get(list_projects).post(create_project))
        .route("/api/projects/:id", get(get_project))
        .route("/api/tasks", get(always_unauthorized))
        .with_state(backend.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        let _ = server.await;
    });

    Ok(MockBackend {
        base_url: format!("http://{addr}"),
        backend,
        shutdown: Some(shutdown_tx),
    })
}

async fn login(State(backend): State<Backend>, Json(body): Json<Value>) -> Response {
    if body["username"] != USERNAME || body["password"] != PASSWORD {
        return (
            StatusCode::OK,
            Json(json!({ "status": "error", "message": "invalid credentials" })),
        )
            .into_response();
    }
    let pair = backend.current_pair().await;
    Json(json!({
        "status": "success",
        "data": { "data": { "access": pair.access, "refresh": pair.refresh } }
    }))
    .into_response()
}

async fn refresh_token(State(backend): State<Backend>, Json(body): Json<Value>) -> Response {
    backend.inner.refresh_calls.fetch_add(1, Ordering::SeqCst);
    backend.inner.refresh_bodies.lock().await.push(body.clone());

    let gate = backend.inner.refresh_gate.load(Ordering::SeqCst);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while backend.unauthorized() < gate && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let reply = backend.inner.refresh_reply.lock().await.clone();
    if let RefreshReply::Fail(status) = reply {
        return (status, Json(json!({ "detail": "refresh rejected" }))).into_response();
    }
    if reply == RefreshReply::Rejected {
        return Json(json!({ "status": "error", "message": "refresh token expired" }))
            .into_response();
    }

    let accepted_refresh = backend.inner.accepted_refresh.lock().await.clone();
    if body["refresh"] != accepted_refresh.as_str() {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": "refresh token not valid" })),
        )
            .into_response();
    }

    let pair = backend.next_pair().await;
    *backend.inner.accepted_access.lock().await = pair.access.clone();
    *backend.inner.accepted_refresh.lock().await = pair.refresh.clone();

    let credentials = json!({ "access": pair.access, "refresh": pair.refresh });
    let payload = match reply {
        RefreshReply::Data => json!({ "data": credentials }),
        RefreshReply::Nested => json!({ "status": "success", "data": { "data": credentials } }),
        _ => credentials,
    };
    Json(payload).into_response()
}

async fn profile(State(backend): State<Backend>, headers: HeaderMap) -> Response {
    if let Err(rejection) = backend.authorize(&headers).await {
        return rejection;
    }
    Json(json!({
        "id": 7,
        "username": USERNAME,
        "first_name": "Ada",
        "last_name": "Lovelace",
        "email": "ada@example.com",
        "is_active": true
    }))
    .into_response()
}

async fn list_projects(State(backend): State<Backend>, headers: HeaderMap) -> Response {
    if let Err(rejection) = backend.authorize(&headers).await {
        return rejection;
    }
    Json(json!([{ "id": 1, "name": "Apollo" }, { "id": 2, "name": "Gemini" }])).into_response()
}

async fn create_project(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(rejection) = backend.authorize(&headers).await {
        return rejection;
    }
    let mut created = body;
    created["id"] = json!(3);
    (StatusCode::CREATED, Json(created)).into_response()
}

async fn get_project(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(rejection) = backend.authorize(&headers).await {
        return rejection;
    }
    if id == "1" {
        Json(json!({ "id": 1, "name": "Apollo" })).into_response()
    } else {
        (StatusCode::NOT_FOUND, Json(json!({ "detail": "not found" }))).into_response()
    }
}

async fn always_unauthorized(State(backend): State<Backend>) -> Response {
    backend.inner.unauthorized.fetch_add(1, Ordering::SeqCst);
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "detail": "token_not_valid" })),
    )
        .into_response()
}
