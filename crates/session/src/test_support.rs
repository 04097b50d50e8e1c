// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process fake of the fitness API, served on an ephemeral local port.
//!
//! Protected routes accept exactly one access token ([`FakeState::valid_access`]);
//! `/auth/refresh` rotates it to [`FakeState::next_access`] unless told to fail.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::config::ClientConfig;
use crate::credential::CredentialPair;
use crate::model::User;
use crate::state::SessionCell;
use crate::storage::{MemoryStorage, Storage};
use crate::SessionContext;

pub const PASSWORD: &str = "secret";
pub const UNVERIFIED: &str = "unverified@b.com";
pub const TAKEN: &str = "taken@b.com";
/// Registration for this address succeeds with an empty body.
pub const SILENT: &str = "silent@b.com";
pub const GOOGLE_CREDENTIAL: &str = "google-ok";

/// A request as the fake saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub path: String,
    pub bearer: Option<String>,
    pub body: Value,
}

/// Knobs and counters shared with the fake's handlers.
pub struct FakeState {
    pub valid_access: Mutex<String>,
    pub next_access: Mutex<String>,
    /// When set, refresh responses also rotate the refresh token.
    pub rotate_refresh: Mutex<Option<String>>,
    pub refresh_fails: AtomicBool,
    pub refresh_delay_ms: AtomicU64,
    pub refresh_calls: AtomicU32,
    pub logout_fails: AtomicBool,
    /// Status `/auth/me` answers with even for a valid token.
    pub me_status: Mutex<Option<u16>>,
    pub login_delay_ms: AtomicU64,
    pub requests: Mutex<Vec<Recorded>>,
}

impl FakeState {
    fn new() -> Self {
        Self {
            valid_access: Mutex::new("A1".to_owned()),
            next_access: Mutex::new("A2".to_owned()),
            rotate_refresh: Mutex::new(None),
            refresh_fails: AtomicBool::new(false),
            refresh_delay_ms: AtomicU64::new(0),
            refresh_calls: AtomicU32::new(0),
            logout_fails: AtomicBool::new(false),
            me_status: Mutex::new(None),
            login_delay_ms: AtomicU64::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, path: &str, headers: &HeaderMap, body: Value) -> Option<String> {
        let bearer = bearer(headers);
        self.requests.lock().push(Recorded { path: path.to_owned(), bearer: bearer.clone(), body });
        bearer
    }

    fn authorized(&self, bearer: Option<&str>) -> bool {
        bearer == Some(self.valid_access.lock().as_str())
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned)
}

pub fn user_json() -> Value {
    json!({ "id": 1, "email": "a@b.com", "name": "Ana", "role": "member" })
}

pub fn test_user() -> User {
    let mut user = User::new(1_i64, "a@b.com");
    user.name = Some("Ana".to_owned());
    user.role = Some("member".to_owned());
    user
}

type Reply = (StatusCode, Json<Value>);

fn reply(status: StatusCode, body: Value) -> Reply {
    (status, Json(body))
}

fn unauthorized() -> Reply {
    reply(StatusCode::UNAUTHORIZED, json!({ "message": "Invalid or expired token" }))
}

fn auth_success() -> Reply {
    reply(
        StatusCode::OK,
        json!({
            "user": user_json(),
            "tokens": { "accessToken": "A1", "refreshToken": "R1" },
            "message": "Login successful"
        }),
    )
}

async fn login(
    State(s): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Reply {
    s.record("/auth/login", &headers, body.clone());
    let delay = s.login_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    if body["identifier"] == UNVERIFIED {
        return reply(
            StatusCode::FORBIDDEN,
            json!({ "message": "Please verify your email", "code": "EMAIL_NOT_VERIFIED" }),
        );
    }
    if body["password"] != PASSWORD {
        return reply(StatusCode::UNAUTHORIZED, json!({ "message": "Invalid credentials" }));
    }
    *s.valid_access.lock() = "A1".to_owned();
    auth_success()
}

async fn google(
    State(s): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Reply {
    s.record("/auth/google", &headers, body.clone());
    if body["idToken"] != GOOGLE_CREDENTIAL {
        return reply(StatusCode::UNAUTHORIZED, json!({ "message": "Invalid Google credential" }));
    }
    *s.valid_access.lock() = "A1".to_owned();
    auth_success()
}

async fn register(
    State(s): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    s.record("/auth/register", &headers, body.clone());
    if body["email"] == SILENT {
        return StatusCode::CREATED.into_response();
    }
    if body["email"] == TAKEN {
        return reply(
            StatusCode::CONFLICT,
            json!({ "error": { "code": "DUPLICATE_EMAIL", "message": "Email already registered" } }),
        )
        .into_response();
    }
    reply(
        StatusCode::CREATED,
        json!({ "message": "Account created. Please verify your email." }),
    )
    .into_response()
}

async fn logout(
    State(s): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Reply {
    s.record("/auth/logout", &headers, body);
    if s.logout_fails.load(Ordering::SeqCst) {
        return reply(StatusCode::INTERNAL_SERVER_ERROR, json!({ "message": "logout exploded" }));
    }
    reply(StatusCode::OK, json!({ "message": "Logged out" }))
}

async fn logout_all(State(s): State<Arc<FakeState>>, headers: HeaderMap) -> Reply {
    let bearer = s.record("/auth/logout-all", &headers, Value::Null);
    if s.logout_fails.load(Ordering::SeqCst) {
        return reply(StatusCode::INTERNAL_SERVER_ERROR, json!({ "message": "logout exploded" }));
    }
    if !s.authorized(bearer.as_deref()) {
        return unauthorized();
    }
    reply(StatusCode::OK, json!({ "message": "Logged out from all devices" }))
}

async fn me(State(s): State<Arc<FakeState>>, headers: HeaderMap) -> Reply {
    let bearer = s.record("/auth/me", &headers, Value::Null);
    if !s.authorized(bearer.as_deref()) {
        return unauthorized();
    }
    if let Some(code) = *s.me_status.lock() {
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return reply(status, json!({ "message": "profile unavailable" }));
    }
    reply(StatusCode::OK, json!({ "user": user_json() }))
}

async fn refresh(
    State(s): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Reply {
    s.record("/auth/refresh", &headers, body);
    s.refresh_calls.fetch_add(1, Ordering::SeqCst);
    let delay = s.refresh_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    if s.refresh_fails.load(Ordering::SeqCst) {
        return reply(StatusCode::UNAUTHORIZED, json!({ "message": "Invalid refresh token" }));
    }
    let next = s.next_access.lock().clone();
    *s.valid_access.lock() = next.clone();
    match s.rotate_refresh.lock().clone() {
        Some(refresh) => {
            reply(StatusCode::OK, json!({ "accessToken": next, "refreshToken": refresh }))
        }
        None => reply(StatusCode::OK, json!({ "accessToken": next })),
    }
}

async fn workouts(State(s): State<Arc<FakeState>>, headers: HeaderMap) -> Reply {
    let bearer = s.record("/workouts", &headers, Value::Null);
    if !s.authorized(bearer.as_deref()) {
        return unauthorized();
    }
    reply(StatusCode::OK, json!({ "items": [{ "id": 10, "name": "Leg day" }] }))
}

async fn boom(State(s): State<Arc<FakeState>>, headers: HeaderMap) -> Reply {
    s.record("/boom", &headers, Value::Null);
    reply(StatusCode::INTERNAL_SERVER_ERROR, json!({ "message": "database unavailable" }))
}

async fn update_profile(
    State(s): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Reply {
    let bearer = s.record("/users/me", &headers, body.clone());
    if !s.authorized(bearer.as_deref()) {
        return unauthorized();
    }
    let mut user = user_json();
    if let (Some(target), Some(patch)) = (user.as_object_mut(), body.as_object()) {
        for (k, v) in patch {
            target.insert(k.clone(), v.clone());
        }
    }
    reply(StatusCode::OK, json!({ "user": user }))
}

async fn change_password(
    State(s): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Reply {
    let bearer = s.record("/auth/change-password", &headers, body.clone());
    if !s.authorized(bearer.as_deref()) {
        return unauthorized();
    }
    if body["currentPassword"] != PASSWORD {
        return reply(StatusCode::BAD_REQUEST, json!({ "message": "Current password is incorrect" }));
    }
    reply(StatusCode::OK, json!({ "message": "Password changed" }))
}

async fn verify_email(
    State(s): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Reply {
    s.record("/auth/verify-email", &headers, body.clone());
    if body["token"] != "verify-ok" {
        return reply(StatusCode::BAD_REQUEST, json!({ "message": "Verification link expired" }));
    }
    reply(StatusCode::OK, json!({ "message": "Email verified" }))
}

async fn no_content(
    State(s): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    s.record("/auth/account", &headers, body);
    StatusCode::NO_CONTENT
}

async fn echo_message(
    State(s): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Reply {
    s.record("/auth/account", &headers, body);
    reply(StatusCode::OK, json!({ "message": "If the account exists, an email was sent" }))
}

fn router(state: Arc<FakeState>) -> Router {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/google", post(google))
        .route("/auth/register", post(register))
        .route("/auth/logout", post(logout))
        .route("/auth/logout-all", post(logout_all))
        .route("/auth/me", get(me))
        .route("/auth/refresh", post(refresh))
        .route("/auth/change-password", post(change_password))
        .route("/auth/verify-email", post(verify_email))
        .route("/auth/resend-verification", post(no_content))
        .route("/auth/forgot-password", post(echo_message))
        .route("/auth/reset-password", post(echo_message))
        .route("/users/me", put(update_profile))
        .route("/workouts", get(workouts))
        .route("/boom", get(boom))
        .with_state(state)
}

/// A running fake API.
pub struct FakeApi {
    pub base_url: String,
    pub state: Arc<FakeState>,
}

impl FakeApi {
    pub async fn spawn() -> anyhow::Result<Self> {
        let state = Arc::new(FakeState::new());
        let app = router(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(Self { base_url: format!("http://{addr}"), state })
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::for_api(&self.base_url)
    }

    /// Context backed by fresh in-memory storage.
    pub fn context(&self) -> SessionContext {
        self.context_with(Arc::new(MemoryStorage::new()))
    }

    pub fn context_with(&self, storage: Arc<dyn Storage>) -> SessionContext {
        SessionContext::with_storage(self.config(), storage)
    }

    /// Context whose storage already holds `pair` (and optionally a user snapshot).
    pub fn context_signed_in(&self, pair: CredentialPair, user: Option<User>) -> SessionContext {
        let storage = Arc::new(MemoryStorage::new());
        seed_storage(storage.as_ref(), &pair, user.as_ref());
        self.context_with(storage)
    }

    /// Number of requests the fake received on `path`.
    pub fn hits(&self, path: &str) -> usize {
        self.state.requests.lock().iter().filter(|r| r.path == path).count()
    }

    pub fn last(&self, path: &str) -> Option<Recorded> {
        self.state.requests.lock().iter().rev().find(|r| r.path == path).cloned()
    }

    pub fn refresh_calls(&self) -> u32 {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }
}

/// Write credentials (and a signed-in snapshot if `user` is set) as a
/// previous process would have left them.
pub fn seed_storage(storage: &dyn Storage, pair: &CredentialPair, user: Option<&User>) {
    let creds = serde_json::to_value(pair).unwrap_or_default();
    let _ = storage.save(crate::credential::CREDENTIALS_KEY, &creds);
    if let Some(user) = user {
        let snapshot = json!({ "user": user, "tokens": pair, "isAuthenticated": true });
        let _ = storage.save(crate::state::SESSION_KEY, &snapshot);
    }
}

/// A bare cell over in-memory storage holding `pair`.
pub fn cell_with(pair: Option<CredentialPair>) -> Arc<SessionCell> {
    let storage = Arc::new(MemoryStorage::new());
    if let Some(ref pair) = pair {
        seed_storage(storage.as_ref(), pair, None);
    }
    Arc::new(SessionCell::open(storage))
}
