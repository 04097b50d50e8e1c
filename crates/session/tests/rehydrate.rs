// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Restart behavior: sessions written by one context are restored by the next
//! one opened on the same state directory.

use std::path::Path;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};

use fittrack_session::config::ClientConfig;
use fittrack_session::credential::CredentialPair;
use fittrack_session::state::SessionPhase;
use fittrack_session::SessionContext;

/// Access token the fake accepts; refresh rotates it to `A2`.
struct Api {
    valid: Mutex<String>,
}

type Reply = (StatusCode, Json<Value>);

fn authorized(api: &Api, headers: &HeaderMap) -> bool {
    let expected = format!("Bearer {}", api.valid.lock());
    headers.get("authorization").and_then(|v| v.to_str().ok()) == Some(expected.as_str())
}

async fn login(State(api): State<Arc<Api>>) -> Reply {
    *api.valid.lock() = "A1".to_owned();
    (
        StatusCode::OK,
        Json(json!({
            "user": { "id": 7, "email": "ana@fit.example", "name": "Ana" },
            "tokens": { "accessToken": "A1", "refreshToken": "R1" }
        })),
    )
}

async fn me(State(api): State<Arc<Api>>, headers: HeaderMap) -> Reply {
    if !authorized(&api, &headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "expired" })));
    }
    (StatusCode::OK, Json(json!({ "user": { "id": 7, "email": "ana@fit.example", "name": "Ana" } })))
}

async fn refresh(State(api): State<Arc<Api>>, Json(body): Json<Value>) -> Reply {
    if body["refreshToken"] != "R1" {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "revoked" })));
    }
    *api.valid.lock() = "A2".to_owned();
    (StatusCode::OK, Json(json!({ "accessToken": "A2" })))
}

async fn logout() -> Reply {
    (StatusCode::OK, Json(json!({ "message": "Logged out" })))
}

async fn spawn_api() -> anyhow::Result<(String, Arc<Api>)> {
    let api = Arc::new(Api { valid: Mutex::new("A1".to_owned()) });
    let app = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/me", get(me))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .with_state(Arc::clone(&api));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), api))
}

fn open(url: &str, dir: &Path) -> SessionContext {
    let config = ClientConfig { state_dir: Some(dir.to_path_buf()), ..ClientConfig::for_api(url) };
    SessionContext::open(config)
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
}

// -- Sign in, restart, confirm ------------------------------------------------

#[tokio::test]
async fn login_survives_restart() -> anyhow::Result<()> {
    let (url, _api) = spawn_api().await?;
    let dir = tempfile::tempdir()?;

    let first = open(&url, dir.path());
    first.controller.login("ana@fit.example", "secret").await?;
    drop(first);

    let creds = read_json(&dir.path().join("credentials.json"))?;
    assert_eq!(creds, json!({ "accessToken": "A1", "refreshToken": "R1" }));
    let snapshot = read_json(&dir.path().join("auth-storage.json"))?;
    assert_eq!(snapshot["isAuthenticated"], true);
    assert_eq!(snapshot["user"]["email"], "ana@fit.example");

    let second = open(&url, dir.path());
    assert_eq!(second.session.snapshot().phase(), SessionPhase::Authenticated);

    let user = second.controller.initialize().await?;
    assert_eq!(user.map(|u| u.email).as_deref(), Some("ana@fit.example"));
    let session = second.controller.session();
    assert!(session.is_authenticated);
    assert!(!session.is_loading);
    Ok(())
}

// -- Refresh during restore ---------------------------------------------------

#[tokio::test]
async fn refreshed_token_is_persisted() -> anyhow::Result<()> {
    let (url, api) = spawn_api().await?;
    let dir = tempfile::tempdir()?;

    let first = open(&url, dir.path());
    first.controller.login("ana@fit.example", "secret").await?;
    drop(first);

    // The server has moved on while the client was not running.
    *api.valid.lock() = "A-elsewhere".to_owned();

    let second = open(&url, dir.path());
    second.controller.initialize().await?;
    assert_eq!(second.session.tokens().get(), Some(CredentialPair::new("A2", "R1")));
    drop(second);

    let creds = read_json(&dir.path().join("credentials.json"))?;
    assert_eq!(creds["accessToken"], "A2");
    assert_eq!(creds["refreshToken"], "R1");
    Ok(())
}

// -- Sign out, restart --------------------------------------------------------

#[tokio::test]
async fn logout_survives_restart() -> anyhow::Result<()> {
    let (url, _api) = spawn_api().await?;
    let dir = tempfile::tempdir()?;

    let first = open(&url, dir.path());
    first.controller.login("ana@fit.example", "secret").await?;
    first.controller.logout().await;
    drop(first);

    assert!(!dir.path().join("credentials.json").exists());

    let second = open(&url, dir.path());
    assert_eq!(second.session.snapshot().phase(), SessionPhase::Anonymous);
    assert_eq!(second.controller.initialize().await?, None);
    Ok(())
}
