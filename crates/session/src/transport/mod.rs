// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport to the fitness API.
//!
//! [`ApiClient::send`] attaches the stored access token and, when the server
//! answers 401, refreshes the credentials once and replays the request.
//! Refresh is single-flight: requests that fail concurrently queue behind one
//! refresh and replay with the token it produced, or all fail if it failed.

pub mod request;
pub mod routes;

use std::sync::{Arc, Once};

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use crate::transport::request::ApiRequest;

use crate::config::ClientConfig;
use crate::credential::CredentialPair;
use crate::error::ApiError;
use crate::model::RefreshResponse;
use crate::state::SessionCell;

static CRYPTO_INIT: Once = Once::new();

/// Install the rustls crypto provider (needed for reqwest even on plain HTTP).
pub fn ensure_crypto_provider() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// HTTP client for the fitness API with one refresh-and-retry per request.
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    session: Arc<SessionCell>,
    refresh_flight: Mutex<()>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig, session: Arc<SessionCell>) -> Self {
        ensure_crypto_provider();
        let http = match reqwest::Client::builder().timeout(config.request_timeout()).build() {
            Ok(http) => http,
            Err(e) => {
                warn!(err = %e, "http client build failed, request timeout not applied");
                reqwest::Client::default()
            }
        };
        Self {
            base_url: config.base_url().to_owned(),
            http,
            session,
            refresh_flight: Mutex::new(()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &Arc<SessionCell> {
        &self.session
    }

    /// Send `req` and decode the JSON response body.
    pub async fn send<T: DeserializeOwned>(&self, req: &ApiRequest) -> Result<T, ApiError> {
        let body = self.execute(req).await?;
        decode(&body)
    }

    /// Send `req`, discarding any response body.
    pub async fn send_unit(&self, req: &ApiRequest) -> Result<(), ApiError> {
        self.execute(req).await.map(drop)
    }

    async fn execute(&self, req: &ApiRequest) -> Result<Vec<u8>, ApiError> {
        let token = match req.bearer() {
            _ if req.is_anonymous() => None,
            Some(explicit) => Some(explicit.to_owned()),
            None => self.session.tokens().access_token(),
        };
        let rejected = match self.dispatch(req, token.as_deref()).await {
            Err(e) if e.is_unauthorized() && req.is_refreshable() && token.is_some() => e,
            other => return other,
        };

        debug!(method = %req.method(), path = %req.path(), "access token rejected, refreshing");
        match self.refresh(token.as_deref()).await {
            Ok(fresh) => self.dispatch(req, Some(&fresh)).await,
            Err(e) => {
                debug!(path = %req.path(), err = %e, "refresh unavailable, returning original failure");
                Err(rejected)
            }
        }
    }

    /// Obtain a usable access token after `stale` was rejected.
    ///
    /// If another caller already rotated the token while this one waited,
    /// the rotated token is returned without a second refresh call. The
    /// result is only stored if the credentials it was requested with are
    /// still current; a failed refresh clears them and expires the session.
    pub async fn refresh(&self, stale: Option<&str>) -> Result<String, ApiError> {
        let _flight = self.refresh_flight.lock().await;

        let pair = self
            .session
            .tokens()
            .get()
            .ok_or_else(|| ApiError::session_invalid("no credentials to refresh"))?;
        if stale.is_some_and(|s| s != pair.access_token) {
            debug!("access token already rotated");
            return Ok(pair.access_token);
        }

        match self.request_refresh(&pair.refresh_token).await {
            Ok(resp) => {
                let updated = self
                    .session
                    .commit_for(&pair, |session, tokens| {
                        let updated = match resp.refresh_token {
                            Some(refresh) => {
                                let rotated = CredentialPair::new(resp.access_token, refresh);
                                tokens.set(rotated.clone())?;
                                rotated
                            }
                            None => tokens.set_access_token(resp.access_token)?.ok_or_else(
                                || ApiError::session_invalid("credentials cleared during refresh"),
                            )?,
                        };
                        session.tokens = Some(updated.clone());
                        Ok(updated)
                    })
                    .inspect_err(|e| debug!(err = %e, "discarding refreshed credentials"))?;
                info!("access token refreshed");
                Ok(updated.access_token)
            }
            Err(e) => {
                warn!(err = %e, "token refresh failed, ending session");
                self.session.expire(&pair);
                Err(e)
            }
        }
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        let req = ApiRequest::post(routes::REFRESH)
            .anonymous()
            .json(&json!({ "refreshToken": refresh_token }))?;
        let body = self.dispatch(&req, None).await?;
        decode(&body)
    }

    /// One raw HTTP exchange. Non-2xx statuses become [`ApiError`]s.
    async fn dispatch(&self, req: &ApiRequest, token: Option<&str>) -> Result<Vec<u8>, ApiError> {
        let url = format!("{}{}", self.base_url, req.path());
        let mut builder = self.http.request(req.method().clone(), &url);
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = req.body() {
            builder = builder.json(body);
        }

        let resp = builder.send().await.map_err(|e| {
            debug!(method = %req.method(), path = %req.path(), err = %e, "request failed to send");
            ApiError::network(e)
        })?;
        let status = resp.status();
        let body = resp.bytes().await.map_err(ApiError::network)?;
        if !status.is_success() {
            debug!(method = %req.method(), path = %req.path(), status = status.as_u16(), "request rejected");
            return Err(ApiError::from_response(status.as_u16(), &body));
        }
        Ok(body.to_vec())
    }
}

/// Decode a JSON body. An empty body decodes as `null`, so responses that
/// may carry no body should be read as `Option<T>`.
fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    if body.is_empty() {
        return serde_json::from_value(Value::Null).map_err(ApiError::decode);
    }
    serde_json::from_slice(body).map_err(ApiError::decode)
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
