// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::transport::routes;

/// A replayable API request: everything needed to send it again after a
/// token refresh.
#[derive(Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    body: Option<Value>,
    anonymous: bool,
    bearer: Option<String>,
}

// Bodies carry passwords; only the route is printed.
impl std::fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("anonymous", &self.anonymous)
            .finish()
    }
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), body: None, anonymous: false, bearer: None }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, ApiError> {
        self.body = Some(serde_json::to_value(body).map_err(ApiError::decode)?);
        Ok(self)
    }

    /// Send without credentials and never refresh on 401 (sign-in endpoints).
    pub fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }

    /// Authenticate with `token` instead of the stored one. Such requests
    /// never refresh.
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    pub fn bearer(&self) -> Option<&str> {
        self.bearer.as_deref()
    }

    /// Whether a 401 on this request may trigger a token refresh.
    pub fn is_refreshable(&self) -> bool {
        !self.anonymous && self.bearer.is_none() && self.path != routes::REFRESH
    }
}
