// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire types exchanged with the fitness API.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::credential::CredentialPair;

/// User identifier. The API has used both numeric ids and document ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Number(i64),
    Text(String),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for UserId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

/// Profile of the signed-in user as returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(alias = "_id")]
    pub id: UserId,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membership_type: Option<String>,
    /// Membership expiry as the server's ISO-8601 timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membership_expiry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_email_verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Height in centimetres.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    /// Weight in kilograms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fitness_goal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl User {
    /// Minimal user with only the required fields set.
    pub fn new(id: impl Into<UserId>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            name: None,
            role: None,
            membership_type: None,
            membership_expiry: None,
            is_email_verified: None,
            avatar: None,
            height: None,
            weight: None,
            date_of_birth: None,
            gender: None,
            activity_level: None,
            fitness_goal: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Name to show in greetings, falling back to the email address.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|n| !n.is_empty()).unwrap_or(&self.email)
    }
}

/// Body of `POST /auth/login`.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    /// Email address or username.
    pub identifier: &'a str,
    pub password: &'a str,
}

/// Body of `POST /auth/google`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleLoginRequest<'a> {
    pub id_token: &'a str,
}

/// Body of `POST /auth/register`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

/// Partial profile sent to `PUT /users/me`. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fitness_goal: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Successful login, Google login, or token exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub user: User,
    pub tokens: CredentialPair,
    #[serde(default)]
    pub message: Option<String>,
}

/// `{ "user": ... }` envelope used by profile endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct UserEnvelope {
    pub user: User,
}

/// Bodies that only carry a human-readable confirmation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: Option<String>,
}

/// Response of `POST /auth/refresh`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    /// Present only when the server rotates refresh tokens.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
