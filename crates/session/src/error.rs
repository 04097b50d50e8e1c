// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use serde::{Deserialize, Serialize};

/// Server code sent when a login is refused until the address is confirmed.
pub const EMAIL_NOT_VERIFIED: &str = "EMAIL_NOT_VERIFIED";

/// Failure categories surfaced by the session client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Transport failed before a response arrived (connect, timeout, reset).
    Network,
    /// The server answered 401.
    Unauthorized,
    /// The server rejected the request (4xx other than 401).
    Validation,
    /// The server failed (5xx or an unexpected status).
    Server,
    /// Stored credentials are missing or no longer accepted.
    SessionInvalid,
    /// A newer identity operation started before this one committed.
    Superseded,
    /// Durable client storage could not be read or written.
    Storage,
    /// A response body did not match the expected shape.
    Decode,
}

impl ErrorKind {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            400..=499 => Self::Validation,
            _ => Self::Server,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "NETWORK",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Validation => "VALIDATION",
            Self::Server => "SERVER",
            Self::SessionInvalid => "SESSION_INVALID",
            Self::Superseded => "SUPERSEDED",
            Self::Storage => "STORAGE",
            Self::Decode => "DECODE",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by every fallible session operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub kind: ErrorKind,
    /// HTTP status, when the failure came from a response.
    pub status: Option<u16>,
    /// Machine-readable code supplied by the server, if any.
    pub code: Option<String>,
    /// Human-readable message suitable for display.
    pub message: String,
}

/// Error envelopes the API is known to send.
#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorEnvelope {
    Nested { error: ErrorBody },
    Flat(ErrorBody),
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default, alias = "errorCode")]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, status: None, code: None, message: message.into() }
    }

    /// Build an error from a non-success response status and raw body.
    pub fn from_response(status: u16, body: &[u8]) -> Self {
        let (code, message) = match serde_json::from_slice::<ErrorEnvelope>(body) {
            Ok(ErrorEnvelope::Nested { error }) | Ok(ErrorEnvelope::Flat(error)) => {
                (error.code, error.message)
            }
            Err(_) => {
                let text = String::from_utf8_lossy(body).trim().to_owned();
                (None, if text.is_empty() { None } else { Some(text) })
            }
        };
        Self {
            kind: ErrorKind::from_status(status),
            status: Some(status),
            code,
            message: message.unwrap_or_else(|| format!("request failed with status {status}")),
        }
    }

    pub fn network(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::new(ErrorKind::Decode, err.to_string());
        }
        Self::new(ErrorKind::Network, err.to_string())
    }

    pub fn decode(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::Decode, err.to_string())
    }

    pub fn storage(err: anyhow::Error) -> Self {
        Self::new(ErrorKind::Storage, format!("{err:#}"))
    }

    pub fn session_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SessionInvalid, message)
    }

    pub fn superseded() -> Self {
        Self::new(ErrorKind::Superseded, "superseded by a newer session operation")
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind == ErrorKind::Unauthorized
    }

    /// True when the server refused a login because the email is unconfirmed.
    pub fn is_email_not_verified(&self) -> bool {
        self.code.as_deref() == Some(EMAIL_NOT_VERIFIED)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({status}): {}", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ApiError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
