// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the session client.
#[derive(Debug, Clone, clap::Args)]
pub struct ClientConfig {
    /// Base URL of the fitness API.
    #[arg(long, default_value = "http://127.0.0.1:5000/api", env = "FITTRACK_API_URL")]
    pub api_url: String,

    /// Notification socket URL. Derived from the API URL when unset.
    #[arg(long, env = "FITTRACK_WS_URL")]
    pub ws_url: Option<String>,

    /// OAuth client id for Google sign-in, handed to the identity provider.
    #[arg(long, env = "FITTRACK_GOOGLE_CLIENT_ID")]
    pub google_client_id: Option<String>,

    /// Directory for persisted credentials and the session snapshot.
    #[arg(long, env = "FITTRACK_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Per-request timeout in milliseconds.
    #[arg(long, default_value_t = 15000, env = "FITTRACK_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: u64,

    /// Log filter directive (e.g. `info`, `fittrack_session=debug`).
    #[arg(long, default_value = "info", env = "FITTRACK_LOG")]
    pub log_level: String,

    /// Log output format: `text` or `json`.
    #[arg(long, default_value = "text", env = "FITTRACK_LOG_FORMAT")]
    pub log_format: String,
}

impl ClientConfig {
    /// Defaults pointed at `api_url`.
    pub fn for_api(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            ws_url: None,
            google_client_id: None,
            state_dir: None,
            request_timeout_ms: 15000,
            log_level: "info".to_owned(),
            log_format: "text".to_owned(),
        }
    }

    /// API base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Notification socket URL: explicit, or `ws(s)://<api host>/ws`.
    pub fn notification_url(&self) -> String {
        if let Some(ref url) = self.ws_url {
            return url.clone();
        }
        let base = self.base_url();
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_owned()
        };
        let root = ws_base.strip_suffix("/api").unwrap_or(&ws_base);
        format!("{root}/ws")
    }

    /// Resolved state directory.
    pub fn state_dir(&self) -> PathBuf {
        match self.state_dir {
            Some(ref dir) => dir.clone(),
            None => default_state_dir_with(|name| std::env::var(name).ok()),
        }
    }
}

/// Resolve the default state directory from an environment lookup.
///
/// Checks `$XDG_STATE_HOME/fittrack`, then `$HOME/.local/state/fittrack`,
/// then `.fittrack` in the working directory.
pub fn default_state_dir_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(xdg) = env("XDG_STATE_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(xdg).join("fittrack");
    }
    if let Some(home) = env("HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(home).join(".local/state/fittrack");
    }
    PathBuf::from(".fittrack")
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
