// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token store: the single source of truth for the access/refresh pair.
//!
//! The pair is cached in memory and written through to [`Storage`] on every
//! change. Both halves always live in one document, so a partially written
//! pair is never observable, in this process or the next one.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::storage::Storage;

/// Storage key holding the persisted pair.
pub const CREDENTIALS_KEY: &str = "credentials";

/// Access and refresh tokens issued together by the API.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self { access_token: access_token.into(), refresh_token: refresh_token.into() }
    }

    /// Both halves are non-empty.
    pub fn is_complete(&self) -> bool {
        !self.access_token.is_empty() && !self.refresh_token.is_empty()
    }
}

// Tokens are bearer secrets; keep them out of logs and panics.
impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Persistent holder of the current [`CredentialPair`].
pub struct TokenStore {
    storage: Arc<dyn Storage>,
    current: RwLock<Option<CredentialPair>>,
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore").field("present", &self.current.read().is_some()).finish()
    }
}

impl TokenStore {
    /// Open the store, loading any pair persisted by a previous process.
    ///
    /// An unreadable or incomplete document is treated as absent.
    pub fn open(storage: Arc<dyn Storage>) -> Self {
        let current = match storage.load(CREDENTIALS_KEY) {
            Ok(Some(value)) => match serde_json::from_value::<CredentialPair>(value) {
                Ok(pair) if pair.is_complete() => Some(pair),
                Ok(_) => {
                    warn!("ignoring incomplete persisted credentials");
                    None
                }
                Err(e) => {
                    warn!(err = %e, "ignoring malformed persisted credentials");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(err = %format!("{e:#}"), "failed to read persisted credentials");
                None
            }
        };
        debug!(present = current.is_some(), "token store opened");
        Self { storage, current: RwLock::new(current) }
    }

    /// Current pair, if any.
    pub fn get(&self) -> Option<CredentialPair> {
        self.current.read().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.current.read().as_ref().map(|p| p.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.current.read().as_ref().map(|p| p.refresh_token.clone())
    }

    /// Replace the pair. The in-memory copy only changes once the write lands.
    pub fn set(&self, pair: CredentialPair) -> Result<(), ApiError> {
        let mut current = self.current.write();
        self.store(&mut current, pair)
    }

    /// Swap in a new access token, keeping the stored refresh token.
    ///
    /// Returns the updated pair, or `None` when there is no pair to update.
    /// The read and the write happen under one lock, so a concurrent
    /// [`Self::clear`] is never undone.
    pub fn set_access_token(
        &self,
        access_token: impl Into<String>,
    ) -> Result<Option<CredentialPair>, ApiError> {
        let mut current = self.current.write();
        let Some(refresh_token) = current.as_ref().map(|p| p.refresh_token.clone()) else {
            return Ok(None);
        };
        let pair = CredentialPair::new(access_token, refresh_token);
        self.store(&mut current, pair.clone())?;
        Ok(Some(pair))
    }

    fn store(
        &self,
        current: &mut Option<CredentialPair>,
        pair: CredentialPair,
    ) -> Result<(), ApiError> {
        if !pair.is_complete() {
            return Err(ApiError::session_invalid("refusing to store an incomplete credential pair"));
        }
        let value = serde_json::to_value(&pair).map_err(ApiError::decode)?;
        self.storage.save(CREDENTIALS_KEY, &value).map_err(|e| {
            warn!(err = %format!("{e:#}"), "failed to persist credentials");
            ApiError::storage(e)
        })?;
        *current = Some(pair);
        Ok(())
    }

    /// Forget the pair. Memory is cleared even if the storage delete fails.
    pub fn clear(&self) -> Result<(), ApiError> {
        let mut current = self.current.write();
        *current = None;
        self.storage.remove(CREDENTIALS_KEY).map_err(|e| {
            warn!(err = %format!("{e:#}"), "failed to remove persisted credentials");
            ApiError::storage(e)
        })
    }
}

#[cfg(test)]
#[path = "credential_tests.rs"]
mod tests;
