// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session state: the `{user, tokens, is_authenticated, is_loading}` snapshot.
//!
//! [`SessionCell`] publishes the snapshot through a `watch` channel. Every
//! transition is applied under the channel's lock in one step, so readers
//! never observe a half-applied change, and identity changes are written to
//! storage under [`SESSION_KEY`] before the lock is released.
//!
//! Identity operations are fenced by a generation counter: an operation
//! records the generation when it starts, and its result is only committed if
//! no newer operation has started since. Token refresh is fenced by the
//! credential pair it was sent with instead, so it survives operations that
//! leave the identity alone.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::credential::{CredentialPair, TokenStore};
use crate::error::ApiError;
use crate::model::User;
use crate::storage::Storage;

/// Storage key holding the persisted session snapshot.
pub const SESSION_KEY: &str = "auth-storage";

/// Authentication state visible to session consumers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub tokens: Option<CredentialPair>,
    #[serde(default)]
    pub is_authenticated: bool,
    /// True while any session operation has a request in flight. Not persisted.
    #[serde(skip)]
    pub is_loading: bool,
}

/// Coarse lifecycle position derived from a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Anonymous,
    /// Credentials are present but the user has not been confirmed yet.
    Restoring,
    Authenticated,
}

impl Session {
    pub fn phase(&self) -> SessionPhase {
        if self.is_authenticated && self.user.is_some() {
            SessionPhase::Authenticated
        } else if self.tokens.is_some() {
            SessionPhase::Restoring
        } else {
            SessionPhase::Anonymous
        }
    }

    /// Access token, only while authenticated.
    pub fn access_token(&self) -> Option<&str> {
        if !self.is_authenticated {
            return None;
        }
        self.tokens.as_ref().map(|t| t.access_token.as_str())
    }

    pub(crate) fn clear_identity(&mut self) {
        self.user = None;
        self.tokens = None;
        self.is_authenticated = false;
    }

    fn same_identity(&self, other: &Session) -> bool {
        self.user == other.user
            && self.tokens == other.tokens
            && self.is_authenticated == other.is_authenticated
    }

    /// Enforce the session invariants on a restored snapshot. The token store
    /// is authoritative for the credential pair.
    fn reconcile(mut self, stored: Option<CredentialPair>) -> Self {
        self.tokens = stored;
        self.is_loading = false;
        if self.tokens.is_none() {
            self.clear_identity();
        }
        if self.user.is_none() {
            self.is_authenticated = false;
        }
        self
    }
}

/// Identity transitions broadcast to interested tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    SignedIn { user: String },
    SignedOut,
    /// Credentials were rejected and could not be refreshed.
    Expired,
}

/// Owner of the published session snapshot and the token store behind it.
pub struct SessionCell {
    state: watch::Sender<Session>,
    tokens: TokenStore,
    storage: Arc<dyn Storage>,
    events: broadcast::Sender<SessionEvent>,
    generation: AtomicU64,
    in_flight: AtomicUsize,
}

impl SessionCell {
    /// Open the cell, restoring the snapshot and credentials from `storage`.
    pub fn open(storage: Arc<dyn Storage>) -> Self {
        let tokens = TokenStore::open(Arc::clone(&storage));
        let restored = match storage.load(SESSION_KEY) {
            Ok(Some(value)) => serde_json::from_value::<Session>(value).unwrap_or_else(|e| {
                warn!(err = %e, "ignoring malformed session snapshot");
                Session::default()
            }),
            Ok(None) => Session::default(),
            Err(e) => {
                warn!(err = %format!("{e:#}"), "failed to read session snapshot");
                Session::default()
            }
        };
        let session = restored.reconcile(tokens.get());
        debug!(phase = ?session.phase(), "session restored");
        let (state, _) = watch::channel(session);
        let (events, _) = broadcast::channel(64);
        Self {
            state,
            tokens,
            storage,
            events,
            generation: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Latest committed snapshot.
    pub fn snapshot(&self) -> Session {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Current fencing generation, for operations that must not bump it.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Start an identity operation, superseding every older one.
    pub(crate) fn begin(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Mark an operation in flight until the guard drops.
    pub(crate) fn loading(&self) -> LoadingGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.sync_loading();
        LoadingGuard { cell: self }
    }

    /// Apply `f` only if no operation began after `ticket` was issued.
    ///
    /// If `f` fails the snapshot is left as it was.
    pub(crate) fn commit_fenced<R>(
        &self,
        ticket: u64,
        f: impl FnOnce(&mut Session, &TokenStore) -> Result<R, ApiError>,
    ) -> Result<R, ApiError> {
        self.apply(Fence::Generation(ticket), f)
    }

    /// Apply `f` only if the token store still holds `expected`.
    pub(crate) fn commit_for<R>(
        &self,
        expected: &CredentialPair,
        f: impl FnOnce(&mut Session, &TokenStore) -> Result<R, ApiError>,
    ) -> Result<R, ApiError> {
        self.apply(Fence::Credentials(expected), f)
    }

    /// Apply `f` unconditionally.
    pub(crate) fn commit(&self, f: impl FnOnce(&mut Session, &TokenStore)) {
        // Unfenced commits cannot be superseded and `f` cannot fail.
        let _ = self.apply(Fence::Always, |session, tokens| {
            f(session, tokens);
            Ok(())
        });
    }

    /// Drop the session after `rejected` could not be refreshed.
    ///
    /// Nothing happens if the store has moved on to other credentials, so a
    /// stale failure cannot sign out a newer login. Returns whether a live
    /// session was cleared.
    pub(crate) fn expire(&self, rejected: &CredentialPair) -> bool {
        let cleared = self
            .commit_for(rejected, |session, tokens| {
                if let Err(e) = tokens.clear() {
                    warn!(err = %e, "failed to clear credentials on expiry");
                }
                session.clear_identity();
                Ok(true)
            })
            .unwrap_or(false);
        if cleared {
            self.emit(SessionEvent::Expired);
        }
        cleared
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn apply<R>(
        &self,
        fence: Fence<'_>,
        f: impl FnOnce(&mut Session, &TokenStore) -> Result<R, ApiError>,
    ) -> Result<R, ApiError> {
        let mut outcome = Err(ApiError::superseded());
        self.state.send_if_modified(|session| {
            let current = match fence {
                Fence::Always => true,
                Fence::Generation(ticket) => self.generation.load(Ordering::SeqCst) == ticket,
                Fence::Credentials(expected) => self.tokens.get().as_ref() == Some(expected),
            };
            if !current {
                return false;
            }
            let before = session.clone();
            match f(session, &self.tokens) {
                Ok(value) => outcome = Ok(value),
                Err(e) => {
                    *session = before;
                    outcome = Err(e);
                    return false;
                }
            }
            if session.same_identity(&before) {
                return session.is_loading != before.is_loading;
            }
            self.persist(session);
            true
        });
        outcome
    }

    fn sync_loading(&self) {
        self.state.send_if_modified(|session| {
            let loading = self.in_flight.load(Ordering::SeqCst) > 0;
            if session.is_loading == loading {
                return false;
            }
            session.is_loading = loading;
            true
        });
    }

    fn persist(&self, session: &Session) {
        let result = serde_json::to_value(session)
            .map_err(anyhow::Error::from)
            .and_then(|value| self.storage.save(SESSION_KEY, &value));
        if let Err(e) = result {
            warn!(err = %format!("{e:#}"), "failed to persist session snapshot");
        }
    }
}

/// Condition a commit is applied under.
#[derive(Clone, Copy)]
enum Fence<'a> {
    Always,
    Generation(u64),
    Credentials(&'a CredentialPair),
}

/// Keeps `is_loading` raised while alive.
pub(crate) struct LoadingGuard<'a> {
    cell: &'a SessionCell,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.cell.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.cell.sync_loading();
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
