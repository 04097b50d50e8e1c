// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fittrack session client: credential storage, an authenticated API client
//! that refreshes expired tokens, and the controller that owns sign-in state.

pub mod config;
pub mod controller;
pub mod credential;
pub mod error;
pub mod model;
pub mod notify;
pub mod state;
pub mod storage;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ClientConfig;
use crate::controller::SessionController;
use crate::notify::NotificationChannel;
use crate::state::SessionCell;
use crate::storage::{FileStorage, Storage};
use crate::transport::ApiClient;

/// Everything a session consumer needs, created once at startup and passed
/// to whatever reads session state or drives session operations.
pub struct SessionContext {
    pub config: ClientConfig,
    pub session: Arc<SessionCell>,
    pub api: Arc<ApiClient>,
    pub controller: Arc<SessionController>,
}

impl SessionContext {
    /// Context persisting to files under the configured state directory.
    pub fn open(config: ClientConfig) -> Self {
        let dir = config.state_dir();
        debug!(dir = %dir.display(), "opening session state");
        Self::with_storage(config, Arc::new(FileStorage::new(dir)))
    }

    pub fn with_storage(config: ClientConfig, storage: Arc<dyn Storage>) -> Self {
        let session = Arc::new(SessionCell::open(storage));
        let api = Arc::new(ApiClient::new(&config, Arc::clone(&session)));
        let controller = Arc::new(SessionController::new(Arc::clone(&api)));
        Self { config, session, api, controller }
    }

    /// Start the notification channel for this session.
    pub fn notifications(&self, cancel: CancellationToken) -> Arc<NotificationChannel> {
        NotificationChannel::spawn(self.config.notification_url(), self.session.subscribe(), cancel)
    }
}
