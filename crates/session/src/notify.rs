// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Push notifications for the signed-in user.
//!
//! [`NotificationChannel`] follows the session: it holds one socket while an
//! access token is available, reconnects when the token changes, and closes
//! when the session ends.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::state::Session;

const INITIAL_BACKOFF_MS: u64 = 100;
const MAX_BACKOFF_MS: u64 = 5000;

/// A notification pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, alias = "message", skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

/// Notification socket bound to the session's access token.
pub struct NotificationChannel {
    tx: broadcast::Sender<Notification>,
    connected: watch::Receiver<bool>,
    cancel: CancellationToken,
}

impl NotificationChannel {
    /// Start following `session`, connecting to `ws_url` whenever it is
    /// authenticated. Runs until `cancel` fires or the channel is dropped.
    pub fn spawn(
        ws_url: impl Into<String>,
        session: watch::Receiver<Session>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let (tx, _) = broadcast::channel(256);
        let (connected_tx, connected) = watch::channel(false);
        let cancel = cancel.child_token();
        let channel = Arc::new(Self { tx: tx.clone(), connected, cancel: cancel.clone() });

        let socket = Socket { ws_url: ws_url.into(), session, tx, connected: connected_tx, cancel };
        tokio::spawn(socket.run());
        channel
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Connection state updates.
    pub fn connected(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }
}

impl Drop for NotificationChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Exit {
    Cancelled,
    SessionChanged,
    Dropped,
}

struct Socket {
    ws_url: String,
    session: watch::Receiver<Session>,
    tx: broadcast::Sender<Notification>,
    connected: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl Socket {
    async fn run(mut self) {
        let mut backoff_ms = INITIAL_BACKOFF_MS;
        loop {
            let Some(token) = self.wait_for_token().await else {
                break;
            };

            let Some(url) = socket_url(&self.ws_url, &token) else {
                warn!(url = %self.ws_url, "invalid notification url, not connecting");
                break;
            };
            match tokio_tungstenite::connect_async(url).await {
                Ok((stream, _)) => {
                    backoff_ms = INITIAL_BACKOFF_MS;
                    debug!("notification socket connected");
                    let _ = self.connected.send(true);
                    let exit = self.pump(stream, &token).await;
                    let _ = self.connected.send(false);
                    match exit {
                        Exit::Cancelled => break,
                        Exit::SessionChanged => continue,
                        Exit::Dropped => {}
                    }
                }
                Err(e) => {
                    debug!(err = %e, backoff_ms, "notification socket connect failed, retrying");
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_millis(backoff_ms)) => {}
            }
            backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
        }
        let _ = self.connected.send(false);
        debug!("notification channel stopped");
    }

    /// Block until the session carries an access token. `None` on shutdown.
    async fn wait_for_token(&mut self) -> Option<String> {
        loop {
            if let Some(token) = self.session.borrow_and_update().access_token() {
                return Some(token.to_owned());
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                changed = self.session.changed() => changed.ok()?,
            }
        }
    }

    async fn pump(&mut self, mut stream: WsStream, token: &str) -> Exit {
        let exit = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break Exit::Cancelled,
                changed = self.session.changed() => {
                    if changed.is_err() {
                        break Exit::Cancelled;
                    }
                    if self.session.borrow_and_update().access_token() != Some(token) {
                        debug!("session changed, closing notification socket");
                        break Exit::SessionChanged;
                    }
                }
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.forward(text.as_str()),
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("notification socket closed by server");
                        return Exit::Dropped;
                    }
                    Some(Err(e)) => {
                        debug!(err = %e, "notification socket error");
                        return Exit::Dropped;
                    }
                    _ => {}
                },
            }
        };
        let _ = stream.close(None).await;
        exit
    }

    fn forward(&self, text: &str) {
        match serde_json::from_str::<Notification>(text) {
            Ok(notification) => {
                // No subscribers is fine.
                let _ = self.tx.send(notification);
            }
            Err(e) => debug!(err = %e, "dropping unparsable notification"),
        }
    }
}

/// Socket URL carrying the access token as a query parameter.
fn socket_url(ws_url: &str, token: &str) -> Option<String> {
    let mut url = reqwest::Url::parse(ws_url).ok()?;
    url.query_pairs_mut().append_pair("token", token);
    Some(url.into())
}

#[cfg(test)]
#[path = "notify_tests.rs"]
mod tests;
