// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session lifecycle operations: sign-in, sign-out, confirmation of the
//! current user, and account maintenance.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::credential::CredentialPair;
use crate::error::ApiError;
use crate::model::{
    AuthResponse, GoogleLoginRequest, LoginRequest, MessageResponse, ProfileUpdate, Registration,
    User, UserEnvelope,
};
use crate::state::{Session, SessionCell, SessionEvent};
use crate::transport::{routes, ApiClient, ApiRequest};

/// The only writer of session state.
pub struct SessionController {
    api: Arc<ApiClient>,
    cell: Arc<SessionCell>,
}

impl SessionController {
    pub fn new(api: Arc<ApiClient>) -> Self {
        let cell = Arc::clone(api.session());
        Self { api, cell }
    }

    pub fn session(&self) -> Session {
        self.cell.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.cell.subscribe()
    }

    /// Sign in with an email address or username.
    ///
    /// On failure the session is left as it was; check
    /// [`ApiError::is_email_not_verified`] to offer a verification resend.
    pub async fn login(&self, identifier: &str, password: &str) -> Result<User, ApiError> {
        let _loading = self.cell.loading();
        let ticket = self.cell.begin();
        let req = ApiRequest::post(routes::LOGIN)
            .anonymous()
            .json(&LoginRequest { identifier, password })?;
        let resp: AuthResponse = self.api.send(&req).await.inspect_err(|e| {
            debug!(err = %e, "login rejected");
        })?;
        self.sign_in(ticket, resp)
    }

    /// Sign in with an ID token issued by Google.
    pub async fn login_with_google(&self, credential: &str) -> Result<User, ApiError> {
        let _loading = self.cell.loading();
        let ticket = self.cell.begin();
        let req = ApiRequest::post(routes::GOOGLE)
            .anonymous()
            .json(&GoogleLoginRequest { id_token: credential })?;
        let resp: AuthResponse = self.api.send(&req).await.inspect_err(|e| {
            debug!(err = %e, "google login rejected");
        })?;
        self.sign_in(ticket, resp)
    }

    fn sign_in(&self, ticket: u64, resp: AuthResponse) -> Result<User, ApiError> {
        let AuthResponse { user, tokens, .. } = resp;
        let signed_in = user.clone();
        self.cell
            .commit_fenced(ticket, |session, store| {
                store.set(tokens.clone())?;
                session.user = Some(user);
                session.tokens = Some(tokens);
                session.is_authenticated = true;
                Ok(())
            })
            .inspect_err(|e| debug!(err = %e, "discarding login result"))?;
        info!(user = %signed_in.id, "signed in");
        self.cell.emit(SessionEvent::SignedIn { user: signed_in.id.to_string() });
        Ok(signed_in)
    }

    /// Create an account. Does not sign in; returns the server's message.
    pub async fn register(&self, registration: &Registration) -> Result<String, ApiError> {
        let _loading = self.cell.loading();
        let req = ApiRequest::post(routes::REGISTER).anonymous().json(registration)?;
        let resp: Option<MessageResponse> = self.api.send(&req).await?;
        info!("account registered");
        Ok(resp
            .and_then(|r| r.message)
            .unwrap_or_else(|| "Registration successful".to_owned()))
    }

    /// Sign out of this device. Local state is always cleared; the server
    /// call is best-effort.
    pub async fn logout(&self) {
        let _loading = self.cell.loading();
        let Some(pair) = self.sign_out() else {
            return;
        };
        let req = ApiRequest::post(routes::LOGOUT)
            .with_bearer(&pair.access_token)
            .json(&json!({ "refreshToken": pair.refresh_token }));
        let result = match req {
            Ok(req) => self.api.send_unit(&req).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(err = %e, "remote logout failed");
        }
    }

    /// Sign out of every device. Same local effect as [`Self::logout`].
    pub async fn logout_all(&self) {
        let _loading = self.cell.loading();
        let Some(pair) = self.sign_out() else {
            return;
        };
        let req = ApiRequest::post(routes::LOGOUT_ALL).with_bearer(&pair.access_token);
        if let Err(e) = self.api.send_unit(&req).await {
            warn!(err = %e, "remote logout-all failed");
        }
    }

    /// Supersede in-flight operations and clear local state. Returns the
    /// credentials that were signed out, if any.
    fn sign_out(&self) -> Option<CredentialPair> {
        self.cell.begin();
        let mut previous = None;
        self.cell.commit(|session, tokens| {
            previous = tokens.get();
            if let Err(e) = tokens.clear() {
                warn!(err = %e, "failed to clear credentials on logout");
            }
            session.clear_identity();
        });
        if previous.is_some() {
            info!("signed out");
            self.cell.emit(SessionEvent::SignedOut);
        }
        previous
    }

    /// Fetch the signed-in user and mark the session authenticated.
    ///
    /// Any failure is treated as an invalid session: the user, tokens, and
    /// Token Store are cleared together before the error is returned.
    pub async fn get_current_user(&self) -> Result<User, ApiError> {
        let _loading = self.cell.loading();
        let ticket = self.cell.begin();
        match self.api.send::<UserEnvelope>(&ApiRequest::get(routes::ME)).await {
            Ok(UserEnvelope { user }) => {
                let confirmed = user.clone();
                self.cell.commit_fenced(ticket, |session, tokens| {
                    let Some(pair) = tokens.get() else {
                        return Err(ApiError::session_invalid("credentials cleared during fetch"));
                    };
                    session.user = Some(user);
                    session.tokens = Some(pair);
                    session.is_authenticated = true;
                    Ok(())
                })?;
                debug!(user = %confirmed.id, "current user confirmed");
                Ok(confirmed)
            }
            Err(e) => {
                warn!(err = %e, "current user unavailable, clearing session");
                let cleared = self.cell.commit_fenced(ticket, |session, tokens| {
                    if let Err(e) = tokens.clear() {
                        warn!(err = %e, "failed to clear credentials");
                    }
                    let live = session.tokens.is_some();
                    session.clear_identity();
                    Ok(live)
                });
                if cleared.unwrap_or(false) {
                    self.cell.emit(SessionEvent::SignedOut);
                }
                Err(e)
            }
        }
    }

    /// Replace the cached user without contacting the server.
    pub fn update_user(&self, user: User) {
        self.cell.commit(|session, _| session.user = Some(user));
    }

    /// Restore a persisted session at process start.
    ///
    /// With stored credentials the session is optimistically restored and
    /// then confirmed with [`Self::get_current_user`]. Without credentials
    /// this is a no-op returning `Ok(None)`.
    pub async fn initialize(&self) -> Result<Option<User>, ApiError> {
        let Some(pair) = self.cell.tokens().get() else {
            debug!("no stored credentials");
            return Ok(None);
        };
        self.cell.commit(|session, _| {
            session.tokens = Some(pair);
            session.is_authenticated = session.user.is_some();
        });
        self.get_current_user().await.map(Some)
    }

    pub async fn verify_email(&self, token: &str) -> Result<String, ApiError> {
        self.message(routes::VERIFY_EMAIL, json!({ "token": token }), true).await
    }

    pub async fn resend_verification(&self, email: &str) -> Result<String, ApiError> {
        self.message(routes::RESEND_VERIFICATION, json!({ "email": email }), true).await
    }

    pub async fn forgot_password(&self, email: &str) -> Result<String, ApiError> {
        self.message(routes::FORGOT_PASSWORD, json!({ "email": email }), true).await
    }

    pub async fn reset_password(&self, token: &str, password: &str) -> Result<String, ApiError> {
        let body = json!({ "token": token, "password": password });
        self.message(routes::RESET_PASSWORD, body, true).await
    }

    pub async fn change_password(&self, current: &str, new: &str) -> Result<String, ApiError> {
        let body = json!({ "currentPassword": current, "newPassword": new });
        self.message(routes::CHANGE_PASSWORD, body, false).await
    }

    /// POST `body` to `path` and return the server's confirmation message.
    async fn message(
        &self,
        path: &str,
        body: serde_json::Value,
        anonymous: bool,
    ) -> Result<String, ApiError> {
        let _loading = self.cell.loading();
        let mut req = ApiRequest::post(path).json(&body)?;
        if anonymous {
            req = req.anonymous();
        }
        // Some endpoints answer 204 with no body.
        let resp: Option<MessageResponse> = self.api.send(&req).await?;
        debug!(path, "account request accepted");
        Ok(resp.and_then(|r| r.message).unwrap_or_default())
    }

    /// Update profile fields on the server and adopt the returned user.
    pub async fn update_profile(&self, patch: &ProfileUpdate) -> Result<User, ApiError> {
        let _loading = self.cell.loading();
        let ticket = self.cell.generation();
        let req = ApiRequest::put(routes::PROFILE).json(patch)?;
        let UserEnvelope { user } = self.api.send(&req).await?;
        let updated = user.clone();
        self.cell.commit_fenced(ticket, |session, _| {
            if session.tokens.is_none() {
                return Err(ApiError::session_invalid("signed out during profile update"));
            }
            session.user = Some(user);
            Ok(())
        })?;
        info!(user = %updated.id, "profile updated");
        Ok(updated)
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
