//! Session context — authentication state and the login/logout operations.
//!
//! DESIGN
//! ======
//! `Session` is built once at startup and shared by `Arc`; the
//! authenticated flag is derived from the token store at construction and
//! afterwards changes only through `login` and `logout`. External changes to
//! the stored token (another process, a cleared file) are not observed.
//!
//! ERROR HANDLING
//! ==============
//! `login` never fails: every failure is logged and reported as `false`.
//! `logout` notifies the upstream API from a detached task and never waits
//! for it; the local state is cleared unconditionally.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};

use crate::token::TokenStore;
use crate::transport::{ApiRequest, RequestBody, Transport, TransportError, proxy_path};

pub const LOGIN_ENDPOINT: &str = "/api/auth/jwt/login";
pub const LOGOUT_ENDPOINT: &str = "/api/auth/jwt/logout";
pub const PROFILE_ENDPOINT: &str = "/api/users/me";
pub const LOGIN_PAGE: &str = "/account/login";

const MSG_GENERIC: &str = "Something went wrong";

// =============================================================================
// TYPES
// =============================================================================

/// Profile returned by the upstream `/api/users/me` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not logged in")]
    NotAuthenticated,
    #[error("{message}")]
    Rejected { status: StatusCode, message: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("unexpected profile response: {0}")]
    InvalidProfile(#[from] serde_json::Error),
}

/// Receives navigation targets (the router in a UI, a message in the CLI).
pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str);
}

/// Navigator that records every target it is sent to.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    visited: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    #[must_use]
    pub fn visited(&self) -> Vec<String> {
        self.visited
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, path: &str) {
        self.visited
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(path.to_owned());
    }
}

// =============================================================================
// SESSION
// =============================================================================

pub struct Session {
    tokens: Arc<TokenStore>,
    transport: Arc<dyn Transport>,
    navigator: Arc<dyn Navigator>,
    authenticated: AtomicBool,
    user: RwLock<Option<UserProfile>>,
}

impl Session {
    #[must_use]
    pub fn new(tokens: Arc<TokenStore>, transport: Arc<dyn Transport>, navigator: Arc<dyn Navigator>) -> Self {
        let authenticated = tokens.is_authenticated();
        Self { tokens, transport, navigator, authenticated: AtomicBool::new(authenticated), user: RwLock::new(None) }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// Log in through the proxy. Returns `true` on success; never errors.
    pub async fn login(&self, email: &str, password: &str, remember: bool) -> bool {
        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("username", email)
            .append_pair("password", password)
            .append_pair("grant_type", "password")
            .finish();
        let request = ApiRequest {
            method: Method::POST,
            path: proxy_path(LOGIN_ENDPOINT),
            authorization: None,
            body: RequestBody::Form(form),
        };

        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "login request failed");
                return false;
            }
        };

        if !response.status.is_success() {
            let message = response.message().unwrap_or_else(|| MSG_GENERIC.to_owned());
            tracing::warn!(status = response.status.as_u16(), %message, "login rejected");
            return false;
        }

        let token = match serde_json::from_slice::<LoginResponse>(&response.body) {
            Ok(body) if !body.access_token.is_empty() => body.access_token,
            Ok(_) => {
                tracing::warn!("login response carried an empty access token");
                return false;
            }
            Err(e) => {
                tracing::warn!(error = %e, "login response had no access token");
                return false;
            }
        };

        if let Err(e) = self.tokens.set(&token, remember) {
            tracing::warn!(error = %e, "failed to persist session token");
            return false;
        }

        self.authenticated.store(true, Ordering::SeqCst);
        tracing::info!(remember, "logged in");
        true
    }

    /// Log out locally and notify the upstream API without waiting for it.
    ///
    /// Returns the detached notify task when one was started, so callers
    /// that care (tests, a CLI about to exit) can await it.
    pub fn logout(&self) -> Option<tokio::task::JoinHandle<()>> {
        let notify = self
            .current_token()
            .and_then(|token| self.spawn_logout_notify(token));

        if let Err(e) = self.tokens.clear() {
            tracing::warn!(error = %e, "failed to clear stored session token");
        }
        self.authenticated.store(false, Ordering::SeqCst);
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.navigator.navigate(LOGIN_PAGE);

        notify
    }

    fn spawn_logout_notify(&self, token: String) -> Option<tokio::task::JoinHandle<()>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no async runtime; skipping logout notify");
            return None;
        };
        let transport = Arc::clone(&self.transport);
        let request = ApiRequest {
            method: Method::POST,
            path: proxy_path(LOGOUT_ENDPOINT),
            authorization: Some(format!("Bearer {token}")),
            body: RequestBody::Empty,
        };
        Some(runtime.spawn(async move {
            match transport.send(request).await {
                Ok(response) => tracing::debug!(status = response.status.as_u16(), "logout notified"),
                Err(e) => tracing::debug!(error = %e, "logout notify failed"),
            }
        }))
    }

    /// Fetch the current user's profile and cache it.
    ///
    /// # Errors
    ///
    /// Returns an error when there is no token, the request fails, the API
    /// rejects it, or the body is not a profile.
    pub async fn refresh_user(&self) -> Result<UserProfile, SessionError> {
        let token = self.current_token().ok_or(SessionError::NotAuthenticated)?;
        let request = ApiRequest {
            method: Method::GET,
            path: proxy_path(PROFILE_ENDPOINT),
            authorization: Some(format!("Bearer {token}")),
            body: RequestBody::Empty,
        };

        let response = self.transport.send(request).await?;
        if !response.status.is_success() {
            return Err(SessionError::Rejected {
                status: response.status,
                message: response.message().unwrap_or_else(|| MSG_GENERIC.to_owned()),
            });
        }

        let profile: UserProfile = serde_json::from_slice(&response.body)?;
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = Some(profile.clone());
        Ok(profile)
    }

    /// The cached profile from the last successful `refresh_user`.
    #[must_use]
    pub fn user(&self) -> Option<UserProfile> {
        self.user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn current_token(&self) -> Option<String> {
        self.tokens.get().or_else(|| self.tokens.cookie_token())
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
