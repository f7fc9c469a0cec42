//! Bearer token kept in durable storage and in the `auth_token` cookie.
//!
//! DESIGN
//! ======
//! Client code reads the durable copy; the server's route guard only ever sees
//! the cookie. Both are written and cleared together here so no caller can
//! update one without the other.
//!
//! A "remember me" login writes the durable entry and a one-year cookie that is
//! also saved to storage so it survives a restart. Otherwise only a session
//! cookie is set, held in memory for the life of this `TokenStore`.
//!
//! No encryption, rotation, or expiry enforcement beyond the cookie lifetime.

use std::sync::{Arc, Mutex, PoisonError};

use cookie::Cookie;
use time::{Duration, OffsetDateTime};

use crate::store::{KeyValueStore, StoreError};

/// Durable storage key and cookie name for the bearer token.
pub const AUTH_TOKEN_KEY: &str = "auth_token";

/// Storage key for the saved persistent cookie (`Set-Cookie` syntax).
const COOKIE_STORAGE_KEY: &str = "cookie:auth_token";

const PERSISTENT_COOKIE_DAYS: i64 = 365;

pub struct TokenStore {
    storage: Arc<dyn KeyValueStore>,
    cookie: Mutex<Option<Cookie<'static>>>,
}

impl TokenStore {
    /// Build a token store over `storage`, reloading a saved persistent cookie
    /// if it has not expired.
    #[must_use]
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        let cookie = storage
            .get(COOKIE_STORAGE_KEY)
            .and_then(|raw| match Cookie::parse(raw) {
                Ok(cookie) => Some(cookie),
                Err(e) => {
                    tracing::warn!(error = %e, "discarding unreadable saved cookie");
                    None
                }
            })
            .filter(|c| is_live(c, OffsetDateTime::now_utc()));
        Self { storage, cookie: Mutex::new(cookie) }
    }

    /// Store `token`. The durable entry is written only when `persistent`;
    /// the cookie is always written. A non-persistent set drops any durable
    /// entry left by an earlier remembered login, so the two never disagree.
    ///
    /// # Errors
    ///
    /// Returns an error if durable storage rejects the write. The cookie is
    /// left untouched and the durable token is restored in that case.
    pub fn set(&self, token: &str, persistent: bool) -> Result<(), StoreError> {
        let builder = Cookie::build((AUTH_TOKEN_KEY, token.to_owned())).path("/");
        let cookie = if persistent {
            let expires = OffsetDateTime::now_utc() + Duration::days(PERSISTENT_COOKIE_DAYS);
            let cookie = builder
                .max_age(Duration::days(PERSISTENT_COOKIE_DAYS))
                .expires(expires)
                .build();
            let previous = self.storage.get(AUTH_TOKEN_KEY);
            self.storage.set(AUTH_TOKEN_KEY, token)?;
            if let Err(e) = self.storage.set(COOKIE_STORAGE_KEY, &cookie.to_string()) {
                self.restore_token(previous);
                return Err(e);
            }
            cookie
        } else {
            self.storage.remove(AUTH_TOKEN_KEY)?;
            self.storage.remove(COOKIE_STORAGE_KEY)?;
            builder.build()
        };

        *self.lock_cookie() = Some(cookie);
        Ok(())
    }

    fn restore_token(&self, previous: Option<String>) {
        let restored = match previous {
            Some(old) => self.storage.set(AUTH_TOKEN_KEY, &old),
            None => self.storage.remove(AUTH_TOKEN_KEY),
        };
        if let Err(e) = restored {
            tracing::warn!(error = %e, "failed to restore durable token after partial write");
        }
    }

    /// Remove the durable entry and expire the cookie.
    ///
    /// The cookie is expired even when storage fails, so the server stops
    /// seeing a session either way.
    ///
    /// # Errors
    ///
    /// Returns the first storage error encountered.
    pub fn clear(&self) -> Result<(), StoreError> {
        let expired = Cookie::build((AUTH_TOKEN_KEY, ""))
            .path("/")
            .expires(OffsetDateTime::UNIX_EPOCH)
            .build();
        *self.lock_cookie() = Some(expired);

        let token = self.storage.remove(AUTH_TOKEN_KEY);
        let saved_cookie = self.storage.remove(COOKIE_STORAGE_KEY);
        token.and(saved_cookie)
    }

    /// The durable token, if any.
    #[must_use]
    pub fn get(&self) -> Option<String> {
        self.storage.get(AUTH_TOKEN_KEY)
    }

    /// The stored cookie as last written, including an expired one.
    #[must_use]
    pub fn cookie(&self) -> Option<Cookie<'static>> {
        self.lock_cookie().clone()
    }

    /// The cookie value, if the cookie is live (non-empty and not expired).
    #[must_use]
    pub fn cookie_token(&self) -> Option<String> {
        let now = OffsetDateTime::now_utc();
        self.lock_cookie()
            .as_ref()
            .filter(|c| is_live(c, now))
            .map(|c| c.value().to_owned())
    }

    /// `Cookie` request header value carrying the live session cookie.
    #[must_use]
    pub fn cookie_header(&self) -> Option<String> {
        self.cookie_token()
            .map(|token| format!("{AUTH_TOKEN_KEY}={token}"))
    }

    /// Client-side authentication check: durable entry AND live cookie.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.get().is_some() && self.cookie_token().is_some()
    }

    fn lock_cookie(&self) -> std::sync::MutexGuard<'_, Option<Cookie<'static>>> {
        self.cookie.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn is_live(cookie: &Cookie<'_>, now: OffsetDateTime) -> bool {
    !cookie.value().is_empty() && cookie.expires_datetime().is_none_or(|at| at > now)
}

#[cfg(test)]
#[path = "token_test.rs"]
mod tests;
