//! Route guard — session-cookie gating for pages and bearer injection for APIs.
//!
//! DESIGN
//! ======
//! Runs as Axum middleware in front of every route. Requests outside
//! `/dashboard`, `/account` and `/api` pass straight through. In scope, the
//! rules below are checked top to bottom and the first match decides:
//!
//! 1. `dashboard`: no session cookie under `/dashboard` → login page.
//! 2. `auth-pages`: session cookie under `/account` (except settings) → dashboard.
//! 3. `api-bearer`: session cookie under `/api` → add `Authorization: Bearer`.
//!
//! The guard only checks that the cookie exists. Whether the token is valid
//! is for the upstream API to decide.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar};

pub use client::token::AUTH_TOKEN_KEY;

pub const LOGIN_PAGE: &str = "/account/login";
pub const DASHBOARD_HOME: &str = "/dashboard/my-reports";

const DASHBOARD_PREFIX: &str = "/dashboard";
const ACCOUNT_PREFIX: &str = "/account";
const SETTINGS_PREFIX: &str = "/account/settings";
const API_PREFIX: &str = "/api";

// =============================================================================
// RULES
// =============================================================================

/// Outcome of evaluating the rule chain for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardAction {
    Redirect(&'static str),
    InjectBearer,
    Continue,
}

struct GuardRule {
    name: &'static str,
    applies: fn(path: &str, has_session: bool) -> bool,
    action: GuardAction,
}

const RULES: &[GuardRule] = &[
    GuardRule { name: "dashboard", applies: dashboard_without_session, action: GuardAction::Redirect(LOGIN_PAGE) },
    GuardRule { name: "auth-pages", applies: account_with_session, action: GuardAction::Redirect(DASHBOARD_HOME) },
    GuardRule { name: "api-bearer", applies: api_with_session, action: GuardAction::InjectBearer },
];

fn dashboard_without_session(path: &str, has_session: bool) -> bool {
    under(path, DASHBOARD_PREFIX) && !has_session
}

fn account_with_session(path: &str, has_session: bool) -> bool {
    under(path, ACCOUNT_PREFIX) && !under(path, SETTINGS_PREFIX) && has_session
}

fn api_with_session(path: &str, has_session: bool) -> bool {
    under(path, API_PREFIX) && has_session
}

/// `true` when `path` is `prefix` itself or a sub-path of it.
fn under(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Whether the guard looks at this path at all.
#[must_use]
pub fn in_scope(path: &str) -> bool {
    [DASHBOARD_PREFIX, ACCOUNT_PREFIX, API_PREFIX]
        .iter()
        .any(|prefix| under(path, prefix))
}

/// Evaluate the rule chain; first match wins.
#[must_use]
pub fn evaluate(path: &str, has_session: bool) -> GuardAction {
    if !in_scope(path) {
        return GuardAction::Continue;
    }
    RULES
        .iter()
        .find(|rule| (rule.applies)(path, has_session))
        .map_or(GuardAction::Continue, |rule| {
            tracing::debug!(rule = rule.name, %path, "route guard matched");
            rule.action
        })
}

/// Read the session token from the request's `auth_token` cookie.
/// Empty values count as absent.
#[must_use]
pub fn session_token(headers: &axum::http::HeaderMap) -> Option<String> {
    let jar = CookieJar::from_headers(headers);
    jar.get(AUTH_TOKEN_KEY)
        .map(Cookie::value)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

// =============================================================================
// MIDDLEWARE
// =============================================================================

pub async fn route_guard(mut request: Request, next: Next) -> Response {
    let token = session_token(request.headers());
    let action = evaluate(request.uri().path(), token.is_some());

    match (action, token) {
        (GuardAction::Redirect(to), _) => Redirect::temporary(to).into_response(),
        (GuardAction::InjectBearer, Some(token)) => {
            match HeaderValue::from_str(&format!("Bearer {token}")) {
                Ok(value) => {
                    request.headers_mut().insert(AUTHORIZATION, value);
                }
                Err(e) => tracing::warn!(error = %e, "session token is not a valid header value"),
            }
            next.run(request).await
        }
        _ => next.run(request).await,
    }
}

#[cfg(test)]
#[path = "guard_test.rs"]
mod tests;
