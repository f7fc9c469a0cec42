//! Backend proxy — relays one inbound request to the upstream API origin.
//!
//! DESIGN
//! ======
//! `GET|POST /api/proxy?endpoint=<path>` forwards to `<API_BASE_URL><path>`
//! with the same method, carrying the inbound `Authorization` (injected by the
//! route guard from the session cookie) and `Content-Type`. Every error the
//! caller sees has the shape `{ "message": string }` with the upstream status
//! preserved, so the session and form code only handle one error contract.
//!
//! `endpoint` must be an absolute path; it is joined onto the base URL and
//! the upstream client refuses any result that leaves that origin, so the
//! injected bearer token never reaches another host. Multipart bodies are
//! refused with 415 since only JSON and url-encoded bodies are re-encoded.
//!
//! Only transport failures and unparseable success bodies are opaque: they
//! become a 500 and the cause is logged here, never returned.

use axum::body::{Body, Bytes};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::Value;

use crate::state::AppState;
use crate::upstream::{UpstreamBody, UpstreamError, UpstreamRequest, UpstreamResponse};

pub const LOGOUT_ENDPOINT: &str = "/api/auth/jwt/logout";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const JSON_CONTENT_TYPE: &str = "application/json";
const MULTIPART_PREFIX: &str = "multipart/";

const MSG_NO_ENDPOINT: &str = "No endpoint specified";
const MSG_BAD_ENDPOINT: &str = "Invalid endpoint";
const MSG_BAD_QUERY: &str = "Invalid query string";
const MSG_UNSUPPORTED_BODY: &str = "Unsupported content type";
const MSG_BAD_CREDENTIALS: &str = "Invalid email or password";
const MSG_NOT_VERIFIED: &str = "Please verify your email before logging in";
const MSG_GENERIC: &str = "An error occurred";
const MSG_INTERNAL: &str = "Internal server error";

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no endpoint specified")]
    MissingEndpoint,
    #[error("endpoint {0:?} is not an absolute path")]
    InvalidEndpoint(String),
    #[error("malformed query: {0}")]
    InvalidQuery(#[from] QueryRejection),
    #[error("cannot relay body of type {0}")]
    UnsupportedContentType(String),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("upstream returned non-JSON body: {0}")]
    InvalidBody(#[from] serde_json::Error),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::MissingEndpoint => (StatusCode::BAD_REQUEST, MSG_NO_ENDPOINT),
            Self::InvalidEndpoint(_) => (StatusCode::BAD_REQUEST, MSG_BAD_ENDPOINT),
            Self::InvalidQuery(_) => (StatusCode::BAD_REQUEST, MSG_BAD_QUERY),
            Self::UnsupportedContentType(_) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, MSG_UNSUPPORTED_BODY),
            Self::Upstream(_) | Self::InvalidBody(_) => {
                tracing::error!(error = %self, "proxy forward failed");
                return message_response(StatusCode::INTERNAL_SERVER_ERROR, MSG_INTERNAL);
            }
        };
        tracing::info!(error = %self, "proxy request refused");
        message_response(status, message)
    }
}

fn message_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "message": message }))).into_response()
}

// =============================================================================
// HANDLER
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    endpoint: Option<String>,
}

/// Forward `GET|POST /api/proxy?endpoint=...` to the upstream origin.
pub async fn forward(
    State(state): State<AppState>,
    method: Method,
    query: Result<Query<ProxyQuery>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let Query(query) = query?;
    let endpoint = query
        .endpoint
        .filter(|e| !e.is_empty())
        .ok_or(ProxyError::MissingEndpoint)?;
    if !is_upstream_path(&endpoint) {
        return Err(ProxyError::InvalidEndpoint(endpoint));
    }

    let authorization = header_str(&headers, AUTHORIZATION.as_str()).unwrap_or_default().to_owned();
    let content_type = header_str(&headers, CONTENT_TYPE.as_str())
        .unwrap_or(JSON_CONTENT_TYPE)
        .to_owned();
    if content_type.to_ascii_lowercase().starts_with(MULTIPART_PREFIX) {
        return Err(ProxyError::UnsupportedContentType(content_type));
    }
    let body = if method == Method::GET { UpstreamBody::Empty } else { decode_body(&content_type, &body) };

    tracing::debug!(%method, %endpoint, "proxying request");

    let request = UpstreamRequest { method, endpoint: endpoint.clone(), authorization, content_type, body };
    let response = state.upstream.send(request).await?;

    tracing::debug!(%endpoint, status = response.status.as_u16(), "upstream responded");
    relay(&endpoint, response)
}

/// Only absolute paths are forwarded; anything else could move the request
/// off the upstream origin once joined onto the base URL.
pub(crate) fn is_upstream_path(endpoint: &str) -> bool {
    endpoint.starts_with('/') && !endpoint.starts_with("//")
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Re-encode the inbound body for the upstream call. Url-encoded bodies stay
/// url-encoded; everything else is read as JSON, falling back to `{}`.
pub(crate) fn decode_body(content_type: &str, raw: &[u8]) -> UpstreamBody {
    if content_type.to_ascii_lowercase().contains(FORM_CONTENT_TYPE) {
        let pairs = url::form_urlencoded::parse(raw).into_owned().collect();
        return UpstreamBody::Form(pairs);
    }
    let value = serde_json::from_slice::<Value>(raw).unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
    UpstreamBody::Json(value)
}

/// Turn an upstream response into the client-facing response.
pub(crate) fn relay(endpoint: &str, response: UpstreamResponse) -> Result<Response, ProxyError> {
    let UpstreamResponse { status, body } = response;

    // Logout responses are not reliably JSON.
    if endpoint == LOGOUT_ENDPOINT {
        return Ok((status, Body::empty()).into_response());
    }

    if !status.is_success() {
        let message = error_message(&body);
        tracing::info!(%endpoint, status = status.as_u16(), %message, "upstream rejected request");
        return Ok(message_response(status, &message));
    }

    if body.is_empty() {
        return Ok((status, Body::empty()).into_response());
    }

    let value: Value = serde_json::from_slice(&body)?;
    Ok((status, Json(value)).into_response())
}

/// Map an upstream error body to a user-facing message.
pub(crate) fn error_message(body: &[u8]) -> String {
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        return MSG_GENERIC.to_owned();
    };
    match value.get("detail") {
        Some(Value::String(code)) if code == "LOGIN_BAD_CREDENTIALS" => MSG_BAD_CREDENTIALS.to_owned(),
        Some(Value::String(code)) if code == "LOGIN_USER_NOT_VERIFIED" => MSG_NOT_VERIFIED.to_owned(),
        Some(Value::Array(items)) => items
            .first()
            .and_then(|item| item.get("msg"))
            .and_then(Value::as_str)
            .map_or_else(|| MSG_GENERIC.to_owned(), str::to_owned),
        _ => MSG_GENERIC.to_owned(),
    }
}

#[cfg(test)]
#[path = "proxy_test.rs"]
mod tests;
