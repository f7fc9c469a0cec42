//! Upstream API client — the single external origin every proxied call targets.
//!
//! DESIGN
//! ======
//! The proxy handler only sees the `Upstream` trait, so tests can swap in a
//! call-counting mock. `HttpUpstream` is the thin reqwest wrapper used in
//! production; it applies the configured request/connect timeouts so a hung
//! backend surfaces as a transport error instead of a hung request.

use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, StatusCode};

use crate::config::UpstreamTimeouts;

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("HTTP client build failed: {0}")]
    ClientBuild(String),
    #[error("unsupported method {0}")]
    UnsupportedMethod(Method),
    #[error("endpoint {0:?} does not resolve to the configured origin")]
    OffOrigin(String),
    #[error("upstream request failed: {0}")]
    Request(String),
}

// =============================================================================
// WIRE TYPES
// =============================================================================

/// Body re-encoded for the upstream call.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamBody {
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRequest {
    pub method: Method,
    /// Path on the upstream origin, e.g. `/api/users/me`.
    pub endpoint: String,
    /// Inbound `Authorization` header verbatim; empty when absent.
    pub authorization: String,
    pub content_type: String,
    pub body: UpstreamBody,
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Abstraction over the upstream origin so the proxy can be tested without a
/// network.
#[async_trait::async_trait]
pub trait Upstream: Send + Sync {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError>;
}

// =============================================================================
// CLIENT
// =============================================================================

pub struct HttpUpstream {
    http: reqwest::Client,
    base_url: String,
}

impl HttpUpstream {
    /// Build a client for `base_url` (already validated, no trailing slash).
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(base_url: String, timeouts: UpstreamTimeouts) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeouts.request_secs))
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(|e| UpstreamError::ClientBuild(e.to_string()))?;
        Ok(Self { http, base_url })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait::async_trait]
impl Upstream for HttpUpstream {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        let url = resolve(&self.base_url, &request.endpoint)?;
        let builder = match request.method {
            Method::GET => self.http.get(url),
            Method::POST => self.http.post(url),
            other => return Err(UpstreamError::UnsupportedMethod(other)),
        };

        let builder = builder
            .header("Authorization", request.authorization)
            .header("Content-Type", request.content_type);

        let builder = match request.body {
            UpstreamBody::Empty => builder,
            UpstreamBody::Json(value) => builder.body(value.to_string()),
            UpstreamBody::Form(pairs) => builder.body(encode_form(&pairs)),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| UpstreamError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::Request(e.to_string()))?;

        Ok(UpstreamResponse { status, body })
    }
}

/// Join `endpoint` onto `base_url`, refusing anything that lands on a
/// different scheme, host, or port.
///
/// # Errors
///
/// Returns `OffOrigin` when the endpoint is not a plain absolute path or the
/// joined URL leaves the base origin.
pub fn resolve(base_url: &str, endpoint: &str) -> Result<url::Url, UpstreamError> {
    let off_origin = || UpstreamError::OffOrigin(endpoint.to_owned());
    if !endpoint.starts_with('/') || endpoint.starts_with("//") {
        return Err(off_origin());
    }
    let base = url::Url::parse(base_url).map_err(|_| off_origin())?;
    let url = url::Url::parse(&format!("{base_url}{endpoint}")).map_err(|_| off_origin())?;
    if url.origin() != base.origin() || !url.username().is_empty() || url.password().is_some() {
        return Err(off_origin());
    }
    Ok(url)
}

/// Encode key/value pairs as `application/x-www-form-urlencoded`.
#[must_use]
pub fn encode_form(pairs: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .finish()
}

#[cfg(test)]
#[path = "upstream_test.rs"]
mod tests;
