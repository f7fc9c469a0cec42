//! HTTP transport from the client to the Platform 360 server.
//!
//! Session and form code talk to the server only through the `Transport`
//! trait. `HttpTransport` is the reqwest implementation; it attaches the live
//! `auth_token` cookie to every request so the server's route guard sees the
//! same session the client does.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};

use crate::token::TokenStore;

pub const PROXY_ROUTE: &str = "/api/proxy";

const REQUEST_TIMEOUT_SECS: u64 = 60;
const CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP client build failed: {0}")]
    ClientBuild(String),
    #[error("request failed: {0}")]
    Request(String),
}

/// Outgoing request body, already encoded.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    /// Serialized JSON text.
    Json(String),
    /// `application/x-www-form-urlencoded` text.
    Form(String),
    /// Text parts for a `multipart/form-data` body.
    Multipart(Vec<(String, String)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Server path including any query string.
    pub path: String,
    /// Full `Authorization` header value, when the caller sets one.
    pub authorization: Option<String>,
    pub body: RequestBody,
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// The `message` field of a `{ "message": ... }` error body.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        serde_json::from_slice::<serde_json::Value>(&self.body)
            .ok()?
            .get("message")?
            .as_str()
            .map(str::to_owned)
    }
}

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// Path on the server that proxies to `endpoint` upstream.
#[must_use]
pub fn proxy_path(endpoint: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("endpoint", endpoint)
        .finish();
    format!("{PROXY_ROUTE}?{query}")
}

// =============================================================================
// REQWEST
// =============================================================================

pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenStore>,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(base_url: &str, tokens: Arc<TokenStore>) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| TransportError::ClientBuild(e.to_string()))?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_owned(), tokens })
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.http.request(request.method, url);

        if let Some(cookie) = self.tokens.cookie_header() {
            builder = builder.header(reqwest::header::COOKIE, cookie);
        }
        if let Some(authorization) = request.authorization {
            builder = builder.header(reqwest::header::AUTHORIZATION, authorization);
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(text) => builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(text),
            RequestBody::Form(text) => builder
                .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(text),
            RequestBody::Multipart(parts) => {
                let form = parts
                    .into_iter()
                    .fold(reqwest::multipart::Form::new(), |form, (name, value)| form.text(name, value));
                builder.multipart(form)
            }
        };

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?
            .to_vec();
        Ok(ApiResponse { status, body })
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    #[derive(Clone)]
    enum Reply {
        Respond(StatusCode, String),
        Delayed(Duration, StatusCode, String),
        Fail,
        Hang,
    }

    /// Scripted transport. Replies are consumed in order; the last one repeats.
    pub struct MockTransport {
        replies: Mutex<VecDeque<Reply>>,
        calls: Mutex<Vec<ApiRequest>>,
    }

    impl MockTransport {
        fn with(reply: Reply) -> Arc<Self> {
            Arc::new(Self { replies: Mutex::new(VecDeque::from([reply])), calls: Mutex::new(Vec::new()) })
        }

        #[must_use]
        pub fn json(status: StatusCode, body: &serde_json::Value) -> Arc<Self> {
            Self::with(Reply::Respond(status, body.to_string()))
        }

        #[must_use]
        pub fn raw(status: StatusCode, body: &str) -> Arc<Self> {
            Self::with(Reply::Respond(status, body.to_owned()))
        }

        /// Every call answers after `delay`.
        #[must_use]
        pub fn delayed(delay: Duration, status: StatusCode, body: &serde_json::Value) -> Arc<Self> {
            Self::with(Reply::Delayed(delay, status, body.to_string()))
        }

        /// Every call fails with a transport error.
        #[must_use]
        pub fn failing() -> Arc<Self> {
            Self::with(Reply::Fail)
        }

        /// Every call records itself and then never completes.
        #[must_use]
        pub fn hanging() -> Arc<Self> {
            Self::with(Reply::Hang)
        }

        /// Queue a JSON reply after the current ones; it becomes the repeating one.
        pub fn then_json(self: &Arc<Self>, status: StatusCode, body: &serde_json::Value) -> Arc<Self> {
            self.replies
                .lock()
                .unwrap()
                .push_back(Reply::Respond(status, body.to_string()));
            Arc::clone(self)
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn calls(&self) -> Vec<ApiRequest> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Transport for MockTransport {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
            self.calls.lock().unwrap().push(request);
            let reply = {
                let mut replies = self.replies.lock().unwrap();
                let reply = replies.front().cloned().unwrap_or(Reply::Fail);
                if replies.len() > 1 {
                    replies.pop_front();
                }
                reply
            };
            match reply {
                Reply::Respond(status, body) => Ok(ApiResponse { status, body: body.into_bytes() }),
                Reply::Delayed(delay, status, body) => {
                    tokio::time::sleep(delay).await;
                    Ok(ApiResponse { status, body: body.into_bytes() })
                }
                Reply::Fail => Err(TransportError::Request("connection refused".into())),
                Reply::Hang => std::future::pending().await,
            }
        }
    }
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
