//! Form engine — generic field submission with lifecycle events.
//!
//! DESIGN
//! ======
//! A `FormEngine` knows nothing about the fields it submits: values are a
//! JSON map, validators are attached per field name, and the body encoding
//! is picked by `FormConfig`. Submissions go to an upstream endpoint through
//! the server's backend proxy, or straight to a dedicated server route. The
//! proxy only relays JSON and url-encoded bodies, so multipart needs a route.
//!
//! LIFECYCLE
//! =========
//! `submit` validates, then moves `Idle → Sending`, sends, waits a fixed
//! latency after the response, and lands on `Idle` (emitting `Sent`) or `Error`
//! (emitting `Error`). Subscribers receive `FormEvent`s over a broadcast
//! channel; missing subscribers are not an error.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::transport::{ApiRequest, RequestBody, Transport, TransportError, proxy_path};

pub const MSG_GENERIC: &str = "Something went wrong";
pub const MSG_REQUIRED: &str = "This field is required";
pub const MSG_EMAIL: &str = "Enter a valid email address";

const DEFAULT_MIN_LATENCY: Duration = Duration::from_secs(1);
const EVENT_CAPACITY: usize = 16;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Json,
    UrlEncoded,
    Multipart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormState {
    #[default]
    Idle,
    Sending,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormEvent {
    Sending,
    Sent,
    Error(String),
    Reset,
}

/// Where a submission is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormTarget {
    /// Upstream endpoint, reached through the server proxy.
    Proxy(String),
    /// Server path of a dedicated route, used as-is.
    Route(String),
}

impl FormTarget {
    /// Server path the request is sent to.
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Self::Proxy(endpoint) => proxy_path(endpoint),
            Self::Route(path) => path.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FormConfig {
    pub target: FormTarget,
    pub method: Method,
    pub encoding: Encoding,
    /// Fixed delay after the response arrives, before the outcome is applied.
    pub min_latency: Duration,
    pub reset_on_success: bool,
}

impl FormConfig {
    /// Submit to an upstream `endpoint` through the proxy.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_target(FormTarget::Proxy(endpoint.into()))
    }

    /// Submit to a dedicated server route.
    #[must_use]
    pub fn route(path: impl Into<String>) -> Self {
        Self::with_target(FormTarget::Route(path.into()))
    }

    fn with_target(target: FormTarget) -> Self {
        Self {
            target,
            method: Method::POST,
            encoding: Encoding::default(),
            min_latency: DEFAULT_MIN_LATENCY,
            reset_on_success: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FormError {
    #[error("{} field(s) failed validation", .0.len())]
    Invalid(BTreeMap<String, String>),
    #[error("multipart bodies cannot be sent through the proxy; target a server route")]
    ProxiedMultipart,
    #[error("{message}")]
    Rejected { status: StatusCode, message: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("response was not JSON: {0}")]
    InvalidResponse(#[from] serde_json::Error),
}

impl FormError {
    /// Text shown as the form's global error.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Rejected { message, .. } => message.clone(),
            Self::ProxiedMultipart => self.to_string(),
            _ => MSG_GENERIC.to_owned(),
        }
    }
}

/// Field check; `Err` carries the inline message.
pub type Validator = Arc<dyn Fn(Option<&Value>) -> Result<(), String> + Send + Sync>;

type SuccessCallback = Box<dyn Fn(&Value, &Map<String, Value>) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(&FormError) + Send + Sync>;

// =============================================================================
// VALIDATORS
// =============================================================================

/// Rejects missing, null, and blank-string values.
#[must_use]
pub fn required() -> Validator {
    Arc::new(|value| match value {
        None | Some(Value::Null) => Err(MSG_REQUIRED.to_owned()),
        Some(Value::String(s)) if s.trim().is_empty() => Err(MSG_REQUIRED.to_owned()),
        Some(_) => Ok(()),
    })
}

/// Accepts absent values; pair with `required` to demand one.
#[must_use]
pub fn email() -> Validator {
    Arc::new(|value| match value {
        None | Some(Value::Null) => Ok(()),
        Some(Value::String(s)) if s.is_empty() || looks_like_email(s) => Ok(()),
        Some(_) => Err(MSG_EMAIL.to_owned()),
    })
}

fn looks_like_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !s.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

// =============================================================================
// ENCODING
// =============================================================================

/// Form text for a scalar: strings as-is, everything else as JSON text.
fn field_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn present(values: &Map<String, Value>) -> impl Iterator<Item = (&String, &Value)> {
    values.iter().filter(|(_, v)| !v.is_null())
}

/// Encode `values` for `encoding`, skipping null fields.
#[must_use]
pub fn encode_body(encoding: Encoding, values: &Map<String, Value>) -> RequestBody {
    match encoding {
        Encoding::Json => {
            let object: Map<String, Value> = present(values).map(|(k, v)| (k.clone(), v.clone())).collect();
            RequestBody::Json(Value::Object(object).to_string())
        }
        Encoding::UrlEncoded => {
            let mut form = url::form_urlencoded::Serializer::new(String::new());
            for (name, value) in present(values) {
                form.append_pair(name, &field_text(value));
            }
            RequestBody::Form(form.finish())
        }
        Encoding::Multipart => RequestBody::Multipart(
            present(values)
                .map(|(name, value)| (name.clone(), field_text(value)))
                .collect(),
        ),
    }
}

// =============================================================================
// ENGINE
// =============================================================================

#[derive(Default)]
struct Inner {
    values: Map<String, Value>,
    field_errors: BTreeMap<String, String>,
    error: Option<String>,
    state: FormState,
}

pub struct FormEngine {
    config: FormConfig,
    transport: Arc<dyn Transport>,
    validators: Vec<(String, Validator)>,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
    inner: Mutex<Inner>,
    events: broadcast::Sender<FormEvent>,
}

impl FormEngine {
    #[must_use]
    pub fn new(config: FormConfig, transport: Arc<dyn Transport>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            transport,
            validators: Vec::new(),
            on_success: None,
            on_error: None,
            inner: Mutex::new(Inner::default()),
            events,
        }
    }

    #[must_use]
    pub fn validate(mut self, field: impl Into<String>, validator: Validator) -> Self {
        self.validators.push((field.into(), validator));
        self
    }

    #[must_use]
    pub fn on_success(mut self, callback: impl Fn(&Value, &Map<String, Value>) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn on_error(mut self, callback: impl Fn(&FormError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FormEvent> {
        self.events.subscribe()
    }

    pub fn set(&self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        let mut inner = self.lock();
        inner.field_errors.remove(&field);
        inner.values.insert(field, value.into());
    }

    #[must_use]
    pub fn values(&self) -> Map<String, Value> {
        self.lock().values.clone()
    }

    #[must_use]
    pub fn state(&self) -> FormState {
        self.lock().state
    }

    /// The global error from the last failed submission.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    #[must_use]
    pub fn field_errors(&self) -> BTreeMap<String, String> {
        self.lock().field_errors.clone()
    }

    /// Clear values, errors, and state.
    pub fn reset(&self) {
        *self.lock() = Inner::default();
        self.emit(FormEvent::Reset);
    }

    /// Validate and submit the current values.
    ///
    /// Returns the parsed response body (`null` for an empty one).
    ///
    /// # Errors
    ///
    /// `FormError::ProxiedMultipart` for a multipart body aimed at the proxy
    /// and `FormError::Invalid` when a validator fails (nothing is sent in
    /// either case); otherwise any transport, status, or response error, after the
    /// minimum latency has elapsed.
    pub async fn submit(&self) -> Result<Value, FormError> {
        if self.config.encoding == Encoding::Multipart && matches!(self.config.target, FormTarget::Proxy(_)) {
            return Err(FormError::ProxiedMultipart);
        }
        let values = self.check()?;

        {
            let mut inner = self.lock();
            inner.error = None;
            inner.state = FormState::Sending;
        }
        self.emit(FormEvent::Sending);

        let request = ApiRequest {
            method: self.config.method.clone(),
            path: self.config.target.path(),
            authorization: None,
            body: encode_body(self.config.encoding, &values),
        };
        let outcome = self.send(request).await;
        tokio::time::sleep(self.config.min_latency).await;

        match outcome {
            Ok(body) => {
                self.lock().state = FormState::Idle;
                self.emit(FormEvent::Sent);
                if let Some(callback) = &self.on_success {
                    callback(&body, &values);
                }
                if self.config.reset_on_success {
                    self.reset();
                }
                Ok(body)
            }
            Err(err) => {
                let message = err.user_message();
                tracing::warn!(form_target = ?self.config.target, error = %err, "form submission failed");
                {
                    let mut inner = self.lock();
                    inner.state = FormState::Error;
                    inner.error = Some(message.clone());
                }
                self.emit(FormEvent::Error(message));
                if let Some(callback) = &self.on_error {
                    callback(&err);
                }
                Err(err)
            }
        }
    }

    /// Run validators; on success hand back a snapshot of the values.
    fn check(&self) -> Result<Map<String, Value>, FormError> {
        let mut inner = self.lock();
        let mut failures = BTreeMap::new();
        for (field, validator) in &self.validators {
            if failures.contains_key(field) {
                continue;
            }
            if let Err(message) = validator(inner.values.get(field)) {
                failures.insert(field.clone(), message);
            }
        }
        inner.field_errors.clone_from(&failures);
        if failures.is_empty() {
            Ok(inner.values.clone())
        } else {
            Err(FormError::Invalid(failures))
        }
    }

    async fn send(&self, request: ApiRequest) -> Result<Value, FormError> {
        let response = self.transport.send(request).await?;
        if !response.status.is_success() {
            return Err(FormError::Rejected {
                status: response.status,
                message: response.message().unwrap_or_else(|| MSG_GENERIC.to_owned()),
            });
        }
        if response.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&response.body)?)
    }

    fn emit(&self, event: FormEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "form_test.rs"]
mod tests;
