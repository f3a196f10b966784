use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use taskdeck_shared::Envelope;
use tracing::{Instrument, debug, info_span, warn};
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: vec![],
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::Patch, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// Raw status and body, before envelope decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Wire-level executor. Implementations own the cookie jar that carries the
/// session credential; `Err` is reserved for failures where no response was
/// received.
#[async_trait]
pub trait HttpBackend: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> Result<HttpResponse, ApiError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigateMode {
    Push,
    Replace,
    /// Full reload of the target; discards in-flight screen state.
    Hard,
}

pub trait Navigator: Send + Sync {
    fn current_path(&self) -> String;
    fn navigate(&self, path: &str, mode: NavigateMode);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathRule {
    Exact(String),
    Prefix(String),
}

impl PathRule {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathRule::Exact(expected) => path == expected,
            PathRule::Prefix(prefix) => path.starts_with(prefix.as_str()),
        }
    }
}

pub const LOGIN_PATH: &str = "/login";

/// Reaction to a 401: force navigation to the login screen unless the user
/// is on a screen where a 401 is an expected answer.
pub struct UnauthorizedPolicy {
    exemptions: Vec<PathRule>,
    navigator: Arc<dyn Navigator>,
}

impl UnauthorizedPolicy {
    pub fn new(navigator: Arc<dyn Navigator>) -> Self {
        Self {
            exemptions: default_exemptions(),
            navigator,
        }
    }

    pub fn with_exemptions(mut self, exemptions: Vec<PathRule>) -> Self {
        self.exemptions = exemptions;
        self
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        self.exemptions.iter().any(|rule| rule.matches(path))
    }

    /// Returns whether a forced navigation was issued.
    pub fn on_unauthorized(&self) -> bool {
        let current = self.navigator.current_path();
        if self.is_exempt(&current) {
            debug!(path = %current, "401 on exempt path; leaving it to the caller");
            return false;
        }

        warn!(path = %current, "401 outside exempt paths; forcing login");
        self.navigator.navigate(LOGIN_PATH, NavigateMode::Hard);
        true
    }
}

pub fn default_exemptions() -> Vec<PathRule> {
    vec![
        PathRule::Exact(LOGIN_PATH.to_string()),
        PathRule::Exact("/register".to_string()),
        PathRule::Prefix("/reset-password".to_string()),
    ]
}

pub struct ApiClient {
    backend: Arc<dyn HttpBackend>,
    policy: UnauthorizedPolicy,
}

impl ApiClient {
    pub fn new(backend: Arc<dyn HttpBackend>, policy: UnauthorizedPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn policy(&self) -> &UnauthorizedPolicy {
        &self.policy
    }

    pub async fn send(&self, request: ApiRequest) -> Result<Envelope, ApiError> {
        let request_id = Uuid::new_v4();
        let span = info_span!(
            "api_request",
            %request_id,
            method = %request.method,
            path = %request.path
        );

        async {
            let response = match self.backend.execute(&request).await {
                Ok(response) => response,
                Err(err) => {
                    warn!(error = %err, "request failed without a response");
                    return Err(err);
                }
            };
            debug!(status = response.status, bytes = response.body.len(), "response received");

            if response.is_success() {
                return decode_envelope(&response.body);
            }

            let message = error_message(&response.body);
            if response.status == 401 {
                self.policy.on_unauthorized();
            }
            let err = ApiError::from_status(response.status, message);
            debug!(error = %err, "request rejected");
            Err(err)
        }
        .instrument(span)
        .await
    }

    pub async fn get(&self, path: &str) -> Result<Envelope, ApiError> {
        self.send(ApiRequest::get(path)).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Envelope, ApiError> {
        self.send(ApiRequest::post(path).with_body(body)).await
    }
}

fn decode_envelope(body: &[u8]) -> Result<Envelope, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Envelope::default());
    }

    serde_json::from_slice(body).map_err(|err| ApiError::Malformed(err.to_string()))
}

fn error_message(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    value
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Percent-encodes a value for use as a single path segment.
pub fn segment(raw: &str) -> String {
    urlencoding::encode(raw).into_owned()
}
