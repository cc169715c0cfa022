use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// HTTP method used to send protocol requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// Parameters are sent in the query string
    #[default]
    Get,
    /// Parameters are sent as a form-encoded body
    Post,
}

/// A single protocol request, independent of the HTTP client in use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub params: Vec<(String, String)>,
    pub timeout: Duration,
}

impl HttpRequest {
    /// Value of the first parameter called `name`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// Raw `Retry-After` header value, if the server sent one.
    pub retry_after: Option<String>,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            retry_after: None,
        }
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Failure of a single request attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportFault {
    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected HTTP status {status}")]
    Status { status: u16 },

    #[error(
        "service unavailable (HTTP 503, Retry-After: {})",
        .retry_after.as_deref().unwrap_or("none")
    )]
    ServiceUnavailable { retry_after: Option<String> },
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one request and returns the response whatever its status.
    ///
    /// Only faults below HTTP (DNS, connect, timeout, body read) are errors;
    /// status handling belongs to the caller.
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportFault>;
}
