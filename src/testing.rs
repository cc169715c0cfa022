//! In-memory transport used by unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::traits::{HttpRequest, HttpResponse, Transport, TransportFault};

/// Replays a fixed script of responses and records every request sent.
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Result<HttpResponse, TransportFault>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new(script: Vec<Result<HttpResponse, TransportFault>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Scripts one 200 response per body.
    pub(crate) fn pages<S: AsRef<str>>(bodies: &[S]) -> Self {
        Self::new(
            bodies
                .iter()
                .map(|b| Ok(HttpResponse::ok(b.as_ref())))
                .collect(),
        )
    }

    pub(crate) fn unavailable(retry_after: Option<&str>) -> HttpResponse {
        HttpResponse {
            status: 503,
            body: String::new(),
            retry_after: retry_after.map(str::to_string),
        }
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportFault> {
        self.requests.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportFault::Network("script exhausted".to_string())))
    }
}
