//! Production [`Transport`] backed by `reqwest`.

use async_trait::async_trait;
use std::time::Duration;

use crate::traits::{HttpMethod, HttpRequest, HttpResponse, Transport, TransportFault};

/// HTTP transport over a pooled `reqwest::Client`.
///
/// The client is created once and reused for every request of a harvest; it
/// is released when the transport is dropped.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportFault> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("oai-harvester/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| TransportFault::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportFault> {
        let builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url).query(&request.params),
            HttpMethod::Post => self.client.post(&request.url).form(&request.params),
        };

        let response = builder
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportFault::Network(format!("request timeout: {e}"))
                } else if e.is_connect() {
                    TransportFault::Network(format!("connection failed: {e}"))
                } else {
                    TransportFault::Network(format!("request failed: {e}"))
                }
            })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_string());

        let body = response
            .text()
            .await
            .map_err(|e| TransportFault::Network(format!("failed to read response body: {e}")))?;

        Ok(HttpResponse {
            status,
            body,
            retry_after,
        })
    }
}
