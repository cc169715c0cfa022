use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::config::{HarvesterConfig, RetryPolicy};
use crate::harvest::traits::TransportError;
use crate::traits::{HttpMethod, HttpRequest, HttpResponse, Transport, TransportFault};

/// Sends protocol requests through a [`Transport`] with bounded retries.
///
/// - HTTP 503: wait `Retry-After` (or the default wait), capped, then retry
/// - any other fault or non-2xx status: retry immediately
///
/// Attempts run sequentially and only repeat the current request.
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    base_url: String,
    method: HttpMethod,
    timeout: Duration,
    retry: RetryPolicy,
}

impl RequestExecutor {
    pub fn new(config: &HarvesterConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            base_url: config.base_url.clone(),
            method: config.http_method,
            timeout: config.timeout(),
            retry: config.retry.clone(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Sends `params` to the endpoint, retrying per the policy.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] carrying the last fault once the attempt
    /// budget is spent, or immediately for a 503 that may not be retried.
    #[instrument(skip_all, fields(url = %self.base_url))]
    pub async fn execute(
        &self,
        params: Vec<(String, String)>,
    ) -> Result<HttpResponse, TransportError> {
        let request = HttpRequest {
            method: self.method,
            url: self.base_url.clone(),
            params,
            timeout: self.timeout,
        };
        let max_attempts = self.retry.max_attempts();
        let mut last_fault = TransportFault::Network("no attempt made".to_string());

        for attempt in 1..=max_attempts {
            let retries_left = attempt < max_attempts;
            debug!(attempt, verb = request.param("verb"), "Sending request");

            let fault = match self.transport.send(&request).await {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) if response.status == 503 => {
                    let fault = TransportFault::ServiceUnavailable {
                        retry_after: response.retry_after.clone(),
                    };
                    if !(self.retry.retry_on_503 && retries_left) {
                        return Err(TransportError {
                            attempts: attempt,
                            source: fault,
                        });
                    }
                    let wait = self.retry.wait_for(response.retry_after.as_deref());
                    warn!(
                        attempt,
                        wait_secs = wait.as_secs(),
                        "Service unavailable, waiting before retry"
                    );
                    tokio::time::sleep(wait).await;
                    last_fault = fault;
                    continue;
                }
                Ok(response) => TransportFault::Status {
                    status: response.status,
                },
                Err(fault) => fault,
            };

            if retries_left {
                warn!(attempt, error = %fault, "Request failed, retrying");
            }
            last_fault = fault;
        }

        Err(TransportError {
            attempts: max_attempts,
            source: last_fault,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            retry_on_503: true,
            max_wait_secs: 0,
            default_wait_secs: 0,
        }
    }

    fn executor(transport: Arc<ScriptedTransport>, retry: RetryPolicy) -> RequestExecutor {
        let config = HarvesterConfig::new("https://repo.example.org/oai").with_retry_policy(retry);
        RequestExecutor::new(&config, transport)
    }

    fn verb(name: &str) -> Vec<(String, String)> {
        vec![("verb".to_string(), name.to_string())]
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(HttpResponse::ok("<ok/>"))]));
        let executor = executor(transport.clone(), fast_policy(3));

        let response = executor.execute(verb("Identify")).await.unwrap();
        assert_eq!(response.body, "<ok/>");
        assert_eq!(transport.request_count(), 1);
        assert_eq!(transport.requests()[0].param("verb"), Some("Identify"));
    }

    #[tokio::test]
    async fn test_network_faults_exhaust_four_attempts() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(TransportFault::Network("reset".to_string())),
            Err(TransportFault::Network("reset".to_string())),
            Err(TransportFault::Network("reset".to_string())),
            Err(TransportFault::Network("refused".to_string())),
            Ok(HttpResponse::ok("never reached")),
        ]));
        let executor = executor(transport.clone(), fast_policy(3));

        let err = executor.execute(verb("ListRecords")).await.unwrap_err();
        assert_eq!(err.attempts, 4);
        assert_eq!(err.source, TransportFault::Network("refused".to_string()));
        assert_eq!(transport.request_count(), 4);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_fault() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(TransportFault::Network("timeout".to_string())),
            Ok(HttpResponse::ok("<ok/>")),
        ]));
        let executor = executor(transport.clone(), fast_policy(3));

        assert!(executor.execute(verb("ListSets")).await.is_ok());
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn test_503_with_retry_after_is_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(ScriptedTransport::unavailable(Some("1"))),
            Ok(ScriptedTransport::unavailable(None)),
            Ok(HttpResponse::ok("<ok/>")),
        ]));
        let executor = executor(transport.clone(), fast_policy(3));

        assert!(executor.execute(verb("ListRecords")).await.is_ok());
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_503_wait_is_capped() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(ScriptedTransport::unavailable(Some("5"))),
            Ok(HttpResponse::ok("<ok/>")),
        ]));
        let policy = RetryPolicy {
            max_wait_secs: 2,
            ..fast_policy(3)
        };
        let executor = executor(transport.clone(), policy);

        let start = tokio::time::Instant::now();
        assert!(executor.execute(verb("ListRecords")).await.is_ok());
        let waited = start.elapsed();

        assert!(waited >= Duration::from_secs(2), "waited {waited:?}");
        assert!(waited < Duration::from_secs(5), "waited {waited:?}");
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn test_503_out_of_retries_surfaces_unavailable() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(ScriptedTransport::unavailable(Some("0"))),
            Ok(ScriptedTransport::unavailable(Some("0"))),
        ]));
        let executor = executor(transport.clone(), fast_policy(1));

        let err = executor.execute(verb("ListRecords")).await.unwrap_err();
        assert_eq!(err.attempts, 2);
        assert_eq!(
            err.source,
            TransportFault::ServiceUnavailable {
                retry_after: Some("0".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_503_not_retried_when_disabled() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(ScriptedTransport::unavailable(Some("0"))),
            Ok(HttpResponse::ok("<ok/>")),
        ]));
        let policy = RetryPolicy {
            retry_on_503: false,
            ..fast_policy(3)
        };
        let executor = executor(transport.clone(), policy);

        let err = executor.execute(verb("ListRecords")).await.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_other_status_is_transport_fault() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(HttpResponse {
            status: 500,
            body: String::new(),
            retry_after: None,
        })]));
        let executor = executor(transport.clone(), RetryPolicy::no_retry());

        let err = executor.execute(verb("Identify")).await.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(err.source, TransportFault::Status { status: 500 });
    }
}
