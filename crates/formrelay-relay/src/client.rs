//! HTTP client for the relay endpoint.

use formrelay_core::RetrySettings;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::request::MultipartRequest;

pub const API_TOKEN_HEADER: &str = "X-API-Token";

const USER_AGENT: &str = concat!("formrelay/", env!("CARGO_PKG_VERSION"));

#[derive(Error, Debug)]
pub enum RelayClientError {
    #[error("Failed to create HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Result of one relay call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// No HTTP response was obtained (DNS, connect, timeout, body encoding)
    TransportError(String),
    /// The endpoint answered, with any status
    Completed { status: u16, body: String },
}

impl RelayOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RelayOutcome::Completed { status, .. } if (200..300).contains(status))
    }

    pub fn is_transport_error(&self) -> bool {
        matches!(self, RelayOutcome::TransportError(_))
    }
}

/// Outcome of a send with retries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayDelivery {
    pub outcome: RelayOutcome,
    pub attempts: u32,
}

/// Exponential backoff for transport failures
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        multiplier: f64,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
            multiplier: multiplier.max(1.0),
        }
    }

    /// A single attempt, no retries
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO, 1.0)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `retry` (1 for the first retry)
    pub fn backoff_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.powi(retry.saturating_sub(1) as i32);
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self::new(
            settings.max_attempts,
            Duration::from_millis(settings.initial_backoff_ms),
            Duration::from_millis(settings.max_backoff_ms),
            settings.multiplier,
        )
    }
}

/// Sends relay requests to one endpoint
#[derive(Clone)]
pub struct RelayClient {
    client: reqwest::Client,
    endpoint: Url,
    api_token: String,
}

impl RelayClient {
    pub fn new(
        endpoint: Url,
        api_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RelayClientError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            api_token: api_token.into(),
        })
    }

    /// One multipart POST; never fails, every problem becomes an outcome
    pub async fn send(&self, request: &MultipartRequest) -> RelayOutcome {
        let form = match request.to_form() {
            Ok(form) => form,
            Err(e) => return RelayOutcome::TransportError(format!("Invalid request body: {}", e)),
        };

        debug!(
            "Sending {} parts ({} files) to {}",
            request.parts().len(),
            request.file_count(),
            self.endpoint
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(API_TOKEN_HEADER, &self.api_token)
            .multipart(form)
            .send()
            .await;

        match response {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let body = match resp.text().await {
                    Ok(body) => body,
                    Err(e) => {
                        warn!("Failed to read relay response body (status {}): {}", status, e);
                        String::new()
                    }
                };
                RelayOutcome::Completed { status, body }
            }
            Err(e) => RelayOutcome::TransportError(e.to_string()),
        }
    }

    /// Send, retrying transport failures only
    pub async fn send_with_retry(
        &self,
        request: &MultipartRequest,
        policy: &RetryPolicy,
    ) -> RelayDelivery {
        let mut attempt = 1;
        loop {
            let outcome = self.send(request).await;

            let RelayOutcome::TransportError(message) = &outcome else {
                if attempt > 1 {
                    info!("Relay answered after {} attempts", attempt);
                }
                return RelayDelivery {
                    outcome,
                    attempts: attempt,
                };
            };

            if attempt >= policy.max_attempts() {
                return RelayDelivery {
                    outcome,
                    attempts: attempt,
                };
            }

            let delay = policy.backoff_for(attempt);
            warn!(
                "Relay attempt {}/{} failed: {}. Retrying in {}ms",
                attempt,
                policy.max_attempts(),
                message,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
