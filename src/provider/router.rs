//! Dispatch a normalised request to a profile's backend.
//!
//! [`Router::send`] makes exactly one attempt and classifies the outcome.
//! The job orchestrator owns retries for its phases so it can release its
//! worker slot while backing off; [`Router::send_with_retry`] runs the same
//! policy inline for callers outside the queue.

use crate::config::RetryPolicy;
use crate::error::{redact, ConfigError, ProviderError};
use crate::provider::shape::ProviderShape;
use crate::provider::transport::{HttpRequest, ReqwestTransport, Transport};
use crate::provider::{CompletionRequest, CompletionResponse, ProviderProfile};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Final failure of [`Router::send_with_retry`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{trace_id}] {error} (after {attempts} attempt(s))")]
pub struct RouteFailure {
    #[source]
    pub error: ProviderError,
    pub attempts: u32,
    pub trace_id: String,
}

pub struct Router {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl Router {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Router over a fresh reqwest client with the given request timeout.
    pub fn with_reqwest(timeout: Duration, policy: RetryPolicy) -> Result<Self, ConfigError> {
        Ok(Self::new(Arc::new(ReqwestTransport::new(timeout)?), policy))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// One attempt against `profile`'s backend.
    pub async fn send(
        &self,
        profile: &ProviderProfile,
        request: &CompletionRequest,
        trace_id: &str,
    ) -> Result<CompletionResponse, ProviderError> {
        let shape = profile.provider.shape();
        let http = shape.build_request(profile, request, trace_id);
        debug!(
            trace_id,
            profile = %profile.name,
            provider = %profile.provider,
            model = profile.model_name(),
            "Sending completion request"
        );

        let body = self.exchange(profile, shape, http, trace_id).await?;
        let text = shape
            .parse_response(&body)
            .map_err(|e| scrub(e, &profile.api_key))?;
        info!(
            trace_id,
            profile = %profile.name,
            chars = text.len(),
            "Completion received"
        );
        Ok(CompletionResponse {
            text,
            trace_id: trace_id.to_string(),
            attempts: 1,
        })
    }

    /// One attempt with a request built by the caller. Returns the raw 2xx
    /// body; failures are classified like [`Router::send`].
    pub async fn post(
        &self,
        profile: &ProviderProfile,
        http: HttpRequest,
        trace_id: &str,
    ) -> Result<String, ProviderError> {
        debug!(trace_id, profile = %profile.name, url = %http.url, "Sending request");
        self.exchange(profile, profile.provider.shape(), http, trace_id)
            .await
    }

    async fn exchange(
        &self,
        profile: &ProviderProfile,
        shape: &dyn ProviderShape,
        http: HttpRequest,
        trace_id: &str,
    ) -> Result<String, ProviderError> {
        let started = Instant::now();
        let response = self
            .transport
            .execute(http)
            .await
            .map_err(|e| scrub(e, &profile.api_key))?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if (200..300).contains(&response.status) {
            debug!(trace_id, status = response.status, elapsed_ms, "Provider replied");
            return Ok(response.body);
        }

        let body = redact(&response.body, &profile.api_key);
        let err = shape.classify_status(response.status, &body, response.retry_after.as_deref());
        warn!(
            trace_id,
            profile = %profile.name,
            provider = %profile.provider,
            status = response.status,
            elapsed_ms,
            retryable = err.is_retryable(),
            "Provider returned an error: {}",
            err
        );
        Err(err)
    }

    /// [`Router::send`] wrapped in the retry policy.
    pub async fn send_with_retry(
        &self,
        profile: &ProviderProfile,
        request: &CompletionRequest,
        trace_id: &str,
    ) -> Result<CompletionResponse, RouteFailure> {
        let mut attempt = 0u32;
        let mut last_delay = Duration::ZERO;
        loop {
            attempt += 1;
            match self.send(profile, request, trace_id).await {
                Ok(mut response) => {
                    response.attempts = attempt;
                    return Ok(response);
                }
                Err(e) if e.is_retryable() && self.policy.allows_another(attempt) => {
                    let delay = self.policy.delay_with_hint(attempt, e.retry_after_ms(), last_delay);
                    last_delay = delay;
                    warn!(
                        trace_id,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after {}",
                        e.kind()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    return Err(RouteFailure {
                        error,
                        attempts: attempt,
                        trace_id: trace_id.to_string(),
                    })
                }
            }
        }
    }
}

/// Redact the key from any free-text detail an error carries.
fn scrub(e: ProviderError, key: &str) -> ProviderError {
    match e {
        ProviderError::ServerError { status, detail } => ProviderError::ServerError {
            status,
            detail: redact(&detail, key),
        },
        ProviderError::NetworkFailure { detail } => ProviderError::NetworkFailure {
            detail: redact(&detail, key),
        },
        ProviderError::BadRequest { status, detail } => ProviderError::BadRequest {
            status,
            detail: redact(&detail, key),
        },
        ProviderError::UnparseableResponse { detail } => ProviderError::UnparseableResponse {
            detail: redact(&detail, key),
        },
        other => other,
    }
}
