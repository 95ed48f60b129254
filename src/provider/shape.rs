//! The capability set every backend wire shape implements.

use crate::error::ProviderError;
use crate::provider::transport::HttpRequest;
use crate::provider::{CompletionRequest, ProviderProfile};
use serde_json::Value;

/// Translates between the normalised request and one backend's HTTP API.
pub trait ProviderShape: Send + Sync {
    /// Request for `profile`. `trace_id` goes into
    /// [`ProviderShape::correlation_header`] when the backend has one.
    fn build_request(
        &self,
        profile: &ProviderProfile,
        request: &CompletionRequest,
        trace_id: &str,
    ) -> HttpRequest;

    /// Completion text of a 2xx body.
    fn parse_response(&self, body: &str) -> Result<String, ProviderError>;

    /// Classify a non-2xx response. `body` is already redacted and truncated.
    fn classify_status(&self, status: u16, body: &str, retry_after: Option<&str>) -> ProviderError {
        classify_http_status(status, body, retry_after)
    }

    /// Header carrying the trace id, when the backend echoes one.
    fn correlation_header(&self) -> Option<&'static str> {
        None
    }
}

/// Status mapping shared by all shapes.
pub fn classify_http_status(status: u16, body: &str, retry_after: Option<&str>) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited {
            retry_after_ms: retry_after.and_then(parse_retry_after),
        },
        401 | 403 => ProviderError::AuthFailure { status },
        500..=599 => ProviderError::ServerError {
            status,
            detail: body.to_string(),
        },
        _ => ProviderError::BadRequest {
            status,
            detail: body.to_string(),
        },
    }
}

/// `Retry-After` in delta-seconds. HTTP-date values are ignored.
pub fn parse_retry_after(value: &str) -> Option<u64> {
    let secs: f64 = value.trim().parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some((secs * 1000.0).round() as u64)
    } else {
        None
    }
}

pub(crate) fn parse_json(body: &str) -> Result<Value, ProviderError> {
    serde_json::from_str(body).map_err(|e| ProviderError::UnparseableResponse {
        detail: format!("invalid JSON: {e}"),
    })
}

/// Join the `text` fields of an array of content parts.
pub(crate) fn join_text_parts<'a>(parts: impl IntoIterator<Item = &'a Value>) -> String {
    let mut buf = String::new();
    for text in parts
        .into_iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
    {
        if !buf.is_empty() {
            buf.push('\n');
        }
        buf.push_str(text);
    }
    buf
}

pub(crate) fn non_empty(text: String, what: &str) -> Result<String, ProviderError> {
    if text.trim().is_empty() {
        Err(ProviderError::UnparseableResponse {
            detail: format!("no text in {what}"),
        })
    } else {
        Ok(text)
    }
}
