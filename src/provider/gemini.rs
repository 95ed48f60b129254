//! Gemini `generateContent` shape.
//!
//! The key travels in the `x-goog-api-key` header rather than the query
//! string, so it never ends up in a URL that might be logged.

use crate::error::ProviderError;
use crate::provider::shape::{classify_http_status, join_text_parts, non_empty, parse_json, ProviderShape};
use crate::provider::transport::HttpRequest;
use crate::provider::{CompletionRequest, ProviderProfile};
use serde_json::{json, Value};

pub struct GeminiShape;

impl ProviderShape for GeminiShape {
    fn build_request(
        &self,
        profile: &ProviderProfile,
        request: &CompletionRequest,
        _trace_id: &str,
    ) -> HttpRequest {
        HttpRequest {
            url: format!(
                "{}/models/{}:generateContent",
                profile.endpoint(),
                profile.model_name()
            ),
            headers: vec![("x-goog-api-key".into(), profile.api_key.clone())],
            body: json!({
                "systemInstruction": { "parts": [{ "text": request.system }] },
                "contents": [
                    { "role": "user", "parts": [{ "text": request.user }] },
                ],
                "generationConfig": {
                    "temperature": request.temperature,
                    "maxOutputTokens": request.max_tokens,
                },
            }),
        }
    }

    fn parse_response(&self, body: &str) -> Result<String, ProviderError> {
        let value = parse_json(body)?;
        let parts = value
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::UnparseableResponse {
                detail: "missing candidates[0].content.parts".into(),
            })?;
        non_empty(join_text_parts(parts), "candidate parts")
    }

    /// Gemini reports a bad key as 400 with `API_KEY_INVALID`.
    fn classify_status(&self, status: u16, body: &str, retry_after: Option<&str>) -> ProviderError {
        if status == 400 && body.contains("API_KEY_INVALID") {
            return ProviderError::AuthFailure { status };
        }
        classify_http_status(status, body, retry_after)
    }
}
