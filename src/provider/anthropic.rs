//! Anthropic messages shape.

use crate::error::ProviderError;
use crate::provider::shape::{join_text_parts, non_empty, parse_json, ProviderShape};
use crate::provider::transport::HttpRequest;
use crate::provider::{CompletionRequest, ProviderProfile};
use serde_json::{json, Value};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicShape;

impl ProviderShape for AnthropicShape {
    fn build_request(
        &self,
        profile: &ProviderProfile,
        request: &CompletionRequest,
        _trace_id: &str,
    ) -> HttpRequest {
        HttpRequest {
            url: format!("{}/messages", profile.endpoint()),
            headers: vec![
                ("x-api-key".into(), profile.api_key.clone()),
                (
                    "anthropic-version".into(),
                    request
                        .api_version
                        .clone()
                        .unwrap_or_else(|| ANTHROPIC_VERSION.to_string()),
                ),
            ],
            body: json!({
                "model": profile.model_name(),
                "max_tokens": request.max_tokens,
                "temperature": request.temperature,
                "system": request.system,
                "messages": [
                    { "role": "user", "content": request.user },
                ],
            }),
        }
    }

    fn parse_response(&self, body: &str) -> Result<String, ProviderError> {
        let value = parse_json(body)?;
        let blocks = value
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::UnparseableResponse {
                detail: "missing content array".into(),
            })?;
        let text = join_text_parts(
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str).unwrap_or("text") == "text"),
        );
        non_empty(text, "content blocks")
    }
}
