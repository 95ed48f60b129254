//! OpenAI chat-completions shape, also used by compatible relays.

use crate::error::ProviderError;
use crate::provider::shape::{join_text_parts, non_empty, parse_json, ProviderShape};
use crate::provider::transport::HttpRequest;
use crate::provider::{CompletionRequest, ProviderProfile};
use serde_json::{json, Value};

pub struct OpenAiShape {
    correlation: &'static str,
}

pub static OPENAI: OpenAiShape = OpenAiShape {
    correlation: "X-Client-Request-Id",
};

pub static OPENAI_COMPATIBLE: OpenAiShape = OpenAiShape {
    correlation: "X-Request-Id",
};

impl ProviderShape for OpenAiShape {
    fn build_request(
        &self,
        profile: &ProviderProfile,
        request: &CompletionRequest,
        trace_id: &str,
    ) -> HttpRequest {
        HttpRequest {
            url: format!("{}/chat/completions", profile.endpoint()),
            headers: vec![
                ("Authorization".into(), format!("Bearer {}", profile.api_key)),
                (self.correlation.into(), trace_id.to_string()),
            ],
            body: json!({
                "model": profile.model_name(),
                "temperature": request.temperature,
                "max_tokens": request.max_tokens,
                "messages": [
                    { "role": "system", "content": request.system },
                    { "role": "user", "content": request.user },
                ],
            }),
        }
    }

    fn parse_response(&self, body: &str) -> Result<String, ProviderError> {
        let value = parse_json(body)?;
        let text = chat_content(&value).ok_or_else(|| ProviderError::UnparseableResponse {
            detail: "missing choices[0].message.content".into(),
        })?;
        non_empty(text, "choices[0].message.content")
    }

    fn correlation_header(&self) -> Option<&'static str> {
        Some(self.correlation)
    }
}

/// `choices[0].message.content` as a string or an array of text parts.
pub(crate) fn chat_content(value: &Value) -> Option<String> {
    let content = value.pointer("/choices/0/message/content")?;
    if let Some(text) = content.as_str() {
        return Some(text.to_string());
    }
    content.as_array().map(join_text_parts)
}
