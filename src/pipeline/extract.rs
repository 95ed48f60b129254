//! Remote text extraction.
//!
//! [`RemoteExtractor`] is the built-in [`Extractor`] for hosts without their
//! own OCR. PDFs go to an OpenAI-shaped chat endpoint as a base64 data URL
//! `file_url` part; DOC/DOCX go to a `files/parse` endpoint as a `base64://`
//! payload. Credentials come from a vault profile and requests go through the
//! same [`Router`] as structuring, so failures are classified the same way.

use crate::error::{CapabilityError, ProviderError};
use crate::pipeline::postprocess::limit_text;
use crate::pipeline::{DocumentKind, Extractor};
use crate::provider::openai::chat_content;
use crate::provider::shape::{non_empty, parse_json};
use crate::provider::{HttpRequest, ProviderProfile, Router};
use crate::vault::Vault;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_MAX_EXTRACTED_CHARS: usize = 2_000_000;

const OCR_INSTRUCTION: &str = "Extract the complete content of this document as plain text. \
Keep headings, paragraphs and table rows in reading order.";

const PARSE_INSTRUCTION: &str =
    "Extract all body text and structure, keeping heading levels and table text.";

const TRUNCATION_MARKER: &str = "[TRUNCATED: extracted text exceeded the configured limit]";

/// Response fields a file-parse endpoint may put the text in, in lookup order.
const PARSE_POINTERS: [&str; 5] = [
    "/content",
    "/data/content",
    "/text",
    "/data/text",
    "/result/content",
];

/// [`Extractor`] backed by a remote OCR / file-parse service.
pub struct RemoteExtractor {
    vault: Arc<Vault>,
    router: Arc<Router>,
    profile: Option<String>,
    model: Option<String>,
    max_chars: usize,
}

impl RemoteExtractor {
    /// Uses the vault's first enabled profile and its model.
    pub fn new(vault: Arc<Vault>, router: Arc<Router>) -> Self {
        Self {
            vault,
            router,
            profile: None,
            model: None,
            max_chars: DEFAULT_MAX_EXTRACTED_CHARS,
        }
    }

    pub fn with_profile(mut self, name: impl Into<String>) -> Self {
        self.profile = Some(name.into());
        self
    }

    /// OCR model, when it differs from the profile's chat model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    fn ocr_request(&self, profile: &ProviderProfile, bytes: &[u8], request_id: &str) -> HttpRequest {
        let data_url = format!("data:application/pdf;base64,{}", STANDARD.encode(bytes));
        let model = self.model.as_deref().unwrap_or_else(|| profile.model_name());
        HttpRequest {
            url: format!("{}/chat/completions", profile.endpoint()),
            headers: auth_headers(profile, request_id),
            body: json!({
                "model": model,
                "messages": [{
                    "role": "user",
                    "content": [
                        { "type": "file_url", "file_url": { "url": data_url } },
                        { "type": "text", "text": OCR_INSTRUCTION },
                    ],
                }],
            }),
        }
    }

    fn parse_request(&self, profile: &ProviderProfile, bytes: &[u8], request_id: &str) -> HttpRequest {
        HttpRequest {
            url: format!("{}/files/parse", profile.endpoint()),
            headers: auth_headers(profile, request_id),
            body: json!({
                "file": format!("base64://{}", STANDARD.encode(bytes)),
                "purpose": "file-extract",
                "prompt": PARSE_INSTRUCTION,
            }),
        }
    }
}

fn auth_headers(profile: &ProviderProfile, request_id: &str) -> Vec<(String, String)> {
    vec![
        ("Authorization".into(), format!("Bearer {}", profile.api_key)),
        ("X-Request-Id".into(), request_id.to_string()),
    ]
}

#[async_trait]
impl Extractor for RemoteExtractor {
    async fn extract(
        &self,
        path: &Path,
        kind: DocumentKind,
        trace_id: &str,
    ) -> Result<String, CapabilityError> {
        let profile = self
            .vault
            .active_profile(self.profile.as_deref())
            .await
            .map_err(|e| CapabilityError::fatal(e.to_string()))?;

        let bytes = tokio::fs::read(path).await.map_err(|e| {
            let msg = format!("Cannot read '{}': {e}", path.display());
            match e.kind() {
                std::io::ErrorKind::Interrupted => CapabilityError::transient(msg),
                _ => CapabilityError::fatal(msg),
            }
        })?;

        let http = if kind.is_pdf() {
            self.ocr_request(&profile, &bytes, trace_id)
        } else {
            self.parse_request(&profile, &bytes, trace_id)
        };
        debug!(
            trace_id = %trace_id,
            profile = %profile.name,
            %kind,
            bytes = bytes.len(),
            "Requesting remote extraction"
        );

        let body = self.router.post(&profile, http, trace_id).await?;
        let text = if kind.is_pdf() {
            parse_ocr_text(&body)?
        } else {
            parse_file_text(&body)?
        };

        info!(
            trace_id = %trace_id,
            path = %path.display(),
            chars = text.len(),
            "Extraction complete"
        );
        Ok(limit_text(text, self.max_chars, TRUNCATION_MARKER))
    }
}

fn parse_ocr_text(body: &str) -> Result<String, ProviderError> {
    let value = parse_json(body)?;
    let text = chat_content(&value).ok_or_else(|| ProviderError::UnparseableResponse {
        detail: "missing choices[0].message.content in OCR response".into(),
    })?;
    non_empty(text, "OCR response")
}

fn parse_file_text(body: &str) -> Result<String, ProviderError> {
    let value = parse_json(body)?;
    PARSE_POINTERS
        .iter()
        .filter_map(|p| value.pointer(p).and_then(Value::as_str))
        .find(|text| !text.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProviderError::UnparseableResponse {
            detail: "missing extracted text in file-parse response".into(),
        })
}
