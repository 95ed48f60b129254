//! Language-model backends behind one request/response contract.
//!
//! A [`ProviderProfile`] names a backend kind, endpoint, model and API key.
//! The [`Router`] turns a normalised [`CompletionRequest`] into the wire
//! shape of the profile's kind ([`shape`]), sends it through a
//! [`Transport`], and classifies any failure as retryable or fatal.

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod retry;
pub mod router;
pub mod shape;
pub mod transport;

pub use router::{RouteFailure, Router};
pub use shape::ProviderShape;
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};

use crate::error::CryptoError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of backend API shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "anthropic", alias = "claude")]
    Anthropic,
    #[serde(rename = "gemini")]
    Gemini,
    /// Any relay speaking the OpenAI chat-completions dialect.
    #[serde(rename = "openai-compatible", alias = "openai_compatible")]
    OpenAiCompatible,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenAiCompatible => "openai-compatible",
        }
    }

    /// `None` for `openai-compatible`, which has no canonical endpoint.
    pub fn default_base_url(self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("https://api.openai.com/v1"),
            ProviderKind::Anthropic => Some("https://api.anthropic.com/v1"),
            ProviderKind::Gemini => Some("https://generativelanguage.googleapis.com/v1beta"),
            ProviderKind::OpenAiCompatible => None,
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::OpenAi | ProviderKind::OpenAiCompatible => "gpt-4o-mini",
            ProviderKind::Anthropic => "claude-sonnet-4-5",
            ProviderKind::Gemini => "gemini-2.0-flash",
        }
    }

    /// Wire shape used for this kind.
    pub fn shape(self) -> &'static dyn ProviderShape {
        match self {
            ProviderKind::OpenAi => &openai::OPENAI,
            ProviderKind::OpenAiCompatible => &openai::OPENAI_COMPATIBLE,
            ProviderKind::Anthropic => &anthropic::AnthropicShape,
            ProviderKind::Gemini => &gemini::GeminiShape,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            "openai-compatible" | "openai_compatible" | "relay" | "cc-switch" | "ccswitch" => {
                Ok(ProviderKind::OpenAiCompatible)
            }
            other => Err(format!(
                "unknown provider '{other}' (expected openai, anthropic, gemini or openai-compatible)"
            )),
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// One named backend configuration stored in the vault.
///
/// `Debug` never prints the API key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub name: String,
    pub provider: ProviderKind,
    /// Empty means the kind's default endpoint.
    #[serde(default)]
    pub base_url: String,
    pub api_key: String,
    /// Empty means the kind's default model.
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl ProviderProfile {
    pub fn new(name: impl Into<String>, provider: ProviderKind, api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider,
            base_url: String::new(),
            api_key: api_key.into(),
            model: String::new(),
            enabled: true,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Configured endpoint without a trailing slash, or the kind's default.
    pub fn endpoint(&self) -> &str {
        let configured = self.base_url.trim().trim_end_matches('/');
        if configured.is_empty() {
            self.provider.default_base_url().unwrap_or_default()
        } else {
            configured
        }
    }

    pub fn model_name(&self) -> &str {
        let m = self.model.trim();
        if m.is_empty() {
            self.provider.default_model()
        } else {
            m
        }
    }

    /// Checks a profile before it is sealed into the vault.
    pub fn validate(&self) -> Result<(), CryptoError> {
        let invalid = |reason: &str| CryptoError::InvalidProfile {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.api_key.trim().is_empty() {
            return Err(invalid("API key must not be empty"));
        }
        if self.endpoint().is_empty() {
            return Err(invalid("openai-compatible profiles need a base URL"));
        }
        let endpoint = self.endpoint();
        if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
            return Err(invalid("base URL must start with http:// or https://"));
        }
        Ok(())
    }
}

impl fmt::Debug for ProviderProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderProfile")
            .field("name", &self.name)
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Normalised model request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// API version header for backends that take one (Anthropic).
    pub api_version: Option<String>,
}

/// Text of a successful completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResponse {
    pub text: String,
    pub trace_id: String,
    /// Attempts the router made, first one included.
    pub attempts: u32,
}
