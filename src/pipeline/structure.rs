//! Structuring phase: extracted text to Markdown through a language model.

use crate::config::StructuringOptions;
use crate::pipeline::postprocess::{clean_markdown, limit_text};
use crate::pipeline::{DocumentKind, Structurer};
use crate::prompts::{structuring_user_prompt, DEFAULT_SYSTEM_PROMPT};
use crate::provider::{CompletionRequest, Router};
use crate::queue::StageError;
use crate::vault::Vault;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

const TRUNCATION_MARKER: &str = "[TRUNCATED: source text exceeded the configured limit]";

/// [`Structurer`] that resolves its profile from the vault on every call
/// and makes one attempt through the [`Router`].
///
/// Retries belong to the orchestrator, which releases the worker slot while
/// it backs off.
pub struct RoutedStructurer {
    vault: Arc<Vault>,
    router: Arc<Router>,
    profile: Option<String>,
    options: StructuringOptions,
    max_source_chars: usize,
}

impl RoutedStructurer {
    pub fn new(
        vault: Arc<Vault>,
        router: Arc<Router>,
        profile: Option<String>,
        options: StructuringOptions,
        max_source_chars: usize,
    ) -> Self {
        Self {
            vault,
            router,
            profile,
            options,
            max_source_chars,
        }
    }

    fn request(&self, text: &str, kind: DocumentKind) -> CompletionRequest {
        let source = limit_text(text.to_string(), self.max_source_chars, TRUNCATION_MARKER);
        CompletionRequest {
            system: self
                .options
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            user: structuring_user_prompt(&source, kind),
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
            api_version: Some(self.options.anthropic_version.clone()),
        }
    }
}

#[async_trait]
impl Structurer for RoutedStructurer {
    async fn structure(
        &self,
        text: &str,
        kind: DocumentKind,
        trace_id: &str,
    ) -> Result<String, StageError> {
        let profile = self.vault.active_profile(self.profile.as_deref()).await?;
        let request = self.request(text, kind);
        debug!(
            trace_id,
            profile = %profile.name,
            provider = %profile.provider,
            chars = request.user.len(),
            "Structuring"
        );
        let response = self.router.send(&profile, &request, trace_id).await?;
        Ok(clean_markdown(&response.text))
    }
}
