//! Pipeline stages a job passes through.
//!
//! ```text
//! classify ──▶ extract ──▶ structure ──▶ export
//! (lopdf)      (host)      (router)      (host / file)
//! ```
//!
//! 1. [`classify`]  decides the [`DocumentKind`] at enqueue time
//! 2. [`Extractor`] turns the source into plain text; supplied by the host,
//!    or [`RemoteExtractor`] for an OCR endpoint
//! 3. [`Structurer`] asks a language model to restructure the text as
//!    Markdown; [`RoutedStructurer`] resolves the profile from the vault and
//!    sends through the [`crate::provider::Router`]
//! 4. [`Exporter`] persists the Markdown; [`FileExporter`] writes atomically
//!
//! Stages are trait objects so the orchestrator can be driven by test
//! doubles and by hosts with their own OCR or storage.

pub mod classify;
pub mod export;
pub mod extract;
pub mod postprocess;
pub mod structure;

pub use classify::{classify, DocumentKind};
pub use export::{output_path_for, FileExporter};
pub use extract::RemoteExtractor;
pub use structure::RoutedStructurer;

use crate::error::CapabilityError;
use crate::queue::StageError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Text extraction capability.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Plain text of `path`. Mark transient failures with
    /// [`CapabilityError::transient`] so the phase is retried. `trace_id` is
    /// the job's correlation id and should go on any outbound request.
    async fn extract(
        &self,
        path: &Path,
        kind: DocumentKind,
        trace_id: &str,
    ) -> Result<String, CapabilityError>;
}

/// Markdown sink.
#[async_trait]
pub trait Exporter: Send + Sync {
    /// Persist `markdown` at `destination` and return where it ended up.
    async fn export(&self, markdown: &str, destination: &Path) -> Result<PathBuf, CapabilityError>;
}

/// Text to Markdown step.
#[async_trait]
pub trait Structurer: Send + Sync {
    async fn structure(
        &self,
        text: &str,
        kind: DocumentKind,
        trace_id: &str,
    ) -> Result<String, StageError>;
}
