//! # docmark
//!
//! Turn PDF, DOC and DOCX files into Markdown through interchangeable
//! language-model backends, many documents at a time.
//!
//! ## Pipeline Overview
//!
//! ```text
//! path
//!  │
//!  ├─ 0. Classify   extension + lopdf probe → pdf / dual-layer pdf / doc / docx
//!  ├─ 1. Extract    host OCR capability, or RemoteExtractor
//!  ├─ 2. Structure  vault profile → Router → OpenAI / Anthropic / Gemini / relay
//!  └─ 3. Export     atomic write of <stem>.md
//! ```
//!
//! Each document is a job in the [`queue`]. A bounded worker pool runs
//! phases; retryable provider failures (429, 5xx, network) back off with
//! capped exponential delays while the worker slot is released. Every
//! transition is published on a progress channel.
//!
//! Provider credentials live in one encrypted file ([`vault`]): Argon2id
//! derives a key from the user's passphrase and AES-256-GCM seals the
//! profile list. API keys never reach logs, `Debug` output or job errors.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docmark::{Engine, EngineConfig, ProviderKind, ProviderProfile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::new(EngineConfig::from_env()?)?;
//!     engine
//!         .save_profiles(
//!             "correct horse",
//!             vec![ProviderProfile::new("main", ProviderKind::OpenAi, "sk-...")],
//!         )
//!         .await?;
//!
//!     let ids = engine.enqueue_files(["report.pdf", "letter.docx"]).await;
//!     engine.start_queue();
//!     for id in ids {
//!         println!("{:?}", engine.get_job(id).map(|job| job.state));
//!     }
//!     Ok(())
//! }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod provider;
pub mod queue;
pub mod vault;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    EngineConfig, EngineConfigBuilder, KdfParams, ProbeConfig, RetryPolicy, StructuringOptions,
    VaultConfig,
};
pub use engine::{Engine, EngineBuilder};
pub use error::{
    CapabilityError, ClassificationError, ConfigError, CryptoError, ErrorKind, OrchestratorError,
    ProviderError,
};
pub use pipeline::{
    classify, DocumentKind, Exporter, Extractor, FileExporter, RemoteExtractor, RoutedStructurer,
    Structurer,
};
pub use progress::{ProgressEvent, ProgressHub};
pub use provider::{
    CompletionRequest, CompletionResponse, ProviderKind, ProviderProfile, RouteFailure, Router,
};
pub use queue::{
    CancelOutcome, JobError, JobEvent, JobId, JobRecord, JobState, Orchestrator, Phase,
    StageError,
};
pub use vault::{Vault, VaultEnvelope};
