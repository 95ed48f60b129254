//! The operation surface front ends call.
//!
//! [`Engine`] wires one [`Vault`], one [`Router`] and one [`Orchestrator`]
//! together from an [`EngineConfig`]. Every stage can be swapped through
//! [`EngineBuilder`]; by default extraction goes to a remote OCR endpoint,
//! structuring through the router and export to files next to the source.

use crate::config::EngineConfig;
use crate::error::{ConfigError, CryptoError, OrchestratorError};
use crate::pipeline::{
    Exporter, Extractor, FileExporter, RemoteExtractor, RoutedStructurer, Structurer,
};
use crate::progress::ProgressEvent;
use crate::provider::{ProviderProfile, Router, Transport};
use crate::queue::{CancelOutcome, JobId, JobRecord, Orchestrator, Phase, Stages};
use crate::vault::Vault;
use futures::stream::BoxStream;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

/// Replaces individual parts of an [`Engine`] before it is built.
pub struct EngineBuilder {
    config: EngineConfig,
    transport: Option<Arc<dyn Transport>>,
    extractor: Option<Arc<dyn Extractor>>,
    structurer: Option<Arc<dyn Structurer>>,
    exporter: Option<Arc<dyn Exporter>>,
}

impl EngineBuilder {
    /// HTTP transport used by the router. Default: reqwest with
    /// `request_timeout_secs`.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn structurer(mut self, structurer: Arc<dyn Structurer>) -> Self {
        self.structurer = Some(structurer);
        self
    }

    pub fn exporter(mut self, exporter: Arc<dyn Exporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Build the engine. Inside a Tokio runtime this also starts the vault's
    /// idle watchdog.
    pub fn build(self) -> Result<Engine, ConfigError> {
        let config = self.config;
        let router = Arc::new(match self.transport {
            Some(transport) => Router::new(transport, config.retry),
            None => Router::with_reqwest(
                Duration::from_secs(config.request_timeout_secs),
                config.retry,
            )?,
        });
        let vault = Arc::new(Vault::new(&config.vault));

        let extractor = self.extractor.unwrap_or_else(|| {
            let mut remote = RemoteExtractor::new(Arc::clone(&vault), Arc::clone(&router))
                .with_max_chars(config.max_source_chars);
            if let Some(name) = &config.active_profile {
                remote = remote.with_profile(name.clone());
            }
            Arc::new(remote)
        });
        let structurer = self.structurer.unwrap_or_else(|| {
            Arc::new(RoutedStructurer::new(
                Arc::clone(&vault),
                Arc::clone(&router),
                config.active_profile.clone(),
                config.structuring.clone(),
                config.max_source_chars,
            ))
        });
        let exporter = self
            .exporter
            .unwrap_or_else(|| Arc::new(FileExporter));

        let orchestrator = Orchestrator::new(
            &config,
            Stages {
                extractor,
                structurer,
                exporter,
            },
        );
        let watchdog = match tokio::runtime::Handle::try_current() {
            Ok(_) => vault.spawn_idle_watchdog(),
            Err(_) => None,
        };

        info!(
            workers = config.workers,
            max_attempts = config.retry.max_attempts,
            vault = %vault.path().display(),
            "Engine ready"
        );
        Ok(Engine {
            config,
            vault,
            router,
            orchestrator,
            watchdog,
        })
    }
}

/// Document-to-Markdown job engine.
pub struct Engine {
    config: EngineConfig,
    vault: Arc<Vault>,
    router: Arc<Router>,
    orchestrator: Orchestrator,
    watchdog: Option<JoinHandle<()>>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            transport: None,
            extractor: None,
            structurer: None,
            exporter: None,
        }
    }

    /// Engine with every default stage.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn vault(&self) -> &Arc<Vault> {
        &self.vault
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    // ── Jobs ─────────────────────────────────────────────────────────────

    /// Classify and queue each path. Files that cannot be classified still
    /// get an id; their job is already `Failed`.
    pub async fn enqueue_files<I, P>(&self, paths: I) -> Vec<JobId>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.orchestrator.enqueue_files(paths).await
    }

    /// Start dispatching queued jobs. Idempotent.
    pub fn start_queue(&self) -> bool {
        self.orchestrator.start()
    }

    pub fn cancel_job(&self, id: JobId) -> Result<CancelOutcome, OrchestratorError> {
        self.orchestrator.cancel(id)
    }

    /// Retry a job whose last failure was retryable (or a cancellation).
    pub fn retry_job(&self, id: JobId) -> Result<Phase, OrchestratorError> {
        self.orchestrator.retry(id, false)
    }

    /// Retry regardless of how the job failed.
    pub fn force_retry_job(&self, id: JobId) -> Result<Phase, OrchestratorError> {
        self.orchestrator.retry(id, true)
    }

    pub fn get_job(&self, id: JobId) -> Option<JobRecord> {
        self.orchestrator.get(id)
    }

    pub fn list_jobs(&self) -> Vec<JobRecord> {
        self.orchestrator.list()
    }

    // ── Profiles ─────────────────────────────────────────────────────────

    /// Unlock the vault and return its profiles.
    pub async fn load_profiles(&self, passphrase: &str) -> Result<Vec<ProviderProfile>, CryptoError> {
        self.vault.load(passphrase).await
    }

    /// Replace the vault contents, sealed under `passphrase`.
    pub async fn save_profiles(
        &self,
        passphrase: &str,
        profiles: Vec<ProviderProfile>,
    ) -> Result<(), CryptoError> {
        self.vault.save(passphrase, profiles).await
    }

    /// Replace the profiles of an unlocked vault.
    pub async fn update_profiles(&self, profiles: Vec<ProviderProfile>) -> Result<(), CryptoError> {
        self.vault.update_profiles(profiles).await
    }

    pub async fn lock_vault(&self) {
        self.vault.lock().await
    }

    // ── Progress ─────────────────────────────────────────────────────────

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.orchestrator.progress().subscribe()
    }

    /// Progress events as a stream; lagging subscribers skip dropped events.
    pub fn progress_stream(&self) -> BoxStream<'static, ProgressEvent> {
        self.orchestrator.progress().stream()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(handle) = self.watchdog.take() {
            handle.abort();
        }
    }
}
