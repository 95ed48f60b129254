//! The orchestrator: a dispatcher plus one task per running job.
//!
//! ```text
//!  enqueue ──▶ JobTable (FIFO) ──notify──▶ dispatcher ──permit──▶ run_job
//!                   ▲                                               │
//!                   └────────── transitions + progress events ──────┘
//! ```
//!
//! A job holds one semaphore permit while a phase runs and gives it back for
//! the length of a retry backoff, so `workers` bounds busy jobs, not sleeping
//! ones. Cancellation is honoured between phases and after a failed attempt,
//! never in the middle of one.

use crate::config::{EngineConfig, ProbeConfig, RetryPolicy};
use crate::error::{ErrorKind, OrchestratorError};
use crate::pipeline::{classify, output_path_for, DocumentKind, Exporter, Extractor, Structurer};
use crate::progress::ProgressHub;
use crate::queue::job::{JobId, JobRecord, StageError};
use crate::queue::state::{JobEvent, JobState, Phase};
use crate::queue::table::{CancelOutcome, FailureOutcome, JobTable};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The three host-replaceable stages a job runs through.
#[derive(Clone)]
pub struct Stages {
    pub extractor: Arc<dyn Extractor>,
    pub structurer: Arc<dyn Structurer>,
    pub exporter: Arc<dyn Exporter>,
}

/// Output of one phase, stored on the job before it moves on.
enum Artifact {
    Text(String),
    Markdown(String),
    Exported(PathBuf),
}

struct Inner {
    table: Mutex<JobTable>,
    permits: Arc<Semaphore>,
    wake: Notify,
    policy: RetryPolicy,
    probe: ProbeConfig,
    output_dir: Option<PathBuf>,
    stages: Stages,
}

/// Owns every job of the process and drives them through the pipeline.
pub struct Orchestrator {
    inner: Arc<Inner>,
    hub: ProgressHub,
    started: AtomicBool,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(config: &EngineConfig, stages: Stages) -> Self {
        let hub = ProgressHub::new(config.event_buffer);
        let inner = Inner {
            table: Mutex::new(JobTable::new(config.retry.max_attempts, hub.clone())),
            permits: Arc::new(Semaphore::new(config.workers.max(1))),
            wake: Notify::new(),
            policy: config.retry,
            probe: config.probe,
            output_dir: config.output_dir.clone(),
            stages,
        };
        Self {
            inner: Arc::new(inner),
            hub,
            started: AtomicBool::new(false),
            dispatcher: Mutex::new(None),
        }
    }

    pub fn progress(&self) -> &ProgressHub {
        &self.hub
    }

    /// Classify `path` and add a job for it.
    ///
    /// Never fails: a file that cannot be classified becomes a job that is
    /// born `Failed` with the classification error recorded.
    pub async fn enqueue(&self, path: impl AsRef<Path>) -> JobId {
        let path = path.as_ref().to_path_buf();
        let classified = classify(&path, &self.inner.probe).await;
        let id = self.inner.lock().insert(path, classified);
        self.inner.wake.notify_one();
        id
    }

    /// Enqueue in order; ids come back in the same order.
    pub async fn enqueue_files<I, P>(&self, paths: I) -> Vec<JobId>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut ids = Vec::new();
        for path in paths {
            ids.push(self.enqueue(path).await);
        }
        ids
    }

    /// Start the dispatcher. Returns `false` if it was already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            return false;
        }
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.dispatch_loop().await });
        *self
            .dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handle);
        info!(workers = self.inner.permits.available_permits(), "Queue started");
        true
    }

    /// Cancel now if the job is queued or backing off; otherwise fail it at
    /// the next phase boundary.
    pub fn cancel(&self, id: JobId) -> Result<CancelOutcome, OrchestratorError> {
        self.inner.lock().request_cancel(id)
    }

    /// Re-run a failed job from the phase it failed in.
    ///
    /// Allowed when the last failure was retryable or a cancellation; `force`
    /// overrides that check. The phase's attempt counter starts over.
    pub fn retry(&self, id: JobId, force: bool) -> Result<Phase, OrchestratorError> {
        let (phase, epoch) = {
            let mut table = self.inner.lock();
            let phase = table.manual_retry(id, force)?;
            (phase, table.epoch(id))
        };
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let Ok(permit) = Arc::clone(&inner.permits).acquire_owned().await else {
                return;
            };
            let resumed = inner.lock().resume(id, epoch);
            if let Ok(Some(_)) = resumed {
                inner.run_job(id, permit).await;
            }
        });
        Ok(phase)
    }

    pub fn get(&self, id: JobId) -> Option<JobRecord> {
        self.inner.lock().get(id).cloned()
    }

    /// Snapshots of every job in creation order.
    pub fn list(&self) -> Vec<JobRecord> {
        self.inner.lock().list()
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        let handle = self
            .dispatcher
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, JobTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn dispatch_loop(self: Arc<Self>) {
        loop {
            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                break;
            };
            let next = self.lock().dispatch_next();
            match next {
                Some(id) => {
                    let inner = Arc::clone(&self);
                    tokio::spawn(async move { inner.run_job(id, permit).await });
                }
                None => {
                    drop(permit);
                    self.wake.notified().await;
                }
            }
        }
    }

    /// Drive a `Running` job until it leaves the running states or this
    /// runner is superseded.
    async fn run_job(self: Arc<Self>, id: JobId, mut permit: OwnedSemaphorePermit) {
        // Backoff of the current phase; reset when the phase changes.
        let mut last_delay = Duration::ZERO;
        loop {
            let snapshot = {
                let mut table = self.lock();
                let Some(record) = table.get(id) else { return };
                let JobState::Running(phase) = record.state else { return };
                let snapshot = (phase, record.kind, record.source.clone(), record.trace_id.clone());
                if table.cancel_requested(id) {
                    if let Err(e) = table.cancel_now(id) {
                        debug!(job = %id, "Cancel at boundary rejected: {}", e);
                    }
                    return;
                }
                snapshot
            };
            let (phase, kind, source, trace_id) = snapshot;
            let attempt = self.lock().get(id).map_or(0, |r| r.attempts.get(phase));
            info!(job = %id, trace_id = %trace_id, phase = %phase, attempt, "Phase started");

            let result = match kind {
                Some(kind) => self.run_phase(id, phase, kind, &source, &trace_id).await,
                None => Err(StageError::new(ErrorKind::Unreadable, "Job has no document kind", false)),
            };

            let err = match result {
                Ok(artifact) => {
                    let mut table = self.lock();
                    match artifact {
                        Artifact::Text(text) => table.set_extracted(id, text),
                        Artifact::Markdown(md) => table.set_markdown(id, md),
                        Artifact::Exported(path) => {
                            info!(job = %id, trace_id = %trace_id, output = %path.display(), "Exported");
                            table.set_output(id, path);
                        }
                    }
                    match table.apply(id, JobEvent::PhaseSucceeded, None) {
                        Ok(JobState::Success) => {
                            info!(job = %id, trace_id = %trace_id, "Job succeeded");
                            return;
                        }
                        Ok(_) => {
                            last_delay = Duration::ZERO;
                            continue;
                        }
                        Err(e) => {
                            warn!(job = %id, trace_id = %trace_id, "Could not advance: {}", e);
                            return;
                        }
                    }
                }
                Err(err) => err.into_job_error(Some(phase), &trace_id),
            };

            let decided = {
                let mut table = self.lock();
                let outcome = table.record_failure(id, phase, err);
                // A failed attempt is a phase boundary too.
                if matches!(outcome, Ok(FailureOutcome::Retry { .. })) && table.cancel_requested(id) {
                    if let Err(e) = table.cancel_now(id) {
                        debug!(job = %id, "Cancel after failed attempt rejected: {}", e);
                    }
                    return;
                }
                (outcome, table.epoch(id))
            };
            let (failures, retry_after_ms, epoch) = match decided {
                (Ok(FailureOutcome::Retry { failures, retry_after_ms }), epoch) => {
                    (failures, retry_after_ms, epoch)
                }
                (Ok(FailureOutcome::Failed), _) => {
                    warn!(job = %id, trace_id = %trace_id, phase = %phase, "Job failed");
                    return;
                }
                (Err(e), _) => {
                    warn!(job = %id, trace_id = %trace_id, "Could not record failure: {}", e);
                    return;
                }
            };

            let delay = self.policy.delay_with_hint(failures, retry_after_ms, last_delay);
            last_delay = delay;
            warn!(
                job = %id,
                trace_id = %trace_id,
                phase = %phase,
                attempt = failures,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Phase failed; backing off"
            );
            drop(permit);
            tokio::time::sleep(delay).await;
            permit = match Arc::clone(&self.permits).acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };
            let resumed = self.lock().resume(id, epoch);
            match resumed {
                Ok(Some(_)) => {}
                Ok(None) => {
                    debug!(job = %id, trace_id = %trace_id, "Job changed during backoff; runner exits");
                    return;
                }
                Err(e) => {
                    debug!(job = %id, trace_id = %trace_id, "Backoff not resumed: {}", e);
                    return;
                }
            }
        }
    }

    async fn run_phase(
        &self,
        id: JobId,
        phase: Phase,
        kind: DocumentKind,
        source: &Path,
        trace_id: &str,
    ) -> Result<Artifact, StageError> {
        match phase {
            Phase::Extraction => {
                let text = self
                    .stages
                    .extractor
                    .extract(source, kind, trace_id)
                    .await
                    .map_err(|e| StageError::capability(ErrorKind::Extraction, e))?;
                if text.trim().is_empty() {
                    return Err(StageError::new(
                        ErrorKind::Extraction,
                        "Extractor returned no text",
                        false,
                    ));
                }
                Ok(Artifact::Text(text))
            }
            Phase::Structuring => {
                let text = self.lock().extracted(id).ok_or_else(|| {
                    StageError::new(ErrorKind::Extraction, "No extracted text available", false)
                })?;
                let markdown = self.stages.structurer.structure(&text, kind, trace_id).await?;
                Ok(Artifact::Markdown(markdown))
            }
            Phase::Export => {
                let markdown = self.lock().markdown(id).ok_or_else(|| {
                    StageError::new(ErrorKind::Export, "No Markdown available to export", false)
                })?;
                let destination = output_path_for(source, self.output_dir.as_deref());
                let written = self
                    .stages
                    .exporter
                    .export(&markdown, &destination)
                    .await
                    .map_err(|e| StageError::capability(ErrorKind::Export, e))?;
                Ok(Artifact::Exported(written))
            }
        }
    }
}
