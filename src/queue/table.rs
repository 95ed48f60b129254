//! The job table: records, FIFO order, stage artifacts and cancel flags.
//!
//! Lives behind one mutex in the orchestrator. Every mutation goes through
//! [`JobTable::apply`], which validates against the transition table,
//! updates bookkeeping and publishes the progress event before returning, so
//! a job's events reach subscribers in transition order.

use crate::error::{ClassificationError, ErrorKind, OrchestratorError};
use crate::pipeline::DocumentKind;
use crate::progress::{ProgressEvent, ProgressHub};
use crate::queue::job::{JobError, JobId, JobRecord, StageError};
use crate::queue::state::{transition, JobEvent, JobState, Phase};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use tracing::{debug, info, warn};

struct JobEntry {
    record: JobRecord,
    cancel_requested: bool,
    /// Bumped whenever the job is cancelled or manually retried, so a runner
    /// waking from backoff can tell the job moved on without it.
    epoch: u64,
    extracted: Option<String>,
    markdown: Option<String>,
}

/// What [`JobTable::record_failure`] decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureOutcome {
    /// Job is `Retrying`; `failures` attempts of the phase have failed so far.
    Retry { failures: u32, retry_after_ms: Option<u64> },
    Failed,
}

/// What [`JobTable::request_cancel`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was not running a phase and is now `Failed`.
    Cancelled,
    /// A phase is running; the job fails at the next phase boundary.
    Deferred,
}

pub(crate) struct JobTable {
    next_id: u64,
    jobs: HashMap<JobId, JobEntry>,
    order: Vec<JobId>,
    pending: VecDeque<JobId>,
    max_attempts: u32,
    hub: ProgressHub,
}

impl JobTable {
    pub fn new(max_attempts: u32, hub: ProgressHub) -> Self {
        Self {
            next_id: 1,
            jobs: HashMap::new(),
            order: Vec::new(),
            pending: VecDeque::new(),
            max_attempts: max_attempts.max(1),
            hub,
        }
    }

    /// Create a job from a classification result.
    ///
    /// A failed classification yields a job that is born `Failed`.
    pub fn insert(
        &mut self,
        source: PathBuf,
        classified: Result<DocumentKind, ClassificationError>,
    ) -> JobId {
        let id = JobId(self.next_id);
        self.next_id += 1;

        let (kind, failure) = match classified {
            Ok(kind) => (Some(kind), None),
            Err(e) => (None, Some(e)),
        };
        let mut record = JobRecord::new(id, source, kind);

        if let Some(e) = failure {
            let err = StageError::from(e).into_job_error(None, &record.trace_id);
            warn!(job = %id, trace_id = %record.trace_id, "Rejected at enqueue: {}", err.message);
            record.state = JobState::Failed;
            record.last_error = Some(err);
        } else {
            info!(job = %id, trace_id = %record.trace_id, kind = ?kind, "Queued {}", record.source.display());
            self.pending.push_back(id);
        }

        self.hub.emit(ProgressEvent {
            job_id: id,
            old: None,
            new: record.state,
            error: record.last_error.clone(),
            at: record.created_at,
        });
        self.order.push(id);
        self.jobs.insert(
            id,
            JobEntry {
                record,
                cancel_requested: false,
                epoch: 0,
                extracted: None,
                markdown: None,
            },
        );
        id
    }

    /// Dispatch the oldest still-queued job.
    pub fn dispatch_next(&mut self) -> Option<JobId> {
        while let Some(id) = self.pending.pop_front() {
            let queued = self
                .jobs
                .get(&id)
                .is_some_and(|e| e.record.state == JobState::Queued);
            if queued && self.apply(id, JobEvent::Dispatch, None).is_ok() {
                return Some(id);
            }
        }
        None
    }

    /// Apply one event. On `InvalidTransition` the job is left untouched.
    pub fn apply(
        &mut self,
        id: JobId,
        event: JobEvent,
        error: Option<JobError>,
    ) -> Result<JobState, OrchestratorError> {
        let entry = self
            .jobs
            .get_mut(&id)
            .ok_or(OrchestratorError::UnknownJob(id))?;
        let old = entry.record.state;
        let new = transition(old, event).ok_or(OrchestratorError::InvalidTransition {
            job: id,
            from: old,
            event,
        })?;

        if matches!(event, JobEvent::Cancel | JobEvent::ManualRetry(_)) {
            entry.epoch += 1;
        }
        let record = &mut entry.record;
        match (event, new) {
            (JobEvent::Dispatch | JobEvent::PhaseSucceeded, JobState::Running(p)) => {
                record.attempts.bump(p);
                record.retry_count = 0;
                record.phase = Some(p);
            }
            (JobEvent::BackoffElapsed, JobState::Running(p)) => {
                record.attempts.bump(p);
            }
            (JobEvent::RetryableFailure, JobState::Retrying(_)) => {
                record.retry_count += 1;
                record.last_error = error.clone();
            }
            (JobEvent::ManualRetry(p), JobState::Retrying(_)) => {
                record.attempts.reset(p);
                record.retry_count = 0;
                record.phase = Some(p);
                record.last_error = None;
            }
            (_, JobState::Failed) => {
                record.last_error = error.clone();
                entry.cancel_requested = false;
            }
            (_, JobState::Success) => {
                record.last_error = None;
                entry.extracted = None;
            }
            _ => {}
        }
        record.state = new;
        record.updated_at = Utc::now();

        debug!(job = %id, trace_id = %record.trace_id, "{} --{}--> {}", old, event, new);
        self.hub.emit(ProgressEvent {
            job_id: id,
            old: Some(old),
            new,
            error,
            at: record.updated_at,
        });
        Ok(new)
    }

    /// Route a phase failure to `Retrying` or `Failed` according to the
    /// attempt budget.
    pub fn record_failure(
        &mut self,
        id: JobId,
        phase: Phase,
        mut err: JobError,
    ) -> Result<FailureOutcome, OrchestratorError> {
        let attempts = self
            .jobs
            .get(&id)
            .ok_or(OrchestratorError::UnknownJob(id))?
            .record
            .attempts
            .get(phase);

        if err.retryable && attempts < self.max_attempts {
            let retry_after_ms = err.retry_after_ms;
            self.apply(id, JobEvent::RetryableFailure, Some(err))?;
            return Ok(FailureOutcome::Retry {
                failures: attempts,
                retry_after_ms,
            });
        }

        if err.retryable {
            let exhausted = OrchestratorError::RetriesExhausted {
                phase,
                attempts,
                last: err.kind,
            };
            err.message = format!("{exhausted}: {}", err.message);
        }
        self.apply(id, JobEvent::Fail, Some(err))?;
        Ok(FailureOutcome::Failed)
    }

    /// Cancel immediately when no phase is running, otherwise flag the job.
    pub fn request_cancel(&mut self, id: JobId) -> Result<CancelOutcome, OrchestratorError> {
        let entry = self
            .jobs
            .get_mut(&id)
            .ok_or(OrchestratorError::UnknownJob(id))?;
        let state = entry.record.state;
        match state {
            JobState::Running(_) => {
                entry.cancel_requested = true;
                info!(job = %id, trace_id = %entry.record.trace_id, "Cancel requested; waiting for phase boundary");
                Ok(CancelOutcome::Deferred)
            }
            JobState::Queued | JobState::Retrying(_) => {
                self.pending.retain(|queued| *queued != id);
                self.cancel_now(id)?;
                Ok(CancelOutcome::Cancelled)
            }
            from => Err(OrchestratorError::InvalidTransition {
                job: id,
                from,
                event: JobEvent::Cancel,
            }),
        }
    }

    /// Fail the job with a `Cancelled` error.
    pub fn cancel_now(&mut self, id: JobId) -> Result<JobState, OrchestratorError> {
        let entry = self.jobs.get(&id).ok_or(OrchestratorError::UnknownJob(id))?;
        let phase = entry.record.state.phase().unwrap_or(Phase::Extraction);
        let err = StageError::new(ErrorKind::Cancelled, "Cancelled by user", false)
            .into_job_error(Some(phase), &entry.record.trace_id);
        info!(job = %id, trace_id = %entry.record.trace_id, phase = %phase, "Job cancelled");
        self.apply(id, JobEvent::Cancel, Some(err))
    }

    pub fn epoch(&self, id: JobId) -> u64 {
        self.jobs.get(&id).map_or(0, |e| e.epoch)
    }

    /// End a backoff started at `epoch`. `None` when the job was cancelled
    /// or retried in the meantime and belongs to another runner.
    pub fn resume(&mut self, id: JobId, epoch: u64) -> Result<Option<JobState>, OrchestratorError> {
        if self.epoch(id) != epoch {
            return Ok(None);
        }
        self.apply(id, JobEvent::BackoffElapsed, None).map(Some)
    }

    pub fn cancel_requested(&self, id: JobId) -> bool {
        self.jobs.get(&id).is_some_and(|e| e.cancel_requested)
    }

    /// Move a failed job back to `Retrying` in the phase it failed in.
    pub fn manual_retry(&mut self, id: JobId, force: bool) -> Result<Phase, OrchestratorError> {
        let entry = self.jobs.get(&id).ok_or(OrchestratorError::UnknownJob(id))?;
        let record = &entry.record;
        let failure = match (&record.state, &record.last_error) {
            (JobState::Failed, Some(err)) => err,
            (from, _) => {
                return Err(OrchestratorError::InvalidTransition {
                    job: id,
                    from: *from,
                    event: JobEvent::ManualRetry(record.phase.unwrap_or(Phase::Extraction)),
                })
            }
        };
        let Some(phase) = failure.phase else {
            // Classification failures have no phase to go back to.
            return Err(OrchestratorError::InvalidTransition {
                job: id,
                from: JobState::Failed,
                event: JobEvent::ManualRetry(Phase::Extraction),
            });
        };
        let allowed = force || failure.retryable || failure.kind == ErrorKind::Cancelled;
        if !allowed {
            return Err(OrchestratorError::NotRetryable {
                job: id,
                kind: failure.kind,
            });
        }
        info!(job = %id, trace_id = %record.trace_id, phase = %phase, force, "Manual retry");
        self.apply(id, JobEvent::ManualRetry(phase), None)?;
        Ok(phase)
    }

    pub fn get(&self, id: JobId) -> Option<&JobRecord> {
        self.jobs.get(&id).map(|e| &e.record)
    }

    /// Snapshots in creation order.
    pub fn list(&self) -> Vec<JobRecord> {
        self.order
            .iter()
            .filter_map(|id| self.jobs.get(id))
            .map(|e| e.record.clone())
            .collect()
    }

    pub fn set_extracted(&mut self, id: JobId, text: String) {
        if let Some(e) = self.jobs.get_mut(&id) {
            e.extracted = Some(text);
        }
    }

    pub fn extracted(&self, id: JobId) -> Option<String> {
        self.jobs.get(&id).and_then(|e| e.extracted.clone())
    }

    pub fn set_markdown(&mut self, id: JobId, markdown: String) {
        if let Some(e) = self.jobs.get_mut(&id) {
            e.markdown = Some(markdown);
        }
    }

    pub fn markdown(&self, id: JobId) -> Option<String> {
        self.jobs.get(&id).and_then(|e| e.markdown.clone())
    }

    pub fn set_output(&mut self, id: JobId, path: PathBuf) {
        if let Some(e) = self.jobs.get_mut(&id) {
            e.record.output_path = Some(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(max_attempts: u32) -> (JobTable, tokio::sync::broadcast::Receiver<ProgressEvent>) {
        let hub = ProgressHub::new(64);
        let rx = hub.subscribe();
        (JobTable::new(max_attempts, hub), rx)
    }

    fn queued(t: &mut JobTable) -> JobId {
        t.insert(PathBuf::from("doc.pdf"), Ok(DocumentKind::Pdf))
    }

    fn transient(t: &JobTable, id: JobId) -> JobError {
        StageError::new(ErrorKind::RateLimited, "429", true)
            .into_job_error(Some(Phase::Structuring), &t.get(id).unwrap().trace_id)
    }

    fn drive_to_structuring(t: &mut JobTable) -> JobId {
        let id = queued(t);
        assert_eq!(t.dispatch_next(), Some(id));
        t.apply(id, JobEvent::PhaseSucceeded, None).unwrap();
        id
    }

    #[test]
    fn classification_failure_is_born_failed() {
        let (mut t, mut rx) = table(3);
        let id = t.insert(
            PathBuf::from("notes.txt"),
            Err(ClassificationError::UnsupportedKind {
                path: PathBuf::from("notes.txt"),
            }),
        );
        let rec = t.get(id).unwrap();
        assert_eq!(rec.state, JobState::Failed);
        assert_eq!(rec.kind, None);
        assert_eq!(rec.last_error.as_ref().unwrap().kind, ErrorKind::UnsupportedKind);
        assert!(t.dispatch_next().is_none());

        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.old, None);
        assert_eq!(ev.new, JobState::Failed);
    }

    #[test]
    fn dispatch_is_fifo() {
        let (mut t, _rx) = table(3);
        let a = queued(&mut t);
        let b = queued(&mut t);
        let c = queued(&mut t);
        assert_eq!(t.dispatch_next(), Some(a));
        assert_eq!(t.dispatch_next(), Some(b));
        assert_eq!(t.dispatch_next(), Some(c));
        assert_eq!(t.dispatch_next(), None);
    }

    #[test]
    fn invalid_transition_leaves_job_unchanged() {
        let (mut t, _rx) = table(3);
        let id = queued(&mut t);
        let before = t.get(id).unwrap().clone();
        let err = t.apply(id, JobEvent::PhaseSucceeded, None).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTransition { from: JobState::Queued, .. }));
        assert_eq!(t.get(id).unwrap(), &before);
    }

    #[test]
    fn retry_budget_is_enforced() {
        let (mut t, _rx) = table(3);
        let id = drive_to_structuring(&mut t);

        for expected_failures in 1..=2 {
            let err = transient(&t, id);
            let outcome = t.record_failure(id, Phase::Structuring, err).unwrap();
            assert_eq!(
                outcome,
                FailureOutcome::Retry {
                    failures: expected_failures,
                    retry_after_ms: None
                }
            );
            t.apply(id, JobEvent::BackoffElapsed, None).unwrap();
        }
        assert_eq!(t.get(id).unwrap().attempts.structuring, 3);
        assert_eq!(t.get(id).unwrap().retry_count, 2);

        let err = transient(&t, id);
        assert_eq!(
            t.record_failure(id, Phase::Structuring, err).unwrap(),
            FailureOutcome::Failed
        );
        let rec = t.get(id).unwrap();
        assert_eq!(rec.state, JobState::Failed);
        assert!(rec.retry_count <= 3);
        let last = rec.last_error.as_ref().unwrap();
        assert_eq!(last.kind, ErrorKind::RateLimited);
        assert!(last.message.contains("3 attempts"), "{}", last.message);
    }

    #[test]
    fn fatal_failure_skips_retrying() {
        let (mut t, _rx) = table(3);
        let id = drive_to_structuring(&mut t);
        let err = StageError::new(ErrorKind::AuthFailure, "401", false)
            .into_job_error(Some(Phase::Structuring), "t");
        assert_eq!(
            t.record_failure(id, Phase::Structuring, err).unwrap(),
            FailureOutcome::Failed
        );
        assert_eq!(t.get(id).unwrap().attempts.structuring, 1);
    }

    #[test]
    fn cancel_queued_is_immediate_and_running_is_deferred() {
        let (mut t, _rx) = table(3);
        let running = queued(&mut t);
        let waiting = queued(&mut t);
        t.dispatch_next();

        assert_eq!(t.request_cancel(waiting).unwrap(), CancelOutcome::Cancelled);
        assert_eq!(t.get(waiting).unwrap().state, JobState::Failed);
        assert_eq!(t.dispatch_next(), None);

        assert_eq!(t.request_cancel(running).unwrap(), CancelOutcome::Deferred);
        assert!(t.cancel_requested(running));
        assert_eq!(t.get(running).unwrap().state, JobState::Running(Phase::Extraction));

        t.cancel_now(running).unwrap();
        let rec = t.get(running).unwrap();
        assert_eq!(rec.state, JobState::Failed);
        assert_eq!(rec.last_error.as_ref().unwrap().kind, ErrorKind::Cancelled);
        assert!(!t.cancel_requested(running));

        assert!(matches!(
            t.request_cancel(running),
            Err(OrchestratorError::InvalidTransition { from: JobState::Failed, .. })
        ));
    }

    #[test]
    fn manual_retry_resets_phase_counter() {
        let (mut t, _rx) = table(1);
        let id = drive_to_structuring(&mut t);
        let err = transient(&t, id);
        t.record_failure(id, Phase::Structuring, err).unwrap();
        assert_eq!(t.get(id).unwrap().state, JobState::Failed);

        assert_eq!(t.manual_retry(id, false).unwrap(), Phase::Structuring);
        let rec = t.get(id).unwrap();
        assert_eq!(rec.state, JobState::Retrying(Phase::Structuring));
        assert_eq!(rec.attempts.structuring, 0);
        assert_eq!(rec.attempts.extraction, 1);
        assert!(rec.last_error.is_none());
    }

    #[test]
    fn non_retryable_failure_needs_force() {
        let (mut t, _rx) = table(3);
        let id = drive_to_structuring(&mut t);
        let err = StageError::new(ErrorKind::BadRequest, "400", false)
            .into_job_error(Some(Phase::Structuring), "t");
        t.record_failure(id, Phase::Structuring, err).unwrap();

        assert!(matches!(
            t.manual_retry(id, false),
            Err(OrchestratorError::NotRetryable { kind: ErrorKind::BadRequest, .. })
        ));
        assert_eq!(t.manual_retry(id, true).unwrap(), Phase::Structuring);
    }

    #[test]
    fn cannot_retry_classification_failure_or_live_job() {
        let (mut t, _rx) = table(3);
        let bad = t.insert(
            PathBuf::from("x.pdf"),
            Err(ClassificationError::Unreadable {
                path: PathBuf::from("x.pdf"),
                detail: "missing".into(),
            }),
        );
        assert!(matches!(
            t.manual_retry(bad, true),
            Err(OrchestratorError::InvalidTransition { .. })
        ));
        let live = queued(&mut t);
        assert!(matches!(
            t.manual_retry(live, true),
            Err(OrchestratorError::InvalidTransition { from: JobState::Queued, .. })
        ));
    }

    #[test]
    fn events_follow_transition_order() {
        let (mut t, mut rx) = table(3);
        let id = drive_to_structuring(&mut t);
        t.apply(id, JobEvent::PhaseSucceeded, None).unwrap();
        t.apply(id, JobEvent::PhaseSucceeded, None).unwrap();

        let mut seen = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            assert_eq!(ev.job_id, id);
            seen.push(ev.new);
        }
        assert_eq!(
            seen,
            vec![
                JobState::Queued,
                JobState::Running(Phase::Extraction),
                JobState::Running(Phase::Structuring),
                JobState::Running(Phase::Export),
                JobState::Success,
            ]
        );
    }

    #[test]
    fn unknown_job_is_reported() {
        let (mut t, _rx) = table(3);
        assert_eq!(
            t.request_cancel(JobId(99)).unwrap_err(),
            OrchestratorError::UnknownJob(JobId(99))
        );
    }

    #[test]
    fn stale_backoff_does_not_resume() {
        let (mut t, _rx) = table(3);
        let id = drive_to_structuring(&mut t);
        let err = transient(&t, id);
        t.record_failure(id, Phase::Structuring, err).unwrap();
        let epoch = t.epoch(id);

        t.request_cancel(id).unwrap();
        t.manual_retry(id, false).unwrap();
        assert_eq!(t.resume(id, epoch).unwrap(), None);
        assert_eq!(t.get(id).unwrap().state, JobState::Retrying(Phase::Structuring));

        let current = t.epoch(id);
        assert_eq!(
            t.resume(id, current).unwrap(),
            Some(JobState::Running(Phase::Structuring))
        );
    }
}
