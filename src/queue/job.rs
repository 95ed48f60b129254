//! Job records and the error attached to a failed or retrying job.

use crate::error::{CapabilityError, ClassificationError, CryptoError, ErrorKind, ProviderError};
use crate::pipeline::DocumentKind;
use crate::queue::state::{JobState, Phase};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Process-unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Attempts started per phase since the job was created or last retried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseAttempts {
    pub extraction: u32,
    pub structuring: u32,
    pub export: u32,
}

impl PhaseAttempts {
    pub fn get(&self, phase: Phase) -> u32 {
        match phase {
            Phase::Extraction => self.extraction,
            Phase::Structuring => self.structuring,
            Phase::Export => self.export,
        }
    }

    fn slot(&mut self, phase: Phase) -> &mut u32 {
        match phase {
            Phase::Extraction => &mut self.extraction,
            Phase::Structuring => &mut self.structuring,
            Phase::Export => &mut self.export,
        }
    }

    pub(crate) fn bump(&mut self, phase: Phase) -> u32 {
        let slot = self.slot(phase);
        *slot += 1;
        *slot
    }

    pub(crate) fn reset(&mut self, phase: Phase) {
        *self.slot(phase) = 0;
    }
}

/// Error recorded on a job. Carries the trace id so a front end can quote it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
    /// Phase the failure happened in; `None` for classification failures.
    pub phase: Option<Phase>,
    pub trace_id: String,
    pub retryable: bool,
    /// Server-requested delay before the next attempt.
    #[serde(skip)]
    pub retry_after_ms: Option<u64>,
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.phase {
            Some(p) => write!(f, "[{}] {} failed ({}): {}", self.trace_id, p, self.kind, self.message),
            None => write!(f, "[{}] {}: {}", self.trace_id, self.kind, self.message),
        }
    }
}

/// Phase-agnostic failure produced by a pipeline stage.
///
/// The orchestrator turns it into a [`JobError`] by adding phase and trace id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    pub retry_after_ms: Option<u64>,
}

impl StageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
            retry_after_ms: None,
        }
    }

    /// Host capability failure during `kind` (extraction or export).
    pub fn capability(kind: ErrorKind, e: CapabilityError) -> Self {
        Self::new(kind, e.message, e.retryable)
    }

    pub(crate) fn into_job_error(self, phase: Option<Phase>, trace_id: &str) -> JobError {
        JobError {
            kind: self.kind,
            message: self.message,
            phase,
            trace_id: trace_id.to_string(),
            retryable: self.retryable,
            retry_after_ms: self.retry_after_ms,
        }
    }
}

impl From<ProviderError> for StageError {
    fn from(e: ProviderError) -> Self {
        Self {
            kind: e.kind(),
            retryable: e.is_retryable(),
            retry_after_ms: e.retry_after_ms(),
            message: e.to_string(),
        }
    }
}

impl From<CryptoError> for StageError {
    fn from(e: CryptoError) -> Self {
        Self::new(e.kind(), e.to_string(), false)
    }
}

impl From<ClassificationError> for StageError {
    fn from(e: ClassificationError) -> Self {
        Self::new(e.kind(), e.to_string(), false)
    }
}

/// Snapshot of one job as seen by front ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub source: PathBuf,
    /// `None` when classification failed.
    pub kind: Option<DocumentKind>,
    pub state: JobState,
    /// Phase last entered; stays set after the job finishes.
    pub phase: Option<Phase>,
    pub attempts: PhaseAttempts,
    /// Retries taken in the current phase.
    pub retry_count: u32,
    pub last_error: Option<JobError>,
    pub trace_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub output_path: Option<PathBuf>,
}

impl JobRecord {
    pub(crate) fn new(id: JobId, source: PathBuf, kind: Option<DocumentKind>) -> Self {
        let now = Utc::now();
        Self {
            id,
            source,
            kind,
            state: JobState::Queued,
            phase: None,
            attempts: PhaseAttempts::default(),
            retry_count: 0,
            last_error: None,
            trace_id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            output_path: None,
        }
    }
}
