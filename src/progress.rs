//! Progress events for job transitions.
//!
//! Every state change the orchestrator makes is published as a
//! [`ProgressEvent`] on a bounded broadcast channel. A slow subscriber never
//! holds up the queue: once its buffer is full the oldest events are dropped
//! and it sees a lag notice instead.
//!
//! # Example
//!
//! ```rust,no_run
//! use docmark::Engine;
//! use futures::StreamExt;
//!
//! # async fn run(engine: Engine) {
//! let mut events = engine.progress_stream();
//! while let Some(event) = events.next().await {
//!     println!("{} {:?} -> {}", event.job_id, event.old, event.new);
//! }
//! # }
//! ```

use crate::queue::{JobError, JobId, JobState};
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::warn;

/// One job transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    /// `None` when the job was just created.
    pub old: Option<JobState>,
    pub new: JobState,
    /// Set for transitions into `Retrying` and `Failed`.
    pub error: Option<JobError>,
    pub at: DateTime<Utc>,
}

/// Sending half of the progress channel.
#[derive(Debug, Clone)]
pub struct ProgressHub {
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish without waiting. Having no subscribers is not an error.
    pub(crate) fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Subscribe as a stream that skips over dropped events.
    pub fn stream(&self) -> BoxStream<'static, ProgressEvent> {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|item| async move {
            match item {
                Ok(event) => Some(event),
                Err(BroadcastStreamRecvError::Lagged(n)) => {
                    warn!("Progress subscriber lagged; {} events dropped", n);
                    None
                }
            }
        })
        .boxed()
    }
}
