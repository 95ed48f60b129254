//! Job lifecycle: states, phases, events and the transition table.
//!
//! [`transition`] is a pure function. Everything that mutates a job goes
//! through it, so an event missing from the table can never change a job.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline phase a running job is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Extraction,
    Structuring,
    Export,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Extraction, Phase::Structuring, Phase::Export];

    /// Phase that follows this one, `None` after [`Phase::Export`].
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Extraction => Some(Phase::Structuring),
            Phase::Structuring => Some(Phase::Export),
            Phase::Export => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Extraction => "extraction",
            Phase::Structuring => "structuring",
            Phase::Export => "export",
        })
    }
}

/// Declared job states. There are no others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "phase", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running(Phase),
    Retrying(Phase),
    Success,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Success | JobState::Failed)
    }

    pub fn phase(self) -> Option<Phase> {
        match self {
            JobState::Running(p) | JobState::Retrying(p) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Queued => f.write_str("queued"),
            JobState::Running(p) => write!(f, "running({p})"),
            JobState::Retrying(p) => write!(f, "retrying({p})"),
            JobState::Success => f.write_str("success"),
            JobState::Failed => f.write_str("failed"),
        }
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEvent {
    /// A worker picked the job off the queue.
    Dispatch,
    /// The running phase finished.
    PhaseSucceeded,
    /// The running phase failed with a retryable error and has attempts left.
    RetryableFailure,
    /// The backoff delay of a retrying job has passed.
    BackoffElapsed,
    /// Fatal error, or a retryable one with no attempts left.
    Fail,
    Cancel,
    /// User-initiated retry of the phase a failed job stopped in.
    ManualRetry(Phase),
}

impl fmt::Display for JobEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobEvent::Dispatch => f.write_str("dispatch"),
            JobEvent::PhaseSucceeded => f.write_str("phase succeeded"),
            JobEvent::RetryableFailure => f.write_str("retryable failure"),
            JobEvent::BackoffElapsed => f.write_str("backoff elapsed"),
            JobEvent::Fail => f.write_str("fail"),
            JobEvent::Cancel => f.write_str("cancel"),
            JobEvent::ManualRetry(p) => write!(f, "retry {p}"),
        }
    }
}

/// Apply `event` to `from`. `None` means the pair is not in the table.
///
/// `Running(p) + Cancel` is accepted here; the orchestrator only delivers it
/// at a phase boundary.
pub fn transition(from: JobState, event: JobEvent) -> Option<JobState> {
    use JobEvent as E;
    use JobState as S;

    match (from, event) {
        (S::Queued, E::Dispatch) => Some(S::Running(Phase::Extraction)),
        (S::Running(p), E::PhaseSucceeded) => Some(match p.next() {
            Some(next) => S::Running(next),
            None => S::Success,
        }),
        (S::Running(p), E::RetryableFailure) => Some(S::Retrying(p)),
        (S::Retrying(p), E::BackoffElapsed) => Some(S::Running(p)),
        (S::Running(_), E::Fail) => Some(S::Failed),
        (S::Queued | S::Running(_) | S::Retrying(_), E::Cancel) => Some(S::Failed),
        (S::Failed, E::ManualRetry(p)) => Some(S::Retrying(p)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_states() -> Vec<JobState> {
        let mut v = vec![JobState::Queued, JobState::Success, JobState::Failed];
        for p in Phase::ALL {
            v.push(JobState::Running(p));
            v.push(JobState::Retrying(p));
        }
        v
    }

    fn all_events() -> Vec<JobEvent> {
        let mut v = vec![
            JobEvent::Dispatch,
            JobEvent::PhaseSucceeded,
            JobEvent::RetryableFailure,
            JobEvent::BackoffElapsed,
            JobEvent::Fail,
            JobEvent::Cancel,
        ];
        v.extend(Phase::ALL.map(JobEvent::ManualRetry));
        v
    }

    #[test]
    fn happy_path_walks_every_phase() {
        let mut s = JobState::Queued;
        s = transition(s, JobEvent::Dispatch).unwrap();
        assert_eq!(s, JobState::Running(Phase::Extraction));
        s = transition(s, JobEvent::PhaseSucceeded).unwrap();
        assert_eq!(s, JobState::Running(Phase::Structuring));
        s = transition(s, JobEvent::PhaseSucceeded).unwrap();
        assert_eq!(s, JobState::Running(Phase::Export));
        s = transition(s, JobEvent::PhaseSucceeded).unwrap();
        assert_eq!(s, JobState::Success);
    }

    #[test]
    fn retry_loop_stays_in_phase() {
        let s = JobState::Running(Phase::Structuring);
        let s = transition(s, JobEvent::RetryableFailure).unwrap();
        assert_eq!(s, JobState::Retrying(Phase::Structuring));
        let s = transition(s, JobEvent::BackoffElapsed).unwrap();
        assert_eq!(s, JobState::Running(Phase::Structuring));
    }

    #[test]
    fn terminal_states_only_accept_manual_retry_from_failed() {
        for event in all_events() {
            assert_eq!(transition(JobState::Success, event), None, "{event}");
            let from_failed = transition(JobState::Failed, event);
            match event {
                JobEvent::ManualRetry(p) => assert_eq!(from_failed, Some(JobState::Retrying(p))),
                _ => assert_eq!(from_failed, None, "{event}"),
            }
        }
    }

    #[test]
    fn every_result_is_a_declared_state() {
        let declared = all_states();
        let mut accepted = 0;
        for from in all_states() {
            for event in all_events() {
                if let Some(to) = transition(from, event) {
                    assert!(declared.contains(&to));
                    accepted += 1;
                }
            }
        }
        // 1 dispatch, 3 phase successes, 3 retryable, 3 backoff, 3 fail,
        // 7 cancels, 3 manual retries.
        assert_eq!(accepted, 23);
    }

    #[test]
    fn queued_cannot_skip_dispatch() {
        assert_eq!(transition(JobState::Queued, JobEvent::PhaseSucceeded), None);
        assert_eq!(transition(JobState::Queued, JobEvent::Fail), None);
        assert_eq!(transition(JobState::Retrying(Phase::Export), JobEvent::PhaseSucceeded), None);
    }

    #[test]
    fn state_serialises_with_phase() {
        let json = serde_json::to_string(&JobState::Retrying(Phase::Structuring)).unwrap();
        assert_eq!(json, r#"{"state":"retrying","phase":"structuring"}"#);
        let json = serde_json::to_string(&JobState::Queued).unwrap();
        assert_eq!(json, r#"{"state":"queued"}"#);
    }
}
