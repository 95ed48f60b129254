//! Job orchestration.
//!
//! * [`state`]  the lifecycle and its transition table
//! * [`job`]    job records and recorded errors
//! * `table`    the locked job table that applies transitions
//! * [`worker`] the [`Orchestrator`] that dispatches and runs jobs

pub mod job;
pub mod state;
mod table;
pub mod worker;

pub use job::{JobError, JobId, JobRecord, PhaseAttempts, StageError};
pub use state::{transition, JobEvent, JobState, Phase};
pub use table::CancelOutcome;
pub use worker::{Orchestrator, Stages};
