//! Interfaces for the external collaborators the dispatcher hands work off to.
//!
//! These mirror the donor's `Effect` trait — "effects are stateless, commands carry
//! all needed data, execute and return an outcome" — but unlike a donor `Effect` they
//! are synchronous: every blocking point in this system is a mutex or a channel
//! (spec §5), never an async suspension point.

use crate::core::{RestoreJob, TableIdent};

/// What happened when a [`DataWorker`] ran a job. The dispatcher does not interpret
/// this — §7 is explicit that `on_job_complete` runs on both success and terminal
/// failure — but it is threaded through for logging and for the demo/test harness to
/// assert on.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Succeeded,
    Failed(String),
}

/// Executes one restore job against the target database. Out of scope per spec §1
/// ("execution of a single restore job against the target database") — this trait is
/// only the seam the dispatcher's worker threads call through.
pub trait DataWorker: Send + Sync {
    fn execute(&self, job: &RestoreJob) -> JobOutcome;
}

/// The index-build phase, invoked by the dispatcher once a table (or the whole
/// restore) has no more data work coming.
pub trait IndexExecutor: Send + Sync {
    /// Non-blocking handoff: queue index builds for one table that just reached
    /// `DataDone`.
    fn enqueue_indexes_for(&self, table: &TableIdent);

    /// Called exactly once, after the dispatcher loop exits and every data worker has
    /// joined.
    fn start_optimize_indexes_all_tables(&self);
}
