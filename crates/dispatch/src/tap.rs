//! Optional observation hook into the running dispatcher, for demos and tests that
//! want to assert on dispatch decisions without reaching into the registry's locks
//! themselves.
//!
//! Mirrors the donor's `EventTap`: a tap never influences what happens, it only gets
//! told about it, so installing one can never change dispatch behavior.

use crate::core::{JobId, TableIdent};
use crate::effect_impl::JobOutcome;

#[derive(Debug, Clone)]
pub enum TapEvent {
    JobDispatched { job: JobId, table: TableIdent },
    JobCompleted { job: JobId, table: TableIdent, outcome: JobOutcomeKind },
    TableDataDone { table: TableIdent },
    WorkerShutdown { thread: String },
}

/// A cheap, `Clone`-free summary of [`JobOutcome`] for taps that don't need the
/// failure detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcomeKind {
    Succeeded,
    Failed,
}

impl From<&JobOutcome> for JobOutcomeKind {
    fn from(outcome: &JobOutcome) -> Self {
        match outcome {
            JobOutcome::Succeeded => JobOutcomeKind::Succeeded,
            JobOutcome::Failed(_) => JobOutcomeKind::Failed,
        }
    }
}

pub trait DispatchTap: Send + Sync {
    fn observe(&self, event: TapEvent);
}

/// A tap that drops everything it's handed. The default when no caller supplies one.
pub struct NoOpTap;

impl DispatchTap for NoOpTap {
    fn observe(&self, _event: TapEvent) {}
}
