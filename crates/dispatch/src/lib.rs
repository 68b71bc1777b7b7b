//! # loader-dispatch-core
//!
//! The coordination layer of a parallel logical-dump restore: a single dispatcher
//! thread and a pool of data-worker threads cooperating over a shared table registry.
//!
//! ## Core concepts
//!
//! - A [`job::TableRegistry`] holds every table the parser has seen, each carrying a
//!   [`core::SchemaState`] that only ever moves forward: `NotCreated` → `Creating` →
//!   `Created` → `DataDone` → `AllDone` (or `NotFound` if its database's DDL failed).
//! - [`machine::is_ready`] is the one place "can this table dispatch a job right now"
//!   is decided; both the ready-queue fast path and the fallback scan in
//!   [`dispatch`] call it, so they can't silently disagree.
//! - [`engine::DispatchEngine`] spawns the threads; [`engine::EngineHandle`] is what a
//!   parser (or schema/index executor) actually calls to drive a restore.
//!
//! ## Architecture
//!
//! ```text
//! parser ──add_job/mark_schema_created──► EngineHandle
//!                                              │ ControlEvent
//!                                              ▼
//!                                     dispatcher thread
//!                                    (TableRegistry, ReadyQueue, WaitGroup)
//!                                              │ DataEvent::DataJob
//!                                              ▼
//!                                    data-worker thread pool ──► DataWorker::execute
//!                                              │ on completion
//!                                              ▼
//!                                  IndexExecutor::enqueue_indexes_for
//! ```
//!
//! ## Key invariants
//!
//! 1. `SchemaState` only moves forward for any one table.
//! 2. A table dispatches at most `max_parallel` jobs concurrently.
//! 3. The registry lock is only ever held to clone a table snapshot; no table lock is
//!    acquired while it's held, and no two table locks are ever held at once.
//! 4. The data phase ends only once every table is data-terminal and every worker
//!    thread is idle — never on a fixed timeout or job count.
//!
//! ## What this is not
//!
//! This crate does not execute restore jobs, run DDL, or build indexes itself — those
//! are the caller's [`effect_impl::DataWorker`] and [`effect_impl::IndexExecutor`]
//! implementations. It does not parse a dump file, and it does not open a database
//! connection.

mod bus;
mod config;
mod core;
mod dispatch;
mod effect_impl;
mod engine;
mod error;
mod machine;
mod request;
mod runtime;
mod tap;

/// Table/database state tracking. Public because external `SchemaExecutor`
/// implementations construct [`job::DatabaseState`] directly.
pub mod job;

/// Debug-only dispatch audit ring buffer.
#[cfg(debug_assertions)]
pub mod audit;

#[cfg(test)]
mod stress_tests;

pub use crate::config::{DispatcherConfig, DispatcherConfigBuilder};
pub use crate::core::{ControlEvent, DataEvent, JobId, RestoreJob, SchemaState, TableIdent, TableKind};
pub use crate::dispatch::{DispatchStats, DispatchStatsSnapshot, ReadyQueue, WaitGroup};
pub use crate::effect_impl::{DataWorker, IndexExecutor, JobOutcome};
pub use crate::engine::{DispatchEngine, DispatchEngineBuilder, EngineHandle, InflightTracker};
pub use crate::error::DispatchError;
pub use crate::job::{DatabaseState, TableRegistry, TableState};
pub use crate::machine::{is_ready, is_terminal_for_data, TableSnapshot};
pub use crate::request::{query_status, RestoreStatus};
pub use crate::tap::{DispatchTap, JobOutcomeKind, NoOpTap, TapEvent};
