//! Domain types shared across the dispatcher: table identity, schema lifecycle state,
//! restore jobs, and the two fixed event enums that flow over the control and job
//! channels.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a table: its target schema plus its source name in the dump.
///
/// This is the key used by [`crate::job::TableRegistry`] and the only thing external
/// collaborators (parser, schema/index executors) need to address a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableIdent {
    pub target_schema: String,
    pub source_name: String,
}

impl TableIdent {
    pub fn new(target_schema: impl Into<String>, source_name: impl Into<String>) -> Self {
        Self {
            target_schema: target_schema.into(),
            source_name: source_name.into(),
        }
    }
}

impl fmt::Display for TableIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target_schema, self.source_name)
    }
}

/// Lifecycle state of a table's (or database's) schema, monotonically non-decreasing
/// for any single table. `NotFound` is only ever observed on a [`crate::job::DatabaseState`]
/// whose schema creation failed; the variant exists on this shared enum because a
/// table's own `schema_state` field and a database's `schema_state` field are the same
/// type in the reference design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SchemaState {
    NotFound,
    NotCreated,
    Creating,
    Created,
    DataDone,
    AllDone,
}

/// What kind of relation a table is. Only `Base` tables carry row data that the
/// dispatcher schedules; `View` and `Sequence` skip straight to being terminal for
/// data once their (trivial) schema is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableKind {
    Base,
    View,
    Sequence,
}

/// Unique id for a single restore job. Exists purely to correlate log lines and test
/// assertions back to a specific dispatch decision; the dispatcher never branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// One unit of data-load work belonging to one table. The `description` is opaque to
/// the dispatcher (it might be a chunk file name, a byte range, whatever the parser
/// produced) — only [`crate::effect_impl::DataWorker`] interprets it.
#[derive(Debug, Clone)]
pub struct RestoreJob {
    pub id: JobId,
    pub table: TableIdent,
    pub description: String,
}

impl RestoreJob {
    pub fn new(table: TableIdent, description: impl Into<String>) -> Self {
        Self {
            id: JobId::new(),
            table,
            description: description.into(),
        }
    }
}

/// Events delivered to the dispatcher's single-consumer control channel.
#[derive(Debug, Clone)]
pub enum ControlEvent {
    /// An idle data worker is asking for the next job.
    RequestDataJob,
    /// Indirection used by [`crate::dispatch::WaitGroup::wake_one`]: the dispatcher
    /// turns this into exactly one `RequestDataJob` so waking happens on the
    /// dispatcher's own thread, atomically with its other state reads.
    WakeDataThread,
    /// The parser has exhausted schema definitions; previously-parked workers may now
    /// find schema-created tables ready.
    FileTypeSchemaEnded,
    /// The parser has exhausted the entire dump.
    FileTypeEnded,
    /// A database's DDL failed; every parked worker gets a chance to notice the
    /// skipped tables and move on rather than waiting for one of them to arrive.
    SchemaFailed,
    /// Stop accepting new requests, drain, and exit.
    Shutdown,
}

/// Events pulled by data workers off the job channel.
#[derive(Debug, Clone)]
pub enum DataEvent {
    DataJob(RestoreJob),
    Shutdown,
}
