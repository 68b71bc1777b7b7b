//! Table registry: the catalog of every table the parser has seen, plus the mutable,
//! lock-guarded state each table carries through its schema → data → index lifecycle.
//!
//! This is the "policy-light" layer in the donor's sense: it knows how to store and
//! mutate table state correctly under concurrent access, but it has no opinion about
//! *when* a table should be dispatched — that policy lives in [`crate::machine`] and
//! [`crate::dispatch`].

use crate::core::{RestoreJob, SchemaState, TableIdent, TableKind};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A database's own schema lifecycle. Only ever reaches [`SchemaState::NotFound`] or
/// [`SchemaState::Created`] in practice: a database is a container, not something a
/// worker builds indexes for.
#[derive(Debug)]
pub struct DatabaseState {
    pub name: String,
    schema_state: Mutex<SchemaState>,
}

impl DatabaseState {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            schema_state: Mutex::new(SchemaState::Created),
        })
    }

    pub fn schema_state(&self) -> SchemaState {
        *self.schema_state.lock()
    }

    /// Called by the (external) `SchemaExecutor` when this database's DDL failed.
    /// Every table in it becomes permanently unreachable for data load.
    pub fn mark_not_found(&self) {
        *self.schema_state.lock() = SchemaState::NotFound;
        tracing::debug!(database = %self.name, "database schema creation failed, marking NOT_FOUND");
    }
}

/// Mutable, lock-guarded fields of a table. See crate-level invariants in
/// [`crate::job::TableState`]'s doc comment for what must hold whenever this lock is
/// not held.
pub(crate) struct TableInner {
    pub schema_state: SchemaState,
    pub pending_jobs: VecDeque<RestoreJob>,
    pub in_flight: u32,
    pub max_parallel: u32,
    pub in_ready_queue: bool,
    pub indexes_enqueued: bool,
}

/// One table present in the dump.
///
/// Invariants that must hold whenever the table's lock is not held:
/// - `in_ready_queue = true` implies the table is enqueued in the ready queue exactly once.
/// - `0 <= in_flight <= max_parallel`.
/// - `schema_state == AllDone` implies `pending_jobs` is empty and `in_flight == 0`.
pub struct TableState {
    pub ident: TableIdent,
    pub database: Arc<DatabaseState>,
    pub kind: TableKind,
    pub no_data: bool,
    /// Jobs the parser still intends to enqueue for this table. Decremented both when
    /// the parser produces a job (`add_job`) and when a worker acknowledges one
    /// (`on_job_complete`); only reaches zero once every job the parser will ever
    /// enqueue for this table has been both dispatched and completed.
    expected_jobs: std::sync::atomic::AtomicU64,
    inner: Mutex<TableInner>,
}

impl TableState {
    pub fn new(
        ident: TableIdent,
        database: Arc<DatabaseState>,
        kind: TableKind,
        no_data: bool,
        max_parallel: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            ident,
            database,
            kind,
            no_data,
            expected_jobs: std::sync::atomic::AtomicU64::new(0),
            inner: Mutex::new(TableInner {
                schema_state: SchemaState::NotCreated,
                pending_jobs: VecDeque::new(),
                in_flight: 0,
                max_parallel: max_parallel.max(1),
                in_ready_queue: false,
                indexes_enqueued: false,
            }),
        })
    }

    pub(crate) fn lock(&self) -> parking_lot::MutexGuard<'_, TableInner> {
        self.inner.lock()
    }

    pub fn schema_state(&self) -> SchemaState {
        self.inner.lock().schema_state
    }

    pub fn in_flight(&self) -> u32 {
        self.inner.lock().in_flight
    }

    pub fn pending_job_count(&self) -> usize {
        self.inner.lock().pending_jobs.len()
    }

    pub fn expected_jobs(&self) -> u64 {
        self.expected_jobs.load(Ordering::Acquire)
    }

    pub(crate) fn bump_expected_jobs(&self) {
        self.expected_jobs.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn decrement_expected_jobs(&self) {
        // Parked as a saturating decrement: a table whose schema creation failed may
        // have had its pending jobs freed without the parser being told, so double
        // bookkeeping here must never underflow.
        let _ = self
            .expected_jobs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(v.saturating_sub(1))
            });
    }

    /// Record a restore job the parser produced for this table. Called under the
    /// table's lock by the caller (the registry takes it on the parser's behalf in
    /// [`TableRegistry::add_job`]).
    pub(crate) fn push_job_locked(inner: &mut TableInner, job: RestoreJob) {
        inner.pending_jobs.push_back(job);
    }

    /// Schema worker calls this once the table's DDL has run successfully. A no-op if
    /// the table's database already failed and marked it `NotCreated` permanently —
    /// callers are expected to check `database.schema_state()` themselves, but the
    /// state transition here is only ever forward per spec §3's `SchemaState` order.
    pub fn mark_created(&self) {
        let mut inner = self.inner.lock();
        if inner.schema_state < SchemaState::Created {
            inner.schema_state = SchemaState::Created;
        }
        tracing::debug!(table = %self.ident, "schema created");
    }

    /// The index-build collaborator calls this once it has finished (or skipped)
    /// building every index for this table. Only advances a table already at
    /// `DataDone` — a table that never had index work queued, or whose data load
    /// hasn't finished yet, is left alone rather than jumped forward.
    pub fn mark_all_done(&self) {
        let mut inner = self.inner.lock();
        if inner.schema_state == SchemaState::DataDone {
            inner.schema_state = SchemaState::AllDone;
            tracing::debug!(table = %self.ident, "indexes built, table all done");
        }
    }
}

/// Atomic one-shot flag published with release semantics, always followed by a
/// control-channel post so observers are notified (see
/// [`crate::dispatch::Dispatcher`]).
#[derive(Debug, Default)]
pub struct OnceFlag(AtomicBool);

impl OnceFlag {
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Holds every table the parser has seen, keyed by identity, plus an ordered list used
/// for the dispatcher's fallback scan.
pub struct TableRegistry {
    by_ident: DashMap<TableIdent, Arc<TableState>>,
    loading_tables: Mutex<Vec<Arc<TableState>>>,
}

impl Default for TableRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TableRegistry {
    pub fn new() -> Self {
        Self {
            by_ident: DashMap::new(),
            loading_tables: Mutex::new(Vec::new()),
        }
    }

    /// Fetch the table for `ident`, or create it in `NotCreated` state. Used by the
    /// parser the first time it sees a table in the dump.
    pub fn get_or_create(
        &self,
        ident: TableIdent,
        database: Arc<DatabaseState>,
        kind: TableKind,
        no_data: bool,
        max_parallel: u32,
    ) -> Arc<TableState> {
        if let Some(existing) = self.by_ident.get(&ident) {
            return existing.clone();
        }
        let table = TableState::new(ident.clone(), database, kind, no_data, max_parallel);
        self.insert(table.clone());
        table
    }

    pub fn get(&self, ident: &TableIdent) -> Option<Arc<TableState>> {
        self.by_ident.get(ident).map(|e| e.clone())
    }

    /// Appends a newly-created table to the fallback-scan list. Idempotent with
    /// respect to `by_ident` membership: callers only ever insert a table once, but
    /// `refresh` re-derives `loading_tables` from `by_ident` so a table can never be
    /// missing from the scan list for long.
    pub fn insert(&self, table: Arc<TableState>) {
        self.by_ident.insert(table.ident.clone(), table.clone());
        self.loading_tables.lock().push(table);
    }

    /// Guarantees every table in `by_ident` is present in `loading_tables`. Called
    /// right after the parser signals `FILE_TYPE_ENDED` to close the race where a table
    /// was inserted into `by_ident` but a concurrent fallback scan already took its
    /// snapshot of `loading_tables` before the push landed.
    pub fn refresh(&self) {
        let mut loading = self.loading_tables.lock();
        if loading.len() == self.by_ident.len() {
            return;
        }
        let present: std::collections::HashSet<TableIdent> =
            loading.iter().map(|t| t.ident.clone()).collect();
        for entry in self.by_ident.iter() {
            if !present.contains(entry.key()) {
                loading.push(entry.value().clone());
            }
        }
    }

    /// A cheap (`Arc` clone only) snapshot of the fallback-scan list, taken with the
    /// registry lock held only for the duration of the clone. Per the lock-ordering
    /// rule (registry lock before table lock, never both at once), callers iterate the
    /// snapshot and lock individual tables without holding the registry lock.
    ///
    /// This is the building block `for_each` is defined in terms of, and the one the
    /// fallback scan uses directly, since it needs to short-circuit (return on the
    /// first eligible table) rather than visit every table unconditionally.
    pub fn snapshot(&self) -> Vec<Arc<TableState>> {
        self.loading_tables.lock().clone()
    }

    /// Visits every known table, deliberately *not* holding the registry lock across
    /// the visit (unlike the literal "iterates under the registry lock" wording) — the
    /// registry lock is released as soon as the snapshot is cloned, before `f` ever
    /// touches a table lock, to preserve the rule that the registry lock and a table
    /// lock are never held at the same time. For callers (like the `FILE_TYPE_ENDED`
    /// sweep and status queries) that want to visit every table without an early exit.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<TableState>)) {
        for table in self.snapshot() {
            f(&table);
        }
    }

    pub fn len(&self) -> usize {
        self.by_ident.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ident.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(n: &str) -> TableIdent {
        TableIdent::new("public", n)
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let reg = TableRegistry::new();
        let db = DatabaseState::new("public");
        let a = reg.get_or_create(ident("t"), db.clone(), TableKind::Base, false, 4);
        let b = reg.get_or_create(ident("t"), db, TableKind::Base, false, 4);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn refresh_is_idempotent_and_closes_missing_entries() {
        let reg = TableRegistry::new();
        let db = DatabaseState::new("public");
        let t = TableState::new(ident("t"), db, TableKind::Base, false, 1);
        // Simulate a table that landed in by_ident without going through insert().
        reg.by_ident.insert(t.ident.clone(), t.clone());
        assert_eq!(reg.snapshot().len(), 0);
        reg.refresh();
        assert_eq!(reg.snapshot().len(), 1);
        reg.refresh();
        assert_eq!(reg.snapshot().len(), 1);
    }

    #[test]
    fn expected_jobs_never_underflows() {
        let db = DatabaseState::new("public");
        let t = TableState::new(ident("t"), db, TableKind::Base, false, 1);
        t.decrement_expected_jobs();
        assert_eq!(t.expected_jobs(), 0);
    }
}
