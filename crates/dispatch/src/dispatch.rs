//! The dispatch policy: when a table becomes eligible, when a parked worker should be
//! woken, and when the whole data phase is over.
//!
//! Everything here is built on two rules from the lock-ordering discipline: take the
//! registry lock only to snapshot `Vec<Arc<TableState>>`, then drop it before touching
//! any individual table's lock; and never hold two table locks at once. The fast path
//! ([`ReadyQueue`]) and the fallback scan ([`fallback_scan_for_ready_table`]) both
//! funnel through [`crate::machine::is_ready`] so they can never disagree about what
//! "ready" means.

use crate::core::TableIdent;
use crate::job::{TableRegistry, TableState};
use crate::machine::{self, TableSnapshot};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Lightweight dispatch counters, echoing the reference implementation's static
/// per-run counters. Exposed so the demo and tests can assert on dispatch behavior
/// (e.g. "the ready queue absorbed most of the load") instead of scraping log text.
#[derive(Debug, Default)]
pub struct DispatchStats {
    jobs_dispatched: AtomicU64,
    dispatch_iterations: AtomicU64,
    ready_queue_hits: AtomicU64,
    ready_queue_misses: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchStatsSnapshot {
    pub jobs_dispatched: u64,
    pub dispatch_iterations: u64,
    pub ready_queue_hits: u64,
    pub ready_queue_misses: u64,
}

impl DispatchStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            jobs_dispatched: self.jobs_dispatched.load(Ordering::Relaxed),
            dispatch_iterations: self.dispatch_iterations.load(Ordering::Relaxed),
            ready_queue_hits: self.ready_queue_hits.load(Ordering::Relaxed),
            ready_queue_misses: self.ready_queue_misses.load(Ordering::Relaxed),
        }
    }
}

/// The O(1) path: tables likely to be dispatchable are pushed here as soon as they
/// become ready, so the dispatcher usually doesn't need the O(N) fallback scan at all.
///
/// Constructed disabled for `--no-data` schema-only runs (spec §9's open-question
/// decision): a disabled queue never accepts pushes and always reports empty, which
/// lets the dispatcher loop run unmodified while no data ever actually dispatches.
pub struct ReadyQueue {
    inner: Option<Mutex<std::collections::VecDeque<Arc<TableState>>>>,
}

impl ReadyQueue {
    pub fn enabled() -> Self {
        Self {
            inner: Some(Mutex::new(std::collections::VecDeque::new())),
        }
    }

    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Push a table that just became ready. No-op on a disabled queue.
    pub fn push(&self, table: Arc<TableState>) {
        if let Some(q) = &self.inner {
            q.lock().push_back(table);
        }
    }

    /// Pop the next candidate, if any. The caller must re-check
    /// [`machine::is_ready`] under the table's own lock before using it — a table
    /// can be pushed once and then lose eligibility (e.g. hit its parallelism cap via
    /// another thread) before it is popped.
    pub fn try_pop(&self) -> Option<Arc<TableState>> {
        self.inner.as_ref().and_then(|q| q.lock().pop_front())
    }
}

/// Tracks data-worker threads parked waiting for work, so `WAKE_DATA_THREAD` can wake
/// exactly one of them (spec §4.3) instead of broadcasting to all.
///
/// Also constructed disabled for `--no-data` runs, where no worker thread is ever
/// spawned and the group should never be waited on.
pub struct WaitGroup {
    parked: Option<Mutex<usize>>,
}

impl WaitGroup {
    pub fn enabled() -> Self {
        Self {
            parked: Some(Mutex::new(0)),
        }
    }

    pub fn disabled() -> Self {
        Self { parked: None }
    }

    /// A worker thread calls this right before it blocks on the job channel with
    /// nothing to do.
    pub fn mark_parked(&self) {
        if let Some(p) = &self.parked {
            *p.lock() += 1;
        }
    }

    /// A worker thread calls this once it stops waiting, whether it woke up because
    /// it was handed work or because of shutdown.
    pub fn mark_unparked(&self) {
        if let Some(p) = &self.parked {
            let mut guard = p.lock();
            *guard = guard.saturating_sub(1);
        }
    }

    pub fn parked_count(&self) -> usize {
        self.parked.as_ref().map(|p| *p.lock()).unwrap_or(0)
    }

    /// Wakes one parked thread by emitting a single `RequestDataJob`-worthy signal:
    /// returns `true` if a thread was considered parked and the count was
    /// decremented, `false` if nobody was parked.
    ///
    /// This follows the prose in spec §4.3 literally — `WAKE_DATA_THREAD` wakes one
    /// thread — rather than the broadcast-all behavior of the reference
    /// implementation's `wake_threads_waiting()`. The actual wakeup is the dispatcher
    /// pushing a job onto the (unbounded) job channel; this only tracks the parked
    /// count so the dispatcher knows whether a wakeup is owed at all.
    pub fn wake_one(&self) -> bool {
        match &self.parked {
            None => false,
            Some(p) => {
                let mut guard = p.lock();
                if *guard == 0 {
                    false
                } else {
                    *guard -= 1;
                    true
                }
            }
        }
    }

    /// Drains `parked` to 0 in one shot and returns how many threads were parked at
    /// that instant (spec §4.3). Used where a burst of tables can become eligible at
    /// once (`FILE_TYPE_SCHEMA_ENDED`, a schema failure): the caller is expected to
    /// attempt one dispatch per returned count and re-park (via [`Self::mark_parked`])
    /// any thread that came up empty, rather than looping [`Self::wake_one`] and
    /// stopping at the first miss.
    pub fn wake_all(&self) -> usize {
        match &self.parked {
            None => 0,
            Some(p) => {
                let mut guard = p.lock();
                std::mem::take(&mut *guard)
            }
        }
    }
}

fn snapshot_of(table: &TableState) -> TableSnapshot {
    let inner = table.lock();
    TableSnapshot {
        schema_state: inner.schema_state,
        has_pending_jobs: !inner.pending_jobs.is_empty(),
        in_flight: inner.in_flight,
        max_parallel: inner.max_parallel,
        in_ready_queue: inner.in_ready_queue,
        no_data: table.no_data,
        kind: table.kind,
    }
}

/// Re-checks a single table against [`machine::is_ready`] and, if it qualifies, marks
/// it enqueued and pushes it onto the ready queue. Called every time a table's state
/// changes in a way that could make it newly eligible: a job was added, its schema
/// just finished, or a job completed and freed a parallelism slot.
pub fn notify_table_ready(table: &Arc<TableState>, ready_queue: &ReadyQueue) {
    let became_ready = {
        let mut inner = table.lock();
        let snap = TableSnapshot {
            schema_state: inner.schema_state,
            has_pending_jobs: !inner.pending_jobs.is_empty(),
            in_flight: inner.in_flight,
            max_parallel: inner.max_parallel,
            in_ready_queue: inner.in_ready_queue,
            no_data: table.no_data,
            kind: table.kind,
        };
        if machine::is_ready(&snap) {
            inner.in_ready_queue = true;
            true
        } else {
            false
        }
    };
    if became_ready {
        tracing::trace!(table = %table.ident, "table became ready, enqueuing");
        ready_queue.push(table.clone());
    }
}

/// The O(N) fallback: walk every table known to the registry and hand back the first
/// one still eligible. Used when the ready queue comes up empty but the registry isn't
/// certain every table has actually been exhausted yet (spec §4.4.1) — e.g. right
/// after `FILE_TYPE_SCHEMA_ENDED`, when a burst of tables may have become ready
/// between their own individual `notify_table_ready` calls and now.
///
/// Along the way this also does the two things the scan is uniquely positioned to do
/// (per §4.4.1's pseudocode): finalize a `Created` table with nothing pending, and —
/// distinct from ordinary finalization — discover a `no_data` table that still has
/// pending jobs and drop straight to `AllDone`, freeing those jobs unread (spec §8
/// scenario 4: a table opted out of row restoration never dispatches a single job,
/// no matter how many the parser queued for it).
pub fn fallback_scan_for_ready_table(registry: &TableRegistry, all_jobs_enqueued: bool) -> Option<Arc<TableState>> {
    for table in registry.snapshot() {
        if table.database.schema_state() == crate::core::SchemaState::NotFound {
            continue;
        }
        let snap = snapshot_of(&table);
        if machine::is_terminal_for_data(snap.schema_state, snap.kind) {
            continue;
        }
        if snap.schema_state == crate::core::SchemaState::Created && snap.no_data && snap.has_pending_jobs {
            let mut inner = table.lock();
            if inner.schema_state == crate::core::SchemaState::Created {
                let freed = inner.pending_jobs.len();
                inner.pending_jobs.clear();
                inner.in_ready_queue = false;
                inner.schema_state = crate::core::SchemaState::AllDone;
                tracing::debug!(table = %table.ident, freed, "no_data table skipped straight to all_done, jobs freed");
            }
            continue;
        }
        if !snap.has_pending_jobs {
            maybe_finalize(&table, all_jobs_enqueued);
            continue;
        }
        if machine::is_ready(&snap) {
            table.lock().in_ready_queue = true;
            return Some(table);
        }
    }
    None
}

/// Picks the next job to dispatch, trying the ready queue first and falling back to a
/// full scan only when it's empty. Returns the job together with the table it came
/// from, since the caller needs the table to update `in_flight` and to know where to
/// route the completion later.
pub fn pick_next_job(
    registry: &TableRegistry,
    ready_queue: &ReadyQueue,
    stats: &DispatchStats,
    all_jobs_enqueued: bool,
) -> Option<(Arc<TableState>, crate::core::RestoreJob)> {
    stats.dispatch_iterations.fetch_add(1, Ordering::Relaxed);

    // `in_ready_queue` must be cleared *before* the eligibility recheck, under the same
    // lock acquisition, exactly as the reference does (`dbt->in_ready_queue = FALSE;`
    // then re-validate). Checking `is_ready` while the flag is still `true` would reject
    // every single table `try_pop` ever returns, since `is_ready` requires
    // `!in_ready_queue` — and by then `try_pop` has already removed it from the queue,
    // so a rejected table would never be reconsidered by anything.
    let from_queue = ready_queue.try_pop().filter(|t| {
        let mut inner = t.lock();
        inner.in_ready_queue = false;
        let snap = TableSnapshot {
            schema_state: inner.schema_state,
            has_pending_jobs: !inner.pending_jobs.is_empty(),
            in_flight: inner.in_flight,
            max_parallel: inner.max_parallel,
            in_ready_queue: inner.in_ready_queue,
            no_data: t.no_data,
            kind: t.kind,
        };
        machine::is_ready(&snap)
    });
    let table = match from_queue {
        Some(t) => {
            stats.ready_queue_hits.fetch_add(1, Ordering::Relaxed);
            Some(t)
        }
        None => {
            stats.ready_queue_misses.fetch_add(1, Ordering::Relaxed);
            fallback_scan_for_ready_table(registry, all_jobs_enqueued)
        }
    }?;

    let job = {
        let mut inner = table.lock();
        // Already `false` for a ready-queue hit (cleared above); the fallback scan sets
        // it back to `true` on the table it selects, so this still needs clearing here
        // for that path.
        inner.in_ready_queue = false;
        let job = inner.pending_jobs.pop_front();
        if job.is_some() {
            inner.in_flight += 1;
        }
        job
    };
    if job.is_some() {
        stats.jobs_dispatched.fetch_add(1, Ordering::Relaxed);
        // The table may still have more pending jobs and parallelism slack after this
        // one is handed out — re-queue it rather than waiting for some other event
        // (a worker's `on_job_complete`, or the O(N) fallback scan) to rediscover it.
        notify_table_ready(&table, ready_queue);
    }
    job.map(|j| (table.clone(), j))
}

/// Called once a worker finishes (successfully or not) the job it was handed. Frees
/// the table's parallelism slot, folds the job into `expected_jobs` bookkeeping, and
/// re-checks readiness so a table that was at its cap can immediately re-enter the
/// ready queue.
pub fn on_job_complete(table: &Arc<TableState>, ready_queue: &ReadyQueue, all_jobs_enqueued: bool) {
    {
        let mut inner = table.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
    }
    table.decrement_expected_jobs();
    maybe_finalize(table, all_jobs_enqueued);
    notify_table_ready(table, ready_queue);
}

/// Promotes a table to `DataDone` once it can never yield another data job: the
/// parser is done producing jobs for *anything* (`all_jobs_enqueued`), its schema is
/// `Created`, there are no pending jobs, nothing in flight, and the parser has no more
/// jobs coming for it specifically (`expected_jobs == 0`). `all_jobs_enqueued` is the
/// condition that matters here: without it, `expected_jobs` transiently reads 0
/// whenever a table's last-known job finishes before the parser has produced its
/// next one, which would finalize the table early and then permanently refuse any
/// job added afterwards (`is_ready` requires `schema_state == Created`). Safe to call
/// speculatively; it only actually transitions state when every condition holds.
pub fn maybe_finalize(table: &Arc<TableState>, all_jobs_enqueued: bool) {
    if !all_jobs_enqueued {
        return;
    }
    let should_finalize = {
        let inner = table.lock();
        inner.schema_state == crate::core::SchemaState::Created
            && inner.pending_jobs.is_empty()
            && inner.in_flight == 0
            && table.expected_jobs() == 0
    };
    if should_finalize {
        let mut inner = table.lock();
        // Re-check under the same lock acquisition used to decide, since nothing
        // prevents another job from having been pushed between the read above and
        // this write.
        if inner.schema_state == crate::core::SchemaState::Created
            && inner.pending_jobs.is_empty()
            && inner.in_flight == 0
            && table.expected_jobs() == 0
        {
            inner.schema_state = crate::core::SchemaState::DataDone;
            tracing::debug!(table = %table.ident, "table data done");
        }
    }
}

/// Records a job the parser produced for `table`: bumps `expected_jobs`, appends it to
/// the pending queue, and re-checks readiness. This is the parser-facing entry point;
/// `FILE_TYPE_ENDED`/`FILE_TYPE_SCHEMA_ENDED` handling and table creation live on
/// [`TableRegistry`] directly since those don't need the ready queue.
pub fn add_job(
    table: &Arc<TableState>,
    job: crate::core::RestoreJob,
    ready_queue: &ReadyQueue,
) {
    table.bump_expected_jobs();
    {
        let mut inner = table.lock();
        TableState::push_job_locked(&mut inner, job);
    }
    notify_table_ready(table, ready_queue);
}

/// Enqueues index builds for `table` exactly once, the first time it's observed in
/// `DataDone`. Idempotency is enforced under the table's own lock via
/// `indexes_enqueued` so a table straddling two completion notifications (e.g. the
/// last two jobs finishing on different worker threads) never gets double-queued.
pub fn maybe_enqueue_indexes(
    table: &Arc<TableState>,
    index_executor: &dyn crate::effect_impl::IndexExecutor,
) {
    let should_enqueue = {
        let mut inner = table.lock();
        if inner.schema_state == crate::core::SchemaState::DataDone && !inner.indexes_enqueued {
            inner.indexes_enqueued = true;
            true
        } else {
            false
        }
    };
    if should_enqueue {
        tracing::debug!(table = %table.ident, "enqueuing index builds");
        index_executor.enqueue_indexes_for(&table.ident);
    }
}

/// True once every known table has reached a terminal data state (spec §4.5's overall
/// termination condition, checked by the dispatcher after a `FILE_TYPE_ENDED` with
/// nothing left to dispatch).
pub fn all_tables_data_terminal(registry: &TableRegistry) -> bool {
    let mut all_terminal = true;
    registry.for_each(|t| {
        if !(machine::is_terminal_for_data(t.schema_state(), t.kind) || t.database.schema_state() == crate::core::SchemaState::NotFound) {
            all_terminal = false;
        }
    });
    all_terminal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RestoreJob, TableIdent, TableKind};
    use crate::job::DatabaseState;

    fn make_table(max_parallel: u32) -> Arc<TableState> {
        let db = DatabaseState::new("public");
        let t = TableState::new(TableIdent::new("public", "t"), db, TableKind::Base, false, max_parallel);
        t.mark_created();
        t
    }

    #[test]
    fn add_job_makes_table_ready() {
        let table = make_table(2);
        let rq = ReadyQueue::enabled();
        add_job(&table, RestoreJob::new(table.ident.clone(), "t.0001.sql"), &rq);
        assert!(table.lock().in_ready_queue);
        assert!(rq.try_pop().is_some());
    }

    #[test]
    fn pick_next_job_respects_parallelism_cap() {
        let table = make_table(1);
        let rq = ReadyQueue::enabled();
        let stats = DispatchStats::new();
        add_job(&table, RestoreJob::new(table.ident.clone(), "t.0001.sql"), &rq);
        add_job(&table, RestoreJob::new(table.ident.clone(), "t.0002.sql"), &rq);

        let registry = TableRegistry::new();
        registry.insert(table.clone());

        let (picked, _job) = pick_next_job(&registry, &rq, &stats, true).expect("first job dispatches");
        assert!(Arc::ptr_eq(&picked, &table));
        assert_eq!(table.in_flight(), 1);

        // Second job can't dispatch yet: max_parallel is 1 and one is in flight.
        assert!(pick_next_job(&registry, &rq, &stats, true).is_none());

        on_job_complete(&table, &rq, true);
        assert_eq!(table.in_flight(), 0);
        let (picked, _job) = pick_next_job(&registry, &rq, &stats, true).expect("slot freed up");
        assert!(Arc::ptr_eq(&picked, &table));
        assert_eq!(stats.snapshot().jobs_dispatched, 2);
    }

    #[test]
    fn maybe_finalize_marks_data_done_once_drained() {
        let table = make_table(4);
        let rq = ReadyQueue::enabled();
        let stats = DispatchStats::new();
        add_job(&table, RestoreJob::new(table.ident.clone(), "t.0001.sql"), &rq);
        let registry = TableRegistry::new();
        registry.insert(table.clone());

        let (_t, _job) = pick_next_job(&registry, &rq, &stats, false).unwrap();
        assert_eq!(table.schema_state(), crate::core::SchemaState::Created);

        // Not finalized yet while the parser might still be mid-dump for this table.
        on_job_complete(&table, &rq, false);
        assert_eq!(table.schema_state(), crate::core::SchemaState::Created);

        maybe_finalize(&table, true);
        assert_eq!(table.schema_state(), crate::core::SchemaState::DataDone);
    }

    #[test]
    fn wait_group_wakes_exactly_one() {
        let wg = WaitGroup::enabled();
        wg.mark_parked();
        wg.mark_parked();
        assert_eq!(wg.parked_count(), 2);
        assert!(wg.wake_one());
        assert_eq!(wg.parked_count(), 1);
    }

    #[test]
    fn wait_group_wake_all_drains_everyone_at_once() {
        let wg = WaitGroup::enabled();
        wg.mark_parked();
        wg.mark_parked();
        wg.mark_parked();
        assert_eq!(wg.wake_all(), 3);
        assert_eq!(wg.parked_count(), 0);
        assert_eq!(wg.wake_all(), 0);
    }

    #[test]
    fn fallback_scan_frees_pending_jobs_on_no_data_table() {
        let db = DatabaseState::new("public");
        let table = TableState::new(TableIdent::new("public", "skip_me"), db, TableKind::Base, true, 4);
        table.mark_created();
        let rq = ReadyQueue::enabled();
        add_job(&table, RestoreJob::new(table.ident.clone(), "t.0001.sql"), &rq);
        add_job(&table, RestoreJob::new(table.ident.clone(), "t.0002.sql"), &rq);
        add_job(&table, RestoreJob::new(table.ident.clone(), "t.0003.sql"), &rq);

        // A no_data table is never ready, so `add_job` never routed it onto the fast
        // path; only the fallback scan ever looks at it.
        assert!(rq.try_pop().is_none());

        let registry = TableRegistry::new();
        registry.insert(table.clone());

        assert!(fallback_scan_for_ready_table(&registry, false).is_none());
        assert_eq!(table.schema_state(), crate::core::SchemaState::AllDone);
        assert_eq!(table.lock().pending_jobs.len(), 0);
    }

    #[test]
    fn disabled_ready_queue_never_yields() {
        let table = make_table(4);
        let rq = ReadyQueue::disabled();
        add_job(&table, RestoreJob::new(table.ident.clone(), "t.0001.sql"), &rq);
        assert!(rq.try_pop().is_none());
    }
}
