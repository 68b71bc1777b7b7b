//! The primary entry point: wires a [`crate::config::DispatcherConfig`], a
//! [`crate::effect_impl::DataWorker`], and a [`crate::effect_impl::IndexExecutor`]
//! together into a running dispatcher thread plus a pool of data-worker threads, and
//! hands back an [`EngineHandle`] the parser drives.

use crate::bus::{ControlChannel, ControlSender};
use crate::config::DispatcherConfig;
use crate::core::{ControlEvent, RestoreJob, TableIdent, TableKind};
use crate::dispatch::{self, DispatchStats, DispatchStatsSnapshot, ReadyQueue, WaitGroup};
use crate::effect_impl::{DataWorker, IndexExecutor};
use crate::error::DispatchError;
use crate::job::{DatabaseState, OnceFlag, TableRegistry, TableState};
use crate::runtime::{self, DispatcherContext, JobChannel, WorkerContext};
use crate::tap::{DispatchTap, NoOpTap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Counts jobs currently between `add_job` and `on_job_complete`, independent of any
/// one table. Exposed for the demo/test harness and for [`crate::request`]'s status
/// queries; the dispatch/termination logic itself never reads this — it derives
/// termination purely from per-table state (see [`dispatch::all_tables_data_terminal`]).
#[derive(Debug, Default)]
pub struct InflightTracker {
    count: AtomicU64,
}

impl InflightTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    pub(crate) fn increment(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn decrement(&self) {
        let _ = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| Some(v.saturating_sub(1)));
    }
}

/// Parser-facing (and schema/index-executor-facing) API into a running engine.
/// Cheap to clone: every field is an `Arc` or a channel sender.
#[derive(Clone)]
pub struct EngineHandle {
    registry: Arc<TableRegistry>,
    ready_queue: Arc<ReadyQueue>,
    control_tx: ControlSender,
    inflight: Arc<InflightTracker>,
    stats: Arc<DispatchStats>,
}

impl EngineHandle {
    /// First sighting of a table in the dump. Idempotent: calling it twice for the
    /// same identity returns the same `TableState`.
    pub fn get_or_create_table(
        &self,
        ident: TableIdent,
        database: Arc<DatabaseState>,
        kind: TableKind,
        no_data: bool,
        max_parallel: u32,
    ) -> Arc<TableState> {
        self.registry
            .get_or_create(ident, database, kind, no_data, max_parallel)
    }

    pub fn table(&self, ident: &TableIdent) -> Option<Arc<TableState>> {
        self.registry.get(ident)
    }

    /// Looks `ident` up and fails with [`DispatchError::UnknownTable`] instead of
    /// panicking or silently no-oping. For collaborators that only track table
    /// identities (not the `Arc<TableState>` handed back by `get_or_create_table`) —
    /// e.g. a `SchemaExecutor` driven off a parsed `CREATE TABLE` statement rather
    /// than the in-process handle.
    fn table_or_err(&self, ident: &TableIdent) -> Result<Arc<TableState>, DispatchError> {
        self.table(ident).ok_or_else(|| DispatchError::UnknownTable(ident.clone()))
    }

    /// Fallible variant of [`Self::mark_schema_created`] for callers that only have a
    /// `TableIdent`.
    pub fn mark_schema_created_for(&self, ident: &TableIdent) -> Result<(), DispatchError> {
        let table = self.table_or_err(ident)?;
        self.mark_schema_created(&table);
        Ok(())
    }

    /// Fallible variant of [`Self::add_job`] for callers that only have a `TableIdent`.
    pub fn add_job_for(&self, ident: &TableIdent, job: RestoreJob) -> Result<(), DispatchError> {
        let table = self.table_or_err(ident)?;
        self.add_job(&table, job);
        Ok(())
    }

    /// The `SchemaExecutor` calls this once a table's DDL has run. Wakes a parked
    /// worker in case the table immediately has pending jobs.
    pub fn mark_schema_created(&self, table: &Arc<TableState>) {
        table.mark_created();
        // Deliberately does not attempt finalization here: the parser may still be
        // about to enqueue this table's first job, and `expected_jobs == 0` looks
        // identical whether no job has been added yet or every added job has already
        // completed. Finalizing a table with nothing pending yet is handled once, for
        // every table, when `FILE_TYPE_ENDED` arrives (see `runtime::run_dispatcher_loop`).
        dispatch::notify_table_ready(table, &self.ready_queue);
        self.control_tx.push(ControlEvent::WakeDataThread);
    }

    /// The `SchemaExecutor` calls this when a database's DDL fails. Every table in
    /// `database` becomes permanently unreachable (`is_terminal_for_data` skips them);
    /// every parked worker gets woken so it can notice and move past them.
    pub fn mark_schema_failed(&self, database: &Arc<DatabaseState>) {
        database.mark_not_found();
        self.control_tx.push(ControlEvent::SchemaFailed);
    }

    /// The parser calls this as it produces each data job.
    pub fn add_job(&self, table: &Arc<TableState>, job: RestoreJob) {
        self.inflight.increment();
        dispatch::add_job(table, job, &self.ready_queue);
        self.control_tx.push(ControlEvent::WakeDataThread);
    }

    /// The parser calls this once it has emitted every `CREATE TABLE`/schema
    /// statement in the dump, before it has necessarily emitted every data job.
    pub fn file_type_schema_ended(&self) {
        self.control_tx.push(ControlEvent::FileTypeSchemaEnded);
    }

    /// The parser calls this once the entire dump has been read.
    pub fn file_type_ended(&self) {
        self.registry.refresh();
        self.control_tx.push(ControlEvent::FileTypeEnded);
    }

    /// Requests an immediate stop: any pending jobs are abandoned, every worker is
    /// signaled to exit as soon as it finishes whatever it's currently running.
    pub fn shutdown(&self) {
        self.control_tx.push(ControlEvent::Shutdown);
    }

    pub fn inflight_job_count(&self) -> u64 {
        self.inflight.get()
    }

    pub fn table_count(&self) -> usize {
        self.registry.len()
    }

    pub fn status(&self) -> crate::request::RestoreStatus {
        crate::request::query_status(&self.registry, &self.inflight)
    }

    /// Point-in-time dispatch counters, mainly useful for tests and the demo binary
    /// ("did the ready queue actually absorb the load, or was it all fallback scans?").
    pub fn dispatch_stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }

    /// The `IndexExecutor` calls this once it has finished building (or decided to
    /// skip) every index queued for `table` via `enqueue_indexes_for`. Index builds are
    /// fire-and-forget from the dispatcher's point of view — it never blocks on
    /// them — so this is the one deliberate callback back in: without it a table would
    /// sit at `DataDone` forever and never reach `AllDone`.
    pub fn mark_indexes_done(&self, table: &Arc<TableState>) {
        table.mark_all_done();
    }

    /// Fallible variant of [`Self::mark_indexes_done`] for callers that only have a
    /// `TableIdent`.
    pub fn mark_indexes_done_for(&self, ident: &TableIdent) -> Result<(), DispatchError> {
        let table = self.table_or_err(ident)?;
        self.mark_indexes_done(&table);
        Ok(())
    }
}

/// Owns the spawned threads. Dropping it without calling [`DispatchEngine::join`]
/// leaves the threads detached (they still run to completion; this struct just stops
/// tracking them), matching `std::thread::JoinHandle`'s own drop semantics.
pub struct DispatchEngine {
    dispatcher_handle: JoinHandle<Result<(), DispatchError>>,
    worker_handles: Vec<JoinHandle<()>>,
    index_executor: Arc<dyn IndexExecutor>,
}

impl DispatchEngine {
    /// Blocks until the dispatcher thread and every worker thread have exited, then
    /// runs the final whole-restore index optimization pass exactly once.
    pub fn join(self) -> Result<(), DispatchError> {
        for handle in self.worker_handles {
            let _ = handle.join();
        }
        let result = match self.dispatcher_handle.join() {
            Ok(res) => res,
            Err(_) => Err(DispatchError::ControlChannelClosed),
        };
        self.index_executor.start_optimize_indexes_all_tables();
        result
    }
}

pub struct DispatchEngineBuilder {
    config: DispatcherConfig,
    data_worker: Option<Arc<dyn DataWorker>>,
    index_executor: Option<Arc<dyn IndexExecutor>>,
    tap: Option<Arc<dyn DispatchTap>>,
}

impl DispatchEngineBuilder {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            config,
            data_worker: None,
            index_executor: None,
            tap: None,
        }
    }

    pub fn data_worker(mut self, worker: Arc<dyn DataWorker>) -> Self {
        self.data_worker = Some(worker);
        self
    }

    pub fn index_executor(mut self, executor: Arc<dyn IndexExecutor>) -> Self {
        self.index_executor = Some(executor);
        self
    }

    pub fn tap(mut self, tap: Arc<dyn DispatchTap>) -> Self {
        self.tap = Some(tap);
        self
    }

    /// Spawns the dispatcher thread and, unless `config.no_data` is set, one data
    /// worker thread per `config.worker_count`. Panics if `data_worker` or
    /// `index_executor` wasn't supplied — both are mandatory collaborators, not
    /// optional ones, so failing fast at wiring time beats a confusing deadlock at
    /// runtime.
    pub fn build(self) -> (DispatchEngine, EngineHandle) {
        let data_worker = self.data_worker.expect("DispatchEngineBuilder requires a data_worker");
        let index_executor = self
            .index_executor
            .expect("DispatchEngineBuilder requires an index_executor");
        let tap: Arc<dyn DispatchTap> = self.tap.unwrap_or_else(|| Arc::new(NoOpTap));

        let registry = Arc::new(TableRegistry::new());
        let worker_count = if self.config.no_data { 0 } else { self.config.worker_count };
        let ready_queue = Arc::new(if self.config.no_data {
            ReadyQueue::disabled()
        } else {
            ReadyQueue::enabled()
        });
        let wait_group = Arc::new(if self.config.no_data {
            WaitGroup::disabled()
        } else {
            WaitGroup::enabled()
        });

        let (control_tx, control_rx) = ControlChannel::new();
        let job_channel = JobChannel::new();
        let stats = DispatchStats::new();
        let all_jobs_enqueued = Arc::new(OnceFlag::new());

        let dispatcher_ctx = DispatcherContext::new(
            registry.clone(),
            ready_queue.clone(),
            wait_group.clone(),
            control_rx,
            job_channel.sender(),
            index_executor.clone(),
            worker_count,
            tap.clone(),
            stats.clone(),
            all_jobs_enqueued.clone(),
        );

        let dispatcher_handle = std::thread::Builder::new()
            .name("dispatch-coordinator".into())
            .spawn(move || runtime::run_dispatcher_loop(dispatcher_ctx))
            .expect("failed to spawn dispatcher thread");

        let inflight = InflightTracker::new();
        let mut worker_handles = Vec::with_capacity(worker_count);
        for idx in 0..worker_count {
            let thread_label = format!("data-worker-{idx}");
            let ctx = WorkerContext {
                job_rx: job_channel.receiver(),
                control_tx: control_tx.clone(),
                registry: registry.clone(),
                ready_queue: ready_queue.clone(),
                index_executor: index_executor.clone(),
                data_worker: data_worker.clone(),
                inflight: inflight.clone(),
                tap: tap.clone(),
                all_jobs_enqueued: all_jobs_enqueued.clone(),
                thread_label: thread_label.clone(),
            };
            let handle = std::thread::Builder::new()
                .name(thread_label)
                .spawn(move || runtime::run_data_worker_loop(ctx))
                .expect("failed to spawn data worker thread");
            worker_handles.push(handle);
        }

        let handle = EngineHandle {
            registry,
            ready_queue,
            control_tx,
            inflight,
            stats,
        };
        let engine = DispatchEngine {
            dispatcher_handle,
            worker_handles,
            index_executor,
        };
        (engine, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{SchemaState, TableKind};

    struct NoopWorker;
    impl DataWorker for NoopWorker {
        fn execute(&self, _job: &RestoreJob) -> JobOutcome {
            crate::effect_impl::JobOutcome::Succeeded
        }
    }

    struct NoopIndexes;
    impl IndexExecutor for NoopIndexes {
        fn enqueue_indexes_for(&self, _table: &TableIdent) {}
        fn start_optimize_indexes_all_tables(&self) {}
    }

    #[test]
    fn by_ident_helpers_report_unknown_table() {
        let config = DispatcherConfig::builder().no_data(true).build();
        let (engine, handle) = DispatchEngineBuilder::new(config)
            .data_worker(Arc::new(NoopWorker))
            .index_executor(Arc::new(NoopIndexes))
            .build();

        let missing = TableIdent::new("public", "ghost");
        assert!(matches!(
            handle.mark_schema_created_for(&missing),
            Err(DispatchError::UnknownTable(_))
        ));
        assert!(matches!(
            handle.add_job_for(&missing, RestoreJob::new(missing.clone(), "x")),
            Err(DispatchError::UnknownTable(_))
        ));

        handle.shutdown();
        engine.join().unwrap();
    }

    #[test]
    fn by_ident_helpers_succeed_for_known_table() {
        let config = DispatcherConfig::builder().no_data(true).build();
        let (engine, handle) = DispatchEngineBuilder::new(config)
            .data_worker(Arc::new(NoopWorker))
            .index_executor(Arc::new(NoopIndexes))
            .build();

        let db = DatabaseState::new("public");
        let ident = TableIdent::new("public", "t");
        let table = handle.get_or_create_table(ident.clone(), db, TableKind::Base, true, 1);
        assert!(handle.mark_schema_created_for(&ident).is_ok());
        assert_eq!(table.schema_state(), SchemaState::Created);

        handle.shutdown();
        engine.join().unwrap();
    }
}
