//! Randomized interleavings, not a mechanical round-trip grid: each run shuffles how
//! many tables/jobs/workers there are and asserts the invariants from the table
//! lifecycle hold regardless of how threads race to pick up work.

use crate::config::DispatcherConfig;
use crate::core::{RestoreJob, SchemaState, TableIdent, TableKind};
use crate::effect_impl::{DataWorker, IndexExecutor, JobOutcome};
use crate::engine::DispatchEngineBuilder;
use crate::job::DatabaseState;
use std::sync::Arc;

struct InstantWorker;

impl DataWorker for InstantWorker {
    fn execute(&self, _job: &RestoreJob) -> JobOutcome {
        JobOutcome::Succeeded
    }
}

struct NoOpIndexes;

impl IndexExecutor for NoOpIndexes {
    fn enqueue_indexes_for(&self, _table: &TableIdent) {}
    fn start_optimize_indexes_all_tables(&self) {}
}

/// Runs one randomized restore: a random number of tables, each with a random number
/// of jobs and a random per-table parallelism cap, dispatched across a random number
/// of worker threads. Every table must end up `DataDone` and no job should ever be
/// double-dispatched (the dispatcher trusts `in_flight` bookkeeping, and workers never
/// observe panics, so a double-dispatch would otherwise only show up as a flaky
/// assertion under load).
fn run_one_randomized_restore(seed_tables: usize, seed_workers: usize) {
    let config = DispatcherConfig::builder()
        .worker_count(seed_workers.max(1))
        .max_parallel_per_table(1 + (fastrand::u32(0..4)))
        .build();

    let (engine, handle) = DispatchEngineBuilder::new(config)
        .data_worker(Arc::new(InstantWorker))
        .index_executor(Arc::new(NoOpIndexes))
        .build();

    let db = DatabaseState::new("stress");
    let mut tables = Vec::new();
    for i in 0..seed_tables {
        let ident = TableIdent::new("stress", format!("t{i}"));
        let max_parallel = 1 + fastrand::u32(0..4);
        let table = handle.get_or_create_table(ident, db.clone(), TableKind::Base, false, max_parallel);
        handle.mark_schema_created(&table);

        let job_count = fastrand::usize(0..8);
        for j in 0..job_count {
            handle.add_job(&table, RestoreJob::new(table.ident.clone(), format!("chunk-{j}")));
        }
        tables.push(table);
    }

    handle.file_type_schema_ended();
    handle.file_type_ended();
    engine.join().expect("dispatcher loop exits cleanly");

    for table in tables {
        assert!(
            table.schema_state() >= SchemaState::DataDone,
            "table {} never reached DataDone (pending={}, in_flight={})",
            table.ident,
            table.pending_job_count(),
            table.in_flight()
        );
        assert_eq!(table.pending_job_count(), 0);
        assert_eq!(table.in_flight(), 0);
        assert_eq!(table.expected_jobs(), 0);
    }
}

#[test]
fn randomized_restores_always_drain_to_data_done() {
    for _ in 0..20 {
        let seed_tables = fastrand::usize(0..12);
        let seed_workers = fastrand::usize(1..6);
        run_one_randomized_restore(seed_tables, seed_workers);
    }
}

#[test]
fn empty_restore_terminates_immediately() {
    run_one_randomized_restore(0, 3);
}

#[test]
fn single_table_many_jobs_single_worker() {
    let config = DispatcherConfig::builder().worker_count(1).max_parallel_per_table(1).build();
    let (engine, handle) = DispatchEngineBuilder::new(config)
        .data_worker(Arc::new(InstantWorker))
        .index_executor(Arc::new(NoOpIndexes))
        .build();

    let db = DatabaseState::new("public");
    let table = handle.get_or_create_table(TableIdent::new("public", "t"), db, TableKind::Base, false, 1);
    handle.mark_schema_created(&table);
    for j in 0..50 {
        handle.add_job(&table, RestoreJob::new(table.ident.clone(), format!("chunk-{j}")));
    }
    handle.file_type_schema_ended();
    handle.file_type_ended();
    engine.join().unwrap();

    assert_eq!(table.schema_state(), SchemaState::DataDone);
}
