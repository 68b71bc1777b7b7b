//! Deterministic fakes for exercising `loader-dispatch-core` without a real parser,
//! database connection, or schema/index executor.
//!
//! Grounded on the same idea as the donor's own testing crate: collaborators get
//! in-memory, inspectable fakes instead of mocks, so assertions read off plain state
//! rather than recorded call expectations.

use loader_dispatch_core::{
    DataWorker, DatabaseState, EngineHandle, IndexExecutor, JobOutcome, RestoreJob, TableIdent,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Always succeeds instantly. The overwhelming majority of dispatch tests don't care
/// what a job "does" — they care whether it was dispatched at all, and under what
/// parallelism.
#[derive(Default)]
pub struct InstantSuccessWorker;

impl DataWorker for InstantSuccessWorker {
    fn execute(&self, _job: &RestoreJob) -> JobOutcome {
        JobOutcome::Succeeded
    }
}

/// Fails every job whose description is in `fail_descriptions`, succeeds the rest.
/// Useful for asserting that a worker failure still unblocks the table (spec §7: a
/// failed job still frees its parallelism slot and still counts toward
/// `expected_jobs`).
#[derive(Default)]
pub struct ScriptedFailureWorker {
    fail_descriptions: HashSet<String>,
}

impl ScriptedFailureWorker {
    pub fn new(fail_descriptions: impl IntoIterator<Item = String>) -> Self {
        Self {
            fail_descriptions: fail_descriptions.into_iter().collect(),
        }
    }
}

impl DataWorker for ScriptedFailureWorker {
    fn execute(&self, job: &RestoreJob) -> JobOutcome {
        if self.fail_descriptions.contains(&job.description) {
            JobOutcome::Failed("scripted failure".into())
        } else {
            JobOutcome::Succeeded
        }
    }
}

/// Records every table handed to it for index building, in the order it was
/// enqueued. Never actually builds anything.
#[derive(Default)]
pub struct RecordingIndexExecutor {
    enqueued: Mutex<Vec<TableIdent>>,
    optimize_called: Mutex<bool>,
}

impl RecordingIndexExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn enqueued_tables(&self) -> Vec<TableIdent> {
        self.enqueued.lock().clone()
    }

    pub fn optimize_was_called(&self) -> bool {
        *self.optimize_called.lock()
    }
}

impl IndexExecutor for RecordingIndexExecutor {
    fn enqueue_indexes_for(&self, table: &TableIdent) {
        self.enqueued.lock().push(table.clone());
    }

    fn start_optimize_indexes_all_tables(&self) {
        *self.optimize_called.lock() = true;
    }
}

/// Drives an [`EngineHandle`] the way a real dump parser would: declares tables in
/// order, marks their schema created, feeds each a fixed number of jobs, then signals
/// the two end-of-parse events. Scripted rather than reading an actual dump file,
/// since dump parsing is out of scope for this crate.
pub struct ScriptedParser {
    database: Arc<DatabaseState>,
}

impl ScriptedParser {
    pub fn new(database_name: impl Into<String>) -> Self {
        Self {
            database: DatabaseState::new(database_name),
        }
    }

    /// Declares one table, marks its schema created immediately, and enqueues
    /// `job_count` jobs for it.
    pub fn declare_table(
        &self,
        handle: &EngineHandle,
        ident: TableIdent,
        kind: loader_dispatch_core::TableKind,
        no_data: bool,
        max_parallel: u32,
        job_count: usize,
    ) -> Arc<loader_dispatch_core::TableState> {
        let table = handle.get_or_create_table(ident, self.database.clone(), kind, no_data, max_parallel);
        handle.mark_schema_created(&table);
        for i in 0..job_count {
            handle.add_job(&table, RestoreJob::new(table.ident.clone(), format!("chunk-{i}")));
        }
        table
    }

    /// Runs the end-of-dump sequence: schema end, then data end.
    pub fn finish(&self, handle: &EngineHandle) {
        handle.file_type_schema_ended();
        handle.file_type_ended();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loader_dispatch_core::{DispatchEngineBuilder, DispatcherConfig, SchemaState, TableKind};

    #[test]
    fn scripted_parser_drives_a_table_to_completion() {
        let config = DispatcherConfig::builder().worker_count(2).max_parallel_per_table(2).build();
        let index_executor = RecordingIndexExecutor::new();
        let (engine, handle) = DispatchEngineBuilder::new(config)
            .data_worker(Arc::new(InstantSuccessWorker))
            .index_executor(index_executor.clone())
            .build();

        let parser = ScriptedParser::new("public");
        let table = parser.declare_table(
            &handle,
            TableIdent::new("public", "accounts"),
            TableKind::Base,
            false,
            2,
            5,
        );
        parser.finish(&handle);
        engine.join().unwrap();

        assert_eq!(table.schema_state(), SchemaState::DataDone);
        assert_eq!(index_executor.enqueued_tables(), vec![table.ident.clone()]);
        assert!(index_executor.optimize_was_called());
    }

    #[test]
    fn failed_jobs_still_free_their_slot() {
        let config = DispatcherConfig::builder().worker_count(1).max_parallel_per_table(1).build();
        let worker = ScriptedFailureWorker::new(["chunk-0".to_string()]);
        let (engine, handle) = DispatchEngineBuilder::new(config)
            .data_worker(Arc::new(worker))
            .index_executor(RecordingIndexExecutor::new())
            .build();

        let parser = ScriptedParser::new("public");
        let table = parser.declare_table(
            &handle,
            TableIdent::new("public", "events"),
            TableKind::Base,
            false,
            1,
            3,
        );
        parser.finish(&handle);
        engine.join().unwrap();

        assert_eq!(table.schema_state(), SchemaState::DataDone);
    }

    #[test]
    fn failed_database_schema_leaves_table_non_terminal_but_restore_still_ends() {
        let config = DispatcherConfig::builder().worker_count(2).max_parallel_per_table(2).build();
        let (engine, handle) = DispatchEngineBuilder::new(config)
            .data_worker(Arc::new(InstantSuccessWorker))
            .index_executor(RecordingIndexExecutor::new())
            .build();

        let broken_db = DatabaseState::new("broken");
        let ok_db = DatabaseState::new("ok");

        let broken_table =
            handle.get_or_create_table(TableIdent::new("broken", "t"), broken_db.clone(), TableKind::Base, false, 1);
        handle.add_job(&broken_table, RestoreJob::new(broken_table.ident.clone(), "chunk-0".into()));
        handle.mark_schema_failed(&broken_db);

        let ok_table = handle.get_or_create_table(TableIdent::new("ok", "t"), ok_db, TableKind::Base, false, 1);
        handle.mark_schema_created(&ok_table);
        handle.add_job(&ok_table, RestoreJob::new(ok_table.ident.clone(), "chunk-0".into()));

        handle.file_type_schema_ended();
        handle.file_type_ended();
        engine.join().unwrap();

        assert_eq!(broken_table.database.schema_state(), SchemaState::NotFound);
        assert_ne!(broken_table.schema_state(), SchemaState::DataDone);
        assert_eq!(ok_table.schema_state(), SchemaState::DataDone);
    }

    #[test]
    fn no_data_table_skips_straight_to_data_done() {
        let config = DispatcherConfig::builder().no_data(true).build();
        let (engine, handle) = DispatchEngineBuilder::new(config)
            .data_worker(Arc::new(InstantSuccessWorker))
            .index_executor(RecordingIndexExecutor::new())
            .build();

        let parser = ScriptedParser::new("public");
        let table = parser.declare_table(
            &handle,
            TableIdent::new("public", "skip_me"),
            TableKind::Base,
            true,
            4,
            0,
        );
        parser.finish(&handle);
        engine.join().unwrap();

        assert_eq!(table.schema_state(), SchemaState::DataDone);
    }

    #[test]
    fn no_data_table_with_queued_jobs_frees_them_and_skips_to_all_done() {
        // Unlike the zero-job case above, this table has jobs the parser actually
        // produced for it — opting out of row restoration must win regardless.
        let config = DispatcherConfig::builder().worker_count(1).max_parallel_per_table(2).build();
        let (engine, handle) = DispatchEngineBuilder::new(config)
            .data_worker(Arc::new(InstantSuccessWorker))
            .index_executor(RecordingIndexExecutor::new())
            .build();

        let parser = ScriptedParser::new("public");
        let table = parser.declare_table(
            &handle,
            TableIdent::new("public", "opted_out"),
            TableKind::Base,
            true,
            2,
            3,
        );
        parser.finish(&handle);
        engine.join().unwrap();

        assert_eq!(table.schema_state(), SchemaState::AllDone);
        assert_eq!(table.pending_job_count(), 0);
    }
}
