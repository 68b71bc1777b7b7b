//! In-memory demo: runs a small scripted restore through `loader-dispatch-core` with
//! no parser, no database, and no dump file — just enough to see the dispatcher, the
//! worker pool, and index scheduling actually run end to end.

use loader_dispatch_core::{DispatchEngineBuilder, DispatcherConfig, TableIdent, TableKind};
use loader_dispatch_testing::{InstantSuccessWorker, RecordingIndexExecutor, ScriptedParser};
use std::sync::Arc;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = DispatcherConfig::builder()
        .worker_count(4)
        .max_parallel_per_table(2)
        .build();

    let index_executor = RecordingIndexExecutor::new();
    let (engine, handle) = DispatchEngineBuilder::new(config)
        .data_worker(Arc::new(InstantSuccessWorker))
        .index_executor(index_executor.clone())
        .build();

    let parser = ScriptedParser::new("public");
    let accounts = parser.declare_table(
        &handle,
        TableIdent::new("public", "accounts"),
        TableKind::Base,
        false,
        2,
        12,
    );
    let events = parser.declare_table(
        &handle,
        TableIdent::new("public", "events"),
        TableKind::Base,
        false,
        4,
        30,
    );
    let settings_view = parser.declare_table(
        &handle,
        TableIdent::new("public", "settings_view"),
        TableKind::View,
        true,
        1,
        0,
    );
    parser.finish(&handle);

    engine.join().expect("dispatcher loop exits cleanly");

    println!("accounts:      {:?}", accounts.schema_state());
    println!("events:        {:?}", events.schema_state());
    println!("settings_view: {:?}", settings_view.schema_state());
    println!("indexes enqueued for: {:?}", index_executor.enqueued_tables());
    println!("optimize pass ran: {}", index_executor.optimize_was_called());
}
