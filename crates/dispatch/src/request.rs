//! Point-in-time status queries against a running engine.
//!
//! Unlike the donor's `dispatch_request`/`dispatch_request_timeout` (a oneshot-reply
//! request pushed onto the event bus and awaited with a timeout), every fact this
//! dispatcher's status needs lives behind ordinary locks already — there's no
//! dispatcher-thread round trip to make, so this is a plain read rather than a
//! request/response exchange.

use crate::core::SchemaState;
use crate::engine::InflightTracker;
use crate::job::TableRegistry;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreStatus {
    pub tables_total: usize,
    pub tables_data_done: usize,
    pub tables_all_done: usize,
    pub jobs_inflight: u64,
}

pub fn query_status(registry: &TableRegistry, inflight: &Arc<InflightTracker>) -> RestoreStatus {
    let mut status = RestoreStatus {
        tables_total: registry.len(),
        jobs_inflight: inflight.get(),
        ..Default::default()
    };
    registry.for_each(|table| match table.schema_state() {
        SchemaState::DataDone => status.tables_data_done += 1,
        SchemaState::AllDone => status.tables_all_done += 1,
        _ => {}
    });
    status
}
