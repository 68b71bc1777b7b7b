//! Pure decision logic, kept free of locks and IO.
//!
//! The donor framework's core principle is that a [`Machine`] only *decides*; it never
//! performs IO and never blocks. There is exactly one non-trivial decision in this
//! dispatcher that both the ready-queue fast path (§4.2's enqueue rule) and the
//! fallback scan (§4.4.1) must apply identically: whether a table is currently
//! eligible to have a job dispatched from it. Expressing that decision as a pure
//! function over plain values — rather than re-deriving it with slightly different
//! field reads in two places — is what keeps the fast path and the fallback path from
//! silently drifting apart.

use crate::core::{SchemaState, TableKind};

/// The read-only view of a table's state the eligibility predicate needs. Constructed
/// from a locked [`crate::job::TableInner`] plus the table's immutable `kind`/`no_data`.
#[derive(Debug, Clone, Copy)]
pub struct TableSnapshot {
    pub schema_state: SchemaState,
    pub has_pending_jobs: bool,
    pub in_flight: u32,
    pub max_parallel: u32,
    pub in_ready_queue: bool,
    pub no_data: bool,
    pub kind: TableKind,
}

/// The enqueue / fast-path dispatch predicate (spec §4.2):
///
/// 1. schema is `Created`
/// 2. there are pending jobs
/// 3. there is parallelism slack
/// 4. the table is not already sitting in the ready queue
/// 5. it is a plain base table that wants its data restored
pub fn is_ready(t: &TableSnapshot) -> bool {
    t.schema_state == SchemaState::Created
        && t.has_pending_jobs
        && t.in_flight < t.max_parallel
        && !t.in_ready_queue
        && !t.no_data
        && t.kind == TableKind::Base
}

/// True once a table can never again yield data-load work: its schema is past
/// `Created`, or it reached `Created` but is a view/sequence (schema only, no rows).
/// Used by the fallback scan to skip tables outright instead of re-deriving
/// finalization on every pass.
pub fn is_terminal_for_data(schema_state: SchemaState, kind: TableKind) -> bool {
    schema_state >= SchemaState::DataDone
        || (schema_state == SchemaState::Created
            && matches!(kind, TableKind::View | TableKind::Sequence))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_snapshot() -> TableSnapshot {
        TableSnapshot {
            schema_state: SchemaState::Created,
            has_pending_jobs: true,
            in_flight: 0,
            max_parallel: 2,
            in_ready_queue: false,
            no_data: false,
            kind: TableKind::Base,
        }
    }

    #[test]
    fn ready_when_every_condition_holds() {
        assert!(is_ready(&base_snapshot()));
    }

    #[test]
    fn not_ready_without_pending_jobs() {
        let mut t = base_snapshot();
        t.has_pending_jobs = false;
        assert!(!is_ready(&t));
    }

    #[test]
    fn not_ready_at_parallelism_cap() {
        let mut t = base_snapshot();
        t.in_flight = t.max_parallel;
        assert!(!is_ready(&t));
    }

    #[test]
    fn not_ready_if_already_queued() {
        let mut t = base_snapshot();
        t.in_ready_queue = true;
        assert!(!is_ready(&t));
    }

    #[test]
    fn not_ready_for_no_data_or_non_base() {
        let mut t = base_snapshot();
        t.no_data = true;
        assert!(!is_ready(&t));

        let mut t = base_snapshot();
        t.kind = TableKind::View;
        assert!(!is_ready(&t));
    }

    #[test]
    fn terminal_states() {
        assert!(is_terminal_for_data(SchemaState::DataDone, TableKind::Base));
        assert!(is_terminal_for_data(SchemaState::AllDone, TableKind::Base));
        assert!(is_terminal_for_data(
            SchemaState::Created,
            TableKind::View
        ));
        assert!(is_terminal_for_data(
            SchemaState::Created,
            TableKind::Sequence
        ));
        assert!(!is_terminal_for_data(SchemaState::Created, TableKind::Base));
        assert!(!is_terminal_for_data(
            SchemaState::NotCreated,
            TableKind::Base
        ));
    }
}
