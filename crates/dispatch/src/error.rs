//! Boundary error type.
//!
//! The state machine in [`crate::dispatch`] is infallible by construction (see
//! module docs there): every transition it makes is total over the inputs it
//! accepts. `DispatchError` only covers the handful of places where something
//! *outside* that machine can go wrong — a collaborator disconnecting a channel, or
//! addressing a table the registry never saw.

use crate::core::TableIdent;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("control channel disconnected before shutdown was observed")]
    ControlChannelClosed,

    #[error("job channel disconnected")]
    JobChannelClosed,

    #[error("unknown table {0}")]
    UnknownTable(TableIdent),
}
