//! The dispatcher's single-consumer mailbox.
//!
//! The donor's `EventBus` fans an event out to many subscribers; this dispatcher has
//! exactly one consumer (the dispatcher thread), so `ControlChannel` is a thin,
//! clonable-sender wrapper over an unbounded [`crossbeam_channel`] instead of a
//! broadcast bus.

use crate::core::ControlEvent;
use crate::error::DispatchError;
use crossbeam_channel::{Receiver, Sender};

/// Producer handle. Parser, schema workers, and data workers all hold a clone of this
/// to post events; only the dispatcher ever calls [`ControlChannel::recv`].
#[derive(Clone)]
pub struct ControlSender {
    tx: Sender<ControlEvent>,
}

impl ControlSender {
    pub fn push(&self, event: ControlEvent) {
        // An unbounded channel whose receiver outlives every sender (the dispatcher
        // only drops its receiver after observing `Shutdown`) never actually fails to
        // send in this design; the error is swallowed rather than propagated because a
        // control-event post racing the dispatcher's own exit is not a caller bug.
        let _ = self.tx.send(event);
    }
}

/// Consumer handle, owned solely by the dispatcher thread.
pub struct ControlChannel {
    rx: Receiver<ControlEvent>,
}

impl ControlChannel {
    pub fn new() -> (ControlSender, ControlChannel) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (ControlSender { tx }, ControlChannel { rx })
    }

    pub fn recv(&self) -> Result<ControlEvent, DispatchError> {
        self.rx.recv().map_err(|_| DispatchError::ControlChannelClosed)
    }
}
