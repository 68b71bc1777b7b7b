//! Debug-only ring buffer of recent dispatch decisions, for inspecting a stuck or
//! misbehaving run without wiring up a full tracing subscriber. Compiled out entirely
//! in release builds.

use crate::tap::{DispatchTap, TapEvent};
use parking_lot::Mutex;
use std::collections::VecDeque;

const DEFAULT_CAPACITY: usize = 256;

pub struct AuditLog {
    capacity: usize,
    entries: Mutex<VecDeque<String>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn record(&self, entry: impl Into<String>) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.entries.lock().iter().cloned().collect()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Wires an [`AuditLog`] up as a [`DispatchTap`] so it can be handed straight to
/// [`crate::engine::DispatchEngineBuilder::tap`].
impl DispatchTap for AuditLog {
    fn observe(&self, event: TapEvent) {
        self.record(format!("{event:?}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_oldest_entry_past_capacity() {
        let log = AuditLog::with_capacity(2);
        log.record("a");
        log.record("b");
        log.record("c");
        assert_eq!(log.snapshot(), vec!["b".to_string(), "c".to_string()]);
    }
}
