//! Deterministic execution trace (spec §4.6).
//!
//! A `Trace` is pre-sized once `compile()` knows the schedule length, then
//! only ever appended to — never reallocated mid-`execute()` — so recording
//! never perturbs timing. Equality between two traces ignores timestamps by
//! design: the contract is that the same graph run twice emits the same
//! *sequence of events*, not that it takes the same wall-clock time.

use serde::{Deserialize, Serialize};

use crate::kernels::Variant;
use crate::types::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    GraphCompilation,
    MemoryAllocation,
    NodeExecutionStart,
    NodeExecutionEnd,
    KernelDispatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub kind: EventKind,
    pub node: Option<NodeId>,
    pub variant: Option<Variant>,
    pub timestamp_nanos: u64,
    pub detail: String,
}

impl PartialEq for TraceEvent {
    /// Ignores `timestamp_nanos` — see the module doc. Two recordings of
    /// the same compile+execute run are expected to carry different
    /// timestamps but must otherwise be identical.
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.node == other.node && self.variant == other.variant && self.detail == other.detail
    }
}

/// Monotonic clock abstraction so tests can assert ordering without racing
/// the wall clock; production code always uses [`MonotonicClock`].
pub trait Clock {
    fn now_nanos(&self) -> u64;
}

pub struct MonotonicClock {
    start: std::time::Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        MonotonicClock { start: std::time::Instant::now() }
    }
}

impl Clock for MonotonicClock {
    fn now_nanos(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }
}

pub struct Trace {
    events: Vec<TraceEvent>,
    clock: Box<dyn Clock + Send + Sync>,
}

impl Trace {
    pub fn with_capacity(capacity: usize) -> Self {
        Trace { events: Vec::with_capacity(capacity), clock: Box::new(MonotonicClock::default()) }
    }

    /// Default pre-sizing formula: a small constant for the compile-time
    /// events plus three recorder calls per scheduled node (start kernel
    /// dispatch + start execution + end execution), overridable via
    /// `EngineConfig::trace_capacity_hint` for tests that want to assert
    /// zero reallocation.
    pub fn capacity_for_schedule_len(schedule_len: usize, hint: Option<usize>) -> usize {
        hint.unwrap_or(4 + schedule_len * 3)
    }

    pub fn record(&mut self, kind: EventKind, node: Option<NodeId>, variant: Option<Variant>, detail: impl Into<String>) {
        let timestamp_nanos = self.clock.now_nanos();
        self.events.push(TraceEvent { kind, node, variant, timestamp_nanos, detail: detail.into() });
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn clear_execution_events(&mut self) {
        self.events.retain(|e| matches!(e.kind, EventKind::GraphCompilation | EventKind::MemoryAllocation));
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Compares two traces the way the determinism contract does: event
/// sequences must match exactly except for timestamps.
pub fn traces_equal_ignoring_timestamps(a: &[TraceEvent], b: &[TraceEvent]) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_timestamp_but_not_kind() {
        let e1 = TraceEvent { kind: EventKind::NodeExecutionStart, node: Some(NodeId(0)), variant: None, timestamp_nanos: 10, detail: String::new() };
        let e2 = TraceEvent { kind: EventKind::NodeExecutionStart, node: Some(NodeId(0)), variant: None, timestamp_nanos: 99999, detail: String::new() };
        assert_eq!(e1, e2);

        let e3 = TraceEvent { kind: EventKind::NodeExecutionEnd, ..e2.clone() };
        assert_ne!(e1, e3);
    }

    #[test]
    fn capacity_formula_respects_hint_override() {
        assert_eq!(Trace::capacity_for_schedule_len(10, None), 34);
        assert_eq!(Trace::capacity_for_schedule_len(10, Some(5)), 5);
    }

    #[test]
    fn clear_execution_events_keeps_compile_time_events() {
        let mut t = Trace::with_capacity(8);
        t.record(EventKind::GraphCompilation, None, None, "compiled");
        t.record(EventKind::NodeExecutionStart, Some(NodeId(0)), None, "start");
        t.clear_execution_events();
        assert_eq!(t.len(), 1);
        assert_eq!(t.events()[0].kind, EventKind::GraphCompilation);
    }
}
