//! Span and span-event records plus the per-transaction sequence arena.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use spanpipe_wire::annotation::Annotation;
use spanpipe_wire::payload::{NONE_ASYNC_ID, NONE_SPAN_ID};

use crate::trace_id::TraceId;

/// Depth recorded for events nested beyond the configured maximum. Depths
/// are otherwise 1-based.
pub const DEPTH_OVERFLOW: i32 = -1;

/// Per-transaction arena of monotonically increasing counters. One instance
/// per root span, shared by reference with every async continuation; the
/// counters are the only shared-mutable state inside a transaction.
#[derive(Debug)]
pub struct SequenceArena {
    event_sequence: AtomicI32,
    next_async_id: AtomicI32,
    // Live parts of the transaction: the root span plus each incomplete
    // async context. The last part to finish releases the arena.
    pending_parts: AtomicUsize,
}

impl SequenceArena {
    pub(crate) fn new() -> Self {
        SequenceArena {
            event_sequence: AtomicI32::new(0),
            next_async_id: AtomicI32::new(0),
            pending_parts: AtomicUsize::new(1),
        }
    }

    /// Next span-event sequence number, strictly increasing in creation
    /// order across all threads recording into this transaction.
    pub fn next_event_sequence(&self) -> i32 {
        self.event_sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Next async fan-out point id.
    pub fn next_async_id(&self) -> i32 {
        self.next_async_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn register_part(&self) {
        self.pending_parts.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns true when this call finished the last live part.
    pub(crate) fn finish_part(&self) -> bool {
        self.pending_parts.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

/// Root-level record of one local transaction. Mutable while the
/// transaction is open; immutable once finalized and handed to transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub trace_id: TraceId,
    pub start_time: i64,
    pub elapsed: i32,
    pub service_type: i16,
    pub end_point: String,
    pub events: Vec<SpanEvent>,
}

impl Span {
    pub(crate) fn open(trace_id: TraceId, service_type: i16, end_point: &str) -> Self {
        Span {
            trace_id,
            start_time: now_millis(),
            elapsed: 0,
            service_type,
            end_point: end_point.to_string(),
            events: Vec::new(),
        }
    }
}

/// One nested traced call inside a span.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanEvent {
    pub sequence: i32,
    pub depth: i32,
    pub start_time: i64,
    pub elapsed: i32,
    pub service_type: i16,
    pub end_point: String,
    pub destination_id: String,
    pub api_id: i32,
    pub next_span_id: i64,
    pub async_id: i32,
    pub annotations: Vec<Annotation>,
}

impl SpanEvent {
    pub(crate) fn open(sequence: i32, depth: i32, async_id: i32) -> Self {
        SpanEvent {
            sequence,
            depth,
            start_time: now_millis(),
            elapsed: 0,
            service_type: 0,
            end_point: String::new(),
            destination_id: String::new(),
            api_id: 0,
            next_span_id: NONE_SPAN_ID,
            async_id,
            annotations: Vec::new(),
        }
    }

    pub fn is_async(&self) -> bool {
        self.async_id != NONE_ASYNC_ID
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_sequences_are_strictly_increasing() {
        let arena = SequenceArena::new();
        let a = arena.next_event_sequence();
        let b = arena.next_event_sequence();
        let c = arena.next_event_sequence();
        assert_eq!((a, b, c), (0, 1, 2));
    }

    #[test]
    fn test_arena_part_accounting() {
        let arena = SequenceArena::new();
        arena.register_part();
        assert!(!arena.finish_part());
        assert!(arena.finish_part());
    }

    #[test]
    fn test_arena_sequences_across_threads() {
        use std::sync::Arc;

        let arena = Arc::new(SequenceArena::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let arena = Arc::clone(&arena);
            handles.push(std::thread::spawn(move || {
                (0..100).map(|_| arena.next_event_sequence()).collect::<Vec<_>>()
            }));
        }

        let mut all: Vec<i32> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread panicked"))
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 400);
    }
}
