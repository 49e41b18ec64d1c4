//! Correlates a span recorder across asynchronous hand-offs.
//!
//! The originating span event mints an [`AsyncContext`]; the context rides
//! an opaque carrier to wherever execution resumes — another thread, a
//! callback — and [`AsyncContext::continue_trace`] re-enters recording
//! there. Sequence and depth of continuation events come from the original
//! transaction's shared arena, so global ordering survives the physical
//! interleaving.
//!
//! Completion is a two-sided latch: the producer (the originating trace)
//! and every resumption each hold one reference; whichever side finishes
//! last triggers the completion notification, exactly once, regardless of
//! finish order.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::trace::{SpanConsumer, Trace, TraceRoot};

/// Capability any object crossing an async boundary must expose so the
/// bridge can operate without knowing the carrier's concrete type.
pub trait AsyncCarrier {
    fn attach_async_context(&mut self, context: AsyncContext);
    fn take_async_context(&mut self) -> Option<AsyncContext>;
}

/// Reference-counted two-sided completion latch for one async context.
#[derive(Debug)]
pub struct AsyncState {
    root: Arc<TraceRoot>,
    // One reference for the producer plus one per live resumption.
    pending: AtomicUsize,
    resumption_sequence: AtomicI32,
    completed: AtomicBool,
    completions: AtomicUsize,
}

impl AsyncState {
    pub(crate) fn new(root: Arc<TraceRoot>) -> Self {
        AsyncState {
            root,
            pending: AtomicUsize::new(1),
            resumption_sequence: AtomicI32::new(0),
            completed: AtomicBool::new(false),
            completions: AtomicUsize::new(0),
        }
    }

    pub(crate) fn register_resumption(&self) -> i32 {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.resumption_sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn producer_done(&self) {
        self.finish_side();
    }

    pub(crate) fn resumption_done(&self) {
        self.finish_side();
    }

    fn finish_side(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.complete();
        }
    }

    fn complete(&self) {
        if self.completed.swap(true, Ordering::AcqRel) {
            // A resumption registered after the latch already released;
            // its chunk was still delivered, but the transaction was
            // notified the first time around.
            warn!(
                transaction = %self.root.trace_id().transaction_id(),
                "async context completed after transaction notification"
            );
            return;
        }
        self.completions.fetch_add(1, Ordering::Relaxed);
        if self.root.arena().finish_part() {
            debug!(
                transaction = %self.root.trace_id().transaction_id(),
                "transaction fully finalized"
            );
        }
    }

    /// True once both the producer and every resumption have finished.
    pub fn is_finished(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    pub(crate) fn completion_count(&self) -> usize {
        self.completions.load(Ordering::Relaxed)
    }

    fn sequence(&self) -> i32 {
        self.resumption_sequence.load(Ordering::Relaxed)
    }
}

/// Handle correlating a span recorder across an asynchronous hand-off.
/// Holds a shared (not owning) back-reference to the transaction's
/// identifying state; whichever of the transaction and its contexts
/// finishes last triggers the final cleanup.
#[derive(Clone)]
pub struct AsyncContext {
    async_id: i32,
    root: Arc<TraceRoot>,
    state: Arc<AsyncState>,
    consumer: Arc<dyn SpanConsumer>,
    max_event_depth: i32,
    active: Arc<AtomicI32>,
}

impl AsyncContext {
    pub(crate) fn new(
        async_id: i32,
        root: Arc<TraceRoot>,
        state: Arc<AsyncState>,
        consumer: Arc<dyn SpanConsumer>,
        max_event_depth: i32,
        active: Arc<AtomicI32>,
    ) -> Self {
        AsyncContext {
            async_id,
            root,
            state,
            consumer,
            max_event_depth,
            active,
        }
    }

    pub fn async_id(&self) -> i32 {
        self.async_id
    }

    /// Number of resumptions so far; increments on each
    /// [`AsyncContext::continue_trace`].
    pub fn sequence(&self) -> i32 {
        self.state.sequence()
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    /// Re-enters trace recording for one resumption, possibly on a
    /// different thread than the one that created the context. The returned
    /// trace records a continuation chunk of the originating transaction.
    pub fn continue_trace(&self) -> Trace {
        self.state.register_resumption();
        Trace::new_continuation(
            Arc::clone(&self.root),
            Arc::clone(&self.consumer),
            Arc::clone(&self.state),
            self.async_id,
            self.max_event_depth,
            Arc::clone(&self.active),
        )
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &Arc<AsyncState> {
        &self.state
    }
}

impl std::fmt::Debug for AsyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncContext")
            .field("async_id", &self.async_id)
            .field("sequence", &self.sequence())
            .field("transaction", &self.root.trace_id().transaction_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::sampler::AlwaysSampler;
    use crate::span::Span;
    use crate::trace::{SpanConsumer, TraceConfig, Tracer};
    use crate::trace_id::TransactionIdSource;

    #[derive(Default)]
    struct CapturingConsumer {
        spans: Mutex<Vec<Span>>,
    }

    impl SpanConsumer for CapturingConsumer {
        fn consume(&self, span: Span) {
            self.spans.lock().unwrap().push(span);
        }
    }

    fn tracer(consumer: Arc<CapturingConsumer>) -> Tracer {
        Tracer::new(
            TransactionIdSource::new("agent-async", 1_700_000_000_000),
            Arc::new(AlwaysSampler),
            consumer,
            TraceConfig::default(),
        )
    }

    #[test]
    fn test_two_resumptions_advance_sequence_and_complete_once() {
        let consumer = Arc::new(CapturingConsumer::default());
        let tracer = tracer(Arc::clone(&consumer));

        let mut trace = tracer.begin_trace(1000, "");
        trace.block_begin();
        let context = trace.record_next_async_context().expect("sampled");
        trace.block_end();

        let mut first = context.continue_trace();
        assert_eq!(context.sequence(), 1);
        let mut second = context.continue_trace();
        assert_eq!(context.sequence(), 2);

        first.block_begin();
        first.block_end();
        first.end();
        assert!(!context.is_finished());

        second.block_begin();
        second.block_end();
        second.end();
        assert!(!context.is_finished()); // producer still open

        trace.end();
        assert!(context.is_finished());
        assert_eq!(context.state().completion_count(), 1);

        // Root span + two continuation chunks.
        assert_eq!(consumer.spans.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_completion_when_producer_finishes_first() {
        let consumer = Arc::new(CapturingConsumer::default());
        let tracer = tracer(Arc::clone(&consumer));

        let mut trace = tracer.begin_trace(1000, "");
        trace.block_begin();
        let context = trace.record_next_async_context().expect("sampled");
        trace.block_end();

        let mut resumed = context.continue_trace();
        trace.end();
        assert!(!context.is_finished()); // resumption still reading

        resumed.end();
        assert!(context.is_finished());
        assert_eq!(context.state().completion_count(), 1);
    }

    #[test]
    fn test_continuation_events_share_arena_ordering() {
        let consumer = Arc::new(CapturingConsumer::default());
        let tracer = tracer(Arc::clone(&consumer));

        let mut trace = tracer.begin_trace(1000, "");
        trace.block_begin(); // sequence 0
        let context = trace.record_next_async_context().expect("sampled");
        trace.block_end();

        let handle = std::thread::spawn(move || {
            let mut resumed = context.continue_trace();
            resumed.block_begin(); // sequence 1, another thread
            resumed.record_api(7);
            resumed.block_end();
            resumed.end();
        });
        handle.join().expect("resumption thread panicked");
        trace.end();

        let spans = consumer.spans.lock().unwrap();
        assert_eq!(spans.len(), 2);
        let chunk = &spans[0]; // continuation closed first
        assert_eq!(chunk.events[0].sequence, 1);
        assert_eq!(chunk.events[0].async_id, 0);
        assert_eq!(chunk.trace_id, spans[1].trace_id);
    }

    #[test]
    fn test_carrier_capability_round_trip() {
        struct Job {
            context: Option<AsyncContext>,
        }

        impl AsyncCarrier for Job {
            fn attach_async_context(&mut self, context: AsyncContext) {
                self.context = Some(context);
            }

            fn take_async_context(&mut self) -> Option<AsyncContext> {
                self.context.take()
            }
        }

        let consumer = Arc::new(CapturingConsumer::default());
        let tracer = tracer(Arc::clone(&consumer));

        let mut trace = tracer.begin_trace(1000, "");
        trace.block_begin();
        let mut job = Job { context: None };
        job.attach_async_context(trace.record_next_async_context().expect("sampled"));
        trace.block_end();

        let context = job.take_async_context().expect("attached");
        let mut resumed = context.continue_trace();
        resumed.end();
        trace.end();

        assert!(job.take_async_context().is_none());
        assert!(context.is_finished());
    }

    #[test]
    fn test_distinct_fan_out_points_get_distinct_ids() {
        let consumer = Arc::new(CapturingConsumer::default());
        let tracer = tracer(Arc::clone(&consumer));

        let mut trace = tracer.begin_trace(1000, "");
        trace.block_begin();
        let a = trace.record_next_async_context().expect("sampled");
        trace.block_end();
        trace.block_begin();
        let b = trace.record_next_async_context().expect("sampled");
        trace.block_end();

        assert_ne!(a.async_id(), b.async_id());
        a.continue_trace().end();
        b.continue_trace().end();
        trace.end();
        assert!(a.is_finished() && b.is_finished());
    }
}
