//! Per-transaction recording state machine.
//!
//! A [`Trace`] is the recorder handed to instrumentation for one local
//! transaction: open the root span, cycle nested block open/close pairs,
//! close. Recording is additive instrumentation — any internal failure is
//! logged and swallowed here so the instrumented application's control flow
//! is never affected, and every recording call is a cheap no-op when the
//! transaction is not being sampled.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use spanpipe_wire::annotation::{Annotation, AnnotationValue};
use spanpipe_wire::payload::NONE_ASYNC_ID;

use crate::async_context::{AsyncContext, AsyncState};
use crate::sampler::Sampler;
use crate::span::{Span, SpanEvent, SequenceArena, DEPTH_OVERFLOW};
use crate::trace_id::{TraceId, TransactionIdSource};

/// Well-known annotation keys.
pub mod annotation_keys {
    pub const API: i32 = 12;
    pub const SQL: i32 = 20;
    pub const HTTP_URL: i32 = 40;
    pub const HTTP_COOKIE: i32 = 45;
    pub const HTTP_ENTITY: i32 = 47;
    pub const EXCEPTION: i32 = 50;
}

/// Shared identifying state of one transaction: the trace id, the sampling
/// decision, and the sequence arena. Referenced (never owned) by async
/// continuations; released when the last part of the transaction finishes.
#[derive(Debug)]
pub struct TraceRoot {
    trace_id: TraceId,
    start_time: i64,
    sampled: bool,
    arena: SequenceArena,
}

impl TraceRoot {
    pub fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    pub fn is_sampled(&self) -> bool {
        self.sampled
    }

    pub fn arena(&self) -> &SequenceArena {
        &self.arena
    }
}

/// Receives finished spans (root spans and async continuation chunks) for
/// transport.
pub trait SpanConsumer: Send + Sync {
    fn consume(&self, span: Span);
}

/// Discards everything; useful before the transport is wired up.
#[derive(Debug, Default)]
pub struct NullSpanConsumer;

impl SpanConsumer for NullSpanConsumer {
    fn consume(&self, _span: Span) {}
}

#[derive(Debug, Clone)]
pub struct TraceConfig {
    /// Nesting depth cap; events beyond it record [`DEPTH_OVERFLOW`].
    pub max_event_depth: i32,
}

impl Default for TraceConfig {
    fn default() -> Self {
        TraceConfig {
            max_event_depth: 64,
        }
    }
}

/// Entry point for instrumentation: opens a [`Trace`] per transaction
/// boundary, consulting the sampler once per root.
pub struct Tracer {
    transaction_ids: TransactionIdSource,
    sampler: Arc<dyn Sampler>,
    consumer: Arc<dyn SpanConsumer>,
    config: TraceConfig,
    active: Arc<AtomicI32>,
}

impl Tracer {
    pub fn new(
        transaction_ids: TransactionIdSource,
        sampler: Arc<dyn Sampler>,
        consumer: Arc<dyn SpanConsumer>,
        config: TraceConfig,
    ) -> Self {
        Tracer {
            transaction_ids,
            sampler,
            consumer,
            config,
            active: Arc::new(AtomicI32::new(0)),
        }
    }

    /// Opens a new root transaction. The sampling decision made here is
    /// inherited by every event and async continuation of the trace.
    pub fn begin_trace(&self, service_type: i16, end_point: &str) -> Trace {
        let trace_id = TraceId::new_root(self.transaction_ids.next());
        let sampled = self.sampler.is_sampled();
        self.open(trace_id, sampled, service_type, end_point)
    }

    /// Continues a transaction started by a remote caller. Callers only
    /// propagate identifiers for sampled transactions, so continued traces
    /// record unconditionally.
    pub fn continue_trace(&self, trace_id: TraceId, service_type: i16, end_point: &str) -> Trace {
        self.open(trace_id, true, service_type, end_point)
    }

    fn open(&self, trace_id: TraceId, sampled: bool, service_type: i16, end_point: &str) -> Trace {
        let span = Span::open(trace_id.clone(), service_type, end_point);
        let root = Arc::new(TraceRoot {
            trace_id,
            start_time: span.start_time,
            sampled,
            arena: SequenceArena::new(),
        });
        self.active.fetch_add(1, Ordering::Relaxed);
        Trace {
            root,
            consumer: Arc::clone(&self.consumer),
            span: Some(span),
            open_events: Vec::new(),
            async_states: Vec::new(),
            part: TracePart::Root,
            max_event_depth: self.config.max_event_depth,
            active: Arc::clone(&self.active),
            closed: false,
        }
    }

    /// Transactions currently open, including async continuations.
    pub fn active_trace_count(&self) -> i32 {
        self.active.load(Ordering::Relaxed)
    }

    pub fn agent_id(&self) -> &Arc<str> {
        self.transaction_ids.agent_id()
    }

    pub fn agent_start_time(&self) -> i64 {
        self.transaction_ids.agent_start_time()
    }
}

pub(crate) enum TracePart {
    Root,
    Continuation {
        state: Arc<AsyncState>,
        async_id: i32,
    },
}

/// Recorder for one local transaction (or one async continuation chunk).
///
/// State machine: open → N nested block open/close cycles → closed. The
/// root span is finalized exactly once by [`Trace::end`]; a trace dropped
/// without `end` discards its span with a warning.
pub struct Trace {
    root: Arc<TraceRoot>,
    consumer: Arc<dyn SpanConsumer>,
    span: Option<Span>,
    open_events: Vec<SpanEvent>,
    async_states: Vec<Arc<AsyncState>>,
    part: TracePart,
    max_event_depth: i32,
    active: Arc<AtomicI32>,
    closed: bool,
}

impl Trace {
    pub(crate) fn new_continuation(
        root: Arc<TraceRoot>,
        consumer: Arc<dyn SpanConsumer>,
        state: Arc<AsyncState>,
        async_id: i32,
        max_event_depth: i32,
        active: Arc<AtomicI32>,
    ) -> Trace {
        active.fetch_add(1, Ordering::Relaxed);
        let span = Span::open(root.trace_id().clone(), 0, "");
        Trace {
            root,
            consumer,
            span: Some(span),
            open_events: Vec::new(),
            async_states: Vec::new(),
            part: TracePart::Continuation { state, async_id },
            max_event_depth,
            active,
            closed: false,
        }
    }

    pub fn trace_id(&self) -> &TraceId {
        self.root.trace_id()
    }

    pub fn is_sampled(&self) -> bool {
        self.root.is_sampled()
    }

    /// Opens a nested span event under the current span.
    pub fn block_begin(&mut self) {
        if !self.is_sampled() || self.closed {
            return;
        }
        let depth = {
            let next = self.open_events.len() as i32 + 1;
            if next > self.max_event_depth {
                DEPTH_OVERFLOW
            } else {
                next
            }
        };
        let async_id = match &self.part {
            TracePart::Root => NONE_ASYNC_ID,
            TracePart::Continuation { async_id, .. } => *async_id,
        };
        let sequence = self.root.arena().next_event_sequence();
        self.open_events.push(SpanEvent::open(sequence, depth, async_id));
    }

    /// Closes the innermost open span event and appends it to the span.
    pub fn block_end(&mut self) {
        if !self.is_sampled() || self.closed {
            return;
        }
        let Some(mut event) = self.open_events.pop() else {
            warn!("block_end without a matching block_begin; ignoring");
            return;
        };
        event.elapsed = elapsed_since(event.start_time);
        if let Some(span) = self.span.as_mut() {
            span.events.push(event);
        }
    }

    pub fn record_api(&mut self, api_id: i32) {
        self.with_current("record_api", |event| event.api_id = api_id);
    }

    pub fn record_service_type(&mut self, service_type: i16) {
        self.with_current("record_service_type", |event| {
            event.service_type = service_type;
        });
    }

    pub fn record_end_point(&mut self, end_point: &str) {
        self.with_current("record_end_point", |event| {
            event.end_point = end_point.to_string();
        });
    }

    pub fn record_destination_id(&mut self, destination_id: &str) {
        self.with_current("record_destination_id", |event| {
            event.destination_id = destination_id.to_string();
        });
    }

    pub fn record_exception(&mut self, message: &str) {
        let value = AnnotationValue::String(message.to_string());
        self.with_current("record_exception", |event| {
            event
                .annotations
                .push(Annotation::new(annotation_keys::EXCEPTION, value));
        });
    }

    pub fn record_annotation(&mut self, key: i32, value: AnnotationValue) {
        self.with_current("record_annotation", |event| {
            event.annotations.push(Annotation::new(key, value));
        });
    }

    /// Marks the beginning of a downstream remote call: derives the
    /// identifier the callee will use, records it on the current event, and
    /// returns it for injection into the outgoing request. Returns `None`
    /// when the transaction is not sampled — nothing is propagated.
    pub fn record_next_span(&mut self) -> Option<TraceId> {
        if !self.is_sampled() || self.closed {
            return None;
        }
        let next = self.root.trace_id().derive_next();
        let next_span_id = next.span_id();
        self.with_current("record_next_span", |event| {
            event.next_span_id = next_span_id;
        });
        Some(next)
    }

    /// Mints an async context for work that resumes elsewhere, marking the
    /// current event as the fan-out point. Returns `None` when unsampled.
    pub fn record_next_async_context(&mut self) -> Option<AsyncContext> {
        if !self.is_sampled() || self.closed {
            return None;
        }
        let async_id = self.root.arena().next_async_id();
        self.with_current("record_next_async_context", |event| {
            event.async_id = async_id;
        });
        self.root.arena().register_part();
        let state = Arc::new(AsyncState::new(Arc::clone(&self.root)));
        self.async_states.push(Arc::clone(&state));
        Some(AsyncContext::new(
            async_id,
            Arc::clone(&self.root),
            state,
            Arc::clone(&self.consumer),
            self.max_event_depth,
            Arc::clone(&self.active),
        ))
    }

    /// Finalizes the span and hands it to transport. Exactly-once: a second
    /// call is logged and ignored.
    pub fn end(&mut self) {
        if self.closed {
            warn!(
                transaction = %self.root.trace_id().transaction_id(),
                "trace already ended; ignoring"
            );
            return;
        }
        self.finish(true);
    }

    fn finish(&mut self, deliver: bool) {
        self.closed = true;
        self.active.fetch_sub(1, Ordering::Relaxed);

        while let Some(mut event) = self.open_events.pop() {
            // Unbalanced open blocks are closed on our way out rather than
            // lost; the instrumented application must not be affected.
            warn!(sequence = event.sequence, "span event left open at trace end");
            event.elapsed = elapsed_since(event.start_time);
            if let Some(span) = self.span.as_mut() {
                span.events.push(event);
            }
        }

        if let Some(mut span) = self.span.take() {
            span.elapsed = elapsed_since(span.start_time);
            if deliver && self.is_sampled() {
                self.consumer.consume(span);
            }
        }

        // This trace is the producer side of every async context it minted,
        // whether it is the root or itself a continuation.
        for state in self.async_states.drain(..) {
            state.producer_done();
        }

        match &self.part {
            TracePart::Root => {
                if self.root.arena().finish_part() {
                    debug!(
                        transaction = %self.root.trace_id().transaction_id(),
                        "transaction fully finalized"
                    );
                }
            }
            TracePart::Continuation { state, .. } => {
                state.resumption_done();
            }
        }
    }

    fn with_current(&mut self, op: &'static str, f: impl FnOnce(&mut SpanEvent)) {
        if !self.is_sampled() || self.closed {
            return;
        }
        match self.open_events.last_mut() {
            Some(event) => f(event),
            None => warn!("{op} outside an open block; ignoring"),
        }
    }
}

impl Drop for Trace {
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                transaction = %self.root.trace_id().transaction_id(),
                "trace dropped without end; discarding span"
            );
            self.finish(false);
        }
    }
}

fn elapsed_since(start_time: i64) -> i32 {
    (crate::span::now_millis() - start_time).max(0) as i32
}
