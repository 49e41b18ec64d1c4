//! Agent-side trace context: identifiers, span recording, and the async
//! context bridge.
//!
//! Instrumentation enters through [`trace::Tracer`], which opens a
//! [`trace::Trace`] per local transaction. The trace consults the
//! identifier model in [`trace_id`] to mint and extend causal identifiers,
//! records nested calls as span events, and hands finished spans to a
//! [`trace::SpanConsumer`]. Hand-offs to other threads or callbacks go
//! through [`async_context::AsyncContext`], the one supported cross-thread
//! mechanism.

pub mod api_meta;
pub mod async_context;
pub mod sampler;
pub mod span;
pub mod trace;
pub mod trace_id;
