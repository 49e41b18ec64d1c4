// Copyright 2024-Present the spanpipe authors
// SPDX-License-Identifier: Apache-2.0

//! Bridges between the recording core and the senders: finished spans,
//! fresh API metadata, and periodic agent stats all become envelopes here.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use spanpipe_context::span::{now_millis, Span};
use spanpipe_context::trace::{SpanConsumer, Tracer};
use spanpipe_context::api_meta::MetadataListener;
use spanpipe_wire::envelope::{Envelope, Header, MessageType};
use spanpipe_wire::payload::{
    AgentStatMessage, ApiMetadataMessage, SpanEventMessage, SpanMessage,
};

use crate::sender::{DataSender, SenderMetrics};

pub(crate) fn make_envelope(
    agent_id: &str,
    agent_start_time: i64,
    transaction_sequence: u64,
    message_type: MessageType,
    payload: Bytes,
) -> Envelope {
    let mut header = Header::new(agent_id, agent_start_time);
    header.transaction_sequence = transaction_sequence;
    Envelope::new(header, message_type, payload)
}

/// Flattens a finished span into its wire shape. Event start times travel
/// as offsets from the span start.
pub fn span_to_message(span: &Span) -> SpanMessage {
    SpanMessage {
        transaction_sequence: span.trace_id.transaction_id().sequence,
        span_id: span.trace_id.span_id(),
        parent_span_id: span.trace_id.parent_span_id(),
        flags: span.trace_id.flags(),
        start_time: span.start_time,
        elapsed: span.elapsed,
        service_type: span.service_type,
        end_point: span.end_point.clone(),
        events: span
            .events
            .iter()
            .map(|event| SpanEventMessage {
                sequence: event.sequence,
                depth: event.depth,
                start_offset: (event.start_time - span.start_time).max(0) as i32,
                elapsed: event.elapsed,
                service_type: event.service_type,
                end_point: event.end_point.clone(),
                destination_id: event.destination_id.clone(),
                api_id: event.api_id,
                next_span_id: event.next_span_id,
                async_id: event.async_id,
                annotations: event.annotations.clone(),
            })
            .collect(),
    }
}

/// [`SpanConsumer`] that encodes finished spans and enqueues them on the
/// span sender. Enqueue is best-effort; a full buffer costs the span, not
/// the application thread that closed it.
pub struct SpanSenderBridge {
    agent_id: Arc<str>,
    agent_start_time: i64,
    sender: Arc<dyn DataSender>,
}

impl SpanSenderBridge {
    pub fn new(agent_id: Arc<str>, agent_start_time: i64, sender: Arc<dyn DataSender>) -> Self {
        SpanSenderBridge {
            agent_id,
            agent_start_time,
            sender,
        }
    }
}

impl SpanConsumer for SpanSenderBridge {
    fn consume(&self, span: Span) {
        let message = span_to_message(&span);
        let envelope = make_envelope(
            &self.agent_id,
            self.agent_start_time,
            message.transaction_sequence,
            MessageType::Span,
            message.encode(),
        );
        self.sender.send(envelope);
    }
}

/// [`MetadataListener`] that publishes first-seen API descriptors on the
/// metadata sender.
pub struct MetadataSenderBridge {
    agent_id: Arc<str>,
    agent_start_time: i64,
    sender: Arc<dyn DataSender>,
}

impl MetadataSenderBridge {
    pub fn new(agent_id: Arc<str>, agent_start_time: i64, sender: Arc<dyn DataSender>) -> Self {
        MetadataSenderBridge {
            agent_id,
            agent_start_time,
            sender,
        }
    }
}

impl MetadataListener for MetadataSenderBridge {
    fn on_new_api(&self, metadata: ApiMetadataMessage) {
        let envelope = make_envelope(
            &self.agent_id,
            self.agent_start_time,
            0,
            MessageType::ApiMetadata,
            metadata.encode(),
        );
        self.sender.send(envelope);
    }
}

/// Where the stat reporter reads its gauges from.
pub trait StatSource: Send + Sync {
    fn active_trace_count(&self) -> i32;
}

impl StatSource for Tracer {
    fn active_trace_count(&self) -> i32 {
        Tracer::active_trace_count(self)
    }
}

/// Periodic agent-stat publication onto the stat sender.
pub struct StatReporter {
    agent_id: Arc<str>,
    agent_start_time: i64,
    interval: Duration,
    source: Arc<dyn StatSource>,
    sender_metrics: Vec<Arc<SenderMetrics>>,
    sender: Arc<dyn DataSender>,
    cancel: CancellationToken,
}

impl StatReporter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_id: Arc<str>,
        agent_start_time: i64,
        interval: Duration,
        source: Arc<dyn StatSource>,
        sender_metrics: Vec<Arc<SenderMetrics>>,
        sender: Arc<dyn DataSender>,
        cancel: CancellationToken,
    ) -> Self {
        StatReporter {
            agent_id,
            agent_start_time,
            interval,
            source,
            sender_metrics,
            sender,
            cancel,
        }
    }

    pub async fn run(self) {
        let mut tick = tokio::time::interval(self.interval);
        tick.tick().await; // discard first tick, which is instantaneous

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tick.tick() => self.report(),
            }
        }
        debug!("stat reporter stopped");
    }

    fn report(&self) {
        let now = now_millis();
        let stat = AgentStatMessage {
            timestamp: now,
            collect_interval_ms: self.interval.as_millis() as i64,
            active_trace_count: self.source.active_trace_count(),
            uptime_ms: (now - self.agent_start_time).max(0),
            dropped_message_count: self.sender_metrics.iter().map(|m| m.dropped()).sum(),
        };
        self.sender.send(make_envelope(
            &self.agent_id,
            self.agent_start_time,
            0,
            MessageType::AgentStat,
            stat.encode(),
        ));
    }
}
