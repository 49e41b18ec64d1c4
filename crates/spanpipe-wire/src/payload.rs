// Copyright 2024-Present the spanpipe authors
// SPDX-License-Identifier: Apache-2.0

//! Typed payload codecs for each [`MessageType`](crate::envelope::MessageType).
//!
//! These are the concrete shapes carried inside an envelope's opaque payload:
//! encoded by the agent-side senders, decoded by the collector-side mappers.

use bytes::{BufMut, Bytes, BytesMut};

use crate::annotation::Annotation;
use crate::buf::{put_string, ByteReader};
use crate::CodecError;

/// Sentinel span id meaning "none" (no parent / no downstream link).
pub const NONE_SPAN_ID: i64 = -1;
/// Sentinel async id meaning "not an async continuation".
pub const NONE_ASYNC_ID: i32 = -1;

/// A finished local transaction: the root record plus its flat event list.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanMessage {
    pub transaction_sequence: u64,
    pub span_id: i64,
    pub parent_span_id: i64,
    pub flags: u16,
    pub start_time: i64,
    pub elapsed: i32,
    pub service_type: i16,
    pub end_point: String,
    pub events: Vec<SpanEventMessage>,
}

/// One nested call inside a span. `start_offset` is relative to the owning
/// span's `start_time`.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanEventMessage {
    pub sequence: i32,
    pub depth: i32,
    pub start_offset: i32,
    pub elapsed: i32,
    pub service_type: i16,
    pub end_point: String,
    pub destination_id: String,
    pub api_id: i32,
    pub next_span_id: i64,
    pub async_id: i32,
    pub annotations: Vec<Annotation>,
}

impl SpanMessage {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u64(self.transaction_sequence);
        buf.put_i64(self.span_id);
        buf.put_i64(self.parent_span_id);
        buf.put_u16(self.flags);
        buf.put_i64(self.start_time);
        buf.put_i32(self.elapsed);
        buf.put_i16(self.service_type);
        put_string(&mut buf, &self.end_point);
        buf.put_u32(self.events.len() as u32);
        for event in &self.events {
            event.encode_into(&mut buf);
        }
        buf.freeze()
    }

    pub fn decode(bytes: &[u8]) -> Result<SpanMessage, CodecError> {
        let mut r = ByteReader::new(bytes);
        let transaction_sequence = r.u64("span.transaction_sequence")?;
        let span_id = r.i64("span.span_id")?;
        let parent_span_id = r.i64("span.parent_span_id")?;
        let flags = r.u16("span.flags")?;
        let start_time = r.i64("span.start_time")?;
        let elapsed = r.i32("span.elapsed")?;
        let service_type = r.i16("span.service_type")?;
        let end_point = r.string("span.end_point")?;
        let event_count = r.u32("span.event_count")? as usize;
        let mut events = Vec::with_capacity(event_count.min(1024));
        for _ in 0..event_count {
            events.push(SpanEventMessage::decode_from(&mut r)?);
        }
        Ok(SpanMessage {
            transaction_sequence,
            span_id,
            parent_span_id,
            flags,
            start_time,
            elapsed,
            service_type,
            end_point,
            events,
        })
    }
}

impl SpanEventMessage {
    fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_i32(self.sequence);
        buf.put_i32(self.depth);
        buf.put_i32(self.start_offset);
        buf.put_i32(self.elapsed);
        buf.put_i16(self.service_type);
        put_string(buf, &self.end_point);
        put_string(buf, &self.destination_id);
        buf.put_i32(self.api_id);
        buf.put_i64(self.next_span_id);
        buf.put_i32(self.async_id);
        buf.put_u32(self.annotations.len() as u32);
        for annotation in &self.annotations {
            annotation.encode_into(buf);
        }
    }

    fn decode_from(r: &mut ByteReader<'_>) -> Result<SpanEventMessage, CodecError> {
        let sequence = r.i32("event.sequence")?;
        let depth = r.i32("event.depth")?;
        let start_offset = r.i32("event.start_offset")?;
        let elapsed = r.i32("event.elapsed")?;
        let service_type = r.i16("event.service_type")?;
        let end_point = r.string("event.end_point")?;
        let destination_id = r.string("event.destination_id")?;
        let api_id = r.i32("event.api_id")?;
        let next_span_id = r.i64("event.next_span_id")?;
        let async_id = r.i32("event.async_id")?;
        let annotation_count = r.u32("event.annotation_count")? as usize;
        let mut annotations = Vec::with_capacity(annotation_count.min(256));
        for _ in 0..annotation_count {
            annotations.push(Annotation::decode_from(r)?);
        }
        Ok(SpanEventMessage {
            sequence,
            depth,
            start_offset,
            elapsed,
            service_type,
            end_point,
            destination_id,
            api_id,
            next_span_id,
            async_id,
            annotations,
        })
    }
}

/// Periodic agent runtime gauges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentStatMessage {
    pub timestamp: i64,
    pub collect_interval_ms: i64,
    pub active_trace_count: i32,
    pub uptime_ms: i64,
    pub dropped_message_count: u64,
}

impl AgentStatMessage {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_i64(self.timestamp);
        buf.put_i64(self.collect_interval_ms);
        buf.put_i32(self.active_trace_count);
        buf.put_i64(self.uptime_ms);
        buf.put_u64(self.dropped_message_count);
        buf.freeze()
    }

    pub fn decode(bytes: &[u8]) -> Result<AgentStatMessage, CodecError> {
        let mut r = ByteReader::new(bytes);
        Ok(AgentStatMessage {
            timestamp: r.i64("stat.timestamp")?,
            collect_interval_ms: r.i64("stat.collect_interval_ms")?,
            active_trace_count: r.i32("stat.active_trace_count")?,
            uptime_ms: r.i64("stat.uptime_ms")?,
            dropped_message_count: r.u64("stat.dropped_message_count")?,
        })
    }
}

/// Maps an interned api id back to its human-readable descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiMetadataMessage {
    pub api_id: i32,
    pub api_info: String,
    pub line: i32,
}

impl ApiMetadataMessage {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_i32(self.api_id);
        put_string(&mut buf, &self.api_info);
        buf.put_i32(self.line);
        buf.freeze()
    }

    pub fn decode(bytes: &[u8]) -> Result<ApiMetadataMessage, CodecError> {
        let mut r = ByteReader::new(bytes);
        Ok(ApiMetadataMessage {
            api_id: r.i32("api_meta.api_id")?,
            api_info: r.string("api_meta.api_info")?,
            line: r.i32("api_meta.line")?,
        })
    }
}

/// One-shot agent registration data, sent when the transport starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInfoMessage {
    pub hostname: String,
    pub pid: u32,
    pub agent_version: String,
    pub service_type: i16,
    pub start_time: i64,
}

impl AgentInfoMessage {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_string(&mut buf, &self.hostname);
        buf.put_u32(self.pid);
        put_string(&mut buf, &self.agent_version);
        buf.put_i16(self.service_type);
        buf.put_i64(self.start_time);
        buf.freeze()
    }

    pub fn decode(bytes: &[u8]) -> Result<AgentInfoMessage, CodecError> {
        let mut r = ByteReader::new(bytes);
        Ok(AgentInfoMessage {
            hostname: r.string("agent_info.hostname")?,
            pid: r.u32("agent_info.pid")?,
            agent_version: r.string("agent_info.agent_version")?,
            service_type: r.i16("agent_info.service_type")?,
            start_time: r.i64("agent_info.start_time")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::AnnotationValue;

    fn sample_span() -> SpanMessage {
        SpanMessage {
            transaction_sequence: 9,
            span_id: 0x1122_3344_5566,
            parent_span_id: NONE_SPAN_ID,
            flags: 0,
            start_time: 1_700_000_000_123,
            elapsed: 250,
            service_type: 1000,
            end_point: "10.0.0.5:8080".into(),
            events: vec![
                SpanEventMessage {
                    sequence: 0,
                    depth: 1,
                    start_offset: 1,
                    elapsed: 120,
                    service_type: 2100,
                    end_point: "db.internal:5432".into(),
                    destination_id: "orders-db".into(),
                    api_id: 3,
                    next_span_id: NONE_SPAN_ID,
                    async_id: NONE_ASYNC_ID,
                    annotations: vec![Annotation::new(
                        12,
                        AnnotationValue::IntString(0, "select * from orders".into()),
                    )],
                },
                SpanEventMessage {
                    sequence: 1,
                    depth: 2,
                    start_offset: 5,
                    elapsed: 80,
                    service_type: 9110,
                    end_point: String::new(),
                    destination_id: String::new(),
                    api_id: 4,
                    next_span_id: 777,
                    async_id: 0,
                    annotations: Vec::new(),
                },
            ],
        }
    }

    #[test]
    fn test_span_message_round_trip() {
        let span = sample_span();
        let decoded = SpanMessage::decode(&span.encode()).expect("decode failed");
        assert_eq!(span, decoded);
    }

    #[test]
    fn test_span_message_truncated_event_is_an_error() {
        let span = sample_span();
        let bytes = span.encode();
        let err = SpanMessage::decode(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Truncated(_) | CodecError::BadLength { .. }
        ));
    }

    #[test]
    fn test_agent_stat_round_trip() {
        let stat = AgentStatMessage {
            timestamp: 1_700_000_060_000,
            collect_interval_ms: 5000,
            active_trace_count: 12,
            uptime_ms: 60_000,
            dropped_message_count: 2,
        };
        assert_eq!(
            AgentStatMessage::decode(&stat.encode()).expect("decode failed"),
            stat
        );
    }

    #[test]
    fn test_api_metadata_round_trip() {
        let meta = ApiMetadataMessage {
            api_id: 17,
            api_info: "OrderService.placeOrder(request)".into(),
            line: 88,
        };
        assert_eq!(
            ApiMetadataMessage::decode(&meta.encode()).expect("decode failed"),
            meta
        );
    }

    #[test]
    fn test_agent_info_round_trip() {
        let info = AgentInfoMessage {
            hostname: "ip-10-0-0-5".into(),
            pid: 4242,
            agent_version: "0.1.0".into(),
            service_type: 1000,
            start_time: 1_700_000_000_000,
        };
        assert_eq!(
            AgentInfoMessage::decode(&info.encode()).expect("decode failed"),
            info
        );
    }
}
