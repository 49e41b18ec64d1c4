// Copyright 2024-Present the spanpipe authors
// SPDX-License-Identifier: Apache-2.0

//! Storage-ready record shapes. One record per inbound message, flattened
//! from the wire header plus the typed payload, ready for `save(record)`.

use serde::Serialize;

/// Stored form of one finished span (root span or async continuation
/// chunk).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanRecord {
    /// `agent_id^agent_start_time^sequence` — the distributed transaction
    /// key.
    pub transaction_id: String,
    pub agent_id: String,
    pub span_id: i64,
    pub parent_span_id: i64,
    pub flags: u16,
    pub start_time: i64,
    pub elapsed: i32,
    pub service_type: i16,
    pub end_point: String,
    pub events: Vec<SpanEventRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanEventRecord {
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
    pub annotations: Vec<AnnotationRecord>,
}

/// Annotations are stored in display form; the typed value already served
/// its purpose on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotationRecord {
    pub key: i32,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentStatRecord {
    pub agent_id: String,
    pub timestamp: i64,
    pub collect_interval_ms: i64,
    pub active_trace_count: i32,
    pub uptime_ms: i64,
    pub dropped_message_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiMetadataRecord {
    pub agent_id: String,
    pub agent_start_time: i64,
    pub api_id: i32,
    pub api_info: String,
    pub line: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentInfoRecord {
    pub agent_id: String,
    pub agent_start_time: i64,
    pub hostname: String,
    pub pid: u32,
    pub agent_version: String,
    pub service_type: i16,
}
