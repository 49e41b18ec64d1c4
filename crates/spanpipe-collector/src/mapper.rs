// Copyright 2024-Present the spanpipe authors
// SPDX-License-Identifier: Apache-2.0

//! Per-message-type mappers from `{header, payload}` to storage records.

use spanpipe_wire::envelope::Header;
use spanpipe_wire::payload::{
    AgentInfoMessage, AgentStatMessage, ApiMetadataMessage, SpanMessage,
};
use spanpipe_wire::CodecError;

use crate::record::{
    AgentInfoRecord, AgentStatRecord, AnnotationRecord, ApiMetadataRecord, SpanEventRecord,
    SpanRecord,
};

fn transaction_key(header: &Header, sequence: u64) -> String {
    format!("{}^{}^{}", header.agent_id, header.agent_start_time, sequence)
}

pub fn map_span(header: &Header, payload: &[u8]) -> Result<SpanRecord, CodecError> {
    let message = SpanMessage::decode(payload)?;
    Ok(SpanRecord {
        transaction_id: transaction_key(header, message.transaction_sequence),
        agent_id: header.agent_id.clone(),
        span_id: message.span_id,
        parent_span_id: message.parent_span_id,
        flags: message.flags,
        start_time: message.start_time,
        elapsed: message.elapsed,
        service_type: message.service_type,
        end_point: message.end_point,
        events: message
            .events
            .into_iter()
            .map(|event| SpanEventRecord {
                sequence: event.sequence,
                depth: event.depth,
                start_offset: event.start_offset,
                elapsed: event.elapsed,
                service_type: event.service_type,
                end_point: event.end_point,
                destination_id: event.destination_id,
                api_id: event.api_id,
                next_span_id: event.next_span_id,
                async_id: event.async_id,
                annotations: event
                    .annotations
                    .into_iter()
                    .map(|annotation| AnnotationRecord {
                        key: annotation.key,
                        value: format!("{:?}", annotation.value),
                    })
                    .collect(),
            })
            .collect(),
    })
}

pub fn map_agent_stat(header: &Header, payload: &[u8]) -> Result<AgentStatRecord, CodecError> {
    let message = AgentStatMessage::decode(payload)?;
    Ok(AgentStatRecord {
        agent_id: header.agent_id.clone(),
        timestamp: message.timestamp,
        collect_interval_ms: message.collect_interval_ms,
        active_trace_count: message.active_trace_count,
        uptime_ms: message.uptime_ms,
        dropped_message_count: message.dropped_message_count,
    })
}

pub fn map_api_metadata(
    header: &Header,
    payload: &[u8],
) -> Result<ApiMetadataRecord, CodecError> {
    let message = ApiMetadataMessage::decode(payload)?;
    Ok(ApiMetadataRecord {
        agent_id: header.agent_id.clone(),
        agent_start_time: header.agent_start_time,
        api_id: message.api_id,
        api_info: message.api_info,
        line: message.line,
    })
}

pub fn map_agent_info(header: &Header, payload: &[u8]) -> Result<AgentInfoRecord, CodecError> {
    let message = AgentInfoMessage::decode(payload)?;
    Ok(AgentInfoRecord {
        agent_id: header.agent_id.clone(),
        agent_start_time: header.agent_start_time,
        hostname: message.hostname,
        pid: message.pid,
        agent_version: message.agent_version,
        service_type: message.service_type,
    })
}
