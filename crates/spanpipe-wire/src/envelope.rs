// Copyright 2024-Present the spanpipe authors
// SPDX-License-Identifier: Apache-2.0

//! Message envelope: `{header, message_type, payload}`.
//!
//! The header carries the agent identity and transaction-correlation fields
//! needed to reconstruct TraceId context on the collector. The payload is
//! opaque at this layer; `message_type` tells the ingestion router which
//! typed codec owns it.

use bytes::{BufMut, Bytes, BytesMut};

use crate::buf::{put_string, ByteReader};
use crate::CodecError;

/// Agent identity and transaction-correlation metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub agent_id: String,
    pub agent_start_time: i64,
    pub transaction_sequence: u64,
}

impl Header {
    pub fn new(agent_id: impl Into<String>, agent_start_time: i64) -> Self {
        Header {
            agent_id: agent_id.into(),
            agent_start_time,
            transaction_sequence: 0,
        }
    }
}

/// The closed set of payload kinds. Adding a kind is a compile-time change
/// here plus a handler on the collector side; there is no runtime
/// registration of new tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    AgentInfo,
    ApiMetadata,
    Span,
    AgentStat,
}

impl MessageType {
    pub fn tag(self) -> u8 {
        match self {
            MessageType::AgentInfo => 0x10,
            MessageType::ApiMetadata => 0x11,
            MessageType::Span => 0x20,
            MessageType::AgentStat => 0x30,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, CodecError> {
        match tag {
            0x10 => Ok(MessageType::AgentInfo),
            0x11 => Ok(MessageType::ApiMetadata),
            0x20 => Ok(MessageType::Span),
            0x30 => Ok(MessageType::AgentStat),
            unknown => Err(CodecError::UnknownMessageType(unknown)),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageType::AgentInfo => "agent-info",
            MessageType::ApiMetadata => "api-metadata",
            MessageType::Span => "span",
            MessageType::AgentStat => "agent-stat",
        };
        f.write_str(name)
    }
}

/// One wire unit: header, payload discriminator, opaque payload bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub header: Header,
    pub message_type: MessageType,
    pub payload: Bytes,
}

impl Envelope {
    pub fn new(header: Header, message_type: MessageType, payload: Bytes) -> Self {
        Envelope {
            header,
            message_type,
            payload,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(self.message_type.tag());
        put_string(&mut buf, &self.header.agent_id);
        buf.put_i64(self.header.agent_start_time);
        buf.put_u64(self.header.transaction_sequence);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    pub fn decode(bytes: &[u8]) -> Result<Envelope, CodecError> {
        let mut r = ByteReader::new(bytes);
        let message_type = MessageType::from_tag(r.u8("envelope.message_type")?)?;
        let agent_id = r.string("envelope.agent_id")?;
        let agent_start_time = r.i64("envelope.agent_start_time")?;
        let transaction_sequence = r.u64("envelope.transaction_sequence")?;
        let payload = Bytes::copy_from_slice(&bytes[bytes.len() - r.remaining()..]);
        Ok(Envelope {
            header: Header {
                agent_id,
                agent_start_time,
                transaction_sequence,
            },
            message_type,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_round_trip() {
        let header = Header {
            agent_id: "agent-7".into(),
            agent_start_time: 1_700_000_000_000,
            transaction_sequence: 31,
        };
        let envelope = Envelope::new(
            header,
            MessageType::Span,
            Bytes::from_static(&[1, 2, 3, 4]),
        );

        let decoded = Envelope::decode(&envelope.encode()).expect("decode failed");
        assert_eq!(envelope, decoded);
    }

    #[test]
    fn test_empty_payload_round_trip() {
        let envelope = Envelope::new(
            Header::new("a", 0),
            MessageType::AgentInfo,
            Bytes::new(),
        );
        let decoded = Envelope::decode(&envelope.encode()).expect("decode failed");
        assert_eq!(decoded.payload.len(), 0);
    }

    #[test]
    fn test_unknown_message_tag_is_an_error() {
        let mut bytes = Envelope::new(Header::new("a", 0), MessageType::Span, Bytes::new())
            .encode()
            .to_vec();
        bytes[0] = 0x7f;
        let err = Envelope::decode(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::UnknownMessageType(0x7f)));
    }

    #[test]
    fn test_message_type_tags_are_stable() {
        for mt in [
            MessageType::AgentInfo,
            MessageType::ApiMetadata,
            MessageType::Span,
            MessageType::AgentStat,
        ] {
            assert_eq!(MessageType::from_tag(mt.tag()).unwrap(), mt);
        }
    }
}
