// Copyright 2024-Present the spanpipe authors
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use spanpipe_wire::envelope::{Envelope, MessageType};

use crate::mapper;
use crate::record::SpanRecord;
use crate::router::MessageHandler;
use crate::storage::Store;
use crate::IngestError;

pub struct SpanHandler {
    store: Arc<dyn Store<SpanRecord>>,
}

impl SpanHandler {
    pub fn new(store: Arc<dyn Store<SpanRecord>>) -> Self {
        SpanHandler { store }
    }
}

#[async_trait]
impl MessageHandler for SpanHandler {
    fn accept(&self, envelope: &Envelope) -> bool {
        envelope.message_type == MessageType::Span
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), IngestError> {
        let record = mapper::map_span(&envelope.header, &envelope.payload)?;
        debug!(
            transaction = %record.transaction_id,
            span_id = record.span_id,
            events = record.events.len(),
            "handling span"
        );
        self.store.save(record).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    use spanpipe_wire::envelope::Header;
    use spanpipe_wire::payload::{SpanMessage, NONE_SPAN_ID};

    use crate::storage::MemoryStore;

    fn span_envelope() -> Envelope {
        let message = SpanMessage {
            transaction_sequence: 1,
            span_id: 10,
            parent_span_id: NONE_SPAN_ID,
            flags: 0,
            start_time: 5,
            elapsed: 2,
            service_type: 1000,
            end_point: String::new(),
            events: Vec::new(),
        };
        Envelope::new(Header::new("agent-h", 3), MessageType::Span, message.encode())
    }

    #[tokio::test]
    async fn test_accepts_only_span_messages() {
        let handler = SpanHandler::new(Arc::new(MemoryStore::new()));
        let envelope = span_envelope();
        assert!(handler.accept(&envelope));

        let other = Envelope::new(Header::new("a", 0), MessageType::AgentStat, Bytes::new());
        assert!(!handler.accept(&other));
    }

    #[tokio::test]
    async fn test_handle_stores_mapped_record() {
        let store = Arc::new(MemoryStore::<SpanRecord>::new());
        let handler = SpanHandler::new(Arc::clone(&store) as Arc<dyn Store<SpanRecord>>);

        handler.handle(&span_envelope()).await.unwrap();

        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].span_id, 10);
        assert_eq!(records[0].transaction_id, "agent-h^3^1");
    }

    #[tokio::test]
    async fn test_garbage_payload_is_a_codec_error() {
        let handler = SpanHandler::new(Arc::new(MemoryStore::new()));
        let envelope = Envelope::new(
            Header::new("a", 0),
            MessageType::Span,
            Bytes::from_static(&[9, 9]),
        );
        let err = handler.handle(&envelope).await.unwrap_err();
        assert!(matches!(err, IngestError::Codec(_)));
    }
}
