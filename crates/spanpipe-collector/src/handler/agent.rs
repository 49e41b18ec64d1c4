// Copyright 2024-Present the spanpipe authors
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use spanpipe_wire::envelope::{Envelope, MessageType};

use crate::mapper;
use crate::record::AgentInfoRecord;
use crate::router::MessageHandler;
use crate::storage::Store;
use crate::IngestError;

pub struct AgentInfoHandler {
    store: Arc<dyn Store<AgentInfoRecord>>,
}

impl AgentInfoHandler {
    pub fn new(store: Arc<dyn Store<AgentInfoRecord>>) -> Self {
        AgentInfoHandler { store }
    }
}

#[async_trait]
impl MessageHandler for AgentInfoHandler {
    fn accept(&self, envelope: &Envelope) -> bool {
        envelope.message_type == MessageType::AgentInfo
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), IngestError> {
        let record = mapper::map_agent_info(&envelope.header, &envelope.payload)?;
        info!(
            agent = %record.agent_id,
            hostname = %record.hostname,
            version = %record.agent_version,
            "agent registered"
        );
        self.store.save(record).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use spanpipe_wire::envelope::Header;
    use spanpipe_wire::payload::AgentInfoMessage;

    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn test_handle_stores_agent_registration() {
        let store = Arc::new(MemoryStore::<AgentInfoRecord>::new());
        let handler = AgentInfoHandler::new(Arc::clone(&store) as Arc<dyn Store<AgentInfoRecord>>);

        let message = AgentInfoMessage {
            hostname: "host-9".into(),
            pid: 77,
            agent_version: "0.1.0".into(),
            service_type: 1000,
            start_time: 123,
        };
        let envelope = Envelope::new(
            Header::new("agent-reg", 123),
            MessageType::AgentInfo,
            message.encode(),
        );

        handler.handle(&envelope).await.unwrap();
        assert_eq!(store.records()[0].pid, 77);
    }
}
