// Copyright 2024-Present the spanpipe authors
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use spanpipe_wire::envelope::{Envelope, MessageType};

use crate::mapper;
use crate::record::AgentStatRecord;
use crate::router::MessageHandler;
use crate::storage::Store;
use crate::IngestError;

/// Agent-stat ingestion. When disabled by configuration the handler keeps
/// accepting its message type — accept-matching stays static — and simply
/// stores nothing.
pub struct AgentStatHandler {
    enabled: bool,
    store: Arc<dyn Store<AgentStatRecord>>,
}

impl AgentStatHandler {
    pub fn new(enabled: bool, store: Arc<dyn Store<AgentStatRecord>>) -> Self {
        AgentStatHandler { enabled, store }
    }
}

#[async_trait]
impl MessageHandler for AgentStatHandler {
    fn accept(&self, envelope: &Envelope) -> bool {
        envelope.message_type == MessageType::AgentStat
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), IngestError> {
        if !self.enabled {
            return Ok(());
        }
        let record = mapper::map_agent_stat(&envelope.header, &envelope.payload)?;
        debug!(agent = %record.agent_id, "handling agent stat");
        self.store.save(record).await?;
        Ok(())
    }
}
