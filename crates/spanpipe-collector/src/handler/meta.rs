// Copyright 2024-Present the spanpipe authors
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use spanpipe_wire::envelope::{Envelope, MessageType};

use crate::mapper;
use crate::record::ApiMetadataRecord;
use crate::router::MessageHandler;
use crate::storage::Store;
use crate::IngestError;

pub struct ApiMetadataHandler {
    store: Arc<dyn Store<ApiMetadataRecord>>,
}

impl ApiMetadataHandler {
    pub fn new(store: Arc<dyn Store<ApiMetadataRecord>>) -> Self {
        ApiMetadataHandler { store }
    }
}

#[async_trait]
impl MessageHandler for ApiMetadataHandler {
    fn accept(&self, envelope: &Envelope) -> bool {
        envelope.message_type == MessageType::ApiMetadata
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), IngestError> {
        let record = mapper::map_api_metadata(&envelope.header, &envelope.payload)?;
        debug!(
            agent = %record.agent_id,
            api_id = record.api_id,
            "handling api metadata"
        );
        self.store.save(record).await?;
        Ok(())
    }
}
