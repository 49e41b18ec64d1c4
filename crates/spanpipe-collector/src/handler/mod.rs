// Copyright 2024-Present the spanpipe authors
// SPDX-License-Identifier: Apache-2.0

//! One handler per payload type. Each pairs a mapper with a storage
//! capability; registration happens once at collector startup.

mod agent;
mod meta;
mod span;
mod stat;

pub use agent::AgentInfoHandler;
pub use meta::ApiMetadataHandler;
pub use span::SpanHandler;
pub use stat::AgentStatHandler;

use std::sync::Arc;

use crate::config::CollectorConfig;
use crate::record::{AgentInfoRecord, AgentStatRecord, ApiMetadataRecord, SpanRecord};
use crate::router::MessageHandler;
use crate::storage::Store;

/// The full default handler set, in registration order.
pub fn default_handlers(
    config: &CollectorConfig,
    span_store: Arc<dyn Store<SpanRecord>>,
    stat_store: Arc<dyn Store<AgentStatRecord>>,
    meta_store: Arc<dyn Store<ApiMetadataRecord>>,
    agent_store: Arc<dyn Store<AgentInfoRecord>>,
) -> Vec<Arc<dyn MessageHandler>> {
    vec![
        Arc::new(SpanHandler::new(span_store)),
        Arc::new(AgentStatHandler::new(config.stat_enabled, stat_store)),
        Arc::new(ApiMetadataHandler::new(meta_store)),
        Arc::new(AgentInfoHandler::new(agent_store)),
    ]
}
