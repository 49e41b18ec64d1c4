// Copyright 2024-Present the spanpipe authors
// SPDX-License-Identifier: Apache-2.0

//! Classifies inbound envelopes and dispatches each to the one handler
//! that owns its payload type.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, warn};

use spanpipe_wire::envelope::Envelope;

use crate::IngestError;

/// Collector-side handler capability. Implementations are registered once
/// at startup; `accept` matching must stay static for the router's
/// lifetime — a handler whose feature is disabled still accepts and no-ops
/// inside `handle`.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn accept(&self, envelope: &Envelope) -> bool;
    async fn handle(&self, envelope: &Envelope) -> Result<(), IngestError>;
}

/// Immutable registered set of handlers. Dispatch needs no locking; the
/// handler list is read-only after construction, and unrelated messages
/// may be dispatched concurrently.
pub struct IngestRouter {
    handlers: Vec<Arc<dyn MessageHandler>>,
    unroutable: AtomicU64,
}

impl IngestRouter {
    pub fn new(handlers: Vec<Arc<dyn MessageHandler>>) -> Self {
        IngestRouter {
            handlers,
            unroutable: AtomicU64::new(0),
        }
    }

    /// Routes one envelope to the first accepting handler. A handler
    /// failure is logged and isolated: it never affects other messages or
    /// the caller's read loop.
    pub async fn dispatch(&self, envelope: &Envelope) {
        for handler in &self.handlers {
            if handler.accept(envelope) {
                if let Err(e) = handler.handle(envelope).await {
                    error!(
                        message_type = %envelope.message_type,
                        agent = %envelope.header.agent_id,
                        "handler failed, message discarded: {e}"
                    );
                }
                return;
            }
        }
        self.unroutable.fetch_add(1, Ordering::Relaxed);
        warn!(
            message_type = %envelope.message_type,
            "no handler accepted message"
        );
    }

    pub fn unroutable_count(&self) -> u64 {
        self.unroutable.load(Ordering::Relaxed)
    }
}
