//! Immutable trace identifiers and parent-child derivation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::Rng;

pub use spanpipe_wire::payload::NONE_SPAN_ID;

/// Uniquely names one distributed transaction: agent identity plus a
/// per-process monotonic sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionId {
    pub agent_id: Arc<str>,
    pub agent_start_time: i64,
    pub sequence: u64,
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}^{}^{}",
            self.agent_id, self.agent_start_time, self.sequence
        )
    }
}

/// Mints sequential transaction ids for one agent.
#[derive(Debug)]
pub struct TransactionIdSource {
    agent_id: Arc<str>,
    agent_start_time: i64,
    next_sequence: AtomicU64,
}

impl TransactionIdSource {
    pub fn new(agent_id: impl Into<Arc<str>>, agent_start_time: i64) -> Self {
        TransactionIdSource {
            agent_id: agent_id.into(),
            agent_start_time,
            next_sequence: AtomicU64::new(0),
        }
    }

    pub fn agent_id(&self) -> &Arc<str> {
        &self.agent_id
    }

    pub fn agent_start_time(&self) -> i64 {
        self.agent_start_time
    }

    pub fn next(&self) -> TransactionId {
        TransactionId {
            agent_id: Arc::clone(&self.agent_id),
            agent_start_time: self.agent_start_time,
            sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
        }
    }
}

/// The causal identifier triple for one unit of work. Immutable once
/// created; [`TraceId::derive_next`] is the only way to express "that call
/// was caused by this span".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceId {
    transaction_id: TransactionId,
    parent_span_id: i64,
    span_id: i64,
    flags: u16,
}

impl TraceId {
    /// Root identifier: no parent, fresh span id.
    pub fn new_root(transaction_id: TransactionId) -> Self {
        TraceId {
            transaction_id,
            parent_span_id: NONE_SPAN_ID,
            span_id: new_span_id(),
            flags: 0,
        }
    }

    /// Reconstructs an identifier received from an upstream caller.
    pub fn from_parts(
        transaction_id: TransactionId,
        parent_span_id: i64,
        span_id: i64,
        flags: u16,
    ) -> Self {
        TraceId {
            transaction_id,
            parent_span_id,
            span_id,
            flags,
        }
    }

    /// The identifier a downstream causally-linked call will use as its
    /// own: same transaction, this span as parent, fresh span id.
    pub fn derive_next(&self) -> TraceId {
        TraceId {
            transaction_id: self.transaction_id.clone(),
            parent_span_id: self.span_id,
            span_id: new_span_id(),
            flags: self.flags,
        }
    }

    pub fn transaction_id(&self) -> &TransactionId {
        &self.transaction_id
    }

    pub fn parent_span_id(&self) -> i64 {
        self.parent_span_id
    }

    pub fn span_id(&self) -> i64 {
        self.span_id
    }

    pub fn flags(&self) -> u16 {
        self.flags
    }

    pub fn is_root(&self) -> bool {
        self.parent_span_id == NONE_SPAN_ID
    }
}

/// Random 64-bit span id, excluding the "none" sentinel. 63+ bits of
/// entropy keeps fleet-wide collision odds negligible.
fn new_span_id() -> i64 {
    let mut rng = rand::rng();
    loop {
        let id: i64 = rng.random();
        if id != NONE_SPAN_ID {
            return id;
        }
    }
}
