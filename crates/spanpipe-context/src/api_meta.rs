//! API-descriptor interning.
//!
//! Call sites record an `api_id` instead of repeating full descriptor
//! strings on every event; the registry interns descriptors once and
//! notifies a listener the first time each is seen so the transport can
//! publish the id-to-descriptor mapping to the collector.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use spanpipe_wire::payload::ApiMetadataMessage;

pub trait MetadataListener: Send + Sync {
    fn on_new_api(&self, metadata: ApiMetadataMessage);
}

/// Listener used before the transport is wired up.
#[derive(Debug, Default)]
pub struct NullMetadataListener;

impl MetadataListener for NullMetadataListener {
    fn on_new_api(&self, _metadata: ApiMetadataMessage) {}
}

pub struct ApiMetaRegistry {
    listener: Arc<dyn MetadataListener>,
    next_id: AtomicI32,
    by_descriptor: Mutex<HashMap<(String, i32), i32>>,
}

impl ApiMetaRegistry {
    pub fn new(listener: Arc<dyn MetadataListener>) -> Self {
        ApiMetaRegistry {
            listener,
            next_id: AtomicI32::new(1),
            by_descriptor: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the interned id for a descriptor, assigning one and
    /// notifying the listener on first sight.
    pub fn register(&self, api_info: &str, line: i32) -> i32 {
        let mut table = self
            .by_descriptor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = table.get(&(api_info.to_string(), line)) {
            return *id;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        table.insert((api_info.to_string(), line), id);
        drop(table);

        self.listener.on_new_api(ApiMetadataMessage {
            api_id: id,
            api_info: api_info.to_string(),
            line,
        });
        id
    }
}
