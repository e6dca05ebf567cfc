//! Host cache adapter.
//!
//! The normalizer never fetches anything; it only sees query values through
//! this interface. `MemoryQueryCache` is a complete in-process host used by
//! the replay tool and the test suite.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use super::error::QueryCacheError;
use super::events::{WriteKind, WriteOrigin, WriteQueue};
use super::keys::QueryKey;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::host";

/// The reactive key-addressed cache the normalizer sits beside.
///
/// Every write (including `Propagator` write-backs) must be reported to the
/// subscribed queues with its origin untouched.
pub trait QueryCache: Send + Sync {
    fn subscribe_to_writes(&self, queue: Arc<WriteQueue>);

    fn get_query_data(&self, query_key: &QueryKey) -> Option<Value>;

    fn set_query_data(
        &self,
        query_key: &QueryKey,
        value: Value,
        origin: WriteOrigin,
    ) -> Result<(), QueryCacheError>;
}

/// In-memory host cache.
#[derive(Default)]
pub struct MemoryQueryCache {
    entries: RwLock<BTreeMap<QueryKey, Value>>,
    subscribers: RwLock<Vec<Arc<WriteQueue>>>,
}

impl MemoryQueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// External write, as the network layer would issue it.
    pub fn write(&self, query_key: impl Into<QueryKey>, value: Value) {
        let query_key = query_key.into();
        self.store(&query_key, value, WriteOrigin::External);
    }

    pub fn remove_query(&self, query_key: &QueryKey) -> Option<Value> {
        let removed = rw_write(&self.entries, SOURCE, "remove_query").remove(query_key);
        if removed.is_some() {
            self.notify(query_key, WriteKind::Removed, WriteOrigin::External);
        }
        removed
    }

    pub fn query_keys(&self) -> Vec<QueryKey> {
        rw_read(&self.entries, SOURCE, "query_keys")
            .keys()
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> BTreeMap<QueryKey, Value> {
        rw_read(&self.entries, SOURCE, "snapshot").clone()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn store(&self, query_key: &QueryKey, value: Value, origin: WriteOrigin) {
        rw_write(&self.entries, SOURCE, "store").insert(query_key.clone(), value.clone());
        // Entries lock is released before subscribers are notified.
        self.notify(query_key, WriteKind::Updated(value), origin);
    }

    fn notify(&self, query_key: &QueryKey, kind: WriteKind, origin: WriteOrigin) {
        for queue in rw_read(&self.subscribers, SOURCE, "notify").iter() {
            queue.publish(query_key.clone(), kind.clone(), origin);
        }
    }
}

impl QueryCache for MemoryQueryCache {
    fn subscribe_to_writes(&self, queue: Arc<WriteQueue>) {
        rw_write(&self.subscribers, SOURCE, "subscribe").push(queue);
    }

    fn get_query_data(&self, query_key: &QueryKey) -> Option<Value> {
        rw_read(&self.entries, SOURCE, "get_query_data")
            .get(query_key)
            .cloned()
    }

    fn set_query_data(
        &self,
        query_key: &QueryKey,
        value: Value,
        origin: WriteOrigin,
    ) -> Result<(), QueryCacheError> {
        self.store(query_key, value, origin);
        Ok(())
    }
}
