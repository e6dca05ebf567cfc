//! Bidirectional reference index.
//!
//! Tracks where every entity currently appears in every cached query result,
//! so an entity change can be pushed to exactly the queries displaying it.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;

use super::keys::{AccessPath, NormalizedKey, QueryKey};

/// One place an entity occupies: a query and the path inside its value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ReferenceEntry {
    pub query_key: QueryKey,
    pub path: AccessPath,
}

/// Tracks entity → (query, path) and query → entities mappings.
///
/// Paths are only valid for a query's last indexed value. Callers clear a
/// query before re-indexing it instead of patching paths incrementally.
#[derive(Debug, Default)]
pub struct ReferenceIndex {
    entity_to_refs: HashMap<NormalizedKey, HashSet<ReferenceEntry>>,
    query_to_entities: HashMap<QueryKey, HashSet<NormalizedKey>>,
}

impl ReferenceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `key` sits at `path` inside `query_key`'s value.
    pub fn record(&mut self, query_key: QueryKey, key: NormalizedKey, path: AccessPath) {
        self.query_to_entities
            .entry(query_key.clone())
            .or_default()
            .insert(key.clone());
        self.entity_to_refs
            .entry(key)
            .or_default()
            .insert(ReferenceEntry { query_key, path });
    }

    /// All queries currently displaying `key`, in key order.
    pub fn referencing_queries(&self, key: &NormalizedKey) -> BTreeSet<QueryKey> {
        self.entity_to_refs
            .get(key)
            .map(|refs| refs.iter().map(|entry| entry.query_key.clone()).collect())
            .unwrap_or_default()
    }

    /// Every (query, path) occurrence of `key`, sorted.
    pub fn references(&self, key: &NormalizedKey) -> Vec<ReferenceEntry> {
        let mut entries: Vec<_> = self
            .entity_to_refs
            .get(key)
            .map(|refs| refs.iter().cloned().collect())
            .unwrap_or_default();
        entries.sort();
        entries
    }

    pub fn entities_for_query(&self, query_key: &QueryKey) -> HashSet<NormalizedKey> {
        self.query_to_entities
            .get(query_key)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop every reference owned by `query_key`.
    ///
    /// Called before re-indexing a query and when the host removes it.
    pub fn clear(&mut self, query_key: &QueryKey) {
        let Some(entities) = self.query_to_entities.remove(query_key) else {
            return;
        };
        for entity in entities {
            if let Some(refs) = self.entity_to_refs.get_mut(&entity) {
                refs.retain(|entry| &entry.query_key != query_key);
                if refs.is_empty() {
                    self.entity_to_refs.remove(&entity);
                }
            }
        }
    }

    pub fn clear_all(&mut self) {
        self.entity_to_refs.clear();
        self.query_to_entities.clear();
    }

    /// Number of entities referenced by at least one query.
    pub fn entity_count(&self) -> usize {
        self.entity_to_refs.len()
    }

    /// Number of queries holding at least one entity.
    pub fn query_count(&self) -> usize {
        self.query_to_entities.len()
    }

    pub fn reference_count(&self) -> usize {
        self.entity_to_refs.values().map(HashSet::len).sum()
    }
}
