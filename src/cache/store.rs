//! Normalized store: the single source of truth for entity state.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::error::NormalizerError;
use super::keys::NormalizedKey;
use super::record::{CacheSnapshot, EntityRecord, EntityUpdate};

/// Flat mapping from `NormalizedKey` to the entity's merged attributes.
///
/// Exactly one record exists per key. Writes merge attribute by attribute, so
/// a partial object arriving through a list query never erases fields a
/// detail query wrote earlier.
#[derive(Debug, Default)]
pub struct NormalizedStore {
    records: BTreeMap<NormalizedKey, EntityRecord>,
}

impl NormalizedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &NormalizedKey) -> Option<&EntityRecord> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &NormalizedKey) -> bool {
        self.records.contains_key(key)
    }

    /// Shallow-merge `partial` onto the record, creating it if absent.
    ///
    /// Returns true if the record was created or any field changed.
    pub fn merge(&mut self, key: &NormalizedKey, partial: &Map<String, Value>) -> bool {
        match self.records.get_mut(key) {
            Some(record) => record.apply(partial),
            None => {
                self.records
                    .insert(key.clone(), EntityRecord::from_map(partial.clone()));
                true
            }
        }
    }

    /// Apply a literal patch or an updater to the record.
    ///
    /// A literal patch on an unknown key creates the record; an updater on an
    /// unknown key fails with `UnknownEntity` since there is nothing to read.
    pub fn set(
        &mut self,
        key: &NormalizedKey,
        update: EntityUpdate,
    ) -> Result<bool, NormalizerError> {
        let patch = match self.records.get(key) {
            Some(current) => update.resolve(key, current)?,
            None if update.is_updater() => {
                return Err(NormalizerError::UnknownEntity { key: key.clone() });
            }
            None => update.resolve(key, &EntityRecord::new())?,
        };
        Ok(self.merge(key, &patch))
    }

    /// Put back the fields captured by an optimistic update.
    pub fn restore(
        &mut self,
        key: &NormalizedKey,
        snapshot: &CacheSnapshot,
    ) -> Result<bool, NormalizerError> {
        self.records
            .get_mut(key)
            .map(|record| record.restore(snapshot))
            .ok_or_else(|| NormalizerError::UnknownEntity { key: key.clone() })
    }

    pub fn evict(&mut self, key: &NormalizedKey) -> Option<EntityRecord> {
        self.records.remove(key)
    }

    /// First record (in key order) whose id matches, regardless of type.
    pub fn find_by_id(&self, id: &str) -> Option<(&NormalizedKey, &EntityRecord)> {
        self.records.iter().find(|(key, _)| key.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NormalizedKey, &EntityRecord)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
