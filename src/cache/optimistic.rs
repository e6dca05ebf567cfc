//! Optimistic update computation.

use serde_json::{Map, Value};

use super::error::NormalizerError;
use super::keys::NormalizedKey;
use super::record::{CacheSnapshot, EntityRecord, EntityUpdate};
use super::store::NormalizedStore;

/// A tentative entity change and the data needed to undo it.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticUpdate {
    pub key: NormalizedKey,
    /// Resolved patch; committing merges exactly these fields.
    pub patch: Map<String, Value>,
    /// Current record with `patch` applied, for immediate rendering.
    pub optimistic_data: EntityRecord,
    /// Pre-update values of the patched fields only.
    pub rollback_data: CacheSnapshot,
}

impl OptimisticUpdate {
    pub fn optimistic_value(&self) -> Value {
        self.optimistic_data.to_value()
    }

    pub fn rollback_value(&self) -> Value {
        self.rollback_data.to_value()
    }
}

/// Compute an optimistic update without touching the store.
///
/// Returns `Ok(None)` for an entity that was never stored: there is nothing
/// to roll back to, so the caller falls back to a pessimistic flow.
pub fn prepare(
    store: &NormalizedStore,
    key: &NormalizedKey,
    update: EntityUpdate,
) -> Result<Option<OptimisticUpdate>, NormalizerError> {
    let Some(current) = store.get(key) else {
        return Ok(None);
    };

    let patch = update.resolve(key, current)?;
    let rollback_data = current.snapshot_for(&patch);
    let mut optimistic_data = current.clone();
    optimistic_data.apply(&patch);

    Ok(Some(OptimisticUpdate {
        key: key.clone(),
        patch,
        optimistic_data,
        rollback_data,
    }))
}
