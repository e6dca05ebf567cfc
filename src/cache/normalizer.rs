//! Query normalizer: the engine facade.
//!
//! Owns the normalized store and reference index, consumes the host cache's
//! write queue, and exposes the public entity API. Host writes are processed
//! strictly in queue order; every entity API call drains the queue first.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use metrics::{counter, gauge};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::config::NormalizerConfig;
use super::error::NormalizerError;
use super::events::{QueryWrite, WriteKind, WriteOrigin, WriteQueue};
use super::host::QueryCache;
use super::index::{ReferenceEntry, ReferenceIndex};
use super::keys::{NormalizedKey, QueryKey};
use super::lock::mutex_lock;
use super::optimistic::{self, OptimisticUpdate};
use super::predicate::EntityPredicate;
use super::propagate::{self, PropagationReport, Propagator};
use super::record::{EntityRecord, EntityUpdate};
use super::store::NormalizedStore;
use super::walker::GraphWalker;

const SOURCE: &str = "cache::normalizer";
const METRIC_INGEST_TOTAL: &str = "querynorm_ingest_total";
const METRIC_STORE_ENTITIES: &str = "querynorm_store_entities";

#[derive(Debug, Default)]
struct EngineState {
    store: NormalizedStore,
    index: ReferenceIndex,
}

/// Point-in-time engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NormalizerStats {
    pub entities: usize,
    pub queries: usize,
    pub references: usize,
    pub pending_writes: usize,
}

/// Normalizes a host query cache into a flat entity store.
///
/// One normalizer is constructed per host cache instance. Host adapters must
/// not call back into the normalizer from inside `set_query_data`.
pub struct QueryNormalizer {
    config: NormalizerConfig,
    host: Arc<dyn QueryCache>,
    queue: Arc<WriteQueue>,
    predicate: Arc<dyn EntityPredicate>,
    state: Mutex<EngineState>,
    draining: AtomicBool,
}

impl QueryNormalizer {
    /// Create a normalizer using the predicate described by `config`.
    pub fn new(config: NormalizerConfig, host: Arc<dyn QueryCache>) -> Self {
        let predicate = config.predicate();
        Self::with_predicate(config, host, predicate)
    }

    /// Create a normalizer with an application-supplied predicate.
    pub fn with_predicate(
        config: NormalizerConfig,
        host: Arc<dyn QueryCache>,
        predicate: Arc<dyn EntityPredicate>,
    ) -> Self {
        let queue = Arc::new(WriteQueue::new());
        host.subscribe_to_writes(queue.clone());

        Self {
            config,
            host,
            queue,
            predicate,
            state: Mutex::new(EngineState::default()),
            draining: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    pub fn host(&self) -> &Arc<dyn QueryCache> {
        &self.host
    }

    pub fn queue(&self) -> &Arc<WriteQueue> {
        &self.queue
    }

    /// Process every pending host write in FIFO order.
    ///
    /// Returns the number of writes processed, or 0 if a drain is already
    /// running. Engine state is locked by a non-reentrant mutex: neither this
    /// nor any other normalizer method may be called from a host callback.
    #[instrument(skip(self), fields(pending = self.queue.len()))]
    pub fn process_pending(&self) -> usize {
        if self.draining.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let _draining = DrainGuard(&self.draining);

        let limit = self.config.drain_batch_limit_non_zero().get();
        let mut processed = 0;
        loop {
            let batch = self.queue.drain(limit);
            if batch.is_empty() {
                break;
            }
            let mut state = mutex_lock(&self.state, SOURCE, "process_pending");
            for write in batch {
                self.apply_write(&mut state, write);
                processed += 1;
            }
            gauge!(METRIC_STORE_ENTITIES).set(state.store.len() as f64);
        }

        if processed > 0 {
            debug!(processed, "Host writes drained");
        }
        processed
    }

    /// Current record for `(entity_type, id)` as a JSON object.
    pub fn get_normalized_data(&self, entity_type: &str, id: &str) -> Option<Value> {
        self.get(&NormalizedKey::new(entity_type, id))
            .map(EntityRecord::into_value)
    }

    pub fn get(&self, key: &NormalizedKey) -> Option<EntityRecord> {
        self.with_state(|state| state.store.get(key).cloned())
    }

    /// Decode the current record into `T`.
    pub fn get_normalized_as<T: DeserializeOwned>(
        &self,
        entity_type: &str,
        id: &str,
    ) -> Result<Option<T>, NormalizerError> {
        let key = NormalizedKey::new(entity_type, id);
        self.get(&key)
            .map(|record| {
                serde_json::from_value(record.into_value())
                    .map_err(|source| NormalizerError::Decode { key, source })
            })
            .transpose()
    }

    /// First record with this id regardless of type, for inspection.
    pub fn get_object_by_id(&self, id: &str) -> Option<Value> {
        self.with_state(|state| {
            state
                .store
                .find_by_id(id)
                .map(|(_, record)| record.to_value())
        })
    }

    /// Apply a patch or updater to an entity and push it into every query
    /// displaying it.
    pub fn set_normalized_data(
        &self,
        entity_type: &str,
        id: &str,
        update: impl Into<EntityUpdate>,
    ) -> Result<PropagationReport, NormalizerError> {
        self.update(&NormalizedKey::new(entity_type, id), update)
    }

    pub fn update(
        &self,
        key: &NormalizedKey,
        update: impl Into<EntityUpdate>,
    ) -> Result<PropagationReport, NormalizerError> {
        let update = update.into();
        self.mutate(|this, state| -> Result<PropagationReport, NormalizerError> {
            if !state.store.set(key, update)? {
                return Ok(PropagationReport::default());
            }
            debug!(entity = %key, "Entity updated");
            Ok(this.propagate(state, &BTreeSet::from([key.clone()]), None))
        })
    }

    /// Compute an optimistic update for an existing entity.
    ///
    /// Returns `Ok(None)` if the entity was never stored. Nothing is written;
    /// see `commit_optimistic_update` and `rollback_optimistic_update`.
    pub fn create_optimistic_update(
        &self,
        entity_type: &str,
        id: &str,
        update: impl Into<EntityUpdate>,
    ) -> Result<Option<OptimisticUpdate>, NormalizerError> {
        let key = NormalizedKey::new(entity_type, id);
        let update = update.into();
        self.with_state(|state| optimistic::prepare(&state.store, &key, update))
    }

    /// Merge the optimistic patch into the store and propagate it.
    pub fn commit_optimistic_update(&self, update: &OptimisticUpdate) -> PropagationReport {
        self.mutate(|this, state| {
            if !state.store.merge(&update.key, &update.patch) {
                return PropagationReport::default();
            }
            this.propagate(state, &BTreeSet::from([update.key.clone()]), None)
        })
    }

    /// Put back exactly the fields the optimistic update touched.
    ///
    /// Fields changed by other writers since the update was prepared are
    /// left alone.
    pub fn rollback_optimistic_update(
        &self,
        update: &OptimisticUpdate,
    ) -> Result<PropagationReport, NormalizerError> {
        self.mutate(|this, state| -> Result<PropagationReport, NormalizerError> {
            if !state.store.restore(&update.key, &update.rollback_data)? {
                return Ok(PropagationReport::default());
            }
            debug!(entity = %update.key, "Optimistic update rolled back");
            Ok(this.propagate(state, &BTreeSet::from([update.key.clone()]), None))
        })
    }

    /// Queries currently displaying any of `keys`, sorted and deduplicated.
    pub fn dependent_queries(&self, keys: &[NormalizedKey]) -> Vec<QueryKey> {
        self.with_state(|state| {
            keys.iter()
                .flat_map(|key| state.index.referencing_queries(key))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        })
    }

    pub fn references(&self, key: &NormalizedKey) -> Vec<ReferenceEntry> {
        self.with_state(|state| state.index.references(key))
    }

    /// Drop an entity from the store. Queries keep their cached value.
    pub fn evict(&self, key: &NormalizedKey) -> Option<EntityRecord> {
        self.with_state(|state| {
            let evicted = state.store.evict(key);
            if evicted.is_some() {
                debug!(entity = %key, "Entity evicted");
                gauge!(METRIC_STORE_ENTITIES).set(state.store.len() as f64);
            }
            evicted
        })
    }

    /// Forget every entity and reference.
    pub fn clear(&self) {
        self.with_state(|state| {
            state.store.clear();
            state.index.clear_all();
            gauge!(METRIC_STORE_ENTITIES).set(0.0);
        });
    }

    /// Counters as of now; pending writes are not drained first.
    pub fn stats(&self) -> NormalizerStats {
        let state = mutex_lock(&self.state, SOURCE, "stats");
        NormalizerStats {
            entities: state.store.len(),
            queries: state.index.query_count(),
            references: state.index.reference_count(),
            pending_writes: self.queue.len(),
        }
    }

    /// Every stored record, in key order.
    pub fn store_snapshot(&self) -> BTreeMap<NormalizedKey, EntityRecord> {
        self.with_state(|state| {
            state
                .store
                .iter()
                .map(|(key, record)| (key.clone(), record.clone()))
                .collect()
        })
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut EngineState) -> R) -> R {
        self.process_pending();
        let mut state = mutex_lock(&self.state, SOURCE, "with_state");
        f(&mut state)
    }

    // Drains again afterwards so the propagator's own write-backs are
    // re-indexed before the caller continues.
    fn mutate<R>(&self, f: impl FnOnce(&Self, &mut EngineState) -> R) -> R {
        self.process_pending();
        let result = {
            let mut state = mutex_lock(&self.state, SOURCE, "mutate");
            let result = f(self, &mut state);
            gauge!(METRIC_STORE_ENTITIES).set(state.store.len() as f64);
            result
        };
        self.process_pending();
        result
    }

    fn apply_write(&self, state: &mut EngineState, write: QueryWrite) {
        counter!(METRIC_INGEST_TOTAL, "origin" => write.origin.as_str()).increment(1);

        if !self.config.enabled {
            return;
        }

        match (write.kind, write.origin) {
            (WriteKind::Removed, _) => {
                state.index.clear(&write.query_key);
                debug!(
                    query_key = %write.query_key,
                    epoch = write.epoch,
                    "Query removed; references dropped"
                );
            }
            (WriteKind::Updated(value), WriteOrigin::Propagator) => {
                if let Err(err) = propagate::reindex(
                    self.predicate.as_ref(),
                    self.config.max_depth,
                    &mut state.index,
                    &write.query_key,
                    &value,
                ) {
                    warn!(
                        query_key = %write.query_key,
                        error = %err,
                        "Failed to re-index propagated query value"
                    );
                }
            }
            (WriteKind::Updated(value), WriteOrigin::External) => {
                if let Err(err) = self.ingest(state, &write.query_key, &value) {
                    warn!(
                        query_key = %write.query_key,
                        write_id = %write.id,
                        queued_at = %write.timestamp,
                        error = %err,
                        "Failed to normalize query value; write skipped"
                    );
                }
            }
        }
    }

    fn ingest(
        &self,
        state: &mut EngineState,
        query_key: &QueryKey,
        value: &Value,
    ) -> Result<(), NormalizerError> {
        let occurrences =
            GraphWalker::new(self.predicate.as_ref(), self.config.max_depth).collect(value)?;

        state.index.clear(query_key);
        let mut changed = BTreeSet::new();
        for occurrence in &occurrences {
            state.index.record(
                query_key.clone(),
                occurrence.key.clone(),
                occurrence.path.clone(),
            );
            if state.store.merge(&occurrence.key, &occurrence.attributes) {
                changed.insert(occurrence.key.clone());
            }
        }

        debug!(
            query_key = %query_key,
            entities = occurrences.len(),
            changed = changed.len(),
            "Query value normalized"
        );

        if self.config.propagate_on_ingest && !changed.is_empty() {
            // The host may already hold a newer value for the source query
            // (e.g. a propagated write-back); only skip it if it is current.
            let source_is_current =
                self.host.get_query_data(query_key).as_ref() == Some(value);
            let skip = source_is_current.then_some(query_key);
            self.propagate(state, &changed, skip);
        }
        Ok(())
    }

    fn propagate(
        &self,
        state: &mut EngineState,
        changed: &BTreeSet<NormalizedKey>,
        skip: Option<&QueryKey>,
    ) -> PropagationReport {
        let EngineState { store, index } = state;
        Propagator::new(
            self.host.as_ref(),
            self.predicate.as_ref(),
            self.config.max_depth,
        )
        .propagate(store, index, changed, skip)
    }
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
