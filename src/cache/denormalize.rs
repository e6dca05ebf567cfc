//! Denormalizer: rebuilds a cached query value from the normalized store.

use serde_json::{Map, Value};

use super::error::NormalizerError;
use super::keys::NormalizedKey;
use super::predicate::EntityPredicate;
use super::store::NormalizedStore;

/// Substitutes current entity records into a previously cached value.
///
/// The output has the same shape as the input: wrapper keys, scalars and
/// array order/length are untouched. At each entity position the store's
/// record is merged over the local attributes (store wins), and the result is
/// rebuilt again so nested entities are refreshed too.
pub struct Denormalizer<'a> {
    predicate: &'a dyn EntityPredicate,
    store: &'a NormalizedStore,
    max_depth: usize,
}

impl<'a> Denormalizer<'a> {
    pub fn new(
        predicate: &'a dyn EntityPredicate,
        store: &'a NormalizedStore,
        max_depth: usize,
    ) -> Self {
        Self {
            predicate,
            store,
            max_depth,
        }
    }

    pub fn denormalize(&self, cached: &Value) -> Result<Value, NormalizerError> {
        let mut expanding = Vec::new();
        self.rebuild(cached, 0, &mut expanding)
    }

    // `expanding` holds the entity keys being expanded on the current path.
    // A record that (transitively) embeds itself is left as cached at the
    // inner position, otherwise store substitution would never terminate.
    fn rebuild(
        &self,
        value: &Value,
        depth: usize,
        expanding: &mut Vec<NormalizedKey>,
    ) -> Result<Value, NormalizerError> {
        // Same limit as the walker: only containers count against it.
        if depth > self.max_depth && (value.is_array() || value.is_object()) {
            return Err(NormalizerError::DepthExceeded {
                limit: self.max_depth,
            });
        }

        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| self.rebuild(item, depth + 1, expanding))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(object) => match self.predicate.normalized_key(value) {
                Some(key) if expanding.contains(&key) => Ok(value.clone()),
                Some(key) => {
                    let mut merged = object.clone();
                    if let Some(record) = self.store.get(&key) {
                        for (field, fresh) in record.fields() {
                            merged.insert(field.clone(), fresh.clone());
                        }
                    }
                    expanding.push(key);
                    let rebuilt = self.rebuild_fields(&merged, depth, expanding);
                    expanding.pop();
                    rebuilt
                }
                None => self.rebuild_fields(object, depth, expanding),
            },
            scalar => Ok(scalar.clone()),
        }
    }

    fn rebuild_fields(
        &self,
        object: &Map<String, Value>,
        depth: usize,
        expanding: &mut Vec<NormalizedKey>,
    ) -> Result<Value, NormalizerError> {
        let mut out = Map::with_capacity(object.len());
        for (field, child) in object {
            out.insert(field.clone(), self.rebuild(child, depth + 1, expanding)?);
        }
        Ok(Value::Object(out))
    }
}
