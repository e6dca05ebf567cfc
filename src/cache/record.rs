//! Entity records, updates and rollback snapshots.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::NormalizerError;
use super::keys::NormalizedKey;

/// Merged attributes of one entity.
///
/// A field that was never written is absent; a field written as `null` is
/// present with `Value::Null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityRecord {
    fields: Map<String, Value>,
}

impl EntityRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }

    /// Overwrite the fields present in `patch`. Returns true if anything changed.
    pub(crate) fn apply(&mut self, patch: &Map<String, Value>) -> bool {
        let mut changed = false;
        for (field, value) in patch {
            if self.fields.get(field) != Some(value) {
                self.fields.insert(field.clone(), value.clone());
                changed = true;
            }
        }
        changed
    }

    /// Put back exactly the fields captured in `snapshot`.
    pub(crate) fn restore(&mut self, snapshot: &CacheSnapshot) -> bool {
        let mut changed = false;
        for (field, previous) in &snapshot.fields {
            match previous {
                Some(value) => {
                    if self.fields.get(field) != Some(value) {
                        self.fields.insert(field.clone(), value.clone());
                        changed = true;
                    }
                }
                None => changed |= self.fields.remove(field).is_some(),
            }
        }
        changed
    }

    /// Capture the current values of the fields `patch` is about to touch.
    pub fn snapshot_for(&self, patch: &Map<String, Value>) -> CacheSnapshot {
        CacheSnapshot {
            fields: patch
                .keys()
                .map(|field| (field.clone(), self.fields.get(field).cloned()))
                .collect(),
        }
    }
}

impl From<Map<String, Value>> for EntityRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self::from_map(fields)
    }
}

/// Partial record holding only the fields an optimistic update touches.
///
/// `None` marks a field that did not exist before the update; restoring the
/// snapshot removes it again.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheSnapshot {
    fields: BTreeMap<String, Option<Value>>,
}

impl CacheSnapshot {
    /// Previous value of `field`, if it existed.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).and_then(Option::as_ref)
    }

    pub fn contains_key(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn was_absent(&self, field: &str) -> bool {
        matches!(self.fields.get(field), Some(None))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Present fields only, as a JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .filter_map(|(field, value)| Some((field.clone(), value.clone()?)))
                .collect(),
        )
    }
}

type Updater = Box<dyn FnOnce(&EntityRecord) -> Result<Value, String>>;

/// A change to one entity: a literal partial object or a function of the
/// current record.
pub enum EntityUpdate {
    Patch(Value),
    With(Updater),
}

impl EntityUpdate {
    pub fn patch(value: Value) -> Self {
        Self::Patch(value)
    }

    pub fn with<F>(updater: F) -> Self
    where
        F: FnOnce(&EntityRecord) -> Value + 'static,
    {
        Self::With(Box::new(
            move |current: &EntityRecord| -> Result<Value, String> { Ok(updater(current)) },
        ))
    }

    /// Updater that may fail; the error is reported as `MalformedUpdate`.
    pub fn try_with<F, E>(updater: F) -> Self
    where
        F: FnOnce(&EntityRecord) -> Result<Value, E> + 'static,
        E: fmt::Display,
    {
        Self::With(Box::new(
            move |current: &EntityRecord| -> Result<Value, String> {
                updater(current).map_err(|err| err.to_string())
            },
        ))
    }

    pub fn is_updater(&self) -> bool {
        matches!(self, Self::With(_))
    }

    /// Turn the update into a concrete patch against `current`.
    pub(crate) fn resolve(
        self,
        key: &NormalizedKey,
        current: &EntityRecord,
    ) -> Result<Map<String, Value>, NormalizerError> {
        let patch = match self {
            Self::Patch(value) => value,
            Self::With(updater) => {
                updater(current).map_err(|reason| NormalizerError::malformed(key, reason))?
            }
        };
        match patch {
            Value::Object(fields) => Ok(fields),
            other => Err(NormalizerError::malformed(
                key,
                format!("patch must be a JSON object, got {}", kind_of(&other)),
            )),
        }
    }
}

impl From<Value> for EntityUpdate {
    fn from(value: Value) -> Self {
        Self::Patch(value)
    }
}

impl From<Map<String, Value>> for EntityUpdate {
    fn from(fields: Map<String, Value>) -> Self {
        Self::Patch(Value::Object(fields))
    }
}

impl fmt::Debug for EntityUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Patch(value) => f.debug_tuple("Patch").field(value).finish(),
            Self::With(_) => f.write_str("With(<updater>)"),
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
