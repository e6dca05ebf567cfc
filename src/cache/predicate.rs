//! Entity predicates.
//!
//! A predicate is the only schema knowledge the engine has: it decides whether
//! a JSON value is a normalizable entity and derives its `NormalizedKey`.
//! Predicates are called for every object the engine walks, so they must be
//! pure and cheap.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::keys::NormalizedKey;

/// Decides whether a JSON value is an entity.
///
/// Implementations must reject primitives, arrays and objects without an
/// identity, and must return the same key for the same object every time.
/// Returning different keys for structurally similar objects cannot be
/// detected by the engine and leads to duplicated or merged entities.
pub trait EntityPredicate: Send + Sync {
    fn normalized_key(&self, value: &Value) -> Option<NormalizedKey>;
}

impl<F> EntityPredicate for F
where
    F: Fn(&Value) -> Option<NormalizedKey> + Send + Sync,
{
    fn normalized_key(&self, value: &Value) -> Option<NormalizedKey> {
        self(value)
    }
}

/// Treats every object carrying an id field as an entity keyed by id alone.
#[derive(Debug, Clone)]
pub struct IdPredicate {
    id_field: String,
}

impl IdPredicate {
    pub fn new(id_field: impl Into<String>) -> Self {
        Self {
            id_field: id_field.into(),
        }
    }
}

impl EntityPredicate for IdPredicate {
    fn normalized_key(&self, value: &Value) -> Option<NormalizedKey> {
        let object = value.as_object()?;
        identity(object, &self.id_field).map(NormalizedKey::untyped)
    }
}

/// Requires both a type discriminator and an id.
///
/// `type_fields` are checked in order and the first one holding a non-empty
/// string wins, so an object carrying both `type_name` and `__typename` is
/// keyed by whichever field is listed first.
#[derive(Debug, Clone)]
pub struct DiscriminatorPredicate {
    type_fields: Vec<String>,
    id_field: String,
}

impl DiscriminatorPredicate {
    pub fn new<I, S>(type_fields: I, id_field: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            type_fields: type_fields.into_iter().map(Into::into).collect(),
            id_field: id_field.into(),
        }
    }

    pub fn type_fields(&self) -> &[String] {
        &self.type_fields
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }
}

impl EntityPredicate for DiscriminatorPredicate {
    fn normalized_key(&self, value: &Value) -> Option<NormalizedKey> {
        let object = value.as_object()?;
        let entity_type = self.type_fields.iter().find_map(|field| {
            object
                .get(field)
                .and_then(Value::as_str)
                .filter(|name| !name.is_empty())
        })?;
        let id = identity(object, &self.id_field)?;
        Some(NormalizedKey::new(entity_type, id))
    }
}

/// Build the stock predicate for a discriminator configuration.
///
/// An empty `type_fields` list selects id-only normalization.
pub fn from_fields(type_fields: &[String], id_field: &str) -> Arc<dyn EntityPredicate> {
    if type_fields.is_empty() {
        Arc::new(IdPredicate::new(id_field))
    } else {
        Arc::new(DiscriminatorPredicate::new(
            type_fields.iter().cloned(),
            id_field,
        ))
    }
}

// Integer ids are accepted and stringified; floats, booleans and empty
// strings are not identities.
fn identity(object: &Map<String, Value>, field: &str) -> Option<String> {
    match object.get(field)? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) if id.is_i64() || id.is_u64() => Some(id.to_string()),
        _ => None,
    }
}
