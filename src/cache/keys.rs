//! Identity types for the normalization engine.
//!
//! `NormalizedKey` names one logical entity, `QueryKey` names one cached query
//! result, and `AccessPath` locates a position inside a query's JSON value.

use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::Value;

/// Globally unique identity of a domain entity: `(type, id)`.
///
/// Two objects with the same key are the same entity regardless of which
/// query produced them. The id-only predicate uses an empty type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NormalizedKey {
    pub entity_type: String,
    pub id: String,
}

impl NormalizedKey {
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Key for entities detected without a type discriminator.
    pub fn untyped(id: impl Into<String>) -> Self {
        Self::new(String::new(), id)
    }
}

impl fmt::Display for NormalizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entity_type.is_empty() {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{}:{}", self.entity_type, self.id)
        }
    }
}

/// Key of a cached query result in the host cache.
///
/// Host query keys are arbitrary JSON (usually an array such as
/// `["projects", {"org": "acme"}]`). The key is stored in its canonical
/// serialized form so it can be hashed and ordered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(String);

impl QueryKey {
    pub fn new(parts: &Value) -> Self {
        Self(parts.to_string())
    }

    /// Build a key from plain string segments, e.g. `["single"]`.
    pub fn from_parts<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let parts = parts
            .into_iter()
            .map(|part| Value::String(part.into()))
            .collect();
        Self::new(&Value::Array(parts))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        serde_json::from_str(&self.0).unwrap_or_else(|_| Value::String(self.0.clone()))
    }
}

impl From<&str> for QueryKey {
    fn from(value: &str) -> Self {
        Self::from_parts([value])
    }
}

impl From<Value> for QueryKey {
    fn from(value: Value) -> Self {
        Self::new(&value)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for QueryKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

/// One step from a JSON container into a child.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Sequence of object keys and array indices from a query's root value down
/// to one position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccessPath(Vec<PathSegment>);

impl AccessPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn child_key(&self, key: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Key(key.to_string()));
        Self(segments)
    }

    pub fn child_index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Follow the path inside `value`.
    pub fn resolve<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.0
            .iter()
            .try_fold(value, |current, segment| match segment {
                PathSegment::Key(key) => current.as_object()?.get(key),
                PathSegment::Index(index) => current.as_array()?.get(*index),
            })
    }
}

impl FromIterator<PathSegment> for AccessPath {
    fn from_iter<T: IntoIterator<Item = PathSegment>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("$")?;
        for segment in &self.0 {
            match segment {
                PathSegment::Key(key) => write!(f, ".{key}")?,
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

impl Serialize for AccessPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
