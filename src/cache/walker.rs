//! Graph walker.
//!
//! Finds every embedded entity in an arbitrary JSON value. Traversal is
//! iterative with an explicit stack and a depth guard, so deeply nested
//! responses cannot overflow the call stack.

use serde_json::{Map, Value};

use super::error::NormalizerError;
use super::keys::{AccessPath, NormalizedKey};
use super::predicate::EntityPredicate;

/// One entity occurrence found by the walker.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityOccurrence {
    pub key: NormalizedKey,
    pub attributes: Map<String, Value>,
    pub path: AccessPath,
}

pub struct GraphWalker<'a> {
    predicate: &'a dyn EntityPredicate,
    max_depth: usize,
}

impl<'a> GraphWalker<'a> {
    pub fn new(predicate: &'a dyn EntityPredicate, max_depth: usize) -> Self {
        Self {
            predicate,
            max_depth,
        }
    }

    /// Visit every entity in `root` in document order.
    ///
    /// `on_entity` receives the entity's own attributes (nested entities are
    /// left embedded) and its path from `root`. The walk continues into an
    /// entity's fields after the callback, so entities inside entities are
    /// reported too. Returns the number of entities visited.
    pub fn walk<F>(&self, root: &Value, mut on_entity: F) -> Result<usize, NormalizerError>
    where
        F: FnMut(&NormalizedKey, &Map<String, Value>, &AccessPath),
    {
        let mut visited = 0;
        let mut stack = vec![(root, AccessPath::root())];

        while let Some((node, path)) = stack.pop() {
            if path.depth() > self.max_depth {
                return Err(NormalizerError::DepthExceeded {
                    limit: self.max_depth,
                });
            }

            match node {
                Value::Object(object) => {
                    if let Some(key) = self.predicate.normalized_key(node) {
                        on_entity(&key, object, &path);
                        visited += 1;
                    }
                    // Reverse push keeps document order on pop.
                    let children: Vec<_> = object
                        .iter()
                        .filter(|(_, child)| is_container(child))
                        .map(|(field, child)| (child, path.child_key(field)))
                        .collect();
                    stack.extend(children.into_iter().rev());
                }
                Value::Array(items) => {
                    stack.extend(
                        items
                            .iter()
                            .enumerate()
                            .rev()
                            .filter(|(_, child)| is_container(child))
                            .map(|(index, child)| (child, path.child_index(index))),
                    );
                }
                _ => {}
            }
        }

        Ok(visited)
    }

    pub fn collect(&self, root: &Value) -> Result<Vec<EntityOccurrence>, NormalizerError> {
        let mut found = Vec::new();
        self.walk(root, |key, attributes, path| {
            found.push(EntityOccurrence {
                key: key.clone(),
                attributes: attributes.clone(),
                path: path.clone(),
            });
        })?;
        Ok(found)
    }
}

fn is_container(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}
