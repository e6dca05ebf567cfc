//! Normalizer configuration.

use std::num::NonZeroUsize;
use std::sync::Arc;

use serde::Deserialize;

use super::predicate::{self, EntityPredicate};

const DEFAULT_ID_FIELD: &str = "id";
const DEFAULT_MAX_DEPTH: usize = 256;
const DEFAULT_DRAIN_BATCH_LIMIT: usize = 128;

/// Normalizer settings from the `[normalizer]` table.
///
/// `type_fields` has no default: the discriminator convention belongs to the
/// embedding application. An empty list means "any object with an id".
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NormalizerConfig {
    /// Discriminator fields, highest priority first.
    pub type_fields: Vec<String>,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// Nesting limit for walking and denormalizing.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Host writes processed per drain batch.
    #[serde(default = "default_drain_batch_limit")]
    pub drain_batch_limit: usize,
    /// Push entity changes from a fresh query write into other queries.
    #[serde(default = "default_true")]
    pub propagate_on_ingest: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl NormalizerConfig {
    /// Discriminator-based normalization (`type_fields` + `id`).
    pub fn with_type_fields<I, S>(type_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            type_fields: type_fields.into_iter().map(Into::into).collect(),
            id_field: default_id_field(),
            max_depth: DEFAULT_MAX_DEPTH,
            drain_batch_limit: DEFAULT_DRAIN_BATCH_LIMIT,
            propagate_on_ingest: true,
            enabled: true,
        }
    }

    /// Id-only normalization: every object with an id is an entity.
    pub fn id_only() -> Self {
        Self::with_type_fields(Vec::<String>::new())
    }

    /// Predicate implementing the configured discriminator convention.
    pub fn predicate(&self) -> Arc<dyn EntityPredicate> {
        predicate::from_fields(&self.type_fields, &self.id_field)
    }

    /// Returns the drain batch limit, clamping to 1 if zero.
    pub fn drain_batch_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.drain_batch_limit).unwrap_or(NonZeroUsize::MIN)
    }
}

fn default_id_field() -> String {
    DEFAULT_ID_FIELD.to_string()
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_drain_batch_limit() -> usize {
    DEFAULT_DRAIN_BATCH_LIMIT
}

fn default_true() -> bool {
    true
}
