//! Normalized query cache.
//!
//! Sits beside a reactive, key-addressed query cache holding arbitrary nested
//! JSON and lets application code read and write individual entities no
//! matter which query they arrived through:
//!
//! - **Extraction**: every host write is walked for entities, which are
//!   merged attribute by attribute into one flat store.
//! - **Reference index**: records which query shows which entity, and where.
//! - **Propagation**: an entity change is denormalized back into every query
//!   displaying it and written to the host tagged as a propagator write, so
//!   it is re-indexed but never re-ingested.
//! - **Optimistic updates**: a tentative patch plus a snapshot of only the
//!   fields it touches.
//!
//! ## Configuration
//!
//! ```toml
//! [normalizer]
//! type_fields = ["type_name"]
//! id_field = "id"
//! # ... see config.rs for all options
//! ```

mod config;
mod denormalize;
mod error;
mod events;
mod host;
mod index;
mod keys;
mod lock;
mod normalizer;
mod optimistic;
mod predicate;
mod propagate;
mod record;
mod store;
mod walker;

pub use config::NormalizerConfig;
pub use denormalize::Denormalizer;
pub use error::{NormalizerError, QueryCacheError};
pub use events::{Epoch, QueryWrite, WriteKind, WriteOrigin, WriteQueue};
pub use host::{MemoryQueryCache, QueryCache};
pub use index::{ReferenceEntry, ReferenceIndex};
pub use keys::{AccessPath, NormalizedKey, PathSegment, QueryKey};
pub use normalizer::{NormalizerStats, QueryNormalizer};
pub use optimistic::{OptimisticUpdate, prepare};
pub use predicate::{DiscriminatorPredicate, EntityPredicate, IdPredicate, from_fields};
pub use propagate::{PropagationReport, Propagator};
pub use record::{CacheSnapshot, EntityRecord, EntityUpdate};
pub use store::NormalizedStore;
pub use walker::{EntityOccurrence, GraphWalker};
