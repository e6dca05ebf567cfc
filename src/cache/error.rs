use thiserror::Error;

use super::keys::{NormalizedKey, QueryKey};

/// Errors surfaced by the normalization engine.
#[derive(Debug, Error)]
pub enum NormalizerError {
    /// The entity has never been written to the store.
    #[error("entity `{key}` is not in the normalized store")]
    UnknownEntity { key: NormalizedKey },
    /// An updater failed or a literal patch was not a JSON object.
    #[error("malformed update for `{key}`: {reason}")]
    MalformedUpdate { key: NormalizedKey, reason: String },
    #[error("value nesting exceeds the configured depth limit of {limit}")]
    DepthExceeded { limit: usize },
    #[error("host cache rejected write to `{query_key}`: {source}")]
    Host {
        query_key: QueryKey,
        #[source]
        source: QueryCacheError,
    },
    #[error("entity `{key}` does not decode into the requested type: {source}")]
    Decode {
        key: NormalizedKey,
        #[source]
        source: serde_json::Error,
    },
}

impl NormalizerError {
    pub fn malformed(key: &NormalizedKey, reason: impl Into<String>) -> Self {
        Self::MalformedUpdate {
            key: key.clone(),
            reason: reason.into(),
        }
    }

    pub fn host(query_key: &QueryKey, source: QueryCacheError) -> Self {
        Self::Host {
            query_key: query_key.clone(),
            source,
        }
    }
}

/// Errors reported by a host cache adapter.
#[derive(Debug, Error)]
pub enum QueryCacheError {
    #[error("write rejected: {message}")]
    Rejected { message: String },
}

impl QueryCacheError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }
}
