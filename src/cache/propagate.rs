//! Propagator: pushes entity changes into every query displaying them.

use std::collections::BTreeSet;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, warn};

use super::denormalize::Denormalizer;
use super::error::NormalizerError;
use super::events::WriteOrigin;
use super::host::QueryCache;
use super::index::ReferenceIndex;
use super::keys::{NormalizedKey, QueryKey};
use super::predicate::EntityPredicate;
use super::store::NormalizedStore;
use super::walker::GraphWalker;

const METRIC_PROPAGATE_TOTAL: &str = "querynorm_propagate_total";
const METRIC_PROPAGATE_FAILED_TOTAL: &str = "querynorm_propagate_failed_total";
const METRIC_PROPAGATE_MS: &str = "querynorm_propagate_ms";

/// Outcome of one propagation pass.
#[derive(Debug, Default)]
pub struct PropagationReport {
    /// Queries whose value was rewritten in the host cache.
    pub rewritten: Vec<QueryKey>,
    /// Queries that already reflected the store.
    pub unchanged: Vec<QueryKey>,
    /// Queries indexed but no longer present in the host cache.
    pub missing: Vec<QueryKey>,
    /// Per-query failures; other queries were still processed.
    pub failed: Vec<(QueryKey, NormalizerError)>,
}

impl PropagationReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn touched(&self) -> usize {
        self.rewritten.len() + self.unchanged.len() + self.missing.len() + self.failed.len()
    }
}

enum Rewrite {
    Rewritten,
    Unchanged,
    Missing,
}

/// The only component that writes into the host cache.
pub struct Propagator<'a> {
    host: &'a dyn QueryCache,
    predicate: &'a dyn EntityPredicate,
    max_depth: usize,
}

impl<'a> Propagator<'a> {
    pub fn new(
        host: &'a dyn QueryCache,
        predicate: &'a dyn EntityPredicate,
        max_depth: usize,
    ) -> Self {
        Self {
            host,
            predicate,
            max_depth,
        }
    }

    /// Rewrite every query referencing one of `changed`, except `skip`.
    ///
    /// Each query is denormalized against `store`, written back tagged as a
    /// `Propagator` write, and re-indexed from the value actually written.
    /// A failure on one query is logged and reported without stopping the
    /// others; the store is never modified here.
    pub fn propagate(
        &self,
        store: &NormalizedStore,
        index: &mut ReferenceIndex,
        changed: &BTreeSet<NormalizedKey>,
        skip: Option<&QueryKey>,
    ) -> PropagationReport {
        let started_at = Instant::now();
        let mut targets = BTreeSet::new();
        for key in changed {
            targets.extend(index.referencing_queries(key));
        }
        if let Some(skip) = skip {
            targets.remove(skip);
        }

        let mut report = PropagationReport::default();
        for query_key in targets {
            match self.rewrite(store, index, &query_key) {
                Ok(Rewrite::Rewritten) => {
                    counter!(METRIC_PROPAGATE_TOTAL).increment(1);
                    report.rewritten.push(query_key);
                }
                Ok(Rewrite::Unchanged) => report.unchanged.push(query_key),
                Ok(Rewrite::Missing) => report.missing.push(query_key),
                Err(err) => {
                    warn!(
                        query_key = %query_key,
                        error = %err,
                        "Propagation to query failed; query may show stale entities"
                    );
                    counter!(METRIC_PROPAGATE_FAILED_TOTAL).increment(1);
                    report.failed.push((query_key, err));
                }
            }
        }

        if report.touched() > 0 {
            debug!(
                changed = changed.len(),
                rewritten = report.rewritten.len(),
                unchanged = report.unchanged.len(),
                missing = report.missing.len(),
                failed = report.failed.len(),
                "Propagation complete"
            );
        }
        histogram!(METRIC_PROPAGATE_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

        report
    }

    fn rewrite(
        &self,
        store: &NormalizedStore,
        index: &mut ReferenceIndex,
        query_key: &QueryKey,
    ) -> Result<Rewrite, NormalizerError> {
        let Some(current) = self.host.get_query_data(query_key) else {
            index.clear(query_key);
            return Ok(Rewrite::Missing);
        };

        let fresh = Denormalizer::new(self.predicate, store, self.max_depth).denormalize(&current)?;
        if fresh == current {
            return Ok(Rewrite::Unchanged);
        }

        self.host
            .set_query_data(query_key, fresh.clone(), WriteOrigin::Propagator)
            .map_err(|err| NormalizerError::host(query_key, err))?;
        reindex(self.predicate, self.max_depth, index, query_key, &fresh)?;
        Ok(Rewrite::Rewritten)
    }
}

/// Replace `query_key`'s references with those found in `value`.
///
/// The walk completes before the index is touched, so a failed walk leaves
/// the previous references in place.
pub(crate) fn reindex(
    predicate: &dyn EntityPredicate,
    max_depth: usize,
    index: &mut ReferenceIndex,
    query_key: &QueryKey,
    value: &serde_json::Value,
) -> Result<usize, NormalizerError> {
    let mut found = Vec::new();
    GraphWalker::new(predicate, max_depth).walk(value, |key, _, path| {
        found.push((key.clone(), path.clone()));
    })?;

    index.clear(query_key);
    let count = found.len();
    for (key, path) in found {
        index.record(query_key.clone(), key, path);
    }
    Ok(count)
}
