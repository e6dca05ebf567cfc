//! Script replay against an in-memory host cache.
//!
//! A script is a JSON document listing host writes and entity operations:
//!
//! ```json
//! {"steps": [
//!   {"op": "write", "query": "single", "data": {"id": "p1", "type_name": "project", "name": "Alpha"}},
//!   {"op": "set", "type": "project", "id": "p1", "patch": {"name": "Beta"}},
//!   {"op": "increment", "type": "project", "id": "p1", "field": "stars"},
//!   {"op": "optimistic", "label": "rename", "type": "project", "id": "p1", "patch": {"name": "Gamma"}},
//!   {"op": "rollback", "label": "rename"},
//!   {"op": "remove", "query": "single"}
//! ]}
//! ```
//!
//! A string `query` is shorthand for the one-element key `["single"]`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{debug, info};

use crate::cache::{
    EntityRecord, EntityUpdate, MemoryQueryCache, NormalizerConfig, NormalizerError, NormalizerStats,
    OptimisticUpdate, PropagationReport, QueryKey, QueryNormalizer,
};
use crate::infra::error::InfraError;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to read script: {0}")]
    Infra(#[from] InfraError),
    #[error("step {step}: {reason}")]
    Script { step: usize, reason: String },
    #[error("step {step}: {source}")]
    Normalizer {
        step: usize,
        #[source]
        source: NormalizerError,
    },
}

impl ReplayError {
    fn script(step: usize, reason: impl Into<String>) -> Self {
        Self::Script {
            step,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// External host write.
    Write { query: Value, data: Value },
    /// Drop a query from the host cache.
    Remove { query: Value },
    /// Literal entity patch.
    Set {
        #[serde(rename = "type", default)]
        entity_type: String,
        id: String,
        patch: Value,
    },
    /// Add `by` to a numeric field through an updater.
    Increment {
        #[serde(rename = "type", default)]
        entity_type: String,
        id: String,
        field: String,
        #[serde(default = "default_increment")]
        by: i64,
    },
    /// Prepare an optimistic update and, unless `commit` is false, apply it.
    Optimistic {
        label: String,
        #[serde(rename = "type", default)]
        entity_type: String,
        id: String,
        patch: Value,
        #[serde(default = "default_commit")]
        commit: bool,
    },
    /// Undo a labelled optimistic update.
    Rollback { label: String },
}

fn default_increment() -> i64 {
    1
}

fn default_commit() -> bool {
    true
}

/// Final state after a replay.
#[derive(Debug, Serialize)]
pub struct ReplayOutcome {
    pub queries: Vec<QueryEntry>,
    pub entities: Map<String, Value>,
    pub stats: NormalizerStats,
}

#[derive(Debug, Serialize)]
pub struct QueryEntry {
    pub key: QueryKey,
    pub data: Value,
}

impl Script {
    pub fn from_path(path: &Path) -> Result<Self, ReplayError> {
        let contents = fs::read_to_string(path).map_err(InfraError::from)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ReplayError> {
        Ok(serde_json::from_str(contents).map_err(InfraError::from)?)
    }
}

/// Drives a normalizer over a fresh in-memory host.
pub struct Replayer {
    host: Arc<MemoryQueryCache>,
    normalizer: QueryNormalizer,
    pending: HashMap<String, OptimisticUpdate>,
}

impl Replayer {
    pub fn new(config: NormalizerConfig) -> Self {
        let host = Arc::new(MemoryQueryCache::new());
        let normalizer = QueryNormalizer::new(config, host.clone());
        Self {
            host,
            normalizer,
            pending: HashMap::new(),
        }
    }

    pub fn normalizer(&self) -> &QueryNormalizer {
        &self.normalizer
    }

    pub fn host(&self) -> &MemoryQueryCache {
        &self.host
    }

    pub fn run(&mut self, script: &Script) -> Result<(), ReplayError> {
        for (index, step) in script.steps.iter().enumerate() {
            self.apply(index + 1, step)?;
        }
        self.normalizer.process_pending();
        info!(
            steps = script.steps.len(),
            queries = self.host.len(),
            entities = self.normalizer.stats().entities,
            "Replay complete"
        );
        Ok(())
    }

    pub fn outcome(&self) -> ReplayOutcome {
        let queries = self
            .host
            .snapshot()
            .into_iter()
            .map(|(key, data)| QueryEntry { key, data })
            .collect();
        let entities = self
            .normalizer
            .store_snapshot()
            .into_iter()
            .map(|(key, record)| (key.to_string(), record.into_value()))
            .collect();

        ReplayOutcome {
            queries,
            entities,
            stats: self.normalizer.stats(),
        }
    }

    fn apply(&mut self, step: usize, op: &Step) -> Result<(), ReplayError> {
        let fail = |source: NormalizerError| ReplayError::Normalizer { step, source };

        match op {
            Step::Write { query, data } => {
                self.host.write(query_key(query), data.clone());
            }
            Step::Remove { query } => {
                if self.host.remove_query(&query_key(query)).is_none() {
                    return Err(ReplayError::script(
                        step,
                        format!("query {query} is not cached"),
                    ));
                }
            }
            Step::Set {
                entity_type,
                id,
                patch,
            } => {
                let report = self
                    .normalizer
                    .set_normalized_data(entity_type, id, patch.clone())
                    .map_err(fail)?;
                log_report(step, &report);
            }
            Step::Increment {
                entity_type,
                id,
                field,
                by,
            } => {
                let field = field.clone();
                let by = *by;
                let update = EntityUpdate::try_with(move |current: &EntityRecord| -> Result<Value, String> {
                    let value = match current.get(&field) {
                        None | Some(Value::Null) => 0,
                        Some(value) => value
                            .as_i64()
                            .ok_or_else(|| format!("field `{field}` is not an integer"))?,
                    };
                    let next = value
                        .checked_add(by)
                        .ok_or_else(|| format!("field `{field}` overflows"))?;
                    Ok(json!({ field.as_str(): next }))
                });
                let report = self
                    .normalizer
                    .set_normalized_data(entity_type, id, update)
                    .map_err(fail)?;
                log_report(step, &report);
            }
            Step::Optimistic {
                label,
                entity_type,
                id,
                patch,
                commit,
            } => {
                let prepared = self
                    .normalizer
                    .create_optimistic_update(entity_type, id, patch.clone())
                    .map_err(fail)?
                    .ok_or_else(|| {
                        ReplayError::script(step, format!("no stored entity {entity_type}:{id}"))
                    })?;
                if *commit {
                    let report = self.normalizer.commit_optimistic_update(&prepared);
                    log_report(step, &report);
                }
                self.pending.insert(label.clone(), prepared);
            }
            Step::Rollback { label } => {
                let prepared = self.pending.remove(label).ok_or_else(|| {
                    ReplayError::script(step, format!("unknown optimistic update `{label}`"))
                })?;
                let report = self
                    .normalizer
                    .rollback_optimistic_update(&prepared)
                    .map_err(fail)?;
                log_report(step, &report);
            }
        }
        Ok(())
    }
}

/// Replay `script` from scratch and return the final state.
pub fn replay(config: NormalizerConfig, script: &Script) -> Result<ReplayOutcome, ReplayError> {
    let mut replayer = Replayer::new(config);
    replayer.run(script)?;
    Ok(replayer.outcome())
}

fn query_key(query: &Value) -> QueryKey {
    match query {
        Value::String(name) => QueryKey::from(name.as_str()),
        other => QueryKey::new(other),
    }
}

fn log_report(step: usize, report: &PropagationReport) {
    debug!(
        step,
        rewritten = report.rewritten.len(),
        unchanged = report.unchanged.len(),
        failed = report.failed.len(),
        "Replay step propagated"
    );
}
