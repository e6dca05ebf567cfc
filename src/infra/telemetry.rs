use std::io;
use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs go to stderr; stdout is reserved for command output.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for every metric the normalizer emits.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "querynorm_ingest_total",
            Unit::Count,
            "Total number of host query writes drained, labelled by origin."
        );
        describe_counter!(
            "querynorm_propagate_total",
            Unit::Count,
            "Total number of query values rewritten by propagation."
        );
        describe_counter!(
            "querynorm_propagate_failed_total",
            Unit::Count,
            "Total number of per-query propagation failures."
        );
        describe_gauge!(
            "querynorm_store_entities",
            Unit::Count,
            "Current number of entities in the normalized store."
        );
        describe_gauge!(
            "querynorm_write_queue_len",
            Unit::Count,
            "Current number of host writes waiting to be normalized."
        );
        describe_histogram!(
            "querynorm_propagate_ms",
            Unit::Milliseconds,
            "Propagation pass latency in milliseconds."
        );
    });
}
