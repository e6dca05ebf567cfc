//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::str::FromStr;

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::NormalizerConfig;

mod cli;

pub use cli::{CliArgs, Command, InspectArgs, NormalizerOverrides, ReplayArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "querynorm";
const ENV_PREFIX: &str = "QUERYNORM";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub normalizer: NormalizerConfig,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("normalizer.type_fields"),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(cli.command.overrides());

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    normalizer: RawNormalizerSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &NormalizerOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if overrides.id_only {
            self.normalizer.type_fields = Some(Vec::new());
        } else if !overrides.type_fields.is_empty() {
            self.normalizer.type_fields = Some(overrides.type_fields.clone());
        }
        if let Some(field) = overrides.id_field.as_ref() {
            self.normalizer.id_field = Some(field.clone());
        }
        if let Some(depth) = overrides.max_depth {
            self.normalizer.max_depth = Some(depth);
        }
        if let Some(limit) = overrides.drain_batch_limit {
            self.normalizer.drain_batch_limit = Some(limit);
        }
        if let Some(propagate) = overrides.propagate_on_ingest {
            self.normalizer.propagate_on_ingest = Some(propagate);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            normalizer,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let normalizer = build_normalizer_settings(normalizer)?;

        Ok(Self {
            logging,
            normalizer,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::WARN,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_normalizer_settings(
    normalizer: RawNormalizerSettings,
) -> Result<NormalizerConfig, LoadError> {
    let type_fields = normalizer.type_fields.ok_or_else(|| {
        LoadError::invalid(
            "normalizer.type_fields",
            "must be set; use an empty list for id-only normalization",
        )
    })?;
    let type_fields = type_fields
        .into_iter()
        .map(|field| field.trim().to_string())
        .collect::<Vec<_>>();
    if type_fields.iter().any(String::is_empty) {
        return Err(LoadError::invalid(
            "normalizer.type_fields",
            "field names must not be empty",
        ));
    }

    let mut config = NormalizerConfig::with_type_fields(type_fields);

    if let Some(field) = normalizer.id_field {
        let field = field.trim();
        if field.is_empty() {
            return Err(LoadError::invalid(
                "normalizer.id_field",
                "must not be empty",
            ));
        }
        config.id_field = field.to_string();
    }
    if let Some(depth) = normalizer.max_depth {
        if depth == 0 {
            return Err(LoadError::invalid(
                "normalizer.max_depth",
                "must be greater than zero",
            ));
        }
        config.max_depth = depth;
    }
    if let Some(limit) = normalizer.drain_batch_limit {
        if limit == 0 {
            return Err(LoadError::invalid(
                "normalizer.drain_batch_limit",
                "must be greater than zero",
            ));
        }
        config.drain_batch_limit = limit;
    }
    if let Some(propagate) = normalizer.propagate_on_ingest {
        config.propagate_on_ingest = propagate;
    }
    if let Some(enabled) = normalizer.enabled {
        config.enabled = enabled;
    }

    Ok(config)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawNormalizerSettings {
    type_fields: Option<Vec<String>>,
    id_field: Option<String>,
    max_depth: Option<usize>,
    drain_batch_limit: Option<usize>,
    propagate_on_ingest: Option<bool>,
    enabled: Option<bool>,
}
