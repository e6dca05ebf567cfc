use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the querynorm binary.
#[derive(Debug, Parser)]
#[command(
    name = "querynorm",
    version,
    about = "Replay query cache writes through the normalizer"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "QUERYNORM_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Replay a script and print the host cache and normalized store.
    Replay(ReplayArgs),
    /// Replay a script and print the stored object with the given id.
    Inspect(InspectArgs),
}

impl Command {
    pub fn overrides(&self) -> &NormalizerOverrides {
        match self {
            Self::Replay(args) => &args.overrides,
            Self::Inspect(args) => &args.overrides,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct ReplayArgs {
    #[command(flatten)]
    pub overrides: NormalizerOverrides,

    /// Emit compact JSON instead of pretty-printed output.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub compact: bool,

    /// Script of host writes and entity operations.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}

#[derive(Debug, Args, Clone)]
pub struct InspectArgs {
    #[command(flatten)]
    pub overrides: NormalizerOverrides,

    /// Entity id to look up, regardless of type.
    #[arg(long, value_name = "ID")]
    pub id: String,

    /// Script of host writes and entity operations.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}

#[derive(Debug, Args, Default, Clone)]
pub struct NormalizerOverrides {
    /// Override the log level filter.
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Emit logs as JSON.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Discriminator field, highest priority first; repeat for several.
    #[arg(long = "type-field", value_name = "FIELD")]
    pub type_fields: Vec<String>,

    /// Normalize every object with an id, ignoring discriminators.
    #[arg(long = "id-only", action = clap::ArgAction::SetTrue, conflicts_with = "type_fields")]
    pub id_only: bool,

    /// Override the identity field name.
    #[arg(long = "id-field", value_name = "FIELD")]
    pub id_field: Option<String>,

    /// Override the nesting limit for walking query values.
    #[arg(long = "max-depth", value_name = "DEPTH")]
    pub max_depth: Option<usize>,

    /// Override the number of host writes processed per batch.
    #[arg(long = "drain-batch-limit", value_name = "COUNT")]
    pub drain_batch_limit: Option<usize>,

    /// Push entity changes from fresh query writes into other queries.
    #[arg(
        long = "propagate-on-ingest",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub propagate_on_ingest: Option<bool>,
}
