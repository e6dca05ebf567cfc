use std::io::{self, Write};
use std::process;

use querynorm::{
    config::{self, LoadError},
    infra::{error::InfraError, telemetry},
    replay::{ReplayError, Replayer, Script},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[derive(Debug, Error)]
enum AppError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("replay failed: {0}")]
    Replay(#[from] ReplayError),
    #[error("no stored object with id `{0}`")]
    NotFound(String),
}

fn main() {
    if let Err(error) = run() {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    match cli_args.command {
        config::Command::Replay(args) => {
            let script = Script::from_path(&args.file)?;
            let mut replayer = Replayer::new(settings.normalizer);
            replayer.run(&script)?;
            print_json(&replayer.outcome(), !args.compact)
        }
        config::Command::Inspect(args) => {
            let script = Script::from_path(&args.file)?;
            let mut replayer = Replayer::new(settings.normalizer);
            replayer.run(&script)?;

            let object = replayer
                .normalizer()
                .get_object_by_id(&args.id)
                .ok_or_else(|| AppError::NotFound(args.id.clone()))?;
            info!(
                id = %args.id,
                references = replayer.normalizer().stats().references,
                "Object found"
            );
            print_json(&object, true)
        }
    }
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<(), AppError> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(InfraError::from)?;

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{rendered}").map_err(InfraError::from)?;
    Ok(())
}
