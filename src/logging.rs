//! Logging configuration and initialization.
//!
//! Sets up the tracing subscriber from the logging section of the
//! configuration, writing to stdout, stderr or a file in pretty, compact or
//! JSON format. `RUST_LOG` takes precedence over the configured level.

use crate::config::{LogFormat, LoggingConfig};
use std::fs::OpenOptions;
use std::io;
use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the logging system based on configuration.
///
/// Returns a guard that must be kept alive for the duration of the program
/// so buffered log lines are flushed on exit.
///
/// # Arguments
///
/// * `config` - The logging configuration
/// * `level_override` - Optional level override from the command line
/// * `trace_deps` - If true, do not quiet the pingora/h2 dependencies
pub fn init_logging(
    config: &LoggingConfig,
    level_override: Option<String>,
    trace_deps: bool,
) -> io::Result<WorkerGuard> {
    let level = level_override.as_deref().unwrap_or(&config.level);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(level, trace_deps)));

    let (writer, guard) = make_writer(&config.output)?;

    match config.format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(config.include_target);

            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .init();
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_writer(writer)
                .with_target(config.include_target);

            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .init();
        }
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .pretty()
                .with_writer(writer)
                .with_target(config.include_target);

            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .init();
        }
    }

    Ok(guard)
}

/// Opens the non-blocking writer for `output`.
fn make_writer(output: &str) -> io::Result<(NonBlocking, WorkerGuard)> {
    match output.to_lowercase().as_str() {
        "stdout" => Ok(tracing_appender::non_blocking(io::stdout())),
        "stderr" => Ok(tracing_appender::non_blocking(io::stderr())),
        _ => {
            let file = OpenOptions::new().create(true).append(true).open(output)?;
            Ok(tracing_appender::non_blocking(file))
        }
    }
}

/// Builds the `EnvFilter` directives for a level name.
fn filter_directives(level: &str, trace_deps: bool) -> String {
    let level = parse_level(level).to_string().to_lowercase();
    if trace_deps {
        level
    } else {
        format!("{},pingora_core=warn,pingora_proxy=warn,h2=warn", level)
    }
}

/// Parses a log level string to a tracing Level.
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}
