use anyhow::{Context, Result};
use stackdeploy_config::{LogFormat, LoggingConfig};
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

/// Initialize tracing/logging from the logging config.
///
/// Logs go to stderr so stdout only carries deployment output. With a debug
/// file, a second layer records everything at DEBUG regardless of the level.
pub fn init_tracing(logging: &LoggingConfig, debug_file: Option<&Path>) -> Result<()> {
    use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

    let env_filter =
        EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let console = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Text => fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed(),
    };

    let debug_layer = match debug_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create debug log {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(LevelFilter::DEBUG),
            )
        }
        None => None,
    };

    // Ignore the error if a subscriber is already set (idempotent)
    let _ = tracing::subscriber::set_global_default(
        tracing_subscriber::registry().with(console).with(debug_layer),
    );
    Ok(())
}
