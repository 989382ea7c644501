//! Structured logging initialization.
//!
//! Builds the tracing subscriber from the `[logging]` config section. An
//! explicit RUST_LOG in the environment wins over the configured level, so
//! operators can turn verbosity up without editing the config file.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Initialize the logging subsystem.
///
/// # Example
///
/// ```ignore
/// use server::config::LoggingConfig;
/// use server::logging;
///
/// logging::init(&LoggingConfig::default());
/// tracing::info!("listening");
/// ```
pub fn init(config: &LoggingConfig) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::new(config.level.as_str()),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer(config))
        .init();
}

/// One boxed fmt layer covering every format/timestamp combination, so the
/// subscriber itself is assembled exactly once.
fn fmt_layer<S>(config: &LoggingConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    let base = fmt::layer().with_ansi(true).with_target(config.target);
    match (config.format, config.timestamps) {
        (LogFormat::Compact, true) => base.compact().boxed(),
        (LogFormat::Compact, false) => base.compact().without_time().boxed(),
        (LogFormat::Pretty, true) => base.boxed(),
        (LogFormat::Pretty, false) => base.without_time().boxed(),
        (LogFormat::Json, true) => base.json().boxed(),
        (LogFormat::Json, false) => base.json().without_time().boxed(),
    }
}
