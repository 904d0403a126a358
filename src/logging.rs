//! Logging initialization.
//!
//! Sets up a `tracing` subscriber with an env-filter. The filter is
//! controlled via the `PERCEPT_LOG` environment variable (`debug`, `info`,
//! `warn`, `error`); defaults to `info`.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Logging setup errors.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to initialize subscriber: {0}")]
    Init(String),
}

/// Initialize the global tracing subscriber.
///
/// Safe to call once per process; a second call returns an error rather
/// than panicking, so embedding applications that install their own
/// subscriber can ignore it.
pub fn init() -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_env("PERCEPT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))
}
