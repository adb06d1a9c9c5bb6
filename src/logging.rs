//! Tracing subscriber setup for binaries and tests.

use tracing_subscriber::{fmt, EnvFilter};

use crate::types::{Result, SombraError};

/// Installs a global `fmt` subscriber filtered by `level` (any `EnvFilter` directive).
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level).map_err(|_| SombraError::Invalid("invalid log level"))?,
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|_| SombraError::InvalidState("logging already initialized"))
}
