//! Tracing subscriber setup.

use std::env;

use tracing::debug;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_FILTER_ENV: &str = "VAULT_ENGINE_LOG";

/// Installs the global subscriber. Reads the filter from `VAULT_ENGINE_LOG`,
/// defaulting to `info`. Calling it twice is harmless.
pub fn init_logging() {
    let filter = env::var(LOG_FILTER_ENV).unwrap_or_else(|_| "info".to_string());
    let filter_layer = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter_layer)
        .try_init()
        .is_ok();

    if installed {
        debug!(%filter, "logging initialised");
    }
}
