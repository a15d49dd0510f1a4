pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod spanstore;
pub mod store;

pub use crate::config::{load_config, Config, StoreConfig};
pub use error::{Error, MappingError, Result, StoreError};
pub use spanstore::{SpanReader, SpanStore, SpanWriter};
pub use store::{DocumentStore, SqliteDocumentStore};

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing/logging
///
/// Note: This function can only be called once. `RUST_LOG` takes precedence
/// over the default `info` level.
pub fn init_tracing() {
    init_tracing_with(&LoggingConfig::default());
}

/// Initialize tracing from the logging section of the configuration
pub fn init_tracing_with(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "json" {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}
