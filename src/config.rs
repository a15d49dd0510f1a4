use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_WORKSPACE: &str = "tracing";
pub const DEFAULT_SPANS: &str = "spans";
pub const DEFAULT_OPERATIONS: &str = "operations";
pub const DEFAULT_WORKERS: usize = 3;
pub const DEFAULT_RETENTION_SECS: u64 = 7 * 24 * 60 * 60; // 7 days

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Span store settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_workspace")]
    pub workspace: String,

    /// Collection holding span documents
    #[serde(default = "default_spans")]
    pub spans: String,

    /// Collection holding operation summaries
    #[serde(default = "default_operations")]
    pub operations: String,

    /// Writer worker tasks
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Documents per destination that trigger an early flush
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pending write requests before `write_span` waits
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Rows requested per page when streaming trace IDs
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Applied to collections when they are created, never afterwards
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Create the workspace and collections during setup
    #[serde(default)]
    pub create: bool,

    /// Store a flattened tag map on each span document
    #[serde(default = "default_flatten_tags")]
    pub flatten_tags: bool,
}

impl StoreConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            spans: default_spans(),
            operations: default_operations(),
            workers: default_workers(),
            flush_interval_ms: default_flush_interval_ms(),
            batch_size: default_batch_size(),
            queue_capacity: default_queue_capacity(),
            page_size: default_page_size(),
            retention_secs: default_retention_secs(),
            create: false,
            flatten_tags: default_flatten_tags(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Seconds between retention purges
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_workspace() -> String {
    DEFAULT_WORKSPACE.to_string()
}

fn default_spans() -> String {
    DEFAULT_SPANS.to_string()
}

fn default_operations() -> String {
    DEFAULT_OPERATIONS.to_string()
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_flush_interval_ms() -> u64 {
    1000
}

fn default_batch_size() -> usize {
    1000
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_page_size() -> usize {
    1000
}

fn default_retention_secs() -> u64 {
    DEFAULT_RETENTION_SECS
}

fn default_flatten_tags() -> bool {
    true
}

fn default_database_url() -> String {
    "sqlite:./data/traces.db".to_string()
}

fn default_cleanup_interval_secs() -> u64 {
    3600
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

/// Load configuration from an optional file plus `TRACE_DOCSTORE__*` variables
///
/// Environment variables override file values, e.g.
/// `TRACE_DOCSTORE__STORE__WORKERS=8`.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path));
    }

    let config = builder
        .add_source(
            config::Environment::with_prefix("TRACE_DOCSTORE")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

pub fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    let store = &cfg.store;

    for (name, value) in [
        ("workspace", &store.workspace),
        ("spans", &store.spans),
        ("operations", &store.operations),
    ] {
        if value.is_empty() {
            anyhow::bail!("Store {} name cannot be empty", name);
        }
    }

    if store.spans == store.operations {
        anyhow::bail!("Spans and operations must be different collections");
    }

    if store.workers == 0 {
        anyhow::bail!("At least one writer worker is required");
    }

    if store.batch_size == 0 {
        anyhow::bail!("Batch size must be greater than 0");
    }

    if store.queue_capacity == 0 {
        anyhow::bail!("Queue capacity must be greater than 0");
    }

    if store.page_size == 0 {
        anyhow::bail!("Page size must be greater than 0");
    }

    if store.flush_interval_ms == 0 {
        anyhow::bail!("Flush interval must be greater than 0");
    }

    match cfg.logging.format.as_str() {
        "text" | "json" => {}
        other => anyhow::bail!("Invalid log format: {}", other),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();

        assert_eq!(cfg.store.workspace, "tracing");
        assert_eq!(cfg.store.spans, "spans");
        assert_eq!(cfg.store.operations, "operations");
        assert_eq!(cfg.store.workers, 3);
        assert_eq!(cfg.store.retention(), Duration::from_secs(604_800));
        assert_eq!(cfg.store.flush_interval(), Duration::from_secs(1));
        assert!(!cfg.store.create);
        assert!(cfg.store.flatten_tags);
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn test_validate_config_requires_workers() {
        let mut cfg = Config::default();
        cfg.store.workers = 0;

        let result = validate_config(&cfg);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("writer worker"));
    }

    #[test]
    fn test_validate_config_rejects_empty_names() {
        let mut cfg = Config::default();
        cfg.store.spans = String::new();

        let result = validate_config(&cfg);
        assert!(result.unwrap_err().to_string().contains("spans name cannot be empty"));
    }

    #[test]
    fn test_validate_config_rejects_shared_collection() {
        let mut cfg = Config::default();
        cfg.store.operations = cfg.store.spans.clone();

        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[store]
workspace = "prod"
workers = 8
create = true

[database]
url = "sqlite::memory:"
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path())).unwrap();

        assert_eq!(cfg.store.workspace, "prod");
        assert_eq!(cfg.store.workers, 8);
        assert!(cfg.store.create);
        assert_eq!(cfg.store.spans, "spans");
        assert_eq!(cfg.database.url, "sqlite::memory:");
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[store]
workspace = "staging"
workers = 2
"#
        )
        .unwrap();

        // Process-wide; must agree with test_load_config_from_file
        std::env::set_var("TRACE_DOCSTORE__STORE__WORKERS", "8");
        let result = load_config(Some(file.path()));
        std::env::remove_var("TRACE_DOCSTORE__STORE__WORKERS");

        let cfg = result.unwrap();
        assert_eq!(cfg.store.workers, 8);
        assert_eq!(cfg.store.workspace, "staging");
    }
}
