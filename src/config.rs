//! Configuration for relay
//!
//! Settings are layered, later sources winning:
//! 1. built-in defaults
//! 2. a TOML file (`--config`, `RELAY_CONFIG_PATH`, or `relay.toml` if present)
//! 3. `RELAY_` environment variables, nested with `__`
//!    (e.g. `RELAY_POOL__WORKER_THREADS=8`)
//! 4. explicit builder overrides
//!
//! A `.env` file in the working directory is loaded first.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

const DEFAULT_WORKER_THREADS: i64 = 4;
const DEFAULT_MAX_PENDING: i64 = 1024;
const DEFAULT_THREAD_NAME: &str = "relay-worker";
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub pool: PoolConfig,
    pub logging: LoggingConfig,
}

/// Worker pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of threads running execute callbacks
    pub worker_threads: usize,

    /// Maximum number of requests queued or running at once
    pub max_pending: usize,

    /// Name given to worker threads
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_threads: DEFAULT_WORKER_THREADS as usize,
            max_pending: DEFAULT_MAX_PENDING as usize,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, `RUST_LOG` takes precedence
    pub filter: String,
}

impl Config {
    /// Load configuration from the default sources
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool.worker_threads == 0 {
            bail!("pool.worker_threads must be at least 1");
        }
        if self.pool.max_pending == 0 {
            bail!("pool.max_pending must be at least 1");
        }
        if self.pool.thread_name.trim().is_empty() {
            bail!("pool.thread_name must not be empty");
        }
        Ok(())
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration")
    }
}

/// Builder for `Config` with explicit overrides
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    worker_threads: Option<usize>,
    max_pending: Option<usize>,
    log_filter: Option<String>,
}

impl ConfigBuilder {
    /// Set the config file path (overrides `RELAY_CONFIG_PATH`)
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn worker_threads(mut self, threads: Option<usize>) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn max_pending(mut self, max_pending: Option<usize>) -> Self {
        self.max_pending = max_pending;
        self
    }

    pub fn log_filter(mut self, filter: Option<String>) -> Self {
        self.log_filter = filter;
        self
    }

    pub fn build(self) -> Result<Config> {
        dotenvy::dotenv().ok();

        let config_path = self
            .config_path
            .or_else(|| env::var("RELAY_CONFIG_PATH").ok().map(PathBuf::from));

        let mut builder = config::Config::builder()
            .set_default("pool.worker_threads", DEFAULT_WORKER_THREADS)?
            .set_default("pool.max_pending", DEFAULT_MAX_PENDING)?
            .set_default("pool.thread_name", DEFAULT_THREAD_NAME)?
            .set_default("logging.filter", DEFAULT_LOG_FILTER)?;

        builder = match &config_path {
            Some(path) => builder.add_source(config::File::from(path.clone()).required(true)),
            None => builder.add_source(config::File::with_name("relay").required(false)),
        };

        builder = builder.add_source(
            config::Environment::with_prefix("RELAY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(threads) = self.worker_threads {
            builder = builder.set_override("pool.worker_threads", threads as i64)?;
        }
        if let Some(max_pending) = self.max_pending {
            builder = builder.set_override("pool.max_pending", max_pending as i64)?;
        }
        if let Some(filter) = self.log_filter {
            builder = builder.set_override("logging.filter", filter)?;
        }

        let config: Config = builder
            .build()
            .with_context(|| match &config_path {
                Some(path) => format!("Failed to load config from {}", path.display()),
                None => "Failed to load configuration".to_string(),
            })?
            .try_deserialize()
            .context("Invalid configuration")?;

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::builder().build().unwrap();

        assert_eq!(config.pool.worker_threads, 4);
        assert_eq!(config.pool.thread_name, "relay-worker");
    }

    #[test]
    fn test_builder_overrides() {
        let config = Config::builder()
            .worker_threads(Some(2))
            .max_pending(Some(16))
            .log_filter(Some("relay_core=trace".to_string()))
            .build()
            .unwrap();

        assert_eq!(config.pool.worker_threads, 2);
        assert_eq!(config.pool.max_pending, 16);
        assert_eq!(config.logging.filter, "relay_core=trace");
    }

    #[test]
    fn test_config_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[pool]\nworker_threads = 3\nthread_name = \"file-worker\"\n"
        )
        .unwrap();

        let config = Config::builder()
            .config_path(Some(file.path().to_path_buf()))
            .build()
            .unwrap();

        assert_eq!(config.pool.worker_threads, 3);
        assert_eq!(config.pool.thread_name, "file-worker");
    }

    #[test]
    fn test_missing_config_file_fails() {
        let result = Config::builder()
            .config_path(Some(PathBuf::from("/nonexistent/relay.toml")))
            .build();

        assert!(result.is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = Config::builder().worker_threads(Some(0)).build();

        let err = result.unwrap_err();
        assert!(err.to_string().contains("worker_threads"));
    }

    #[test]
    fn test_renders_toml() {
        let config = Config::builder().worker_threads(Some(6)).build().unwrap();

        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("[pool]"));
        assert!(rendered.contains("worker_threads = 6"));
    }
}
