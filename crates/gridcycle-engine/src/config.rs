/*
[INPUT]:  Process environment
[OUTPUT]: Parsed engine configuration
[POS]:    Configuration layer - engine setup
[UPDATE]: When adding new configuration options
*/

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level configuration for the engine process.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Persistence DSN: a SQLite file path or `sqlite://` URL.
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Fallback credentials for the balance view; bots carry their own.
    #[serde(default)]
    pub exchange_api_key: String,
    #[serde(default)]
    pub exchange_api_secret: String,
    /// Selects the venue testnet base URLs.
    #[serde(default)]
    pub exchange_testnet: bool,
    /// `development` switches on verbose event logging.
    #[serde(default = "default_env")]
    pub env: String,
}

fn default_database_url() -> String {
    "gridcycle.db".to_string()
}

fn default_env() -> String {
    "development".to_string()
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let source = config::Environment::default();
        let settings = config::Config::builder()
            .add_source(source)
            .build()
            .context("read environment configuration")?;

        settings
            .try_deserialize()
            .context("deserialize engine configuration")
    }

    /// The SQLite path behind the DSN.
    pub fn database_path(&self) -> &str {
        self.database_url
            .strip_prefix("sqlite://")
            .unwrap_or(&self.database_url)
    }

    pub fn is_development(&self) -> bool {
        self.env == "development"
    }

    /// Default log filter when RUST_LOG is not set.
    pub fn default_log_filter(&self) -> &'static str {
        if self.is_development() { "debug" } else { "info" }
    }
}
