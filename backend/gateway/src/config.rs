//! Application configuration loaded from environment variables.

use crate::errors::{GatewayError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite journal database
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Size of the SQLite connection pool
    pub db_max_connections: u32,
    /// Maximum number of events the journal writer commits per transaction
    pub journal_batch_size: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key/value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let journal_batch_size: usize = var("JOURNAL_BATCH_SIZE", "100")
            .parse()
            .map_err(|_| GatewayError::Config("Invalid JOURNAL_BATCH_SIZE".to_string()))?;
        if journal_batch_size == 0 {
            return Err(GatewayError::Config(
                "JOURNAL_BATCH_SIZE must be at least 1".to_string(),
            ));
        }

        Ok(Config {
            database_url: var("DATABASE_URL", "sqlite:./crowdtank_journal.db"),
            api_port: var("API_PORT", "3001")
                .parse()
                .map_err(|_| GatewayError::Config("Invalid API_PORT".to_string()))?,
            db_max_connections: var("DB_MAX_CONNECTIONS", "5")
                .parse()
                .map_err(|_| GatewayError::Config("Invalid DB_MAX_CONNECTIONS".to_string()))?,
            journal_batch_size,
        })
    }
}
