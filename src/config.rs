use std::time::Duration;

use serde::Deserialize;

/// Which ledger store implementation backs the engine
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub store_backend: StoreBackend,
    pub db_max_connections: u32,
    /// Upper bound for a single unit-of-work attempt
    pub unit_timeout_ms: u64,
    /// Postgres `lock_timeout` applied to every unit of work
    pub lock_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub settlement_interval_secs: u64,
    pub settlement_enabled: bool,
    pub pledge_precheck: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/pledge_ledger".to_string(),
            bind_address: "0.0.0.0:8080".to_string(),
            store_backend: StoreBackend::Postgres,
            db_max_connections: 10,
            unit_timeout_ms: 5_000,
            lock_timeout_ms: 2_000,
            max_retries: 3,
            retry_backoff_ms: 50,
            settlement_interval_secs: 60,
            settlement_enabled: true,
            pledge_precheck: true,
        }
    }
}

impl Config {
    /// Load from the process environment; every key falls back to its default
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let defaults = Config::default();

        config::Config::builder()
            .set_default("database_url", defaults.database_url)?
            .set_default("bind_address", defaults.bind_address)?
            .set_default("store_backend", "postgres")?
            .set_default("db_max_connections", defaults.db_max_connections as i64)?
            .set_default("unit_timeout_ms", defaults.unit_timeout_ms as i64)?
            .set_default("lock_timeout_ms", defaults.lock_timeout_ms as i64)?
            .set_default("max_retries", defaults.max_retries as i64)?
            .set_default("retry_backoff_ms", defaults.retry_backoff_ms as i64)?
            .set_default("settlement_interval_secs", defaults.settlement_interval_secs as i64)?
            .set_default("settlement_enabled", defaults.settlement_enabled)?
            .set_default("pledge_precheck", defaults.pledge_precheck)?
            .add_source(config::Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn unit_timeout(&self) -> Duration {
        Duration::from_millis(self.unit_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn settlement_interval(&self) -> Duration {
        Duration::from_secs(self.settlement_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_durations() {
        let config = Config::default();

        assert_eq!(config.store_backend, StoreBackend::Postgres);
        assert_eq!(config.unit_timeout(), Duration::from_secs(5));
        assert_eq!(config.retry_backoff(), Duration::from_millis(50));
        assert_eq!(config.settlement_interval(), Duration::from_secs(60));
        assert!(config.pledge_precheck);
    }

    #[test]
    fn test_backend_names_are_lowercase() {
        let backend: StoreBackend = serde_json::from_str("\"memory\"").unwrap();
        assert_eq!(backend, StoreBackend::Memory);
        assert!(serde_json::from_str::<StoreBackend>("\"Memory\"").is_err());
    }
}
