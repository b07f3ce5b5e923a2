//! Configuration module for agency-service.

use crate::numbering::{NumberingStrategy, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AgencyConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub storage: StorageBackend,
    /// Required when `storage` is [`StorageBackend::Postgres`].
    pub database: Option<DatabaseConfig>,
    pub numbering: NumberingConfig,
    /// `None` disables the background overdue sweep.
    pub overdue_sweep_interval: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            _ => Err(format!("Invalid storage backend: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct NumberingConfig {
    pub strategy: NumberingStrategy,
    /// Allocation attempts for the retry strategy, and insert attempts for
    /// either strategy.
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for NumberingConfig {
    fn default() -> Self {
        Self {
            strategy: NumberingStrategy::Sequence,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.parse().ok())
}

impl AgencyConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let storage = match env::var("STORAGE_BACKEND") {
            Ok(value) => value
                .parse::<StorageBackend>()
                .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            Err(_) => StorageBackend::Postgres,
        };

        let database = match storage {
            StorageBackend::Postgres => Some(DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS").unwrap_or(10),
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS").unwrap_or(2),
            }),
            StorageBackend::Memory => None,
        };

        let strategy = match env::var("NUMBERING_STRATEGY") {
            Ok(value) => value
                .parse::<NumberingStrategy>()
                .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            Err(_) => NumberingStrategy::Sequence,
        };

        let sweep_secs: u64 = parse_env("OVERDUE_SWEEP_INTERVAL_SECS").unwrap_or(3600);

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "agency-service".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            storage,
            database,
            numbering: NumberingConfig {
                strategy,
                max_attempts: parse_env::<u32>("NUMBERING_MAX_ATTEMPTS")
                    .unwrap_or(DEFAULT_MAX_ATTEMPTS)
                    .max(1),
                retry_delay: parse_env("NUMBERING_RETRY_DELAY_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_RETRY_DELAY),
            },
            overdue_sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
        })
    }

    /// In-memory configuration for local runs and tests.
    pub fn in_memory() -> Self {
        Self {
            common: core_config::Config {
                port: 0,
                environment: "test".to_string(),
            },
            service_name: "agency-service".to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            storage: StorageBackend::Memory,
            database: None,
            numbering: NumberingConfig::default(),
            overdue_sweep_interval: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn storage_backend_parses() {
        assert_eq!("memory".parse::<StorageBackend>(), Ok(StorageBackend::Memory));
        assert_eq!("Postgres".parse::<StorageBackend>(), Ok(StorageBackend::Postgres));
        assert!("sqlite".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn numbering_defaults_to_sequence_with_ten_attempts() {
        let numbering = NumberingConfig::default();
        assert_eq!(numbering.strategy, NumberingStrategy::Sequence);
        assert_eq!(numbering.max_attempts, 10);
        assert_eq!(numbering.retry_delay, Duration::from_millis(50));
    }

    #[test]
    #[serial]
    fn from_env_reads_memory_backend_and_numbering() {
        env::set_var("STORAGE_BACKEND", "memory");
        env::set_var("NUMBERING_STRATEGY", "retry");
        env::set_var("NUMBERING_MAX_ATTEMPTS", "0");
        env::set_var("NUMBERING_RETRY_DELAY_MS", "5");
        env::set_var("OVERDUE_SWEEP_INTERVAL_SECS", "0");

        let config = AgencyConfig::from_env().unwrap();

        assert_eq!(config.storage, StorageBackend::Memory);
        assert!(config.database.is_none());
        assert_eq!(config.numbering.strategy, NumberingStrategy::Retry);
        assert_eq!(config.numbering.max_attempts, 1);
        assert_eq!(config.numbering.retry_delay, Duration::from_millis(5));
        assert!(config.overdue_sweep_interval.is_none());

        for name in [
            "STORAGE_BACKEND",
            "NUMBERING_STRATEGY",
            "NUMBERING_MAX_ATTEMPTS",
            "NUMBERING_RETRY_DELAY_MS",
            "OVERDUE_SWEEP_INTERVAL_SECS",
        ] {
            env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn unknown_strategy_is_a_config_error() {
        env::set_var("STORAGE_BACKEND", "memory");
        env::set_var("NUMBERING_STRATEGY", "random");

        let result = AgencyConfig::from_env();
        assert!(matches!(result, Err(AppError::ConfigError(_))));

        env::remove_var("STORAGE_BACKEND");
        env::remove_var("NUMBERING_STRATEGY");
    }
}
