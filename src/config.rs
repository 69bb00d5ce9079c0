use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub trade_log_path: String,
    pub calc_partitions: usize,
    pub calc_queue_capacity: usize,
    pub calc_deadline_secs: u64,
    pub config_refresh_secs: u64,
    pub ingest_batch_size: usize,
    pub ingest_poll_ms: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parse_with_default(&env_map, "PORT", "8080")?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let trade_log_path = env_map
            .get("TRADE_LOG_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("TRADE_LOG_PATH".to_string()))?;

        let calc_partitions: usize = parse_with_default(&env_map, "CALC_PARTITIONS", "4")?;
        if calc_partitions == 0 {
            return Err(ConfigError::InvalidValue(
                "CALC_PARTITIONS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let calc_queue_capacity: usize =
            parse_with_default(&env_map, "CALC_QUEUE_CAPACITY", "1024")?;
        if calc_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "CALC_QUEUE_CAPACITY".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let calc_deadline_secs = parse_with_default(&env_map, "CALC_DEADLINE_SECS", "30")?;
        let config_refresh_secs = parse_with_default(&env_map, "CONFIG_REFRESH_SECS", "60")?;
        let ingest_batch_size = parse_with_default(&env_map, "INGEST_BATCH_SIZE", "5000")?;
        let ingest_poll_ms = parse_with_default(&env_map, "INGEST_POLL_MS", "500")?;

        Ok(Config {
            port,
            database_path,
            trade_log_path,
            calc_partitions,
            calc_queue_capacity,
            calc_deadline_secs,
            config_refresh_secs,
            ingest_batch_size,
            ingest_poll_ms,
        })
    }
}

fn parse_with_default<T: std::str::FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: &str,
) -> Result<T, ConfigError> {
    env_map
        .get(key)
        .map(|s| s.as_str())
        .unwrap_or(default)
        .parse::<T>()
        .map_err(|_| {
            ConfigError::InvalidValue(key.to_string(), format!("cannot parse as {}", std::any::type_name::<T>()))
        })
}
