use serde::Deserialize;
use std::env;

use crate::error::EngineError;
use crate::models::ExecutionSettings;
use crate::services::dialect::DialectKind;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub native: NativeConfig,
    /// Defaults for every command; callers may override per command
    pub execution: ExecutionSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NativeConfig {
    pub url: String,
    pub dialect: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Try to load from .env file
        let _ = dotenv::dotenv();

        let defaults = ExecutionSettings::default();
        let mut builder = config::Config::builder()
            .set_default("native.url", "sqlite::memory:")?
            .set_default("native.dialect", "oracle")?
            .set_default("execution.use_prepared_statements", defaults.use_prepared_statements)?
            .set_default(
                "execution.max_prepared_insert_batch_size",
                defaults.max_prepared_insert_batch_size as u64,
            )?
            .set_default("execution.fetch_size", defaults.fetch_size as u64)?
            .set_default("execution.atomic", defaults.atomic)?
            .set_default("logging.level", "info")?;

        // Load from environment variables
        if let Ok(database_url) = env::var("NATIVE_DATABASE_URL") {
            builder = builder.set_override("native.url", database_url)?;
        }

        if let Ok(dialect) = env::var("DIALECT") {
            builder = builder.set_override("native.dialect", dialect)?;
        }

        if let Ok(prepared) = env::var("USE_PREPARED_STATEMENTS") {
            builder = builder.set_override("execution.use_prepared_statements", parse_flag(&prepared))?;
        }

        if let Ok(batch_size) = env::var("MAX_PREPARED_INSERT_BATCH_SIZE") {
            let batch_size = batch_size.parse::<u64>().map_err(|e| {
                config::ConfigError::Message(format!("MAX_PREPARED_INSERT_BATCH_SIZE: {}", e))
            })?;
            builder = builder.set_override("execution.max_prepared_insert_batch_size", batch_size.max(1))?;
        }

        if let Ok(fetch_size) = env::var("FETCH_SIZE") {
            let fetch_size = fetch_size
                .parse::<u64>()
                .map_err(|e| config::ConfigError::Message(format!("FETCH_SIZE: {}", e)))?;
            builder = builder.set_override("execution.fetch_size", fetch_size)?;
        }

        if let Ok(atomic) = env::var("ATOMIC_EXECUTION") {
            builder = builder.set_override("execution.atomic", parse_flag(&atomic))?;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            builder = builder.set_override("logging.level", log_level)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn dialect(&self) -> Result<DialectKind, EngineError> {
        DialectKind::from_str(&self.native.dialect)
            .map_err(|e| EngineError::Configuration(e.to_string()))
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        // Clear environment variables for this test
        env::remove_var("NATIVE_DATABASE_URL");
        env::remove_var("DIALECT");
        env::remove_var("MAX_PREPARED_INSERT_BATCH_SIZE");
        env::remove_var("ATOMIC_EXECUTION");

        let config = Config::from_env();
        assert!(config.is_ok());

        let config = config.unwrap();
        assert_eq!(config.native.url, "sqlite::memory:");
        assert_eq!(config.dialect().unwrap(), DialectKind::Relational);
        assert_eq!(config.execution.max_prepared_insert_batch_size, 2048);
        assert!(config.execution.atomic);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("TRUE"));
        assert!(parse_flag(" 1 "));
        assert!(!parse_flag("false"));
        assert!(!parse_flag("nope"));
    }
}
