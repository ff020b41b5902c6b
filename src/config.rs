//! Orchestrator configuration.
//!
//! Covers the queue, cache, batch and engine settings plus the quality
//! threshold preset. Built from defaults, builder methods, or
//! environment variables.

use std::time::Duration;
use thiserror::Error;

use crate::quality::QualityThresholds;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the optimization orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    // Queue settings
    /// Number of queue worker tasks.
    pub queue_concurrency: usize,
    /// Default retry budget for jobs that do not specify one.
    pub default_max_retries: u32,
    /// Base delay for exponential retry backoff.
    pub retry_base_delay: Duration,
    /// Cap on a single backoff delay.
    pub retry_max_delay: Duration,

    // Request settings
    /// Timeout applied to `optimize_template` calls that do not carry
    /// their own deadline.
    pub default_request_timeout: Duration,

    // Cache settings
    /// TTL for cached optimization results.
    pub cache_ttl: Duration,
    /// Maximum cached results.
    pub cache_capacity: usize,

    // Batch settings
    /// Concurrently in-flight requests during `batch_optimize`,
    /// independent of queue workers.
    pub batch_concurrency: usize,

    // Engine settings
    /// Base URL of the remote optimization engine.
    pub engine_url: String,
    /// API key for the engine.
    pub engine_api_key: String,
    /// Per-request timeout for engine calls.
    pub engine_timeout: Duration,

    // Quality settings
    /// Threshold preset name: "default", "strict" or "lenient".
    pub quality_preset: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            queue_concurrency: 3,
            default_max_retries: 2,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(30),
            default_request_timeout: Duration::from_secs(120),
            cache_ttl: Duration::from_secs(3600), // 1 hour
            cache_capacity: 1000,
            batch_concurrency: 4,
            engine_url: "http://localhost:8700".to_string(),
            engine_api_key: String::new(),
            engine_timeout: Duration::from_secs(60),
            quality_preset: "default".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PROMPTFORGE_QUEUE_CONCURRENCY`: queue workers (default: 3)
    /// - `PROMPTFORGE_MAX_RETRIES`: default retry budget (default: 2)
    /// - `PROMPTFORGE_RETRY_BASE_MS`: backoff base in ms (default: 500)
    /// - `PROMPTFORGE_RETRY_MAX_MS`: backoff cap in ms (default: 30000)
    /// - `PROMPTFORGE_REQUEST_TIMEOUT_SECS`: default request timeout (default: 120)
    /// - `PROMPTFORGE_CACHE_TTL_SECS`: cache TTL (default: 3600)
    /// - `PROMPTFORGE_CACHE_CAPACITY`: cache capacity (default: 1000)
    /// - `PROMPTFORGE_BATCH_CONCURRENCY`: batch fan-out bound (default: 4)
    /// - `PROMPTFORGE_ENGINE_URL`: engine base URL (required)
    /// - `PROMPTFORGE_ENGINE_API_KEY`: engine API key (required)
    /// - `PROMPTFORGE_ENGINE_TIMEOUT_SECS`: engine call timeout (default: 60)
    /// - `PROMPTFORGE_QUALITY_PRESET`: "default" | "strict" | "lenient"
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or have
    /// invalid values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("PROMPTFORGE_QUEUE_CONCURRENCY") {
            config.queue_concurrency = parse_env_value(&val, "PROMPTFORGE_QUEUE_CONCURRENCY")?;
        }

        if let Ok(val) = std::env::var("PROMPTFORGE_MAX_RETRIES") {
            config.default_max_retries = parse_env_value(&val, "PROMPTFORGE_MAX_RETRIES")?;
        }

        if let Ok(val) = std::env::var("PROMPTFORGE_RETRY_BASE_MS") {
            let ms: u64 = parse_env_value(&val, "PROMPTFORGE_RETRY_BASE_MS")?;
            config.retry_base_delay = Duration::from_millis(ms);
        }

        if let Ok(val) = std::env::var("PROMPTFORGE_RETRY_MAX_MS") {
            let ms: u64 = parse_env_value(&val, "PROMPTFORGE_RETRY_MAX_MS")?;
            config.retry_max_delay = Duration::from_millis(ms);
        }

        if let Ok(val) = std::env::var("PROMPTFORGE_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "PROMPTFORGE_REQUEST_TIMEOUT_SECS")?;
            config.default_request_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("PROMPTFORGE_CACHE_TTL_SECS") {
            let secs: u64 = parse_env_value(&val, "PROMPTFORGE_CACHE_TTL_SECS")?;
            config.cache_ttl = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("PROMPTFORGE_CACHE_CAPACITY") {
            config.cache_capacity = parse_env_value(&val, "PROMPTFORGE_CACHE_CAPACITY")?;
        }

        if let Ok(val) = std::env::var("PROMPTFORGE_BATCH_CONCURRENCY") {
            config.batch_concurrency = parse_env_value(&val, "PROMPTFORGE_BATCH_CONCURRENCY")?;
        }

        // Engine URL and key are required in env-driven setups.
        config.engine_url = std::env::var("PROMPTFORGE_ENGINE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("PROMPTFORGE_ENGINE_URL".to_string()))?;
        config.engine_api_key = std::env::var("PROMPTFORGE_ENGINE_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("PROMPTFORGE_ENGINE_API_KEY".to_string()))?;

        if let Ok(val) = std::env::var("PROMPTFORGE_ENGINE_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "PROMPTFORGE_ENGINE_TIMEOUT_SECS")?;
            config.engine_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("PROMPTFORGE_QUALITY_PRESET") {
            config.quality_preset = val;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "queue_concurrency must be greater than 0".to_string(),
            ));
        }

        if self.batch_concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "batch_concurrency must be greater than 0".to_string(),
            ));
        }

        if self.cache_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "cache_capacity must be greater than 0".to_string(),
            ));
        }

        if self.cache_ttl.as_secs() == 0 {
            return Err(ConfigError::ValidationFailed(
                "cache_ttl must be greater than 0".to_string(),
            ));
        }

        if self.default_request_timeout.as_millis() == 0 {
            return Err(ConfigError::ValidationFailed(
                "default_request_timeout must be greater than 0".to_string(),
            ));
        }

        if self.retry_base_delay > self.retry_max_delay {
            return Err(ConfigError::ValidationFailed(
                "retry_base_delay cannot exceed retry_max_delay".to_string(),
            ));
        }

        if self.engine_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "engine_url cannot be empty".to_string(),
            ));
        }

        if QualityThresholds::preset(&self.quality_preset).is_none() {
            return Err(ConfigError::ValidationFailed(format!(
                "unknown quality_preset '{}'",
                self.quality_preset
            )));
        }

        Ok(())
    }

    /// Resolve the configured quality threshold preset.
    pub fn quality_thresholds(&self) -> QualityThresholds {
        QualityThresholds::preset(&self.quality_preset).unwrap_or_default()
    }

    /// Builder method to set queue concurrency.
    pub fn with_queue_concurrency(mut self, concurrency: usize) -> Self {
        self.queue_concurrency = concurrency;
        self
    }

    /// Builder method to set the default retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    /// Builder method to set the default request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.default_request_timeout = timeout;
        self
    }

    /// Builder method to set the cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Builder method to set the batch fan-out bound.
    pub fn with_batch_concurrency(mut self, concurrency: usize) -> Self {
        self.batch_concurrency = concurrency;
        self
    }

    /// Builder method to set the engine endpoint.
    pub fn with_engine(mut self, url: impl Into<String>, api_key: impl Into<String>) -> Self {
        self.engine_url = url.into();
        self.engine_api_key = api_key.into();
        self
    }

    /// Builder method to set the quality preset.
    pub fn with_quality_preset(mut self, preset: impl Into<String>) -> Self {
        self.quality_preset = preset.into();
        self
    }
}

/// Parses an environment variable value into the target type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(OrchestratorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let config = OrchestratorConfig::new()
            .with_queue_concurrency(8)
            .with_max_retries(5)
            .with_cache_ttl(Duration::from_secs(60))
            .with_batch_concurrency(2)
            .with_engine("http://engine:9000", "secret")
            .with_quality_preset("strict");

        assert_eq!(config.queue_concurrency, 8);
        assert_eq!(config.default_max_retries, 5);
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.batch_concurrency, 2);
        assert_eq!(config.engine_url, "http://engine:9000");
        assert_eq!(config.quality_preset, "strict");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_concurrency() {
        let config = OrchestratorConfig::default().with_queue_concurrency(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_validation_rejects_unknown_preset() {
        let config = OrchestratorConfig::default().with_quality_preset("extreme");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_env_value() {
        let parsed: usize = parse_env_value("12", "KEY").unwrap();
        assert_eq!(parsed, 12);
        assert!(parse_env_value::<usize>("twelve", "KEY").is_err());
    }

    #[test]
    fn test_quality_thresholds_resolution() {
        let config = OrchestratorConfig::default().with_quality_preset("lenient");
        assert_eq!(config.quality_thresholds(), QualityThresholds::lenient());
    }
}
