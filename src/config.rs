//! Router configuration.
//!
//! Everything is validated once, up front: a [`RouterConfig`] that passes
//! [`RouterConfig::validate`] never produces a configuration error mid-batch.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::router::{default_tiers, TierConfig, TierRouter};

/// Response cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached responses
    pub capacity: usize,
    /// Entry lifetime in seconds
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            ttl_secs: 3600,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Batch execution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Maximum simultaneous provider workers
    pub concurrency: usize,
    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,
    /// Attempts per provider endpoint before advancing the fallback chain
    pub max_retries: u32,
    /// Base delay for exponential backoff in milliseconds
    pub backoff_base_ms: u64,
    /// Optional wall-clock limit for a whole batch in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_deadline_ms: Option<u64>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            timeout_ms: 30_000,
            max_retries: 3,
            backoff_base_ms: 1_000,
            batch_deadline_ms: None,
        }
    }
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn batch_deadline(&self) -> Option<Duration> {
        self.batch_deadline_ms.map(Duration::from_millis)
    }
}

/// Complete router configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Tier table; must partition [0, 1]
    pub tiers: Vec<TierConfig>,
    /// Response cache settings
    pub cache: CacheConfig,
    /// Batch execution settings
    pub execution: ExecutionConfig,
    /// Optional spend ceiling for the executor's lifetime (USD)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_usd: Option<f64>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            tiers: default_tiers(),
            cache: CacheConfig::default(),
            execution: ExecutionConfig::default(),
            budget_usd: None,
        }
    }
}

impl RouterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON configuration and validate it.
    ///
    /// Omitted sections take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_tiers(mut self, tiers: Vec<TierConfig>) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache.capacity = capacity;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache.ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.execution.concurrency = concurrency;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.execution.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.execution.max_retries = max_retries;
        self
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.execution.backoff_base_ms = base.as_millis() as u64;
        self
    }

    pub fn with_batch_deadline(mut self, deadline: Duration) -> Self {
        self.execution.batch_deadline_ms = Some(deadline.as_millis() as u64);
        self
    }

    pub fn with_budget(mut self, budget_usd: f64) -> Self {
        self.budget_usd = Some(budget_usd);
        self
    }

    /// Validate every setting and build the tier router.
    pub fn validate(&self) -> Result<TierRouter> {
        if self.cache.capacity == 0 {
            return Err(Error::config("cache capacity must be positive"));
        }
        if self.cache.ttl_secs == 0 {
            return Err(Error::config("cache ttl_secs must be positive"));
        }

        let exec = &self.execution;
        if exec.concurrency == 0 {
            return Err(Error::config("concurrency must be positive"));
        }
        if exec.timeout_ms == 0 {
            return Err(Error::config("timeout_ms must be positive"));
        }
        if exec.max_retries == 0 {
            return Err(Error::config(
                "max_retries must allow at least one attempt per provider",
            ));
        }
        if exec.batch_deadline_ms == Some(0) {
            return Err(Error::config("batch_deadline_ms must be positive when set"));
        }

        if let Some(budget) = self.budget_usd {
            if !budget.is_finite() || budget < 0.0 {
                return Err(Error::config(format!(
                    "budget_usd must be a non-negative number, got {}",
                    budget
                )));
            }
        }

        TierRouter::new(self.tiers.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = RouterConfig::default();

        assert_eq!(config.cache.capacity, 1000);
        assert_eq!(config.cache.ttl(), Duration::from_secs(3600));
        assert_eq!(config.execution.concurrency, 5);
        assert_eq!(config.execution.timeout(), Duration::from_secs(30));
        assert_eq!(config.execution.max_retries, 3);
        assert_eq!(config.execution.backoff_base(), Duration::from_secs(1));
        assert_eq!(config.execution.batch_deadline(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = RouterConfig::new()
            .with_concurrency(2)
            .with_timeout(Duration::from_millis(500))
            .with_max_retries(1)
            .with_backoff_base(Duration::from_millis(10))
            .with_batch_deadline(Duration::from_secs(5))
            .with_cache_capacity(10)
            .with_cache_ttl(Duration::from_secs(60))
            .with_budget(1.5);

        assert_eq!(config.execution.concurrency, 2);
        assert_eq!(config.execution.timeout_ms, 500);
        assert_eq!(config.execution.batch_deadline_ms, Some(5000));
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.budget_usd, Some(1.5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = RouterConfig::from_json(
            r#"{
                "execution": { "concurrency": 8 },
                "budget_usd": 2.0
            }"#,
        )
        .unwrap();

        assert_eq!(config.execution.concurrency, 8);
        assert_eq!(config.execution.timeout_ms, 30_000);
        assert_eq!(config.tiers.len(), 5);
        assert_eq!(config.budget_usd, Some(2.0));
    }

    #[test]
    fn test_from_json_custom_tiers() {
        let config = RouterConfig::from_json(
            r#"{
                "tiers": [
                    {
                        "id": "cheap",
                        "endpoints": [{ "provider": "openrouter", "model": "openai/gpt-4o-mini" }],
                        "cost_per_million_tokens": 0.15,
                        "max_tokens": 150,
                        "lower_bound": 0.0,
                        "upper_bound": 0.6
                    },
                    {
                        "id": "smart",
                        "endpoints": [
                            { "provider": "openrouter", "model": "openai/gpt-4o" },
                            { "provider": "backup", "model": "claude-3.5-sonnet" }
                        ],
                        "cost_per_million_tokens": 5.0,
                        "max_tokens": 500,
                        "lower_bound": 0.6
                    }
                ]
            }"#,
        )
        .unwrap();

        let router = config.validate().unwrap();
        assert_eq!(router.route(0.59).id.as_str(), "cheap");
        assert_eq!(router.route(0.6).id.as_str(), "smart");
        assert_eq!(router.route(0.6).endpoints[1].provider, "backup");
    }

    #[test]
    fn test_validation_failures() {
        let invalid = [
            RouterConfig::new().with_cache_capacity(0),
            RouterConfig::new().with_concurrency(0),
            RouterConfig::new().with_max_retries(0),
            RouterConfig::new().with_timeout(Duration::ZERO),
            RouterConfig::new().with_budget(-1.0),
            RouterConfig::new().with_budget(f64::NAN),
            RouterConfig::new().with_tiers(Vec::new()),
        ];

        for config in invalid {
            let err = config.validate().unwrap_err();
            assert!(matches!(err, Error::Config(_)), "unexpected error {:?}", err);
        }
    }

    #[test]
    fn test_from_json_rejects_malformed() {
        assert!(matches!(
            RouterConfig::from_json("{ not json"),
            Err(Error::Serialization(_))
        ));
        assert!(matches!(
            RouterConfig::from_json(r#"{ "cache": { "capacity": 0 } }"#),
            Err(Error::Config(_))
        ));
    }
}
