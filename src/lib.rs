//! # review-router
//!
//! Complexity-tiered routing of product-review analysis across hosted LLMs.
//!
//! ## Core Components
//!
//! - **Complexity**: Scores a review on technical, sentiment, length and domain axes
//! - **Router**: Maps the score to a cost tier with an ordered provider fallback chain
//! - **Cache**: LRU + TTL store keyed by a normalized input fingerprint
//! - **Gateway**: Provider abstraction with classified failures, plus an OpenRouter adapter
//! - **Executor**: Bounded-concurrency batches with timeouts, retries, fallback,
//!   deadlines and a shared spend budget
//!
//! ## Example
//!
//! ```rust,ignore
//! use review_router::{
//!     BatchExecutor, CostLedger, GatewayRegistry, InputItem, OpenRouterConfig,
//!     OpenRouterGateway, RouterConfig,
//! };
//! use std::sync::Arc;
//!
//! let gateway = OpenRouterGateway::new(OpenRouterConfig::new(api_key))?;
//! let registry = GatewayRegistry::new().with_gateway(Arc::new(gateway));
//! let ledger = Arc::new(CostLedger::new());
//!
//! let executor = BatchExecutor::new(
//!     RouterConfig::default().with_budget(5.0),
//!     registry,
//!     ledger.clone(),
//! )?;
//!
//! let report = executor
//!     .run(vec![InputItem::new("r1", "The 16GB RAM model is fast", "Electronics")])
//!     .await;
//! println!("spent ${:.4}", ledger.summary().total_cost);
//! ```

pub mod budget;
pub mod cache;
pub mod complexity;
pub mod config;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod prompt;
pub mod record;
pub mod router;

mod properties;

// Re-exports for convenience
pub use budget::Budget;
pub use cache::{CacheStats, CacheStore, Fingerprint, KeyGuard};
pub use complexity::{CategoryLexicon, ComplexityAnalyzer, ComplexityScore};
pub use config::{CacheConfig, ExecutionConfig, RouterConfig};
pub use error::{Error, Result};
pub use executor::{BatchExecutor, BatchReport, CachedResponse, InputItem};
pub use gateway::{
    FailureClass, GatewayRegistry, OpenRouterConfig, OpenRouterGateway, ProviderFailure,
    ProviderGateway, ProviderRequest, ProviderResponse, TokenUsage,
};
pub use prompt::{Quality, Recommendation, ReviewAnalysis, Sentiment};
pub use record::{
    CostLedger, CostSummary, FailureKind, MemorySink, ModelCosts, NullSink, Outcome,
    ProviderAttempt, RecordSink, RequestRecord,
};
pub use router::{default_tiers, ProviderEndpoint, RoutingDecision, TierConfig, TierId, TierRouter};
