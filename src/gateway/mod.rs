//! Provider gateway abstraction.
//!
//! A gateway turns a [`ProviderRequest`] into either a [`ProviderResponse`]
//! or a classified [`ProviderFailure`]. The executor decides what to do with
//! a failure purely from its [`FailureClass`], so adding a provider never
//! touches the retry/fallback logic.
//!
//! ## Example
//!
//! ```rust,ignore
//! use review_router::gateway::{GatewayRegistry, OpenRouterConfig, OpenRouterGateway};
//! use std::sync::Arc;
//!
//! let gateway = OpenRouterGateway::new(OpenRouterConfig::new(api_key))?;
//! let registry = GatewayRegistry::new().with_gateway(Arc::new(gateway));
//! ```

mod openrouter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use openrouter::{classify_status, OpenRouterConfig, OpenRouterGateway};

/// A single completion request addressed to one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// Model identifier understood by the provider
    pub model: String,
    /// User prompt
    pub prompt: String,
    /// Optional system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Maximum output tokens
    pub max_tokens: u32,
}

impl ProviderRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            system: None,
            max_tokens: 200,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Successful provider reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Generated text
    pub output: String,
    /// Token usage
    pub usage: TokenUsage,
}

impl ProviderResponse {
    pub fn new(output: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            output: output.into(),
            usage,
        }
    }
}

/// How the executor reacts to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Retry the same endpoint after backoff
    Transient,
    /// Advance to the next endpoint immediately
    Policy,
    /// Abort the whole batch
    Fatal,
}

/// Classified failure of a single provider call.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProviderFailure {
    /// The call did not complete within the per-call timeout
    #[error("Request timed out")]
    Timeout,

    /// Network, protocol or server-side failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The provider refused the content
    #[error("Content rejected by moderation: {0}")]
    ContentModerationRejected(String),

    /// The provider asked us to slow down
    #[error("Rate limited")]
    RateLimited {
        /// Suggested wait before the next attempt
        retry_after: Option<Duration>,
    },

    /// Credentials rejected or provider-side credit exhausted
    #[error("Authentication or budget failure: {0}")]
    AuthOrBudgetExceeded(String),
}

impl ProviderFailure {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn moderation(message: impl Into<String>) -> Self {
        Self::ContentModerationRejected(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::AuthOrBudgetExceeded(message.into())
    }

    pub fn class(&self) -> FailureClass {
        match self {
            Self::Timeout | Self::Transport(_) | Self::RateLimited { .. } => {
                FailureClass::Transient
            }
            Self::ContentModerationRejected(_) => FailureClass::Policy,
            Self::AuthOrBudgetExceeded(_) => FailureClass::Fatal,
        }
    }

    /// Provider-suggested minimum wait before retrying.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// A hosted-LLM provider.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// Provider name referenced by tier endpoints.
    fn name(&self) -> &str;

    /// Perform one completion call.
    async fn call(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderFailure>;
}

/// Provider name -> gateway lookup.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<String, Arc<dyn ProviderGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gateway under its own name, replacing any previous one.
    pub fn with_gateway(mut self, gateway: Arc<dyn ProviderGateway>) -> Self {
        self.register(gateway);
        self
    }

    pub fn register(&mut self, gateway: Arc<dyn ProviderGateway>) {
        self.gateways.insert(gateway.name().to_string(), gateway);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ProviderGateway>> {
        self.gateways.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.gateways.contains_key(name)
    }

    /// Registered provider names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.gateways.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for GatewayRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayRegistry")
            .field("gateways", &self.names())
            .finish()
    }
}
