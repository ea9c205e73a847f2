//! Error types for review-router.

use thiserror::Error;

/// Result type alias using review-router's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or running the router.
///
/// Per-call provider failures are classified separately as
/// [`ProviderFailure`](crate::gateway::ProviderFailure); only the failures that
/// stop a whole batch surface here.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Configuration rejected at load time
    #[error("Configuration error: {0}")]
    Config(String),

    /// A tier references a provider with no registered gateway
    #[error("Unknown provider '{provider}' referenced by tier '{tier}'")]
    UnknownProvider { provider: String, tier: String },

    /// Authentication or provider-side budget failure; aborts the batch
    #[error("Fatal provider error: {provider} - {message}")]
    Fatal { provider: String, message: String },

    /// Local spend budget would go negative; aborts the batch
    #[error("Budget exhausted: spending ${requested:.6} with ${remaining:.6} remaining")]
    BudgetExhausted { requested: f64, remaining: f64 },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a fatal provider error.
    pub fn fatal(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fatal {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a budget exhausted error.
    pub fn budget_exhausted(requested: f64, remaining: f64) -> Self {
        Self::BudgetExhausted {
            requested,
            remaining,
        }
    }

    /// Whether this error aborts a running batch.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. } | Self::BudgetExhausted { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
