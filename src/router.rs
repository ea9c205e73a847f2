//! Tier router for complexity-based model selection.
//!
//! Maps a final complexity score to exactly one tier using contiguous,
//! non-overlapping bands:
//! - Lower bounds are inclusive, upper bounds exclusive
//! - The top tier is unbounded above and therefore includes 1.0
//! - Bands are validated once at construction, never per request
//!
//! Each tier carries an ordered endpoint list: the primary endpoint first,
//! followed by its fallbacks.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::complexity::ComplexityScore;
use crate::error::{Error, Result};

/// Provider name used by the default tier table.
pub const OPENROUTER_PROVIDER: &str = "openrouter";

/// Tier identifier (e.g. "lightweight").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TierId(String);

impl TierId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TierId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TierId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// One hosted model reachable through a named provider gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    /// Gateway name as registered in the
    /// [`GatewayRegistry`](crate::gateway::GatewayRegistry)
    pub provider: String,
    /// Model identifier sent to the provider
    pub model: String,
}

impl ProviderEndpoint {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl std::fmt::Display for ProviderEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

/// A bracket of endpoints sharing a cost profile, selected by score range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Tier identifier
    pub id: TierId,
    /// Ordered endpoints: primary first, then fallbacks
    pub endpoints: Vec<ProviderEndpoint>,
    /// Price per million tokens (USD)
    pub cost_per_million_tokens: f64,
    /// Maximum output tokens requested from the model
    pub max_tokens: u32,
    /// Inclusive lower score bound
    pub lower_bound: f64,
    /// Exclusive upper score bound; `None` for the unbounded top tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper_bound: Option<f64>,
}

impl TierConfig {
    /// Create a tier with no endpoints yet.
    pub fn new(id: impl Into<String>, lower_bound: f64, upper_bound: Option<f64>) -> Self {
        Self {
            id: TierId::new(id),
            endpoints: Vec::new(),
            cost_per_million_tokens: 0.0,
            max_tokens: 200,
            lower_bound,
            upper_bound,
        }
    }

    /// Append an endpoint to the fallback chain.
    pub fn with_endpoint(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.endpoints.push(ProviderEndpoint::new(provider, model));
        self
    }

    pub fn with_cost(mut self, cost_per_million_tokens: f64) -> Self {
        self.cost_per_million_tokens = cost_per_million_tokens;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Whether the score falls inside this tier's band.
    pub fn contains(&self, score: f64) -> bool {
        score >= self.lower_bound && self.upper_bound.map_or(true, |upper| score < upper)
    }

    /// Primary endpoint of the chain.
    pub fn primary(&self) -> Option<&ProviderEndpoint> {
        self.endpoints.first()
    }

    /// Cost of a call consuming `tokens` tokens.
    pub fn cost_for_tokens(&self, tokens: u64) -> f64 {
        (tokens as f64 / 1_000_000.0) * self.cost_per_million_tokens
    }
}

/// Canonical five-tier partition of `[0, 1]`, all served through OpenRouter.
pub fn default_tiers() -> Vec<TierConfig> {
    vec![
        TierConfig::new("ultra_lightweight", 0.0, Some(0.3))
            .with_endpoint(OPENROUTER_PROVIDER, "openai/gpt-4o-mini")
            .with_endpoint(OPENROUTER_PROVIDER, "meta-llama/llama-3.1-8b-instruct")
            .with_cost(0.15)
            .with_max_tokens(150),
        TierConfig::new("lightweight", 0.3, Some(0.5))
            .with_endpoint(OPENROUTER_PROVIDER, "anthropic/claude-3-haiku")
            .with_endpoint(OPENROUTER_PROVIDER, "openai/gpt-4o-mini")
            .with_cost(0.25)
            .with_max_tokens(200),
        TierConfig::new("medium", 0.5, Some(0.7))
            .with_endpoint(OPENROUTER_PROVIDER, "openai/gpt-3.5-turbo")
            .with_endpoint(OPENROUTER_PROVIDER, "anthropic/claude-3-haiku")
            .with_cost(0.50)
            .with_max_tokens(300),
        TierConfig::new("high", 0.7, Some(0.85))
            .with_endpoint(OPENROUTER_PROVIDER, "anthropic/claude-3.5-sonnet")
            .with_endpoint(OPENROUTER_PROVIDER, "openai/gpt-4o")
            .with_cost(3.0)
            .with_max_tokens(400),
        TierConfig::new("premium", 0.85, None)
            .with_endpoint(OPENROUTER_PROVIDER, "openai/gpt-4o")
            .with_endpoint(OPENROUTER_PROVIDER, "anthropic/claude-3.5-sonnet")
            .with_cost(5.0)
            .with_max_tokens(500),
    ]
}

/// Routing decision output.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingDecision {
    /// Selected tier
    pub tier: TierId,
    /// Score that drove the selection
    pub score: ComplexityScore,
    /// Ordered endpoints of the selected tier
    pub endpoints: Vec<ProviderEndpoint>,
    /// Output token cap for the tier
    pub max_tokens: u32,
    /// Human-readable reasons for the selection
    pub reasons: Vec<String>,
}

/// Score-band router over a validated tier table.
#[derive(Debug, Clone)]
pub struct TierRouter {
    /// Tiers sorted by lower bound
    tiers: Vec<TierConfig>,
}

impl Default for TierRouter {
    fn default() -> Self {
        // The default table is covered by `test_default_tiers_validate`.
        Self {
            tiers: default_tiers(),
        }
    }
}

impl TierRouter {
    /// Validate the tier table and build a router.
    ///
    /// Fails if the bands do not partition `[0, 1]` contiguously, if any tier
    /// has an empty fallback chain, or if ids repeat.
    pub fn new(mut tiers: Vec<TierConfig>) -> Result<Self> {
        if tiers.is_empty() {
            return Err(Error::config("at least one tier is required"));
        }

        let mut seen = HashSet::new();
        for tier in &tiers {
            validate_tier(tier)?;
            if !seen.insert(tier.id.clone()) {
                return Err(Error::config(format!("duplicate tier id '{}'", tier.id)));
            }
        }

        tiers.sort_by(|a, b| a.lower_bound.total_cmp(&b.lower_bound));

        if tiers[0].lower_bound != 0.0 {
            return Err(Error::config(format!(
                "lowest tier '{}' must start at 0.0, starts at {}",
                tiers[0].id, tiers[0].lower_bound
            )));
        }

        let last = tiers.len() - 1;
        for (i, tier) in tiers.iter().enumerate() {
            match (tier.upper_bound, i == last) {
                (None, true) => {}
                (Some(_), true) => {
                    return Err(Error::config(format!(
                        "top tier '{}' must be unbounded above",
                        tier.id
                    )));
                }
                (None, false) => {
                    return Err(Error::config(format!(
                        "only the top tier may be unbounded, '{}' is not the top tier",
                        tier.id
                    )));
                }
                (Some(upper), false) => {
                    let next = &tiers[i + 1];
                    if upper > 1.0 {
                        return Err(Error::config(format!(
                            "tier '{}' upper bound {} exceeds 1.0",
                            tier.id, upper
                        )));
                    }
                    if upper != next.lower_bound {
                        let kind = if upper < next.lower_bound { "gap" } else { "overlap" };
                        return Err(Error::config(format!(
                            "{} between tier '{}' (upper {}) and tier '{}' (lower {})",
                            kind, tier.id, upper, next.id, next.lower_bound
                        )));
                    }
                }
            }
        }

        Ok(Self { tiers })
    }

    /// Tiers ordered by lower bound.
    pub fn tiers(&self) -> &[TierConfig] {
        &self.tiers
    }

    /// Look up a tier by id.
    pub fn get(&self, id: &TierId) -> Option<&TierConfig> {
        self.tiers.iter().find(|t| &t.id == id)
    }

    /// Select the tier for a final score.
    ///
    /// NaN routes as 0.0, negative scores land in the lowest tier and scores
    /// above 1.0 in the top tier.
    pub fn route(&self, score: f64) -> &TierConfig {
        let score = if score.is_nan() { 0.0 } else { score.max(0.0) };
        // Lowest lower bound is 0.0, so at least one tier qualifies.
        let idx = self.tiers.partition_point(|t| t.lower_bound <= score);
        &self.tiers[idx.saturating_sub(1)]
    }

    /// Route a full complexity score and explain the choice.
    pub fn decide(&self, score: ComplexityScore) -> RoutingDecision {
        let tier = self.route(score.final_score());

        RoutingDecision {
            tier: tier.id.clone(),
            score,
            endpoints: tier.endpoints.clone(),
            max_tokens: tier.max_tokens,
            reasons: explain(&score, tier),
        }
    }

    /// Rough cost of analysing `text` on `tier`: prompt tokens approximated
    /// as chars / 4 plus the tier's full output allowance.
    pub fn estimate_cost(&self, text: &str, tier: &TierConfig) -> f64 {
        let prompt_tokens = (text.chars().count() as u64).div_ceil(4);
        tier.cost_for_tokens(prompt_tokens + u64::from(tier.max_tokens))
    }
}

fn validate_tier(tier: &TierConfig) -> Result<()> {
    if tier.id.as_str().trim().is_empty() {
        return Err(Error::config("tier id must not be empty"));
    }
    if tier.endpoints.is_empty() {
        return Err(Error::config(format!(
            "tier '{}' has an empty fallback chain",
            tier.id
        )));
    }
    if let Some(endpoint) = tier
        .endpoints
        .iter()
        .find(|e| e.provider.trim().is_empty() || e.model.trim().is_empty())
    {
        return Err(Error::config(format!(
            "tier '{}' has an incomplete endpoint '{}'",
            tier.id, endpoint
        )));
    }
    if !tier.cost_per_million_tokens.is_finite() || tier.cost_per_million_tokens < 0.0 {
        return Err(Error::config(format!(
            "tier '{}' cost must be a non-negative number",
            tier.id
        )));
    }
    if tier.max_tokens == 0 {
        return Err(Error::config(format!(
            "tier '{}' max_tokens must be positive",
            tier.id
        )));
    }
    if !(0.0..=1.0).contains(&tier.lower_bound) {
        return Err(Error::config(format!(
            "tier '{}' lower bound {} is outside [0, 1]",
            tier.id, tier.lower_bound
        )));
    }
    if let Some(upper) = tier.upper_bound {
        if !upper.is_finite() || upper <= tier.lower_bound {
            return Err(Error::config(format!(
                "tier '{}' upper bound {} must be above its lower bound {}",
                tier.id, upper, tier.lower_bound
            )));
        }
    }
    Ok(())
}

fn explain(score: &ComplexityScore, tier: &TierConfig) -> Vec<String> {
    let mut reasons = Vec::new();

    if score.final_score() < 0.3 {
        reasons.push("Simple analysis suitable for lightweight model".to_string());
    }
    if score.technical() > 0.6 {
        reasons.push("High technical content detected".to_string());
    }
    if score.sentiment() > 0.5 {
        reasons.push("Nuanced sentiment requires careful analysis".to_string());
    }
    if score.length() > 0.6 {
        reasons.push("Long review with detailed content".to_string());
    }
    if score.domain() > 0.5 {
        reasons.push("Domain-specific analysis signals present".to_string());
    }

    reasons.push(format!(
        "Complexity {:.3} -> {} tier",
        score.final_score(),
        tier.id
    ));
    reasons
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_tiers(split_low: f64, split_high: f64) -> Vec<TierConfig> {
        vec![
            TierConfig::new("low", 0.0, Some(split_low)).with_endpoint("p", "m"),
            TierConfig::new("high", split_high, None).with_endpoint("p", "m"),
        ]
    }

    #[test]
    fn test_default_tiers_validate() {
        let router = TierRouter::new(default_tiers()).unwrap();
        assert_eq!(router.tiers().len(), 5);
        assert_eq!(router.tiers()[0].id.as_str(), "ultra_lightweight");
    }

    #[test]
    fn test_route_boundaries() {
        let router = TierRouter::default();
        let cases = [
            (0.0, "ultra_lightweight"),
            (0.1, "ultra_lightweight"),
            (0.2999, "ultra_lightweight"),
            (0.3, "lightweight"),
            (0.5, "medium"),
            (0.7, "high"),
            (0.85, "premium"),
            (0.9, "premium"),
            (1.0, "premium"),
            (1.5, "premium"),
            (-0.2, "ultra_lightweight"),
            (f64::NAN, "ultra_lightweight"),
        ];
        for (score, expected) in cases {
            assert_eq!(router.route(score).id.as_str(), expected, "score {}", score);
        }
    }

    #[test]
    fn test_scenario_weighted_score_routes_to_lightweight() {
        let router = TierRouter::default();
        let score = ComplexityScore::from_parts(0.8, 0.1, 0.1, 0.1);
        let tier = score.tier(&router);

        assert_eq!(tier.id.as_str(), "lightweight");
        assert_eq!(tier.lower_bound, 0.3);
        assert_eq!(tier.upper_bound, Some(0.5));
    }

    #[test]
    fn test_unsorted_input_is_accepted() {
        let mut tiers = default_tiers();
        tiers.reverse();
        let router = TierRouter::new(tiers).unwrap();
        assert_eq!(router.route(0.4).id.as_str(), "lightweight");
    }

    #[test]
    fn test_rejects_gap() {
        let err = TierRouter::new(two_tiers(0.4, 0.5)).unwrap_err();
        assert!(err.to_string().contains("gap"));
    }

    #[test]
    fn test_rejects_overlap() {
        let err = TierRouter::new(two_tiers(0.6, 0.5)).unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn test_rejects_bounded_top_tier() {
        let tiers = vec![TierConfig::new("only", 0.0, Some(1.0)).with_endpoint("p", "m")];
        assert!(TierRouter::new(tiers).is_err());
    }

    #[test]
    fn test_rejects_nonzero_start() {
        let tiers = vec![TierConfig::new("only", 0.1, None).with_endpoint("p", "m")];
        assert!(TierRouter::new(tiers).is_err());
    }

    #[test]
    fn test_rejects_empty_fallback_chain() {
        let tiers = vec![TierConfig::new("only", 0.0, None)];
        let err = TierRouter::new(tiers).unwrap_err();
        assert!(err.to_string().contains("empty fallback chain"));
    }

    #[test]
    fn test_rejects_duplicate_ids_and_empty_table() {
        let tiers = vec![
            TierConfig::new("same", 0.0, Some(0.5)).with_endpoint("p", "m"),
            TierConfig::new("same", 0.5, None).with_endpoint("p", "m"),
        ];
        assert!(TierRouter::new(tiers).is_err());
        assert!(TierRouter::new(Vec::new()).is_err());
    }

    #[test]
    fn test_decide_explains_routing() {
        let router = TierRouter::default();

        let simple = router.decide(ComplexityScore::from_parts(0.1, 0.1, 0.1, 0.1));
        assert_eq!(simple.tier.as_str(), "ultra_lightweight");
        assert!(simple.reasons[0].contains("Simple analysis suitable for lightweight model"));

        let technical = router.decide(ComplexityScore::from_parts(0.9, 0.6, 0.9, 0.9));
        assert!(technical
            .reasons
            .iter()
            .any(|r| r.contains("High technical content detected")));
        assert_eq!(technical.endpoints.len(), 2);
    }

    #[test]
    fn test_cost_estimation() {
        let router = TierRouter::default();
        let tier = router.route(0.9);
        let cost = router.estimate_cost("Test text", tier);
        // (3 + 500) tokens at $5/M
        assert!((cost - 503.0 * 5.0 / 1_000_000.0).abs() < 1e-12);
        assert_eq!(tier.cost_for_tokens(1_000_000), 5.0);
    }
}
