//! Per-item request records and the sinks that receive them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::cache::Fingerprint;
use crate::gateway::{ProviderFailure, TokenUsage};
use crate::prompt::ReviewAnalysis;
use crate::router::TierId;

/// Why an item ended without a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Every endpoint of the tier failed
    ExhaustedFallback,
    /// The batch deadline elapsed or the batch was aborted before completion
    Cancelled,
    /// This item triggered the batch abort
    Aborted,
}

/// Terminal state of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure(FailureKind),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// One provider call made while serving an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAttempt {
    pub provider: String,
    pub model: String,
    /// 0-based attempt number on this endpoint
    pub attempt: u32,
    pub latency_ms: u64,
    /// `None` when the call succeeded
    pub failure: Option<ProviderFailure>,
}

/// Immutable account of how one input item was served.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    /// Unique record id
    pub id: Uuid,
    /// Position of the item in the submitted batch
    pub index: usize,
    /// Caller-supplied item id
    pub input_ref: String,
    pub fingerprint: Fingerprint,
    pub tier: Option<TierId>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub cache_hit: bool,
    /// Cost in USD; zero for cache hits and failures
    pub cost: f64,
    pub tokens: TokenUsage,
    /// Wall-clock time spent on the item
    pub latency_ms: u64,
    /// Model output, for successful items
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub attempts: Vec<ProviderAttempt>,
    pub completed_at: DateTime<Utc>,
    pub outcome: Outcome,
}

impl RequestRecord {
    /// Start a record for an item; outcome defaults to cancelled until set.
    pub fn new(index: usize, input_ref: impl Into<String>, fingerprint: Fingerprint) -> Self {
        Self {
            id: Uuid::new_v4(),
            index,
            input_ref: input_ref.into(),
            fingerprint,
            tier: None,
            provider: None,
            model: None,
            cache_hit: false,
            cost: 0.0,
            tokens: TokenUsage::default(),
            latency_ms: 0,
            output: None,
            attempts: Vec::new(),
            completed_at: Utc::now(),
            outcome: Outcome::Failure(FailureKind::Cancelled),
        }
    }

    /// Stamp completion time, latency and outcome.
    pub fn finish(mut self, outcome: Outcome, elapsed: Duration) -> Self {
        self.outcome = outcome;
        self.latency_ms = elapsed.as_millis() as u64;
        self.completed_at = Utc::now();
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Parsed analysis of the model output, for successful items.
    pub fn analysis(&self) -> Option<ReviewAnalysis> {
        self.output.as_deref().map(ReviewAnalysis::parse)
    }
}

/// Receiver of completed records.
///
/// Called from worker tasks; implementations must not block.
pub trait RecordSink: Send + Sync {
    fn record(&self, record: RequestRecord);
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl RecordSink for NullSink {
    fn record(&self, _record: RequestRecord) {}
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<RequestRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the records received so far.
    pub fn records(&self) -> Vec<RequestRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self.records.lock() {
            Ok(records) => records.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordSink for MemorySink {
    fn record(&self, record: RequestRecord) {
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}

/// Costs for a specific model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelCosts {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub request_count: u64,
}

/// Aggregated spend across records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    /// Total input tokens
    pub total_input_tokens: u64,
    /// Total output tokens
    pub total_output_tokens: u64,
    /// Total cost in USD
    pub total_cost: f64,
    /// Successful provider-served items
    pub request_count: u64,
    /// Items served from cache
    pub cache_hits: u64,
    /// Items that ended in failure
    pub failures: u64,
    /// Per-model breakdown
    pub by_model: HashMap<String, ModelCosts>,
    /// What the same tokens would have cost at the baseline price
    pub baseline_cost: f64,
}

impl CostSummary {
    /// Savings against the baseline price, in USD.
    pub fn savings(&self) -> f64 {
        self.baseline_cost - self.total_cost
    }

    /// Savings as a percentage of the baseline cost.
    pub fn savings_percent(&self) -> f64 {
        if self.baseline_cost <= 0.0 {
            0.0
        } else {
            self.savings() / self.baseline_cost * 100.0
        }
    }

    /// Mean cost per provider-served item.
    pub fn average_cost(&self) -> f64 {
        if self.request_count == 0 {
            0.0
        } else {
            self.total_cost / self.request_count as f64
        }
    }
}

/// Sink that aggregates spend instead of keeping records.
///
/// `baseline_cost_per_million` prices every token at a single reference model
/// so routing savings can be reported.
#[derive(Debug)]
pub struct CostLedger {
    summary: Mutex<CostSummary>,
    baseline_cost_per_million: f64,
}

impl CostLedger {
    /// Baseline of $5 per million tokens, the premium tier's price.
    pub const DEFAULT_BASELINE_PER_MILLION: f64 = 5.0;

    pub fn new() -> Self {
        Self {
            summary: Mutex::new(CostSummary::default()),
            baseline_cost_per_million: Self::DEFAULT_BASELINE_PER_MILLION,
        }
    }

    pub fn with_baseline(mut self, cost_per_million: f64) -> Self {
        self.baseline_cost_per_million = cost_per_million.max(0.0);
        self
    }

    pub fn summary(&self) -> CostSummary {
        match self.summary.lock() {
            Ok(summary) => summary.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn apply(&self, summary: &mut CostSummary, record: &RequestRecord) {
        if !record.is_success() {
            summary.failures += 1;
            return;
        }
        if record.cache_hit {
            summary.cache_hits += 1;
            return;
        }

        let usage = record.tokens;
        summary.total_input_tokens += usage.input_tokens;
        summary.total_output_tokens += usage.output_tokens;
        summary.total_cost += record.cost;
        summary.request_count += 1;
        summary.baseline_cost +=
            usage.total() as f64 / 1_000_000.0 * self.baseline_cost_per_million;

        let model = record.model.clone().unwrap_or_else(|| "unknown".to_string());
        let model_costs = summary.by_model.entry(model).or_default();
        model_costs.input_tokens += usage.input_tokens;
        model_costs.output_tokens += usage.output_tokens;
        model_costs.cost += record.cost;
        model_costs.request_count += 1;
    }
}

impl Default for CostLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordSink for CostLedger {
    fn record(&self, record: RequestRecord) {
        match self.summary.lock() {
            Ok(mut summary) => self.apply(&mut summary, &record),
            Err(poisoned) => self.apply(&mut poisoned.into_inner(), &record),
        }
    }
}

impl<S: RecordSink + ?Sized> RecordSink for Arc<S> {
    fn record(&self, record: RequestRecord) {
        (**self).record(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn served(model: &str, input: u64, output: u64, cost: f64) -> RequestRecord {
        let mut record = RequestRecord::new(0, "r1", Fingerprint::new("text", "Books"));
        record.model = Some(model.to_string());
        record.provider = Some("openrouter".to_string());
        record.tokens = TokenUsage::new(input, output);
        record.cost = cost;
        record.finish(Outcome::Success, Duration::from_millis(12))
    }

    #[test]
    fn test_record_defaults_and_finish() {
        let record = RequestRecord::new(3, "item-3", Fingerprint::new("a", "b"));
        assert_eq!(record.outcome, Outcome::Failure(FailureKind::Cancelled));
        assert!(!record.cache_hit);

        let finished = record.finish(Outcome::Success, Duration::from_millis(250));
        assert!(finished.is_success());
        assert_eq!(finished.latency_ms, 250);
        assert_eq!(finished.index, 3);
        assert_eq!(finished.analysis(), None);
    }

    #[test]
    fn test_analysis_from_output() {
        let mut record = served("m", 1, 1, 0.0);
        record.output = Some("SENTIMENT: negative\nRECOMMENDATION: avoid".to_string());

        let analysis = record.analysis().unwrap();
        assert_eq!(analysis.sentiment, crate::prompt::Sentiment::Negative);
        assert_eq!(analysis.recommendation, crate::prompt::Recommendation::Avoid);
    }

    #[test]
    fn test_memory_sink_collects() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());

        sink.record(served("openai/gpt-4o-mini", 10, 5, 0.0001));
        sink.record(served("openai/gpt-4o", 10, 5, 0.001));

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.records()[1].model.as_deref(), Some("openai/gpt-4o"));
    }

    #[test]
    fn test_cost_ledger_aggregates() {
        let ledger = CostLedger::new().with_baseline(10.0);

        ledger.record(served("openai/gpt-4o-mini", 600_000, 400_000, 0.15));
        ledger.record(served("openai/gpt-4o-mini", 60_000, 40_000, 0.015));
        ledger.record(served("openai/gpt-4o", 100_000, 0, 0.5));

        let mut hit = served("openai/gpt-4o-mini", 0, 0, 0.0);
        hit.cache_hit = true;
        ledger.record(hit);

        let failed = RequestRecord::new(9, "r9", Fingerprint::new("x", "y"))
            .finish(Outcome::Failure(FailureKind::ExhaustedFallback), Duration::ZERO);
        ledger.record(failed);

        let summary = ledger.summary();
        assert_eq!(summary.request_count, 3);
        assert_eq!(summary.cache_hits, 1);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.total_input_tokens, 760_000);
        assert!((summary.total_cost - 0.665).abs() < 1e-9);
        assert_eq!(summary.by_model["openai/gpt-4o-mini"].request_count, 2);

        // 1.2M tokens at $10/M
        assert!((summary.baseline_cost - 12.0).abs() < 1e-9);
        assert!((summary.savings() - 11.335).abs() < 1e-9);
        assert!(summary.savings_percent() > 90.0);
    }

    #[test]
    fn test_shared_sink_through_arc() {
        let sink = Arc::new(MemorySink::new());
        let shared: Arc<dyn RecordSink> = sink.clone();

        shared.record(served("m", 1, 1, 0.0));
        assert_eq!(sink.len(), 1);
    }
}
