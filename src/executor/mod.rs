//! Batch execution with bounded concurrency, caching and provider fallback.
//!
//! Each input item yields exactly one [`RequestRecord`]:
//! - Cache hits are served without a provider slot, even after the deadline
//! - Misses are scored, routed and sent down the tier's fallback chain
//! - At most `concurrency` misses talk to providers at once
//! - A fatal failure aborts the batch and drops in-flight calls
//!
//! # Example
//!
//! ```rust,ignore
//! use review_router::{BatchExecutor, GatewayRegistry, InputItem, NullSink, RouterConfig};
//! use std::sync::Arc;
//!
//! let executor = BatchExecutor::new(RouterConfig::default(), registry, Arc::new(NullSink))?;
//! let report = executor
//!     .run(vec![InputItem::new("r1", "Battery died after a week", "Electronics")])
//!     .await;
//! let records = report.into_result()?;
//! ```

mod fallback;


use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub use fallback::{
    transition, FallbackEvent, FallbackState, RetryPolicy, MAX_BACKOFF_EXPONENT,
};

use crate::budget::Budget;
use crate::cache::{CacheStore, Fingerprint};
use crate::complexity::ComplexityAnalyzer;
use crate::config::RouterConfig;
use crate::error::{Error, Result};
use crate::gateway::{GatewayRegistry, ProviderFailure, ProviderRequest, TokenUsage};
use crate::prompt::{analysis_prompt, SYSTEM_PROMPT};
use crate::record::{FailureKind, Outcome, ProviderAttempt, RecordSink, RequestRecord};
use crate::router::{RoutingDecision, TierId, TierRouter};

/// One review to analyse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputItem {
    /// Caller-supplied identifier, copied into the record
    pub id: String,
    pub text: String,
    pub category: String,
}

impl InputItem {
    pub fn new(id: impl Into<String>, text: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            category: category.into(),
        }
    }
}

/// Cached result of a successful provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub output: String,
    pub tier: TierId,
    pub provider: String,
    pub model: String,
    pub tokens: TokenUsage,
}

/// Outcome of one [`BatchExecutor::run`].
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// One record per input item, in submission order
    pub records: Vec<RequestRecord>,
    /// The fatal error that aborted the batch, if any
    pub aborted: Option<Error>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.records.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.records.len() - self.succeeded()
    }

    pub fn cache_hits(&self) -> usize {
        self.records.iter().filter(|r| r.cache_hit).count()
    }

    /// Number of records that ended with `kind`.
    pub fn count_failures(&self, kind: FailureKind) -> usize {
        self.records
            .iter()
            .filter(|r| r.outcome == Outcome::Failure(kind))
            .count()
    }

    pub fn total_cost(&self) -> f64 {
        self.records.iter().map(|r| r.cost).sum()
    }

    /// All records, or the abort error if the batch was aborted.
    pub fn into_result(self) -> Result<Vec<RequestRecord>> {
        match self.aborted {
            Some(err) => Err(err),
            None => Ok(self.records),
        }
    }
}

/// Shared state of one batch run.
struct RunContext<'a> {
    /// Fired on fatal failure; drops in-flight calls
    abort: CancellationToken,
    /// Child of `abort`, also fired by the deadline; blocks new calls
    stop: CancellationToken,
    slots: &'a Semaphore,
    /// First fatal error wins
    fatal: &'a OnceLock<Error>,
}

impl RunContext<'_> {
    /// Record the fatal error and abort. Returns false if another item
    /// already aborted the batch.
    fn trigger_abort(&self, err: Error) -> bool {
        let first = self.fatal.set(err.clone()).is_ok();
        if first {
            error!(error = %err, "Aborting batch");
            self.abort.cancel();
        }
        first
    }
}

/// Runs batches of items through cache, router and providers.
pub struct BatchExecutor {
    config: RouterConfig,
    router: TierRouter,
    analyzer: ComplexityAnalyzer,
    registry: GatewayRegistry,
    cache: Arc<CacheStore<CachedResponse>>,
    sink: Arc<dyn RecordSink>,
    budget: Option<Arc<Budget>>,
}

impl BatchExecutor {
    /// Validate the configuration and check that every endpoint's provider
    /// has a registered gateway.
    pub fn new(
        config: RouterConfig,
        registry: GatewayRegistry,
        sink: Arc<dyn RecordSink>,
    ) -> Result<Self> {
        let router = config.validate()?;

        for tier in router.tiers() {
            if let Some(endpoint) = tier
                .endpoints
                .iter()
                .find(|e| !registry.contains(&e.provider))
            {
                return Err(Error::UnknownProvider {
                    provider: endpoint.provider.clone(),
                    tier: tier.id.to_string(),
                });
            }
        }

        let cache = Arc::new(CacheStore::from_config(&config.cache));
        let budget = config.budget_usd.map(|limit| Arc::new(Budget::new(limit)));

        Ok(Self {
            config,
            router,
            analyzer: ComplexityAnalyzer::new(),
            registry,
            cache,
            sink,
            budget,
        })
    }

    /// Share a cache across executors.
    pub fn with_cache(mut self, cache: Arc<CacheStore<CachedResponse>>) -> Self {
        self.cache = cache;
        self
    }

    /// Use an analyzer with custom category lexicons.
    pub fn with_analyzer(mut self, analyzer: ComplexityAnalyzer) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn router(&self) -> &TierRouter {
        &self.router
    }

    pub fn cache(&self) -> &Arc<CacheStore<CachedResponse>> {
        &self.cache
    }

    pub fn budget(&self) -> Option<&Arc<Budget>> {
        self.budget.as_ref()
    }

    /// Score and route an item without calling any provider.
    pub fn plan(&self, item: &InputItem) -> RoutingDecision {
        let score = self.analyzer.score(&item.text, &item.category);
        self.router.decide(score)
    }

    /// Upper-bound cost estimate for a batch, ignoring the cache.
    pub fn estimate_cost(&self, items: &[InputItem]) -> f64 {
        items
            .iter()
            .map(|item| {
                let score = self.analyzer.score(&item.text, &item.category);
                let tier = score.tier(&self.router);
                self.router.estimate_cost(&item.text, tier)
            })
            .sum()
    }

    /// Process a batch. Never fails as a whole: per-item failures are in the
    /// records and a fatal error is reported in [`BatchReport::aborted`].
    pub async fn run(&self, items: Vec<InputItem>) -> BatchReport {
        let started = Instant::now();
        let exec = &self.config.execution;

        info!(
            items = items.len(),
            concurrency = exec.concurrency,
            deadline_ms = ?exec.batch_deadline_ms,
            "Starting batch"
        );

        let slots = Semaphore::new(exec.concurrency);
        let fatal = OnceLock::new();
        let abort = CancellationToken::new();
        let ctx = RunContext {
            stop: abort.child_token(),
            abort,
            slots: &slots,
            fatal: &fatal,
        };

        let work = join_all(
            items
                .into_iter()
                .enumerate()
                .map(|(index, item)| self.process_item(index, item, &ctx)),
        );

        let records = match exec.batch_deadline() {
            Some(deadline) => {
                tokio::pin!(work);
                tokio::select! {
                    records = &mut work => records,
                    _ = tokio::time::sleep(deadline) => {
                        warn!(deadline_ms = deadline.as_millis() as u64, "Batch deadline elapsed");
                        ctx.stop.cancel();
                        work.await
                    }
                }
            }
            None => work.await,
        };

        let report = BatchReport {
            records,
            aborted: fatal.get().cloned(),
            elapsed: started.elapsed(),
        };

        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            cache_hits = report.cache_hits(),
            cost = report.total_cost(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            aborted = report.aborted.is_some(),
            "Batch finished"
        );

        report
    }

    fn emit(&self, record: RequestRecord) -> RequestRecord {
        debug!(outcome = ?record.outcome, cache_hit = record.cache_hit, "Item finished");
        self.sink.record(record.clone());
        record
    }

    #[instrument(skip_all, fields(index = index, input = %item.id))]
    async fn process_item(
        &self,
        index: usize,
        item: InputItem,
        ctx: &RunContext<'_>,
    ) -> RequestRecord {
        let started = Instant::now();
        let fingerprint = Fingerprint::new(&item.text, &item.category);
        let mut record = RequestRecord::new(index, item.id.clone(), fingerprint.clone());
        let cancelled = Outcome::Failure(FailureKind::Cancelled);

        // Duplicates queue here and find the first writer's result in the cache
        let _key = tokio::select! {
            biased;
            _ = ctx.abort.cancelled() => {
                return self.emit(record.finish(cancelled, started.elapsed()));
            }
            guard = self.cache.lock_key(&fingerprint) => guard,
        };

        if let Some(cached) = self.cache.get(&fingerprint).await {
            debug!(key = %fingerprint, tier = %cached.tier, "Cache hit");
            record.cache_hit = true;
            record.tier = Some(cached.tier);
            record.provider = Some(cached.provider);
            record.model = Some(cached.model);
            record.output = Some(cached.output);
            return self.emit(record.finish(Outcome::Success, started.elapsed()));
        }
        debug!(key = %fingerprint, "Cache miss");

        let _slot = tokio::select! {
            biased;
            _ = ctx.stop.cancelled() => {
                return self.emit(record.finish(cancelled, started.elapsed()));
            }
            permit = ctx.slots.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return self.emit(record.finish(cancelled, started.elapsed())),
            },
        };

        let score = self.analyzer.score(&item.text, &item.category);
        let tier = score.tier(&self.router);
        let decision = self.router.decide(score);
        debug!(
            tier = %tier.id,
            score = score.final_score(),
            reasons = ?decision.reasons,
            "Routed item"
        );
        record.tier = Some(tier.id.clone());

        let prompt = analysis_prompt(&item.text, &item.category);
        let exec = &self.config.execution;
        let policy = RetryPolicy::new(exec.max_retries, exec.backoff_base(), tier.endpoints.len());

        let mut state = transition(FallbackState::Pending, FallbackEvent::Proceed, &policy);
        let mut last_failure: Option<ProviderFailure> = None;
        let mut response = None;

        loop {
            state = match state {
                FallbackState::Pending | FallbackState::NextProvider { .. } => {
                    if let FallbackState::NextProvider { endpoint } = state {
                        info!(
                            provider = %tier.endpoints[endpoint].provider,
                            model = %tier.endpoints[endpoint].model,
                            "Falling back to next provider"
                        );
                    }
                    transition(state, FallbackEvent::Proceed, &policy)
                }

                FallbackState::Attempting { endpoint, attempt } => {
                    if ctx.stop.is_cancelled() {
                        transition(state, FallbackEvent::Stop, &policy)
                    } else {
                        let target = &tier.endpoints[endpoint];
                        let request = ProviderRequest::new(&target.model, &prompt)
                            .with_system(SYSTEM_PROMPT)
                            .with_max_tokens(tier.max_tokens);

                        let call_started = Instant::now();
                        let result = match self.registry.get(&target.provider) {
                            Some(gateway) => tokio::select! {
                                biased;
                                _ = ctx.abort.cancelled() => {
                                    debug!(provider = %target.provider, "Dropping in-flight call");
                                    return self.emit(record.finish(cancelled, started.elapsed()));
                                }
                                outcome = tokio::time::timeout(exec.timeout(), gateway.call(request)) => {
                                    outcome.unwrap_or(Err(ProviderFailure::Timeout))
                                }
                            },
                            // Registration is checked at construction
                            None => Err(ProviderFailure::transport(format!(
                                "no gateway registered for '{}'",
                                target.provider
                            ))),
                        };

                        let mut attempt_log = ProviderAttempt {
                            provider: target.provider.clone(),
                            model: target.model.clone(),
                            attempt,
                            latency_ms: call_started.elapsed().as_millis() as u64,
                            failure: None,
                        };

                        match result {
                            Ok(ok) => {
                                record.attempts.push(attempt_log);
                                response = Some(ok);
                                transition(state, FallbackEvent::CallSucceeded, &policy)
                            }
                            Err(failure) => {
                                warn!(
                                    provider = %target.provider,
                                    model = %target.model,
                                    attempt = attempt,
                                    error = %failure,
                                    "Provider call failed"
                                );
                                let event = FallbackEvent::CallFailed {
                                    class: failure.class(),
                                    retry_after: failure.retry_after(),
                                };
                                attempt_log.failure = Some(failure.clone());
                                record.attempts.push(attempt_log);
                                last_failure = Some(failure);
                                transition(state, event, &policy)
                            }
                        }
                    }
                }

                FallbackState::BackoffWait { delay, attempt, .. } => {
                    debug!(delay_ms = delay.as_millis() as u64, attempt = attempt, "Backing off");
                    tokio::select! {
                        biased;
                        _ = ctx.stop.cancelled() => transition(state, FallbackEvent::Stop, &policy),
                        _ = tokio::time::sleep(delay) => {
                            transition(state, FallbackEvent::BackoffElapsed, &policy)
                        }
                    }
                }

                FallbackState::Succeeded { endpoint } => {
                    let target = &tier.endpoints[endpoint];
                    record.provider = Some(target.provider.clone());
                    record.model = Some(target.model.clone());

                    let Some(response) = response.take() else {
                        return self.emit(record.finish(cancelled, started.elapsed()));
                    };
                    let cost = tier.cost_for_tokens(response.usage.total());

                    if let Some(budget) = &self.budget {
                        if let Err(err) = budget.try_spend(cost) {
                            let outcome = if ctx.trigger_abort(err) {
                                Outcome::Failure(FailureKind::Aborted)
                            } else {
                                cancelled
                            };
                            return self.emit(record.finish(outcome, started.elapsed()));
                        }
                    }

                    self.cache
                        .put(
                            fingerprint.clone(),
                            CachedResponse {
                                output: response.output.clone(),
                                tier: tier.id.clone(),
                                provider: target.provider.clone(),
                                model: target.model.clone(),
                                tokens: response.usage,
                            },
                        )
                        .await;

                    record.cost = cost;
                    record.tokens = response.usage;
                    record.output = Some(response.output);
                    return self.emit(record.finish(Outcome::Success, started.elapsed()));
                }

                FallbackState::Exhausted => {
                    warn!(
                        tier = %tier.id,
                        attempts = record.attempts.len(),
                        "All providers failed"
                    );
                    return self.emit(record.finish(
                        Outcome::Failure(FailureKind::ExhaustedFallback),
                        started.elapsed(),
                    ));
                }

                FallbackState::Cancelled => {
                    debug!("Item cancelled before completion");
                    return self.emit(record.finish(cancelled, started.elapsed()));
                }

                FallbackState::Fatal { endpoint } => {
                    let target = &tier.endpoints[endpoint];
                    record.provider = Some(target.provider.clone());
                    record.model = Some(target.model.clone());

                    let message = last_failure
                        .take()
                        .map(|f| f.to_string())
                        .unwrap_or_else(|| "fatal provider failure".to_string());
                    let outcome = if ctx.trigger_abort(Error::fatal(&target.provider, message)) {
                        Outcome::Failure(FailureKind::Aborted)
                    } else {
                        cancelled
                    };
                    return self.emit(record.finish(outcome, started.elapsed()));
                }
            };
        }
    }
}

impl std::fmt::Debug for BatchExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchExecutor")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
