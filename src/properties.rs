//! Property-based tests for scoring, routing, caching and fallback using
//! proptest.
//!
//! These tests verify invariants that must hold for arbitrary input:
//!
//! - Scoring is deterministic, bounded, and its final score is the weighted sum
//! - Every score routes to exactly one tier whose band contains it
//! - Any valid set of cut points yields a partition the router accepts
//! - The cache never holds more than its capacity
//! - The fallback machine never exceeds its attempt budget per endpoint

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use std::time::Duration;

    use crate::cache::{CacheStore, Fingerprint};
    use crate::complexity::{ComplexityAnalyzer, ComplexityScore};
    use crate::executor::{transition, FallbackEvent, FallbackState, RetryPolicy};
    use crate::gateway::FailureClass;
    use crate::router::{TierConfig, TierRouter};

    fn category() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("Electronics".to_string()),
            Just("books".to_string()),
            Just("Home_and_Garden".to_string()),
            Just("Toys".to_string()),
            "[A-Za-z_]{0,12}",
        ]
    }

    fn review_text() -> impl Strategy<Value = String> {
        prop_oneof![
            "\\PC{0,300}",
            "([a-z]{1,10}[ .!?]{1,3}){0,80}",
            Just(String::new()),
        ]
    }

    fn unit() -> impl Strategy<Value = f64> {
        prop_oneof![Just(0.0), Just(1.0), 0.0f64..=1.0f64]
    }

    fn failure_event() -> impl Strategy<Value = FallbackEvent> {
        prop_oneof![
            Just(FallbackEvent::CallSucceeded),
            Just(FallbackEvent::CallFailed {
                class: FailureClass::Transient,
                retry_after: None,
            }),
            Just(FallbackEvent::CallFailed {
                class: FailureClass::Policy,
                retry_after: None,
            }),
            Just(FallbackEvent::CallFailed {
                class: FailureClass::Fatal,
                retry_after: None,
            }),
        ]
    }

    // =========================================================================
    // Scoring
    // =========================================================================

    proptest! {
        /// Identical inputs always produce bit-identical scores.
        #[test]
        fn scoring_is_deterministic(text in review_text(), category in category()) {
            let analyzer = ComplexityAnalyzer::new();
            let a = analyzer.score(&text, &category);
            let b = analyzer.score(&text, &category);
            prop_assert_eq!(a.final_score().to_bits(), b.final_score().to_bits());
            prop_assert_eq!(a, b);
        }

        /// Every sub-score and the final score stay within [0, 1].
        #[test]
        fn scores_are_bounded(text in review_text(), category in category()) {
            let score = ComplexityAnalyzer::new().score(&text, &category);
            for value in [
                score.technical(),
                score.sentiment(),
                score.length(),
                score.domain(),
                score.final_score(),
            ] {
                prop_assert!((0.0..=1.0).contains(&value), "{} out of range", value);
            }
        }

        /// The final score is reproducible from the four sub-scores.
        #[test]
        fn final_score_is_weighted_sum(t in unit(), s in unit(), l in unit(), d in unit()) {
            let score = ComplexityScore::from_parts(t, s, l, d);
            let expected = 0.35 * t + 0.25 * s + 0.20 * l + 0.20 * d;
            prop_assert!((score.final_score() - expected).abs() < 1e-12);

            let again = ComplexityScore::from_parts(
                score.technical(),
                score.sentiment(),
                score.length(),
                score.domain(),
            );
            prop_assert_eq!(again.final_score().to_bits(), score.final_score().to_bits());
        }

        /// Adding words never lowers the length sub-score.
        #[test]
        fn length_is_monotonic(shorter in 0usize..200, extra in 0usize..200) {
            let analyzer = ComplexityAnalyzer::without_lexicons();
            let a = analyzer.score(&"word ".repeat(shorter), "Books");
            let b = analyzer.score(&"word ".repeat(shorter + extra), "Books");
            prop_assert!(a.length() <= b.length());
        }
    }

    // =========================================================================
    // Routing
    // =========================================================================

    proptest! {
        /// Each score lands in exactly one default tier, and `route` picks it.
        #[test]
        fn default_tiers_partition_unit_interval(score in unit()) {
            let router = TierRouter::default();
            let containing: Vec<&TierConfig> =
                router.tiers().iter().filter(|t| t.contains(score)).collect();

            prop_assert_eq!(containing.len(), 1);
            prop_assert_eq!(&router.route(score).id, &containing[0].id);
        }

        /// Any strictly increasing cut points form a valid partition.
        #[test]
        fn generated_partitions_route_uniquely(
            mut cuts in prop::collection::vec(0.01f64..0.99f64, 0..6),
            score in unit()
        ) {
            cuts.sort_by(|a, b| a.total_cmp(b));
            cuts.dedup();

            let mut bounds = vec![0.0];
            bounds.extend(cuts.iter().copied());
            let tiers: Vec<TierConfig> = bounds
                .iter()
                .enumerate()
                .map(|(i, lower)| {
                    TierConfig::new(format!("t{}", i), *lower, bounds.get(i + 1).copied())
                        .with_endpoint("p", "m")
                })
                .collect();

            let router = TierRouter::new(tiers).unwrap();
            let tier = router.route(score);
            prop_assert!(tier.contains(score));
            prop_assert_eq!(router.tiers().iter().filter(|t| t.contains(score)).count(), 1);
        }

        /// Out-of-range scores still route to a tier.
        #[test]
        fn out_of_range_scores_route(score in prop::num::f64::ANY) {
            let router = TierRouter::default();
            let id = router.route(score).id.as_str().to_string();
            prop_assert!(router.tiers().iter().any(|t| t.id.as_str() == id));
        }
    }

    // =========================================================================
    // Cache and fallback
    // =========================================================================

    proptest! {
        /// The cache never exceeds its capacity, whatever the access pattern.
        #[test]
        fn cache_respects_capacity(
            capacity in 1usize..8,
            ops in prop::collection::vec((any::<bool>(), 0u8..16), 0..64)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();

            runtime.block_on(async {
                let cache = CacheStore::new(capacity, Duration::from_secs(60));
                for (is_put, key) in ops {
                    let fingerprint = Fingerprint::new(&key.to_string(), "Books");
                    if is_put {
                        cache.put(fingerprint, key).await;
                    } else if let Some(value) = cache.get(&fingerprint).await {
                        assert_eq!(value, key);
                    }
                    assert!(cache.len().await <= capacity);
                }
            });
        }

        /// No endpoint is attempted more than `max_attempts` times and the
        /// machine always terminates.
        #[test]
        fn fallback_respects_attempt_budget(
            max_attempts in 1u32..5,
            endpoints in 1usize..4,
            outcomes in prop::collection::vec(failure_event(), 0..40)
        ) {
            let policy = RetryPolicy::new(max_attempts, Duration::from_millis(1), endpoints);
            let mut attempts = vec![0u32; endpoints];
            let mut outcomes = outcomes.into_iter();
            let mut state = transition(FallbackState::Pending, FallbackEvent::Proceed, &policy);

            while !state.is_terminal() {
                state = match state {
                    FallbackState::Attempting { endpoint, .. } => {
                        attempts[endpoint] += 1;
                        let event = outcomes.next().unwrap_or(FallbackEvent::CallSucceeded);
                        transition(state, event, &policy)
                    }
                    FallbackState::BackoffWait { .. } => {
                        transition(state, FallbackEvent::BackoffElapsed, &policy)
                    }
                    _ => transition(state, FallbackEvent::Proceed, &policy),
                };
            }

            for count in attempts {
                prop_assert!(count <= max_attempts);
            }
        }
    }
}
