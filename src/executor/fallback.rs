//! Retry and fallback state machine.
//!
//! The executor drives one machine per cache miss. All decisions live in
//! [`transition`], which performs no I/O, so every path through the chain can
//! be exercised without a runtime.
//!
//! ```text
//! Pending -> Attempting -> Succeeded
//!                       -> BackoffWait -> Attempting
//!                       -> NextProvider -> Attempting
//!                       -> Exhausted | Cancelled | Fatal
//! ```

use std::time::Duration;

use crate::gateway::FailureClass;

/// Backoff exponent cap: `base * 2^10` at most.
pub const MAX_BACKOFF_EXPONENT: u32 = 10;

/// Attempt and backoff limits for one fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per endpoint (at least 1)
    pub max_attempts: u32,
    /// Base delay between attempts
    pub backoff_base: Duration,
    /// Length of the fallback chain
    pub endpoints: usize,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: Duration, endpoints: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
            endpoints,
        }
    }

    /// Delay after failed 0-based attempt `attempt`: `base * 2^attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(MAX_BACKOFF_EXPONENT);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }
}

/// Position in the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackState {
    Pending,
    /// Call endpoint `endpoint`, attempt `attempt` (0-based)
    Attempting { endpoint: usize, attempt: u32 },
    /// Sleep `delay`, then make attempt `attempt` on `endpoint`
    BackoffWait {
        endpoint: usize,
        attempt: u32,
        delay: Duration,
    },
    /// About to start on `endpoint` after the previous one gave up
    NextProvider { endpoint: usize },
    Succeeded { endpoint: usize },
    Exhausted,
    Cancelled,
    Fatal { endpoint: usize },
}

impl FallbackState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::Exhausted | Self::Cancelled | Self::Fatal { .. }
        )
    }
}

/// Input to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackEvent {
    /// Leave `Pending` or `NextProvider`
    Proceed,
    CallSucceeded,
    CallFailed {
        class: FailureClass,
        retry_after: Option<Duration>,
    },
    BackoffElapsed,
    /// Deadline or abort; no further calls may start
    Stop,
}

fn advance(endpoint: usize, policy: &RetryPolicy) -> FallbackState {
    let next = endpoint + 1;
    if next < policy.endpoints {
        FallbackState::NextProvider { endpoint: next }
    } else {
        FallbackState::Exhausted
    }
}

/// Compute the next state. Events that make no sense in a state leave it
/// unchanged; terminal states absorb every event.
pub fn transition(state: FallbackState, event: FallbackEvent, policy: &RetryPolicy) -> FallbackState {
    use FallbackEvent as E;
    use FallbackState as S;

    if state.is_terminal() {
        return state;
    }
    if event == E::Stop {
        return S::Cancelled;
    }

    match (state, event) {
        (S::Pending, E::Proceed) => {
            if policy.endpoints == 0 {
                S::Exhausted
            } else {
                S::Attempting {
                    endpoint: 0,
                    attempt: 0,
                }
            }
        }
        (S::NextProvider { endpoint }, E::Proceed) => S::Attempting {
            endpoint,
            attempt: 0,
        },
        (S::Attempting { endpoint, .. }, E::CallSucceeded) => S::Succeeded { endpoint },
        (S::Attempting { endpoint, attempt }, E::CallFailed { class, retry_after }) => match class {
            FailureClass::Transient if attempt + 1 < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                S::BackoffWait {
                    endpoint,
                    attempt: attempt + 1,
                    delay: retry_after.map_or(delay, |hint| delay.max(hint)),
                }
            }
            FailureClass::Transient | FailureClass::Policy => advance(endpoint, policy),
            FailureClass::Fatal => S::Fatal { endpoint },
        },
        (S::BackoffWait { endpoint, attempt, .. }, E::BackoffElapsed) => {
            S::Attempting { endpoint, attempt }
        }
        (state, _) => state,
    }
}
