//! Shared spend budget.
//!
//! Amounts are tracked in whole micro-USD (rounded to nearest, with any paid call
//! debiting at least one micro) so concurrent workers can debit with a single
//! atomic compare-and-swap.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};

const MICROS_PER_USD: f64 = 1_000_000.0;

fn to_micros(usd: f64) -> u64 {
    (usd.max(0.0) * MICROS_PER_USD).round() as u64
}

/// Micros debited for a call. Any positive cost spends at least one micro.
fn debit_micros(usd: f64) -> u64 {
    let micros = to_micros(usd);
    if micros == 0 && usd > 0.0 {
        1
    } else {
        micros
    }
}

fn to_usd(micros: u64) -> f64 {
    micros as f64 / MICROS_PER_USD
}

/// Spend ceiling shared by all workers of an executor.
#[derive(Debug)]
pub struct Budget {
    limit_micros: u64,
    remaining_micros: AtomicU64,
}

impl Budget {
    /// Create a budget of `limit_usd` dollars. Negative or NaN limits are
    /// treated as zero.
    pub fn new(limit_usd: f64) -> Self {
        let limit_micros = to_micros(limit_usd);
        Self {
            limit_micros,
            remaining_micros: AtomicU64::new(limit_micros),
        }
    }

    /// Debit `cost_usd`, failing without side effects if the balance would go
    /// negative.
    pub fn try_spend(&self, cost_usd: f64) -> Result<()> {
        let cost = debit_micros(cost_usd);
        self.remaining_micros
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                remaining.checked_sub(cost)
            })
            .map(|_| ())
            .map_err(|remaining| Error::budget_exhausted(cost_usd, to_usd(remaining)))
    }

    /// Remaining balance in USD.
    pub fn remaining(&self) -> f64 {
        to_usd(self.remaining_micros.load(Ordering::Acquire))
    }

    /// Amount spent so far in USD.
    pub fn spent(&self) -> f64 {
        to_usd(self.limit_micros - self.remaining_micros.load(Ordering::Acquire))
    }

    /// Initial balance in USD.
    pub fn limit(&self) -> f64 {
        to_usd(self.limit_micros)
    }
}
