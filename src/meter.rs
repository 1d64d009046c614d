//! Query batching accumulator
//!
//! Converts a stream of sub-credit-cost events into discrete whole-credit
//! debits. Fractional usage accumulates in the account's pending unit
//! counter; only when the counter crosses the batch threshold does a
//! ledger entry appear. The counter itself is not separately audited.

use crate::ledger::CreditLedger;
use crate::types::{AccountId, MeterOutcome};
use crate::Result;

/// Split accumulated usage units into whole credits and carry-over.
///
/// Returns `(credits_to_deduct, remainder)` with
/// `remainder < threshold`.
pub(crate) fn split_units(pending: u32, units: u32, threshold: u32) -> (u32, u32) {
    debug_assert!(threshold > 0);
    let total = u64::from(pending) + u64::from(units);
    let deducted = u32::try_from(total / u64::from(threshold)).unwrap_or(u32::MAX);
    let remainder = (total % u64::from(threshold)) as u32;
    (deducted, remainder)
}

/// Public contract of the accumulator: `record_usage`
#[derive(Clone)]
pub struct UsageMeter {
    ledger: CreditLedger,
}

impl UsageMeter {
    /// Create a meter over an open ledger
    pub fn new(ledger: CreditLedger) -> Self {
        Self { ledger }
    }

    /// Record `units` of metered usage for `account`.
    ///
    /// Requires at least one whole available credit. Below the threshold,
    /// only the pending counter moves (no ledger entry); on crossing it,
    /// the counter reset and the whole-credit debit commit atomically.
    pub async fn record_usage(&self, account: &AccountId, units: u32) -> Result<MeterOutcome> {
        // Same per-account lock as the cost gate, so meter commits cannot
        // interleave with an enforcement check-commit window.
        let _guard = self.ledger.lock_account(account).await;

        let result = self
            .ledger
            .handle()
            .meter_usage(account.clone(), units)
            .await;

        match &result {
            Ok(outcome) => {
                if outcome.credits_deducted > 0 {
                    self.ledger.metrics().meter_batches_total.inc();
                    self.ledger.metrics().commits_total.inc();
                }
                tracing::debug!(
                    account = %account,
                    units,
                    credits_deducted = outcome.credits_deducted,
                    units_remaining = outcome.units_remaining_in_batch,
                    "Metered usage recorded"
                );
            }
            Err(crate::Error::InsufficientCredits { .. }) => {
                self.ledger.metrics().insufficient_total.inc();
            }
            Err(_) => {}
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_below_threshold() {
        assert_eq!(split_units(0, 30, 100), (0, 30));
        assert_eq!(split_units(30, 40, 100), (0, 70));
    }

    #[test]
    fn test_split_crossing_threshold() {
        // 80 pending + 170 units = 250 -> 2 credits, 50 carry-over
        assert_eq!(split_units(80, 170, 100), (2, 50));
        assert_eq!(split_units(99, 1, 100), (1, 0));
    }

    #[test]
    fn test_split_exact_multiples() {
        assert_eq!(split_units(0, 300, 100), (3, 0));
        assert_eq!(split_units(50, 50, 100), (1, 0));
    }

    #[test]
    fn test_split_threshold_one() {
        // Every unit is a whole credit
        assert_eq!(split_units(0, 7, 1), (7, 0));
    }
}
