//! Cost enforcement gate
//!
//! Wraps a protected operation with a declared, fixed integer cost.
//! Enforcement is opt-in per operation: no declared cost, or no resolved
//! account, and the operation runs without accounting. The balance check
//! happens before invocation; the charge is committed only after success.
//!
//! The check and the commit are bracketed by the account's mutation lock
//! (see [`CreditLedger`]): two concurrent calls against one account cannot
//! both pass the check before either commits, so `available` can never go
//! negative. Dropping the returned future between check and commit (caller
//! timeout, cancellation) releases the lock and charges nothing.

use crate::ledger::CreditLedger;
use crate::types::{AccountId, EntryKind};
use crate::{Error, Result};
use std::collections::HashMap;
use std::future::Future;

/// Static mapping from operation identifier to declared cost.
///
/// Loaded once at construction, never computed dynamically.
#[derive(Debug, Clone, Default)]
pub struct CostTable {
    costs: HashMap<String, u32>,
}

impl CostTable {
    /// Build from an operation -> cost map
    pub fn from_map(costs: HashMap<String, u32>) -> Self {
        Self { costs }
    }

    /// Declared cost for an operation, if any
    pub fn cost_of(&self, operation: &str) -> Option<u32> {
        self.costs.get(operation).copied()
    }
}

impl FromIterator<(String, u32)> for CostTable {
    fn from_iter<I: IntoIterator<Item = (String, u32)>>(iter: I) -> Self {
        Self {
            costs: iter.into_iter().collect(),
        }
    }
}

/// Enforcement wrapper for protected operations
#[derive(Clone)]
pub struct CostGate {
    ledger: CreditLedger,
    costs: CostTable,
}

impl CostGate {
    /// Create a gate over an open ledger with a cost table
    pub fn new(ledger: CreditLedger, costs: CostTable) -> Self {
        Self { ledger, costs }
    }

    /// Run `op`, charging its declared cost on success.
    ///
    /// - Undeclared operation or anonymous caller: `op` runs unaccounted.
    ///   A declared cost of `0` counts as undeclared: there is nothing to
    ///   charge, and the coordinator refuses zero-amount commits.
    /// - `available < cost`: fails with [`Error::InsufficientCredits`]
    ///   before `op` is invoked.
    /// - `op` fails: its error propagates untouched, nothing is charged.
    /// - `op` succeeds but the consumption commit fails: the failure is
    ///   logged and counted, never surfaced; the result is still returned.
    pub async fn enforce_and_run<F, Fut, T>(
        &self,
        account: Option<&AccountId>,
        operation: &str,
        op: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let cost = match self.costs.cost_of(operation) {
            Some(cost) if cost > 0 => i64::from(cost),
            // Unprotected operation: no accounting at all.
            _ => return op().await,
        };

        let account = match account {
            Some(account) => account,
            // Anonymous callers bypass accounting; access control for them
            // is the caller's concern.
            None => return op().await,
        };

        // Held through check, operation, and commit: serializes this
        // account's check-commit windows.
        let _guard = self.ledger.lock_account(account).await;

        let balance = self.ledger.storage().balance(account)?;
        if balance.available < cost {
            self.ledger.metrics().insufficient_total.inc();
            return Err(Error::InsufficientCredits {
                required: cost,
                available: balance.available,
            });
        }

        // Execute first, charge on success. A failure here propagates
        // untouched and nothing is charged.
        let result = op().await?;

        let timer = std::time::Instant::now();
        match self
            .ledger
            .handle()
            .commit(
                account.clone(),
                -cost,
                EntryKind::Consumption,
                format!("charge for operation '{}'", operation),
                None,
            )
            .await
        {
            Ok(receipt) => {
                self.ledger.metrics().commits_total.inc();
                self.ledger
                    .metrics()
                    .commit_duration
                    .observe(timer.elapsed().as_secs_f64());
                tracing::debug!(
                    account = %account,
                    operation,
                    cost,
                    balance_after = receipt.balance.available,
                    "Operation charged"
                );
            }
            Err(e) => {
                // The operation already completed; the caller keeps its
                // result and the discrepancy goes to reconciliation.
                self.ledger.metrics().commit_failures_swallowed.inc();
                tracing::error!(
                    account = %account,
                    operation,
                    cost,
                    error = %e,
                    "Post-success charge failed; result delivered uncharged"
                );
            }
        }

        Ok(result)
    }
}
