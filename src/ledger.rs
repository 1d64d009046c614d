//! Main credit ledger orchestration layer
//!
//! This module ties together storage, the coordinator actor, and the
//! per-account lock registry into a high-level API for credit accounting.
//!
//! # Example
//!
//! ```no_run
//! use credit_ledger::{AccountId, Config, CreditLedger, EntryKind};
//!
//! #[tokio::main]
//! async fn main() -> credit_ledger::Result<()> {
//!     let config = Config::default();
//!     let ledger = CreditLedger::open(config).await?;
//!
//!     let account = AccountId::new("acct-1");
//!     ledger
//!         .grant(&account, 20, EntryKind::SignupBonus, "signup bonus", None)
//!         .await?;
//!
//!     let balance = ledger.balance(&account).await?;
//!     assert_eq!(balance.available, 20);
//!
//!     Ok(())
//! }
//! ```

use crate::{
    actor::{spawn_coordinator, CoordinatorHandle},
    gate::{CostGate, CostTable},
    meter::UsageMeter,
    metrics::Metrics,
    types::{
        AccountBalance, AccountId, AdminLedgerPage, AdminLedgerQuery, CommitReceipt, EntryKind,
        LedgerPage,
    },
    Config, Error, Result, Storage,
};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Idle lock entries are swept once the registry grows past this size.
const LOCK_SWEEP_THRESHOLD: usize = 1024;

/// Main credit ledger interface
///
/// Cheap to clone; all clones share the same storage, coordinator and
/// lock registry.
#[derive(Clone)]
pub struct CreditLedger {
    inner: Arc<Inner>,
}

struct Inner {
    /// Coordinator handle for writes
    handle: CoordinatorHandle,

    /// Direct storage access (for reads)
    storage: Arc<Storage>,

    /// Per-account mutation locks; serializes each account's
    /// check-then-commit windows
    locks: DashMap<AccountId, Arc<Mutex<()>>>,

    /// Metrics collector
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl CreditLedger {
    /// Open ledger with configuration
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let storage = Arc::new(Storage::open(&config)?);
        let handle = spawn_coordinator(storage.clone(), config.meter.batch_threshold)?;

        let metrics = Metrics::new()
            .map_err(|e| Error::Other(format!("Failed to create metrics: {}", e)))?;

        Ok(Self {
            inner: Arc::new(Inner {
                handle,
                storage,
                locks: DashMap::new(),
                metrics,
                config,
            }),
        })
    }

    /// Cost enforcement gate over this ledger, using the configured
    /// operation cost table
    pub fn gate(&self) -> CostGate {
        let table = CostTable::from_map(self.inner.config.costs.clone());
        CostGate::new(self.clone(), table)
    }

    /// Usage meter over this ledger
    pub fn meter(&self) -> UsageMeter {
        UsageMeter::new(self.clone())
    }

    /// Metrics collector (counters shared across all clones)
    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    // Reads

    /// Current balance for an account; zero-valued if no entry was ever
    /// committed for it
    pub async fn balance(&self, account: &AccountId) -> Result<AccountBalance> {
        self.inner.storage.balance(account)
    }

    /// One page of the account's ledger, newest first, with a has-more
    /// flag and no total
    pub async fn list_entries(
        &self,
        account: &AccountId,
        page: usize,
        page_size: usize,
    ) -> Result<LedgerPage> {
        self.inner.storage.list_entries(account, page, page_size)
    }

    /// Administrative listing: cross-account filtering and an exact total
    pub async fn list_entries_admin(&self, query: &AdminLedgerQuery) -> Result<AdminLedgerPage> {
        self.inner.storage.list_entries_admin(query)
    }

    // Writes

    /// Grant credits to an account (signup bonus, subscription cycle,
    /// completed purchase).
    ///
    /// Trusted entry point for the payment/subscription event source;
    /// payment authenticity is the caller's concern. The balance row is
    /// created lazily on first grant.
    ///
    /// A non-positive amount fails with [`Error::InvalidAdjustment`]; that
    /// variant covers all amount-validation rejections, and its message
    /// names the grant.
    pub async fn grant(
        &self,
        account: &AccountId,
        amount: i64,
        kind: EntryKind,
        source_detail: impl Into<String>,
        source_id: Option<Uuid>,
    ) -> Result<CommitReceipt> {
        if amount <= 0 {
            return Err(Error::InvalidAdjustment(format!(
                "grant amount must be positive, got {}",
                amount
            )));
        }

        let _guard = self.lock_account(account).await;
        let receipt = self
            .inner
            .handle
            .commit(account.clone(), amount, kind, source_detail.into(), source_id)
            .await?;
        self.inner.metrics.commits_total.inc();

        tracing::info!(
            account = %account,
            amount,
            kind = %kind,
            balance_after = receipt.balance.available,
            "Credits granted"
        );

        Ok(receipt)
    }

    /// Administrative adjustment, either sign, routed through the same
    /// atomic commit path as everything else.
    ///
    /// Rejects zero amounts, adjustments against accounts that have no
    /// balance row, and debits that would overdraw.
    pub async fn adjust_balance(
        &self,
        account: &AccountId,
        amount: i64,
        reason: impl Into<String>,
    ) -> Result<CommitReceipt> {
        if amount == 0 {
            return Err(Error::InvalidAdjustment(
                "adjustment amount must be non-zero".to_string(),
            ));
        }

        let _guard = self.lock_account(account).await;
        let receipt = self
            .inner
            .handle
            .commit(
                account.clone(),
                amount,
                EntryKind::ManualAdjustment,
                reason.into(),
                None,
            )
            .await?;
        self.inner.metrics.commits_total.inc();

        tracing::info!(
            account = %account,
            amount,
            balance_after = receipt.balance.available,
            "Balance adjusted"
        );

        Ok(receipt)
    }

    /// Shutdown ledger
    pub async fn shutdown(self) -> Result<()> {
        self.inner.handle.shutdown().await
    }

    // Internal plumbing for the gate and the meter

    /// Acquire this account's mutation lock.
    ///
    /// Every read-check-commit window (gate enforcement, metered usage,
    /// grants, adjustments) runs under this lock, so per-account sequences
    /// are serialized. Dropping the guard (including on cancellation)
    /// releases it.
    pub(crate) async fn lock_account(&self, account: &AccountId) -> OwnedMutexGuard<()> {
        // Sweep idle entries so the registry tracks currently-contended
        // accounts rather than every account ever touched. A strong count
        // of 1 means only the map holds the lock: no guard, no waiter.
        if self.inner.locks.len() >= LOCK_SWEEP_THRESHOLD {
            self.inner
                .locks
                .retain(|_, lock| Arc::strong_count(lock) > 1);
        }

        let lock = self
            .inner
            .locks
            .entry(account.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    pub(crate) fn storage(&self) -> &Storage {
        &self.inner.storage
    }

    pub(crate) fn handle(&self) -> &CoordinatorHandle {
        &self.inner.handle
    }
}
