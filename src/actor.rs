//! Single-writer transaction coordinator
//!
//! All balance-affecting writes flow through one Tokio actor: the mailbox
//! serializes commits, so a balance check and its write never interleave
//! with another writer inside the actor. Each commit is one atomic storage
//! batch (balance row + ledger entry); partial application is never
//! observable.
//!
//! ```text
//! CreditLedger / CostGate / UsageMeter
//!        │  CoordinatorHandle (Clone)
//!        ▼
//!   mpsc::channel (bounded)
//!        │
//!        ▼
//!  CoordinatorActor (single task)
//!        │
//!        ▼
//!  Storage::commit_atomic (WriteBatch)
//! ```

use crate::meter::split_units;
use crate::types::{AccountId, CommitReceipt, EntryKind, LedgerEntry, MeterOutcome};
use crate::{Error, Result, Storage};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Message sent to the coordinator actor
pub enum CoordinatorMessage {
    /// Commit a balance delta plus its ledger entry
    Commit {
        /// Affected account
        account: AccountId,
        /// Signed amount
        amount: i64,
        /// Entry category
        kind: EntryKind,
        /// What triggered the entry
        source_detail: String,
        /// Optional resource reference
        source_id: Option<Uuid>,
        /// Reply channel
        response: oneshot::Sender<Result<CommitReceipt>>,
    },

    /// Record metered usage units, debiting whole credits when the
    /// batch threshold is crossed
    MeterUsage {
        /// Affected account
        account: AccountId,
        /// Usage units consumed by this call
        units: u32,
        /// Reply channel
        response: oneshot::Sender<Result<MeterOutcome>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that owns all balance mutations
pub struct CoordinatorActor {
    /// Storage backend
    storage: Arc<Storage>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<CoordinatorMessage>,

    /// Next ledger entry id; persisted inside each commit batch
    next_entry_id: u64,

    /// Usage units per whole credit
    batch_threshold: u32,
}

impl CoordinatorActor {
    /// Create new actor
    pub fn new(
        storage: Arc<Storage>,
        mailbox: mpsc::Receiver<CoordinatorMessage>,
        next_entry_id: u64,
        batch_threshold: u32,
    ) -> Self {
        Self {
            storage,
            mailbox,
            next_entry_id,
            batch_threshold,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                CoordinatorMessage::Shutdown => break,

                CoordinatorMessage::Commit {
                    account,
                    amount,
                    kind,
                    source_detail,
                    source_id,
                    response,
                } => {
                    let result = self.handle_commit(account, amount, kind, source_detail, source_id);
                    let _ = response.send(result);
                }

                CoordinatorMessage::MeterUsage {
                    account,
                    units,
                    response,
                } => {
                    let result = self.handle_meter_usage(account, units);
                    let _ = response.send(result);
                }
            }
        }
    }

    /// Apply one commit: conditional overdraw check, delta, atomic write.
    fn handle_commit(
        &mut self,
        account: AccountId,
        amount: i64,
        kind: EntryKind,
        source_detail: String,
        source_id: Option<Uuid>,
    ) -> Result<CommitReceipt> {
        if amount == 0 {
            return Err(Error::InvalidAdjustment(
                "zero-amount commits are not recorded".to_string(),
            ));
        }

        // Manual adjustments target existing accounts only.
        if kind == EntryKind::ManualAdjustment && !self.storage.balance_exists(&account)? {
            return Err(Error::AccountNotFound(account.to_string()));
        }

        let mut balance = self.storage.balance(&account)?;

        // Debits are conditional: never drive `available` negative.
        if amount < 0 && balance.available < -amount {
            return Err(match kind {
                EntryKind::ManualAdjustment => Error::InvalidAdjustment(format!(
                    "adjustment of {} would overdraw balance {}",
                    amount, balance.available
                )),
                _ => Error::InsufficientCredits {
                    required: -amount,
                    available: balance.available,
                },
            });
        }

        balance.apply_delta(amount);

        let entry = LedgerEntry {
            id: self.next_entry_id,
            account,
            amount,
            balance_after: balance.available,
            kind,
            source_detail,
            source_id,
            created_at: Utc::now(),
        };

        self.storage.commit_atomic(&balance, &entry)?;
        self.next_entry_id += 1;

        Ok(CommitReceipt {
            entry_id: entry.id,
            balance,
        })
    }

    /// Accumulate metered units; debit whole credits on threshold crossing.
    fn handle_meter_usage(&mut self, account: AccountId, units: u32) -> Result<MeterOutcome> {
        let mut balance = self.storage.balance(&account)?;

        // Coarse pre-check: metered usage needs at least one whole credit.
        if balance.available < 1 {
            return Err(Error::InsufficientCredits {
                required: 1,
                available: balance.available,
            });
        }

        let (deducted, remainder) = split_units(balance.pending_units, units, self.batch_threshold);

        if deducted == 0 {
            // Counter-only fast path: no ledger entry, no balance change.
            balance.pending_units = remainder;
            self.storage.put_balance(&balance)?;
            return Ok(MeterOutcome {
                credits_deducted: 0,
                units_remaining_in_batch: remainder,
            });
        }

        // The coarse check only guaranteed >= 1; re-verify the actual debit.
        if balance.available < i64::from(deducted) {
            return Err(Error::InsufficientCredits {
                required: i64::from(deducted),
                available: balance.available,
            });
        }

        // Counter reset and debit land in the same atomic batch.
        balance.pending_units = remainder;
        balance.apply_delta(-i64::from(deducted));

        let entry = LedgerEntry {
            id: self.next_entry_id,
            account,
            amount: -i64::from(deducted),
            balance_after: balance.available,
            kind: EntryKind::Consumption,
            source_detail: format!(
                "metered usage batch: {} units consumed",
                u64::from(deducted) * u64::from(self.batch_threshold)
            ),
            source_id: None,
            created_at: Utc::now(),
        };

        self.storage.commit_atomic(&balance, &entry)?;
        self.next_entry_id += 1;

        Ok(MeterOutcome {
            credits_deducted: deducted,
            units_remaining_in_batch: remainder,
        })
    }
}

/// Handle for sending messages to the coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
}

impl CoordinatorHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<CoordinatorMessage>) -> Self {
        Self { sender }
    }

    /// Commit a balance delta plus its ledger entry atomically
    pub async fn commit(
        &self,
        account: AccountId,
        amount: i64,
        kind: EntryKind,
        source_detail: String,
        source_id: Option<Uuid>,
    ) -> Result<CommitReceipt> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorMessage::Commit {
                account,
                amount,
                kind,
                source_detail,
                source_id,
                response: tx,
            })
            .await
            .map_err(|_| Error::Concurrency("Coordinator mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Record metered usage units
    pub async fn meter_usage(&self, account: AccountId, units: u32) -> Result<MeterOutcome> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorMessage::MeterUsage {
                account,
                units,
                response: tx,
            })
            .await
            .map_err(|_| Error::Concurrency("Coordinator mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(CoordinatorMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Coordinator mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the coordinator actor
pub fn spawn_coordinator(storage: Arc<Storage>, batch_threshold: u32) -> Result<CoordinatorHandle> {
    let next_entry_id = storage.load_next_entry_id()?;

    let (tx, rx) = mpsc::channel(1000); // Bounded channel for backpressure
    let actor = CoordinatorActor::new(storage, rx, next_entry_id, batch_threshold);

    tokio::spawn(async move {
        actor.run().await;
    });

    Ok(CoordinatorHandle::new(tx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    fn spawn_test_coordinator() -> (CoordinatorHandle, Arc<Storage>, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let storage = Arc::new(Storage::open(&config).unwrap());
        let handle = spawn_coordinator(storage.clone(), 100).unwrap();
        (handle, storage, temp_dir)
    }

    #[tokio::test]
    async fn test_commit_grant_and_debit() {
        let (handle, _storage, _temp) = spawn_test_coordinator();
        let account = AccountId::new("acct-1");

        let receipt = handle
            .commit(
                account.clone(),
                20,
                EntryKind::SignupBonus,
                "signup bonus".to_string(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(receipt.entry_id, 1);
        assert_eq!(receipt.balance.available, 20);

        let receipt = handle
            .commit(
                account.clone(),
                -5,
                EntryKind::Consumption,
                "test charge".to_string(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(receipt.entry_id, 2);
        assert_eq!(receipt.balance.available, 15);
        assert_eq!(receipt.balance.lifetime_spent, 5);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_overdraw_rejected_without_state_change() {
        let (handle, storage, _temp) = spawn_test_coordinator();
        let account = AccountId::new("acct-1");

        handle
            .commit(
                account.clone(),
                3,
                EntryKind::Purchase,
                "purchase".to_string(),
                None,
            )
            .await
            .unwrap();

        let err = handle
            .commit(
                account.clone(),
                -5,
                EntryKind::Consumption,
                "too expensive".to_string(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientCredits {
                required: 5,
                available: 3
            }
        ));

        // No entry, no balance mutation
        let balance = storage.balance(&account).unwrap();
        assert_eq!(balance.available, 3);
        let page = storage.list_entries(&account, 0, 10).unwrap();
        assert_eq!(page.entries.len(), 1);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_manual_adjustment_requires_existing_account() {
        let (handle, _storage, _temp) = spawn_test_coordinator();
        let account = AccountId::new("ghost");

        let err = handle
            .commit(
                account,
                10,
                EntryKind::ManualAdjustment,
                "admin grant".to_string(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AccountNotFound(_)));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_meter_counter_fast_path_writes_no_entry() {
        let (handle, storage, _temp) = spawn_test_coordinator();
        let account = AccountId::new("acct-1");

        handle
            .commit(
                account.clone(),
                10,
                EntryKind::Purchase,
                "purchase".to_string(),
                None,
            )
            .await
            .unwrap();

        let outcome = handle.meter_usage(account.clone(), 30).await.unwrap();
        assert_eq!(outcome.credits_deducted, 0);
        assert_eq!(outcome.units_remaining_in_batch, 30);

        let balance = storage.balance(&account).unwrap();
        assert_eq!(balance.available, 10);
        assert_eq!(balance.pending_units, 30);

        // Only the purchase entry exists
        let page = storage.list_entries(&account, 0, 10).unwrap();
        assert_eq!(page.entries.len(), 1);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_meter_batch_debit_resets_counter() {
        let (handle, storage, _temp) = spawn_test_coordinator();
        let account = AccountId::new("acct-1");

        handle
            .commit(
                account.clone(),
                10,
                EntryKind::Purchase,
                "purchase".to_string(),
                None,
            )
            .await
            .unwrap();

        // 80 pending, then 170 more: 250 units = 2 credits + 50 remainder
        handle.meter_usage(account.clone(), 80).await.unwrap();
        let outcome = handle.meter_usage(account.clone(), 170).await.unwrap();
        assert_eq!(outcome.credits_deducted, 2);
        assert_eq!(outcome.units_remaining_in_batch, 50);

        let balance = storage.balance(&account).unwrap();
        assert_eq!(balance.available, 8);
        assert_eq!(balance.pending_units, 50);

        let page = storage.list_entries(&account, 0, 10).unwrap();
        assert_eq!(page.entries[0].amount, -2);
        assert!(page.entries[0].source_detail.contains("200 units"));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_meter_batch_debit_exceeding_balance_rejected() {
        let (handle, storage, _temp) = spawn_test_coordinator();
        let account = AccountId::new("acct-1");

        // One credit passes the coarse check, but the crossing below
        // needs two.
        handle
            .commit(
                account.clone(),
                1,
                EntryKind::Purchase,
                "purchase".to_string(),
                None,
            )
            .await
            .unwrap();
        handle.meter_usage(account.clone(), 80).await.unwrap();

        // 80 pending + 170 units = 2 whole credits, only 1 available
        let err = handle.meter_usage(account.clone(), 170).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientCredits {
                required: 2,
                available: 1
            }
        ));

        // Counter and balance untouched, no debit entry written
        let balance = storage.balance(&account).unwrap();
        assert_eq!(balance.available, 1);
        assert_eq!(balance.pending_units, 80);
        let page = storage.list_entries(&account, 0, 10).unwrap();
        assert_eq!(page.entries.len(), 1);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_meter_requires_a_whole_credit() {
        let (handle, _storage, _temp) = spawn_test_coordinator();
        let account = AccountId::new("acct-1");

        let err = handle.meter_usage(account, 10).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientCredits {
                required: 1,
                available: 0
            }
        ));

        handle.shutdown().await.unwrap();
    }
}
