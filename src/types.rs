//! Core types for the credit ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Memory safety (no unsafe code)
//! - Exact arithmetic (whole-credit i64 amounts)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Account identifier (owned by the identity subsystem, opaque here)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Category of a ledger entry
///
/// Categories are additive: new kinds may be appended, existing kinds are
/// never repurposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum EntryKind {
    /// One-time bonus on account creation
    SignupBonus,
    /// Credits granted by a subscription cycle
    SubscriptionGrant,
    /// Credits bought through the payment provider
    Purchase,
    /// Administrative correction, either sign
    ManualAdjustment,
    /// Credits consumed by a protected operation
    Consumption,
}

impl EntryKind {
    /// Stable string form (matches the serde representation)
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::SignupBonus => "signup_bonus",
            EntryKind::SubscriptionGrant => "subscription_grant",
            EntryKind::Purchase => "purchase",
            EntryKind::ManualAdjustment => "manual_adjustment",
            EntryKind::Consumption => "consumption",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One immutable, append-only record of a balance change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Monotonically assigned entry ID
    pub id: u64,

    /// Affected account
    pub account: AccountId,

    /// Signed amount: positive = grant, negative = consumption
    pub amount: i64,

    /// Spendable balance immediately after this entry was applied.
    /// Point-in-time snapshot for audit, never recomputed.
    pub balance_after: i64,

    /// Entry category
    pub kind: EntryKind,

    /// Free-text description of what triggered the entry
    pub source_detail: String,

    /// Optional reference to the resource paid for
    pub source_id: Option<Uuid>,

    /// Creation timestamp (listing order)
    pub created_at: DateTime<Utc>,
}

/// Current spendable balance and lifetime counters for one account
///
/// The balance is a materialized aggregate of the account's ledger entries:
/// `available == lifetime_earned - lifetime_spent` holds after every
/// committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Account this balance belongs to
    pub account: AccountId,

    /// Current spendable credits, never negative
    pub available: i64,

    /// Sum of all positive ledger amounts, monotone non-decreasing
    pub lifetime_earned: i64,

    /// Sum of absolute values of all negative ledger amounts,
    /// monotone non-decreasing
    pub lifetime_spent: i64,

    /// Metered usage units not yet converted into a whole-credit debit,
    /// always in `[0, batch_threshold)`
    pub pending_units: u32,

    /// Last commit timestamp
    pub updated_at: DateTime<Utc>,
}

impl AccountBalance {
    /// Zero-valued balance for an account with no committed entries yet
    pub fn zero(account: AccountId) -> Self {
        Self {
            account,
            available: 0,
            lifetime_earned: 0,
            lifetime_spent: 0,
            pending_units: 0,
            updated_at: Utc::now(),
        }
    }

    /// Apply a signed delta to `available` and the matching lifetime counter.
    ///
    /// Enforces nothing on its own; only the transaction coordinator may
    /// call this, after its conditional overdraw check.
    pub(crate) fn apply_delta(&mut self, amount: i64) {
        self.available += amount;
        if amount > 0 {
            self.lifetime_earned += amount;
        } else {
            self.lifetime_spent += -amount;
        }
        self.updated_at = Utc::now();
    }
}

/// One page of a per-account ledger listing, newest first
///
/// No total count is exposed: end-user listings must not allow inferring
/// aggregate activity volume.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerPage {
    /// Entries on this page
    pub entries: Vec<LedgerEntry>,
    /// Whether more entries exist beyond this page
    pub has_more: bool,
}

/// Filter for administrative ledger listings
#[derive(Debug, Clone, Default)]
pub struct AdminLedgerQuery {
    /// Restrict to one account (cross-account when `None`)
    pub account: Option<AccountId>,
    /// Restrict to one entry kind
    pub kind: Option<EntryKind>,
    /// Substring match on `source_detail`
    pub search: Option<String>,
    /// Page index, 0-based
    pub page: usize,
    /// Entries per page
    pub page_size: usize,
}

/// One page of an administrative ledger listing, with an exact total
#[derive(Debug, Clone, Serialize)]
pub struct AdminLedgerPage {
    /// Entries on this page, newest first
    pub entries: Vec<LedgerEntry>,
    /// Whether more entries exist beyond this page
    pub has_more: bool,
    /// Exact number of entries matching the query
    pub total: u64,
}

/// Result of a metered usage recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MeterOutcome {
    /// Whole credits debited by this call (0 on the counter-only fast path)
    pub credits_deducted: u32,
    /// Units carried over toward the next whole-credit debit
    pub units_remaining_in_batch: u32,
}

/// Receipt for a committed balance mutation
#[derive(Debug, Clone)]
pub struct CommitReceipt {
    /// ID of the ledger entry written by this commit
    pub entry_id: u64,
    /// Balance after the commit
    pub balance: AccountBalance,
}
