//! Credit Accounting Core
//!
//! Per-account spendable balances with an append-only audit ledger,
//! up-front cost enforcement for protected operations, and batching of
//! fractional metered usage into whole-credit debits.
//!
//! # Architecture
//!
//! - **Single Writer**: one coordinator task owns all balance mutations
//! - **Atomic Commits**: balance delta and ledger entry land in one batch
//! - **Per-Account Locking**: check-then-commit windows are serialized,
//!   so a balance can never be spent below zero by concurrent callers
//! - **Pay After Success**: protected operations run first and are charged
//!   only when they succeed
//!
//! # Invariants
//!
//! - `available == lifetime_earned - lifetime_spent` after every commit
//! - `available` never negative
//! - Entries are append-only: never modified or deleted
//! - A failed protected operation produces no entry and no balance change

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod config;
pub mod error;
pub mod gate;
pub mod ledger;
pub mod meter;
pub mod metrics;
pub mod storage;
pub mod types;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};
pub use gate::{CostGate, CostTable};
pub use ledger::CreditLedger;
pub use meter::UsageMeter;
pub use storage::Storage;
pub use types::{
    AccountBalance, AccountId, AdminLedgerPage, AdminLedgerQuery, CommitReceipt, EntryKind,
    LedgerEntry, LedgerPage, MeterOutcome,
};
