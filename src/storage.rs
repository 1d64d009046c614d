//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `balances` - Current account balances (key: account id)
//! - `entries` - Append-only ledger entries (key: entry id, big-endian)
//! - `indices` - Per-account entry index (key: len-prefixed account || entry id)
//! - `meta` - Bookkeeping (next entry id)
//!
//! Entry ids are assigned monotonically, so descending id order equals
//! newest-first `created_at` order for listings.

use crate::{
    error::{Error, Result},
    types::{AccountBalance, AccountId, AdminLedgerPage, AdminLedgerQuery, LedgerEntry, LedgerPage},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options,
    WriteBatch, DB,
};
use std::sync::Arc;

/// Column family names
const CF_BALANCES: &str = "balances";
const CF_ENTRIES: &str = "entries";
const CF_INDICES: &str = "indices";
const CF_META: &str = "meta";

/// Meta key holding the next entry id to assign
const META_NEXT_ENTRY_ID: &[u8] = b"next_entry_id";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        // Database options
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for the append-heavy entry log
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        // Column family descriptors
        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_BALANCES, Self::cf_options_balances()),
            ColumnFamilyDescriptor::new(CF_ENTRIES, Self::cf_options_entries()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!("Opened RocksDB at {:?}", path);

        Ok(Self { db: Arc::new(db) })
    }

    // Column family options

    fn cf_options_balances() -> Options {
        let mut opts = Options::default();
        // Balances are frequently read, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_entries() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false); // 10 bits per key
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    // Helper: get column family handle

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Key helpers

    fn entry_key(id: u64) -> [u8; 8] {
        id.to_be_bytes()
    }

    /// Account prefix for index keys: u16 length || account bytes.
    /// The length prefix keeps prefixes unambiguous for any account string.
    fn index_prefix(account: &AccountId) -> Vec<u8> {
        let bytes = account.as_str().as_bytes();
        let mut key = Vec::with_capacity(2 + bytes.len());
        key.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        key.extend_from_slice(bytes);
        key
    }

    fn index_key(account: &AccountId, id: u64) -> Vec<u8> {
        let mut key = Self::index_prefix(account);
        key.extend_from_slice(&id.to_be_bytes());
        key
    }

    // Balance operations

    /// Get balance, or a zero-valued default when no row exists yet.
    ///
    /// This is get-or-default, not get-or-create: no row is written until a
    /// mutation commits.
    pub fn balance(&self, account: &AccountId) -> Result<AccountBalance> {
        let cf = self.cf_handle(CF_BALANCES)?;

        match self.db.get_cf(cf, account.as_str().as_bytes())? {
            Some(value) => Ok(bincode::deserialize(&value)?),
            None => Ok(AccountBalance::zero(account.clone())),
        }
    }

    /// Whether a balance row has been materialized for this account
    pub fn balance_exists(&self, account: &AccountId) -> Result<bool> {
        let cf = self.cf_handle(CF_BALANCES)?;
        Ok(self.db.get_cf(cf, account.as_str().as_bytes())?.is_some())
    }

    /// Persist a balance row without a ledger entry.
    ///
    /// Only the meter's counter-only fast path uses this: the pending unit
    /// counter moved but no whole credit changed hands.
    pub fn put_balance(&self, balance: &AccountBalance) -> Result<()> {
        let cf = self.cf_handle(CF_BALANCES)?;
        let value = bincode::serialize(balance)?;
        self.db
            .put_cf(cf, balance.account.as_str().as_bytes(), &value)?;

        tracing::debug!(
            account = %balance.account,
            pending_units = balance.pending_units,
            "Pending meter counter persisted"
        );

        Ok(())
    }

    // Atomic commit

    /// Commit a balance mutation and its ledger entry in one atomic batch.
    ///
    /// Writes the balance row, the entry row, the per-account index row and
    /// the next-id meta key together; all succeed or none do. Partial
    /// application (balance without entry, or vice versa) is never
    /// observable.
    pub fn commit_atomic(&self, balance: &AccountBalance, entry: &LedgerEntry) -> Result<()> {
        let mut batch = WriteBatch::default();

        // 1. Balance row
        let cf_balances = self.cf_handle(CF_BALANCES)?;
        let balance_value = bincode::serialize(balance)?;
        batch.put_cf(cf_balances, balance.account.as_str().as_bytes(), &balance_value);

        // 2. Ledger entry
        let cf_entries = self.cf_handle(CF_ENTRIES)?;
        let entry_value = bincode::serialize(entry)?;
        batch.put_cf(cf_entries, Self::entry_key(entry.id), &entry_value);

        // 3. Per-account index
        let cf_indices = self.cf_handle(CF_INDICES)?;
        batch.put_cf(cf_indices, Self::index_key(&entry.account, entry.id), b"");

        // 4. Next entry id
        let cf_meta = self.cf_handle(CF_META)?;
        batch.put_cf(cf_meta, META_NEXT_ENTRY_ID, (entry.id + 1).to_be_bytes());

        // Atomic commit
        self.db.write(batch)?;

        tracing::debug!(
            entry_id = entry.id,
            account = %entry.account,
            amount = entry.amount,
            kind = %entry.kind,
            balance_after = entry.balance_after,
            "Ledger entry committed"
        );

        Ok(())
    }

    /// Next entry id to assign (1 for a fresh database)
    pub fn load_next_entry_id(&self) -> Result<u64> {
        let cf = self.cf_handle(CF_META)?;

        match self.db.get_cf(cf, META_NEXT_ENTRY_ID)? {
            Some(value) => {
                let bytes: [u8; 8] = value
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Storage("Corrupt next_entry_id".to_string()))?;
                Ok(u64::from_be_bytes(bytes))
            }
            None => Ok(1),
        }
    }

    // Entry reads

    /// Get entry by id
    pub fn get_entry(&self, id: u64) -> Result<LedgerEntry> {
        let cf = self.cf_handle(CF_ENTRIES)?;

        let value = self
            .db
            .get_cf(cf, Self::entry_key(id))?
            .ok_or_else(|| Error::Storage(format!("Entry {} not found", id)))?;

        Ok(bincode::deserialize(&value)?)
    }

    /// List one account's entries, newest first.
    ///
    /// Over-fetches by one to report `has_more` without a count query; no
    /// total is exposed on this path.
    pub fn list_entries(
        &self,
        account: &AccountId,
        page: usize,
        page_size: usize,
    ) -> Result<LedgerPage> {
        let page_size = page_size.max(1);
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let prefix = Self::index_prefix(account);
        // Seek to the largest possible key for this account, walk backwards.
        let upper = Self::index_key(account, u64::MAX);
        let iter = self
            .db
            .iterator_cf(cf_indices, IteratorMode::From(&upper, Direction::Reverse));

        let mut ids = Vec::with_capacity(page_size + 1);
        let mut skipped = 0usize;
        let skip = page * page_size;

        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if skipped < skip {
                skipped += 1;
                continue;
            }

            let id_bytes: [u8; 8] = key[prefix.len()..]
                .try_into()
                .map_err(|_| Error::Storage("Corrupt index key".to_string()))?;
            ids.push(u64::from_be_bytes(id_bytes));

            if ids.len() > page_size {
                break;
            }
        }

        let has_more = ids.len() > page_size;
        ids.truncate(page_size);

        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            entries.push(self.get_entry(id)?);
        }

        Ok(LedgerPage { entries, has_more })
    }

    /// Administrative listing: cross-account, filterable, with exact total.
    ///
    /// Scans the whole entry log; acceptable at admin call volumes.
    pub fn list_entries_admin(&self, query: &AdminLedgerQuery) -> Result<AdminLedgerPage> {
        let page_size = query.page_size.max(1);
        let cf_entries = self.cf_handle(CF_ENTRIES)?;

        let iter = self.db.iterator_cf(cf_entries, IteratorMode::End);

        let mut entries = Vec::with_capacity(page_size);
        let mut total = 0u64;
        let skip = query.page * page_size;

        for item in iter {
            let (_, value) = item?;
            let entry: LedgerEntry = bincode::deserialize(&value)?;

            if !Self::matches(query, &entry) {
                continue;
            }

            let position = total as usize;
            total += 1;

            if position >= skip && entries.len() < page_size {
                entries.push(entry);
            }
        }

        let has_more = total as usize > skip + entries.len();

        Ok(AdminLedgerPage {
            entries,
            has_more,
            total,
        })
    }

    fn matches(query: &AdminLedgerQuery, entry: &LedgerEntry) -> bool {
        if let Some(ref account) = query.account {
            if entry.account != *account {
                return false;
            }
        }
        if let Some(kind) = query.kind {
            if entry.kind != kind {
                return false;
            }
        }
        if let Some(ref search) = query.search {
            if !entry.source_detail.contains(search.as_str()) {
                return false;
            }
        }
        true
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntryKind;
    use chrono::Utc;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Storage::open(&config).unwrap(), temp_dir)
    }

    fn test_entry(id: u64, account: &AccountId, amount: i64, balance_after: i64) -> LedgerEntry {
        LedgerEntry {
            id,
            account: account.clone(),
            amount,
            balance_after,
            kind: if amount > 0 {
                EntryKind::Purchase
            } else {
                EntryKind::Consumption
            },
            source_detail: format!("test entry {}", id),
            source_id: None,
            created_at: Utc::now(),
        }
    }

    fn commit(storage: &Storage, account: &AccountId, id: u64, amount: i64) {
        let mut balance = storage.balance(account).unwrap();
        balance.apply_delta(amount);
        let entry = test_entry(id, account, amount, balance.available);
        storage.commit_atomic(&balance, &entry).unwrap();
    }

    #[test]
    fn test_balance_default_is_zero() {
        let (storage, _temp) = test_storage();
        let account = AccountId::new("acct-1");

        let balance = storage.balance(&account).unwrap();
        assert_eq!(balance.available, 0);

        // get-or-default must not materialize a row
        assert!(!storage.balance_exists(&account).unwrap());
    }

    #[test]
    fn test_commit_atomic_writes_both_rows() {
        let (storage, _temp) = test_storage();
        let account = AccountId::new("acct-1");

        commit(&storage, &account, 1, 20);

        let balance = storage.balance(&account).unwrap();
        assert_eq!(balance.available, 20);
        assert_eq!(balance.lifetime_earned, 20);

        let entry = storage.get_entry(1).unwrap();
        assert_eq!(entry.amount, 20);
        assert_eq!(entry.balance_after, 20);

        assert_eq!(storage.load_next_entry_id().unwrap(), 2);
    }

    #[test]
    fn test_list_entries_newest_first() {
        let (storage, _temp) = test_storage();
        let account = AccountId::new("acct-1");

        commit(&storage, &account, 1, 20);
        commit(&storage, &account, 2, -5);

        let page = storage.list_entries(&account, 0, 10).unwrap();
        assert_eq!(page.entries.len(), 2);
        assert!(!page.has_more);
        assert_eq!(page.entries[0].id, 2);
        assert_eq!(page.entries[0].amount, -5);
        assert_eq!(page.entries[1].id, 1);
    }

    #[test]
    fn test_list_entries_overfetch_pagination() {
        let (storage, _temp) = test_storage();
        let account = AccountId::new("acct-1");

        for id in 1..=5u64 {
            commit(&storage, &account, id, 1);
        }

        // 5 entries, page size 3: first page full with more, second page short
        let first = storage.list_entries(&account, 0, 3).unwrap();
        assert_eq!(first.entries.len(), 3);
        assert!(first.has_more);
        assert_eq!(first.entries[0].id, 5);

        let second = storage.list_entries(&account, 1, 3).unwrap();
        assert_eq!(second.entries.len(), 2);
        assert!(!second.has_more);
        assert_eq!(second.entries[1].id, 1);

        // Exactly page_size available: no has_more
        let exact = storage.list_entries(&account, 0, 5).unwrap();
        assert_eq!(exact.entries.len(), 5);
        assert!(!exact.has_more);
    }

    #[test]
    fn test_list_entries_isolated_per_account() {
        let (storage, _temp) = test_storage();
        let a = AccountId::new("acct-a");
        // Deliberately prefix-colliding name
        let ab = AccountId::new("acct-ab");

        commit(&storage, &a, 1, 10);
        commit(&storage, &ab, 2, 10);

        let page = storage.list_entries(&a, 0, 10).unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].account, a);
    }

    #[test]
    fn test_admin_listing_filters_and_total() {
        let (storage, _temp) = test_storage();
        let a = AccountId::new("acct-a");
        let b = AccountId::new("acct-b");

        commit(&storage, &a, 1, 20);
        commit(&storage, &a, 2, -5);
        commit(&storage, &b, 3, 10);

        // Cross-account, no filter
        let all = storage
            .list_entries_admin(&AdminLedgerQuery {
                page_size: 10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(all.total, 3);
        assert_eq!(all.entries.len(), 3);
        assert_eq!(all.entries[0].id, 3); // newest first

        // Filter by kind
        let consumption = storage
            .list_entries_admin(&AdminLedgerQuery {
                kind: Some(EntryKind::Consumption),
                page_size: 10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(consumption.total, 1);
        assert_eq!(consumption.entries[0].id, 2);

        // Search on source_detail
        let searched = storage
            .list_entries_admin(&AdminLedgerQuery {
                search: Some("entry 3".to_string()),
                page_size: 10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(searched.total, 1);
        assert_eq!(searched.entries[0].id, 3);
    }

    #[test]
    fn test_next_entry_id_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        {
            let storage = Storage::open(&config).unwrap();
            let account = AccountId::new("acct-1");
            commit(&storage, &account, 1, 5);
            commit(&storage, &account, 2, 5);
            storage.close().unwrap();
        }

        let storage = Storage::open(&config).unwrap();
        assert_eq!(storage.load_next_entry_id().unwrap(), 3);
    }
}
