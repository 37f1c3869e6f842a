//! In-process ledger backend
//!
//! Emulates the parts of a relational engine the ledger relies on:
//!
//! - **Atomic commit**: a transaction stages its inserts and balance updates
//!   and publishes them under one write lock. Dropping or rolling back the
//!   handle discards them.
//! - **Row locks**: one async mutex per account row, taken by
//!   `add_account_balance` and held until the transaction ends. Re-entrant
//!   within a transaction.
//! - **Deadlock detection**: a lock wait longer than `lock_timeout` fails
//!   with [`LedgerError::Deadlock`], the same class the PostgreSQL backend
//!   reports for `40P01`.
//! - **Sequences**: ids are handed out by counters that never go back, even
//!   when the inserting transaction rolls back.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use tracing::{debug, warn};

use super::error::LedgerError;
use super::primitives::{LedgerBackend, LedgerPrimitives, TransactionScope};
use super::types::{
    Account, AddAccountBalanceParams, CreateAccountParams, CreateEntryParams,
    CreateTransferParams, Entry, Transfer,
};
use crate::core_types::{AccountId, EntryId, TransferId};

/// Default wait for a row lock before reporting a deadlock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// Committed row totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerCounts {
    pub accounts: usize,
    pub entries: usize,
    pub transfers: usize,
}

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    entries: BTreeMap<EntryId, Entry>,
    transfers: BTreeMap<TransferId, Transfer>,
}

struct Shared {
    tables: RwLock<Tables>,
    row_locks: Mutex<HashMap<AccountId, Arc<RowLock<()>>>>,
    next_account_id: AtomicI64,
    next_entry_id: AtomicI64,
    next_transfer_id: AtomicI64,
    lock_timeout: Duration,
    fail_next_commit: AtomicBool,
    fail_next_rollback: AtomicBool,
}

impl Shared {
    fn row_lock(&self, id: AccountId) -> Arc<RowLock<()>> {
        self.row_locks.lock().entry(id).or_default().clone()
    }
}

/// In-memory storage engine
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// A contended row lock fails with `Deadlock` after `lock_timeout`;
    /// zero fails it immediately.
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                row_locks: Mutex::new(HashMap::new()),
                next_account_id: AtomicI64::new(1),
                next_entry_id: AtomicI64::new(1),
                next_transfer_id: AtomicI64::new(1),
                lock_timeout,
                fail_next_commit: AtomicBool::new(false),
                fail_next_rollback: AtomicBool::new(false),
            }),
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        self.shared.lock_timeout
    }

    pub fn counts(&self) -> LedgerCounts {
        let tables = self.shared.tables.read();
        LedgerCounts {
            accounts: tables.accounts.len(),
            entries: tables.entries.len(),
            transfers: tables.transfers.len(),
        }
    }

    /// Make the next commit fail (staged writes are discarded)
    pub fn fail_next_commit(&self) {
        self.shared.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Make the next explicit rollback report a failure
    pub fn fail_next_rollback(&self) {
        self.shared.fail_next_rollback.store(true, Ordering::SeqCst);
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerBackend for MemoryBackend {
    type Tx = MemoryTx;

    fn name(&self) -> &'static str {
        "Memory"
    }

    async fn begin(&self) -> Result<MemoryTx, LedgerError> {
        Ok(MemoryTx {
            shared: Arc::clone(&self.shared),
            accounts: BTreeMap::new(),
            entries: Vec::new(),
            transfers: Vec::new(),
            held: HashMap::new(),
        })
    }
}

/// Transaction handle of [`MemoryBackend`]
pub struct MemoryTx {
    shared: Arc<Shared>,
    /// Accounts created or updated by this transaction
    accounts: BTreeMap<AccountId, Account>,
    entries: Vec<Entry>,
    transfers: Vec<Transfer>,
    /// Row locks held until commit/rollback/drop
    held: HashMap<AccountId, OwnedMutexGuard<()>>,
}

impl MemoryTx {
    /// Account as seen by this transaction (own writes first)
    fn visible_account(&self, id: AccountId) -> Option<Account> {
        self.accounts
            .get(&id)
            .cloned()
            .or_else(|| self.shared.tables.read().accounts.get(&id).cloned())
    }

    fn is_committed_account(&self, id: AccountId) -> bool {
        self.shared.tables.read().accounts.contains_key(&id)
    }

    async fn lock_row(&mut self, id: AccountId) -> Result<(), LedgerError> {
        if self.held.contains_key(&id) {
            return Ok(());
        }
        let lock = self.shared.row_lock(id);
        let timeout = self.shared.lock_timeout;
        match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => {
                self.held.insert(id, guard);
                Ok(())
            }
            Err(_) => {
                warn!(account_id = id, ?timeout, "Row lock wait timed out");
                Err(LedgerError::Deadlock(format!(
                    "could not lock account {} within {:?}",
                    id, timeout
                )))
            }
        }
    }
}

#[async_trait]
impl LedgerPrimitives for MemoryTx {
    async fn create_account(&mut self, arg: CreateAccountParams) -> Result<Account, LedgerError> {
        let account = Account {
            id: self.shared.next_account_id.fetch_add(1, Ordering::SeqCst),
            owner: arg.owner,
            balance: arg.balance,
            currency: arg.currency,
            created_at: Utc::now(),
        };
        self.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_account(&mut self, id: AccountId) -> Result<Account, LedgerError> {
        self.visible_account(id)
            .ok_or(LedgerError::AccountNotFound(id))
    }

    async fn get_entry(&mut self, id: EntryId) -> Result<Entry, LedgerError> {
        if let Some(entry) = self.entries.iter().find(|e| e.id == id) {
            return Ok(entry.clone());
        }
        self.shared
            .tables
            .read()
            .entries
            .get(&id)
            .cloned()
            .ok_or(LedgerError::EntryNotFound(id))
    }

    async fn get_transfer(&mut self, id: TransferId) -> Result<Transfer, LedgerError> {
        if let Some(transfer) = self.transfers.iter().find(|t| t.id == id) {
            return Ok(transfer.clone());
        }
        self.shared
            .tables
            .read()
            .transfers
            .get(&id)
            .cloned()
            .ok_or(LedgerError::TransferNotFound(id))
    }

    async fn list_entries(&mut self, account_id: AccountId) -> Result<Vec<Entry>, LedgerError> {
        let mut entries: Vec<Entry> = self
            .shared
            .tables
            .read()
            .entries
            .values()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect();
        entries.extend(
            self.entries
                .iter()
                .filter(|e| e.account_id == account_id)
                .cloned(),
        );
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    async fn create_transfer(
        &mut self,
        arg: CreateTransferParams,
    ) -> Result<Transfer, LedgerError> {
        if arg.amount <= 0 {
            return Err(LedgerError::ConstraintViolation(format!(
                "transfers.amount must be positive, got {}",
                arg.amount
            )));
        }
        for id in [arg.from_account_id, arg.to_account_id] {
            if self.visible_account(id).is_none() {
                return Err(LedgerError::AccountNotFound(id));
            }
        }

        let transfer = Transfer {
            id: self.shared.next_transfer_id.fetch_add(1, Ordering::SeqCst),
            from_account_id: arg.from_account_id,
            to_account_id: arg.to_account_id,
            amount: arg.amount,
            created_at: Utc::now(),
        };
        self.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn create_entry(&mut self, arg: CreateEntryParams) -> Result<Entry, LedgerError> {
        if self.visible_account(arg.account_id).is_none() {
            return Err(LedgerError::AccountNotFound(arg.account_id));
        }

        let entry = Entry {
            id: self.shared.next_entry_id.fetch_add(1, Ordering::SeqCst),
            account_id: arg.account_id,
            amount: arg.amount,
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    async fn add_account_balance(
        &mut self,
        arg: AddAccountBalanceParams,
    ) -> Result<Account, LedgerError> {
        // Rows created by this transaction are invisible to others: no lock
        if self.is_committed_account(arg.id) {
            self.lock_row(arg.id).await?;
        }

        // Read only after the lock is held so no committed update is lost
        let mut account = self
            .visible_account(arg.id)
            .ok_or(LedgerError::AccountNotFound(arg.id))?;
        account.balance = account.balance.checked_add(arg.amount).ok_or_else(|| {
            LedgerError::Internal(format!("balance of account {} out of range", arg.id))
        })?;

        self.accounts.insert(account.id, account.clone());
        Ok(account)
    }
}

#[async_trait]
impl TransactionScope for MemoryTx {
    async fn commit(mut self) -> Result<(), LedgerError> {
        if self.shared.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(LedgerError::Internal("injected commit failure".to_string()));
        }

        {
            let mut tables = self.shared.tables.write();
            for (id, account) in std::mem::take(&mut self.accounts) {
                tables.accounts.insert(id, account);
            }
            for entry in std::mem::take(&mut self.entries) {
                tables.entries.insert(entry.id, entry);
            }
            for transfer in std::mem::take(&mut self.transfers) {
                tables.transfers.insert(transfer.id, transfer);
            }
        }

        debug!(rows_locked = self.held.len(), "Memory transaction committed");
        // Row locks are released when `self` drops, after publication
        Ok(())
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        if self.shared.fail_next_rollback.swap(false, Ordering::SeqCst) {
            return Err(LedgerError::Internal(
                "injected rollback failure".to_string(),
            ));
        }
        Ok(())
    }
}
