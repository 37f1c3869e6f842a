//! Record primitives and storage backend traits
//!
//! A backend hands out transaction handles. Every primitive called on a
//! handle runs inside that handle's transaction; nothing is visible to other
//! transactions until [`TransactionScope::commit`] succeeds.

use async_trait::async_trait;

use super::error::LedgerError;
use super::types::{
    Account, AddAccountBalanceParams, CreateAccountParams, CreateEntryParams,
    CreateTransferParams, Entry, Transfer,
};
use crate::core_types::{AccountId, EntryId, TransferId};

/// Row-level operations on accounts, entries and transfers
#[async_trait]
pub trait LedgerPrimitives: Send {
    async fn create_account(&mut self, arg: CreateAccountParams) -> Result<Account, LedgerError>;

    async fn get_account(&mut self, id: AccountId) -> Result<Account, LedgerError>;

    async fn get_entry(&mut self, id: EntryId) -> Result<Entry, LedgerError>;

    async fn get_transfer(&mut self, id: TransferId) -> Result<Transfer, LedgerError>;

    /// All entries of one account, ascending by id
    async fn list_entries(&mut self, account_id: AccountId) -> Result<Vec<Entry>, LedgerError>;

    /// Insert a transfer row.
    ///
    /// Fails with `AccountNotFound` when either side does not exist and with
    /// `ConstraintViolation` when `amount <= 0`.
    async fn create_transfer(&mut self, arg: CreateTransferParams)
    -> Result<Transfer, LedgerError>;

    /// Insert an entry row. Fails with `AccountNotFound` for an unknown account.
    async fn create_entry(&mut self, arg: CreateEntryParams) -> Result<Entry, LedgerError>;

    /// Apply a signed delta to an account balance in one atomic step and
    /// return the updated row.
    ///
    /// # Locking
    /// Takes an exclusive lock on the account row that is held until the
    /// enclosing transaction ends. Callers touching several accounts must
    /// call this in ascending id order.
    ///
    /// No overdraft check: the resulting balance may be negative.
    async fn add_account_balance(
        &mut self,
        arg: AddAccountBalanceParams,
    ) -> Result<Account, LedgerError>;
}

/// A transaction-bound [`LedgerPrimitives`] handle.
///
/// Dropping a handle without committing rolls the transaction back.
#[async_trait]
pub trait TransactionScope: LedgerPrimitives + Sized {
    async fn commit(self) -> Result<(), LedgerError>;

    async fn rollback(self) -> Result<(), LedgerError>;
}

/// Storage engine that can open transactions
#[async_trait]
pub trait LedgerBackend: Send + Sync + 'static {
    type Tx: TransactionScope + 'static;

    /// Get backend name for logging
    fn name(&self) -> &'static str;

    async fn begin(&self) -> Result<Self::Tx, LedgerError>;
}
