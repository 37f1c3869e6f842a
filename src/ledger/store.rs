//! Transaction Manager
//!
//! [`Store::exec_tx`] opens a transaction, runs a unit of work against the
//! transaction handle exactly once, then commits or rolls back.
//!
//! ```text
//! begin ──▶ f(&mut tx) ──Ok──▶ commit ──▶ Ok(T) / commit error
//!                │
//!               Err(e) ──▶ rollback ──Ok──▶ Err(e)
//!                              │
//!                             Err(r) ──▶ Err(RollbackFailed { e, r })
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, error, warn};

use super::error::LedgerError;
use super::primitives::{LedgerBackend, LedgerPrimitives, TransactionScope};
use super::types::{Account, CreateAccountParams, Entry, Transfer};
use crate::core_types::{AccountId, EntryId, TransferId};

/// Transaction manager settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreConfig {
    /// Upper bound for one unit of work. `None` waits indefinitely.
    pub tx_timeout: Option<Duration>,
}

/// Entry point of the ledger: runs record primitives and transfers inside
/// backend transactions.
///
/// Cheap to clone; clones share the backend.
pub struct Store<B> {
    backend: Arc<B>,
    config: StoreConfig,
}

impl<B> Clone for Store<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            config: self.config,
        }
    }
}

impl<B: LedgerBackend> Store<B> {
    pub fn new(backend: B, config: StoreConfig) -> Self {
        Self::from_shared(Arc::new(backend), config)
    }

    /// Create a store over a backend the caller keeps a handle to
    pub fn from_shared(backend: Arc<B>, config: StoreConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> StoreConfig {
        self.config
    }

    /// Run `f` inside one transaction.
    ///
    /// - `f` returns `Ok` → commit; a commit failure is returned as-is.
    /// - `f` returns `Err(e)` → rollback; `e` is returned unchanged, or
    ///   [`LedgerError::RollbackFailed`] carrying both errors if the
    ///   rollback fails too.
    /// - `f` exceeds `tx_timeout` → treated as `Err(LedgerError::Timeout)`.
    ///
    /// `tx_timeout` bounds `f` only. `begin` waits on the backend (for
    /// PostgreSQL, the pool's `acquire_timeout`) and `commit` is never
    /// abandoned half way, so a stalled commit is bounded only by the
    /// backend's own timeouts.
    ///
    /// Dropping the returned future drops the handle, which rolls back.
    pub async fn exec_tx<T, F>(&self, f: F) -> Result<T, LedgerError>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut B::Tx) -> BoxFuture<'c, Result<T, LedgerError>> + Send,
    {
        let mut tx = self.backend.begin().await?;

        let outcome = match self.config.tx_timeout {
            Some(limit) => match tokio::time::timeout(limit, f(&mut tx)).await {
                Ok(result) => result,
                Err(_) => Err(LedgerError::Timeout(limit)),
            },
            None => f(&mut tx).await,
        };

        match outcome {
            Ok(value) => {
                tx.commit().await?;
                debug!(backend = self.backend.name(), "Transaction committed");
                Ok(value)
            }
            Err(err) => match tx.rollback().await {
                Ok(()) => {
                    warn!(
                        backend = self.backend.name(),
                        error = %err,
                        code = err.code(),
                        "Transaction rolled back"
                    );
                    Err(err)
                }
                Err(rb_err) => {
                    error!(
                        backend = self.backend.name(),
                        error = %err,
                        rollback_error = %rb_err,
                        "Rollback failed"
                    );
                    Err(LedgerError::RollbackFailed {
                        source: Box::new(err),
                        rollback: Box::new(rb_err),
                    })
                }
            },
        }
    }

    pub async fn create_account(&self, arg: CreateAccountParams) -> Result<Account, LedgerError> {
        self.exec_tx(move |q| q.create_account(arg)).await
    }

    pub async fn get_account(&self, id: AccountId) -> Result<Account, LedgerError> {
        self.exec_tx(move |q| q.get_account(id)).await
    }

    pub async fn get_entry(&self, id: EntryId) -> Result<Entry, LedgerError> {
        self.exec_tx(move |q| q.get_entry(id)).await
    }

    pub async fn get_transfer(&self, id: TransferId) -> Result<Transfer, LedgerError> {
        self.exec_tx(move |q| q.get_transfer(id)).await
    }

    pub async fn list_entries(&self, account_id: AccountId) -> Result<Vec<Entry>, LedgerError> {
        self.exec_tx(move |q| q.list_entries(account_id)).await
    }
}
