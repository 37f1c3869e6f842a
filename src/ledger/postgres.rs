//! PostgreSQL ledger backend
//!
//! Each handle wraps a `sqlx::Transaction`. Balance updates are a single
//! `UPDATE ... SET balance = balance + $1 ... RETURNING`, which takes the
//! row lock and reads-modifies-writes in one statement. A handle dropped
//! without commit is rolled back by sqlx.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use super::error::{LedgerError, is_foreign_key_violation};
use super::primitives::{LedgerBackend, LedgerPrimitives, TransactionScope};
use super::types::{
    Account, AddAccountBalanceParams, CreateAccountParams, CreateEntryParams,
    CreateTransferParams, Entry, Transfer,
};
use crate::core_types::{AccountId, EntryId, TransferId};
use crate::db::schema::{FK_TRANSFERS_FROM_ACCOUNT, FK_TRANSFERS_TO_ACCOUNT};

/// PostgreSQL storage engine
pub struct PgBackend {
    pool: PgPool,
    lock_timeout: Option<Duration>,
}

impl PgBackend {
    /// Create a new PgBackend with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: None,
        }
    }

    /// Bound every row lock wait with `SET LOCAL lock_timeout`.
    ///
    /// An expired wait aborts the transaction with SQLSTATE 55P03, reported
    /// as the retryable [`LedgerError::Deadlock`]. A zero duration means
    /// "wait forever" to PostgreSQL; `LedgerConfig` refuses it.
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = Some(lock_timeout);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerBackend for PgBackend {
    type Tx = PgTx;

    fn name(&self) -> &'static str {
        "Postgres"
    }

    async fn begin(&self) -> Result<PgTx, LedgerError> {
        let mut tx = self.pool.begin().await?;

        if let Some(timeout) = self.lock_timeout {
            // SET does not take bind parameters
            let sql = format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis());
            sqlx::query(&sql).execute(&mut *tx).await?;
        }

        Ok(PgTx { tx })
    }
}

/// Transaction handle of [`PgBackend`]
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerPrimitives for PgTx {
    async fn create_account(&mut self, arg: CreateAccountParams) -> Result<Account, LedgerError> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (owner, balance, currency)
            VALUES ($1, $2, $3)
            RETURNING id, owner, balance, currency, created_at
            "#,
        )
        .bind(&arg.owner)
        .bind(arg.balance)
        .bind(&arg.currency)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(account)
    }

    async fn get_account(&mut self, id: AccountId) -> Result<Account, LedgerError> {
        sqlx::query_as::<_, Account>(
            r#"SELECT id, owner, balance, currency, created_at
               FROM accounts WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(LedgerError::AccountNotFound(id))
    }

    async fn get_entry(&mut self, id: EntryId) -> Result<Entry, LedgerError> {
        sqlx::query_as::<_, Entry>(
            r#"SELECT id, account_id, amount, created_at
               FROM entries WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(LedgerError::EntryNotFound(id))
    }

    async fn get_transfer(&mut self, id: TransferId) -> Result<Transfer, LedgerError> {
        sqlx::query_as::<_, Transfer>(
            r#"SELECT id, from_account_id, to_account_id, amount, created_at
               FROM transfers WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(LedgerError::TransferNotFound(id))
    }

    async fn list_entries(&mut self, account_id: AccountId) -> Result<Vec<Entry>, LedgerError> {
        let entries = sqlx::query_as::<_, Entry>(
            r#"SELECT id, account_id, amount, created_at
               FROM entries WHERE account_id = $1
               ORDER BY id"#,
        )
        .bind(account_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(entries)
    }

    async fn create_transfer(
        &mut self,
        arg: CreateTransferParams,
    ) -> Result<Transfer, LedgerError> {
        sqlx::query_as::<_, Transfer>(
            r#"
            INSERT INTO transfers (from_account_id, to_account_id, amount)
            VALUES ($1, $2, $3)
            RETURNING id, from_account_id, to_account_id, amount, created_at
            "#,
        )
        .bind(arg.from_account_id)
        .bind(arg.to_account_id)
        .bind(arg.amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            if !is_foreign_key_violation(&e) {
                return e.into();
            }
            // Two foreign keys: the constraint name says which side is missing
            let missing = match e.as_database_error().and_then(|db| db.constraint()) {
                Some(FK_TRANSFERS_FROM_ACCOUNT) => Some(arg.from_account_id),
                Some(FK_TRANSFERS_TO_ACCOUNT) => Some(arg.to_account_id),
                _ => None,
            };
            match missing {
                Some(id) => LedgerError::AccountNotFound(id),
                None => e.into(),
            }
        })
    }

    async fn create_entry(&mut self, arg: CreateEntryParams) -> Result<Entry, LedgerError> {
        sqlx::query_as::<_, Entry>(
            r#"
            INSERT INTO entries (account_id, amount)
            VALUES ($1, $2)
            RETURNING id, account_id, amount, created_at
            "#,
        )
        .bind(arg.account_id)
        .bind(arg.amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                LedgerError::AccountNotFound(arg.account_id)
            } else {
                e.into()
            }
        })
    }

    async fn add_account_balance(
        &mut self,
        arg: AddAccountBalanceParams,
    ) -> Result<Account, LedgerError> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            UPDATE accounts
            SET balance = balance + $1
            WHERE id = $2
            RETURNING id, owner, balance, currency, created_at
            "#,
        )
        .bind(arg.amount)
        .bind(arg.id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(LedgerError::AccountNotFound(arg.id))?;

        debug!(
            account_id = account.id,
            delta = arg.amount,
            balance = account.balance,
            "Balance updated"
        );
        Ok(account)
    }
}

#[async_trait]
impl TransactionScope for PgTx {
    async fn commit(self) -> Result<(), LedgerError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
