//! Transfer Orchestrator
//!
//! Moves money between two accounts inside one transaction:
//!
//! 1. insert the transfer row
//! 2. insert the debit entry (`-amount`) for the source account
//! 3. insert the credit entry (`+amount`) for the destination account
//! 4. update both balances, lower account id first
//!
//! # Lock ordering
//!
//! Step 4 takes row locks. Two concurrent transfers A→B and B→A that each
//! locked their own source first would wait on each other forever. Locking
//! in ascending id order makes every transaction over the same pair queue on
//! the same row first, so that two-party cycle cannot form.
//!
//! This does not make cycles over three or more accounts impossible when
//! transactions lock different pairs; those are left to the storage
//! engine's deadlock detection plus caller retry
//! ([`LedgerError::is_retryable`]).

use tracing::{Instrument, debug, info_span};

use super::error::LedgerError;
use super::primitives::{LedgerBackend, LedgerPrimitives};
use super::store::Store;
use super::types::{
    Account, AddAccountBalanceParams, CreateEntryParams, CreateTransferParams, TransferTxParams,
    TransferTxResult,
};
use crate::core_types::{AccountId, Money};

impl<B: LedgerBackend> Store<B> {
    /// Transfer `arg.amount` from `arg.from_account_id` to `arg.to_account_id`.
    ///
    /// All five rows are written in one transaction or none are. The first
    /// failing step's error is returned unchanged; there is no retry here.
    pub async fn transfer_tx(&self, arg: TransferTxParams) -> Result<TransferTxResult, LedgerError> {
        let span = info_span!(
            "transfer_tx",
            from = arg.from_account_id,
            to = arg.to_account_id,
            amount = arg.amount
        );
        self.exec_tx(move |q| Box::pin(transfer_in_tx(q, arg)))
            .instrument(span)
            .await
    }
}

/// Body of [`Store::transfer_tx`], run against an open transaction
async fn transfer_in_tx<Q>(q: &mut Q, arg: TransferTxParams) -> Result<TransferTxResult, LedgerError>
where
    Q: LedgerPrimitives + ?Sized,
{
    let debit = arg.amount.checked_neg().ok_or_else(|| {
        LedgerError::ConstraintViolation(format!("transfer amount {} out of range", arg.amount))
    })?;

    let transfer = q
        .create_transfer(CreateTransferParams {
            from_account_id: arg.from_account_id,
            to_account_id: arg.to_account_id,
            amount: arg.amount,
        })
        .await?;

    let from_entry = q
        .create_entry(CreateEntryParams {
            account_id: arg.from_account_id,
            amount: debit,
        })
        .await?;

    let to_entry = q
        .create_entry(CreateEntryParams {
            account_id: arg.to_account_id,
            amount: arg.amount,
        })
        .await?;

    let (from_account, to_account) = if arg.from_account_id < arg.to_account_id {
        add_money(q, arg.from_account_id, debit, arg.to_account_id, arg.amount).await?
    } else {
        let (to_account, from_account) =
            add_money(q, arg.to_account_id, arg.amount, arg.from_account_id, debit).await?;
        (from_account, to_account)
    };

    debug!(
        transfer_id = transfer.id,
        from_balance = from_account.balance,
        to_balance = to_account.balance,
        "Transfer applied"
    );

    Ok(TransferTxResult {
        transfer,
        from_account,
        to_account,
        from_entry,
        to_entry,
    })
}

/// Apply two balance deltas in the order given; returns the rows in the same
/// order. Callers pass the lower account id first.
async fn add_money<Q>(
    q: &mut Q,
    account_id1: AccountId,
    amount1: Money,
    account_id2: AccountId,
    amount2: Money,
) -> Result<(Account, Account), LedgerError>
where
    Q: LedgerPrimitives + ?Sized,
{
    let account1 = q
        .add_account_balance(AddAccountBalanceParams {
            id: account_id1,
            amount: amount1,
        })
        .await?;
    let account2 = q
        .add_account_balance(AddAccountBalanceParams {
            id: account_id2,
            amount: amount2,
        })
        .await?;
    Ok((account1, account2))
}

/// Canonical lock acquisition order for a set of accounts: ascending,
/// duplicates removed.
///
/// Any operation that adjusts several balances in one transaction must
/// lock them in this order.
pub fn lock_order(accounts: &[AccountId]) -> Vec<AccountId> {
    let mut ordered = accounts.to_vec();
    ordered.sort_unstable();
    ordered.dedup();
    ordered
}
