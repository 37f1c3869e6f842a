//! Double-entry Ledger
//!
//! Atomic money movement between accounts.
//!
//! # Architecture
//!
//! ```text
//! caller ──▶ Store::transfer_tx ──▶ Store::exec_tx ──▶ LedgerBackend::begin
//!                 │                        │
//!                 │  create_transfer       │ commit / rollback
//!                 │  create_entry × 2      │
//!                 │  add_account_balance × 2 (ascending account id)
//!                 ▼
//!            TransferTxResult
//! ```
//!
//! Backends:
//! - [`postgres::PgBackend`] - PostgreSQL via sqlx, native row locks
//! - [`memory::MemoryBackend`] - in-process, emulated row locks
//!
//! # Safety Invariants
//!
//! 1. **All-or-nothing**: a transfer, its two entries and both balance
//!    updates commit together or not at all
//! 2. **Balanced entries**: every transfer has exactly one `-amount` and one
//!    `+amount` entry
//! 3. **Atomic balance updates**: balances change only through
//!    `add_account_balance`, never read-then-write
//! 4. **Lock ordering**: balance rows are locked in ascending account id

pub mod error;
pub mod memory;
pub mod postgres;
pub mod primitives;
pub mod store;
pub mod transfer;
pub mod types;

// Re-exports for convenience
pub use error::LedgerError;
pub use memory::{LedgerCounts, MemoryBackend};
pub use postgres::PgBackend;
pub use primitives::{LedgerBackend, LedgerPrimitives, TransactionScope};
pub use store::{Store, StoreConfig};
pub use transfer::lock_order;
pub use types::{
    Account, AddAccountBalanceParams, CreateAccountParams, CreateEntryParams,
    CreateTransferParams, Entry, Transfer, TransferTxParams, TransferTxResult,
};
