//! simple_bank - Double-entry Transfer Engine
//!
//! Moves money between accounts atomically: each transfer writes one
//! transfer record, two balanced entries and two balance updates inside a
//! single database transaction.
//!
//! # Modules
//!
//! - [`core_types`] - Id and money aliases
//! - [`ledger`] - Record primitives, transaction manager, transfer orchestrator
//! - [`db`] - PostgreSQL pool and schema
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing subscriber setup

// Core types - must be first!
pub mod core_types;

pub mod config;
pub mod db;
pub mod ledger;
pub mod logging;

// Convenient re-exports at crate root
pub use core_types::{AccountId, EntryId, Money, TransferId};
pub use ledger::{
    Account, Entry, LedgerError, MemoryBackend, PgBackend, Store, StoreConfig, Transfer,
    TransferTxParams, TransferTxResult,
};
