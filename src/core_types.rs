//! Core types used throughout the ledger
//!
//! These are fundamental type aliases used by all modules.
//! They match the column types of the `accounts`, `entries` and
//! `transfers` tables (`BIGSERIAL` / `BIGINT`).

/// Account ID - server generated, monotonically increasing, never reused.
///
/// # Constraints:
/// - **Immutable**: Once assigned, NEVER changes
/// - **Totally ordered**: Balance updates are issued in ascending
///   `AccountId` order, see [`crate::ledger::transfer::lock_order`]
pub type AccountId = i64;

/// Entry ID - unique within the ledger
pub type EntryId = i64;

/// Transfer ID - unique within the ledger
pub type TransferId = i64;

/// Amount in minor currency units (cents).
///
/// Signed: entries carry `-amount` for the debited leg.
pub type Money = i64;
