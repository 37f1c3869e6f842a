//! Ledger Error Types
//!
//! Every failure surfaced by the record primitives, the transaction manager
//! and the transfer orchestrator. Storage errors are classified once, at the
//! backend boundary, and then travel unchanged up to the caller.

use std::time::Duration;

use thiserror::Error;

use crate::core_types::{AccountId, EntryId, TransferId};

/// Ledger error types
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    // === NotFound ===
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Entry not found: {0}")]
    EntryNotFound(EntryId),

    #[error("Transfer not found: {0}")]
    TransferNotFound(TransferId),

    // === Storage constraints ===
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    // === Lock conflicts (retryable by the caller) ===
    #[error("Serialization failure: {0}")]
    SerializationFailure(String),

    #[error("Deadlock detected: {0}")]
    Deadlock(String),

    #[error("Transaction timed out after {0:?}")]
    Timeout(Duration),

    // === Unrecoverable ===
    /// The unit of work failed and the rollback that followed failed too.
    #[error("tx err: {source}, rb err: {rollback}")]
    RollbackFailed {
        source: Box<LedgerError>,
        rollback: Box<LedgerError>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Stable classification code
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::AccountNotFound(_)
            | LedgerError::EntryNotFound(_)
            | LedgerError::TransferNotFound(_) => "NOT_FOUND",
            LedgerError::ConstraintViolation(_) => "CONSTRAINT_VIOLATION",
            LedgerError::SerializationFailure(_) => "SERIALIZATION_FAILURE",
            LedgerError::Deadlock(_) => "DEADLOCK",
            LedgerError::Timeout(_) => "TIMEOUT",
            LedgerError::RollbackFailed { .. } => "ROLLBACK_FAILED",
            LedgerError::Internal(_) => "INTERNAL",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LedgerError::AccountNotFound(_)
                | LedgerError::EntryNotFound(_)
                | LedgerError::TransferNotFound(_)
        )
    }

    /// Whether re-running the whole transaction may succeed.
    ///
    /// Only lock-conflict class errors qualify. The orchestrator never retries
    /// on its own; this is for callers.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::SerializationFailure(_)
                | LedgerError::Deadlock(_)
                | LedgerError::Timeout(_)
        )
    }
}

/// SQLSTATE codes we classify explicitly
mod sqlstate {
    pub const NOT_NULL_VIOLATION: &str = "23502";
    pub const FOREIGN_KEY_VIOLATION: &str = "23503";
    pub const UNIQUE_VIOLATION: &str = "23505";
    pub const CHECK_VIOLATION: &str = "23514";
    pub const SERIALIZATION_FAILURE: &str = "40001";
    pub const DEADLOCK_DETECTED: &str = "40P01";
    pub const LOCK_NOT_AVAILABLE: &str = "55P03";
}

/// Classify a raw SQLSTATE + message pair
pub(crate) fn classify_sqlstate(code: &str, message: String) -> LedgerError {
    match code {
        sqlstate::NOT_NULL_VIOLATION
        | sqlstate::FOREIGN_KEY_VIOLATION
        | sqlstate::UNIQUE_VIOLATION
        | sqlstate::CHECK_VIOLATION => LedgerError::ConstraintViolation(message),
        sqlstate::SERIALIZATION_FAILURE => LedgerError::SerializationFailure(message),
        sqlstate::DEADLOCK_DETECTED | sqlstate::LOCK_NOT_AVAILABLE => LedgerError::Deadlock(message),
        _ => LedgerError::Internal(message),
    }
}

pub(crate) fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == sqlstate::FOREIGN_KEY_VIOLATION)
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        let code = e
            .as_database_error()
            .and_then(|db| db.code())
            .map(|c| c.into_owned());
        match code {
            Some(code) => classify_sqlstate(&code, e.to_string()),
            None => LedgerError::Internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(LedgerError::AccountNotFound(7).code(), "NOT_FOUND");
        assert_eq!(LedgerError::TransferNotFound(7).code(), "NOT_FOUND");
        assert_eq!(
            LedgerError::ConstraintViolation("x".into()).code(),
            "CONSTRAINT_VIOLATION"
        );
        assert_eq!(LedgerError::Internal("x".into()).code(), "INTERNAL");
    }

    #[test]
    fn test_is_not_found() {
        assert!(LedgerError::AccountNotFound(1).is_not_found());
        assert!(LedgerError::EntryNotFound(1).is_not_found());
        assert!(LedgerError::TransferNotFound(1).is_not_found());
        assert!(!LedgerError::ConstraintViolation("fk".into()).is_not_found());
        assert!(!LedgerError::Deadlock("d".into()).is_not_found());

        // A not-found wrapped by a failed rollback is no longer a plain not-found
        let wrapped = LedgerError::RollbackFailed {
            source: Box::new(LedgerError::AccountNotFound(1)),
            rollback: Box::new(LedgerError::Internal("gone".into())),
        };
        assert!(!wrapped.is_not_found());
    }

    #[test]
    fn test_classify_sqlstate() {
        assert!(matches!(
            classify_sqlstate("40001", "conflict".into()),
            LedgerError::SerializationFailure(_)
        ));
        assert!(matches!(
            classify_sqlstate("40P01", "deadlock".into()),
            LedgerError::Deadlock(_)
        ));
        assert!(matches!(
            classify_sqlstate("23514", "transfers_amount_check".into()),
            LedgerError::ConstraintViolation(_)
        ));
        assert!(matches!(
            classify_sqlstate("23505", "dup".into()),
            LedgerError::ConstraintViolation(_)
        ));
        assert!(matches!(
            classify_sqlstate("08006", "connection failure".into()),
            LedgerError::Internal(_)
        ));
    }

    #[test]
    fn test_retryable() {
        assert!(LedgerError::Deadlock("d".into()).is_retryable());
        assert!(LedgerError::SerializationFailure("s".into()).is_retryable());
        assert!(LedgerError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!LedgerError::AccountNotFound(1).is_retryable());
        assert!(!LedgerError::Internal("i".into()).is_retryable());
    }

    #[test]
    fn test_rollback_failed_keeps_both_errors() {
        let err = LedgerError::RollbackFailed {
            source: Box::new(LedgerError::AccountNotFound(42)),
            rollback: Box::new(LedgerError::Internal("connection reset".into())),
        };
        assert_eq!(err.code(), "ROLLBACK_FAILED");
        assert!(!err.is_retryable());

        let msg = err.to_string();
        assert!(msg.contains("Account not found: 42"));
        assert!(msg.contains("connection reset"));

        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("Account not found: 42"));
    }

    #[test]
    fn test_sqlx_non_database_error_is_internal() {
        let err: LedgerError = sqlx::Error::PoolTimedOut.into();
        assert_eq!(err.code(), "INTERNAL");
    }
}
