//! Shared error taxonomy.
//!
//! Follows spec's error classes exactly: transient I/O, duplicate input
//! (not an error), out-of-order input (fatal to the stream, not the
//! process), malformed log line (fatal), invalid payload (safe-skip), and
//! internal invariant violation (fatal, crash the engine). `thiserror`
//! gives each class its own type so callers match on variant, never on a
//! formatted string.

use thiserror::Error;

/// Errors raised while reserving funds or applying a balance change in the
/// Bank engine.
#[derive(Debug, Error)]
pub enum BankError {
    #[error("wrong coin for this bank: expected {expected}, got {got}")]
    WrongCoin { expected: String, got: String },

    #[error("insufficient free balance: have {have}, need {need}")]
    InsufficientFunds { have: String, need: String },

    #[error("stale reasonIDFirst: expected {expected}, got {got}")]
    StaleReasonCursor { expected: i64, got: i64 },

    #[error("invalid decimal payload: {0}")]
    InvalidAmount(#[from] crate::scaled::ScaledError),

    #[error("filedb error: {0}")]
    Filedb(#[from] crate::filedb::FiledbError),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("log serialize error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("rpc decode error: {0}")]
    RpcDecode(#[from] crate::rpc::RpcDecodeError),

    #[error("balance change does not conserve the coin total: {0}")]
    ConservationViolation(String),
}

/// Errors raised in the OME's ticket intake and match loop.
#[derive(Debug, Error)]
pub enum OmeError {
    #[error("ticket id is not continuous: latest={latest}, got={got}")]
    NonContinuousTicket { latest: i64, got: i64 },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("invalid decimal payload: {0}")]
    InvalidAmount(#[from] crate::scaled::ScaledError),

    #[error("filedb error: {0}")]
    Filedb(#[from] crate::filedb::FiledbError),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("log serialize error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("rpc decode error: {0}")]
    RpcDecode(#[from] crate::rpc::RpcDecodeError),
}

impl From<OmeError> for tonic::Status {
    fn from(e: OmeError) -> Self {
        match e {
            OmeError::NonContinuousTicket { .. } => tonic::Status::aborted(e.to_string()),
            _ => tonic::Status::internal(e.to_string()),
        }
    }
}

impl From<BankError> for tonic::Status {
    fn from(e: BankError) -> Self {
        tonic::Status::internal(e.to_string())
    }
}

/// A duplicate delivery is not an error — callers check for it explicitly
/// rather than through the error path, but the helper type documents the
/// classification used throughout bank/ome intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeOutcome {
    Applied,
    Duplicate,
    Dropped,
}
