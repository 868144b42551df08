//! Kernel error taxonomy.
//!
//! One enum classifies every failure kind the executor can report. Each
//! component crate additionally keeps its own narrower error enum
//! (`StoreError`, `LedgerError`, ...) and converts into this one at the
//! executor boundary via `#[from]`, with a dedicated `errors.rs` per
//! crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelError {
    // --- permission failures: never retried ---
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    // --- resource failures ---
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("quota exceeded")]
    QuotaExceeded,
    #[error("api budget exhausted")]
    BudgetExhausted,
    #[error("rate limit exceeded")]
    RateExceeded,

    // --- validity failures ---
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("interface mismatch: {0}")]
    InterfaceMismatch(String),
    #[error("artifact in use: {0}")]
    InUse(String),

    // --- execution failures ---
    #[error("execution timed out")]
    TimeoutError,
    #[error("runtime error: {0}")]
    RuntimeError(String),
    #[error("recursion limit exceeded")]
    RecursionLimit,

    // --- systemic failures: fatal, not part of a single action's outcome ---
    #[error("checkpoint io error: {0}")]
    CheckpointIo(String),
    #[error("event log write error: {0}")]
    EventLogIo(String),
}

impl KernelError {
    /// A short machine-stable tag for logs, events, and `ActionOutcome`.
    pub fn kind(&self) -> &'static str {
        match self {
            KernelError::PermissionDenied(_) => "PermissionDenied",
            KernelError::InsufficientFunds => "InsufficientFunds",
            KernelError::QuotaExceeded => "QuotaExceeded",
            KernelError::BudgetExhausted => "BudgetExhausted",
            KernelError::RateExceeded => "RateExceeded",
            KernelError::NotFound(_) => "NotFound",
            KernelError::AlreadyExists(_) => "AlreadyExists",
            KernelError::InvalidArgument(_) => "InvalidArgument",
            KernelError::InterfaceMismatch(_) => "InterfaceMismatch",
            KernelError::InUse(_) => "InUse",
            KernelError::TimeoutError => "TimeoutError",
            KernelError::RuntimeError(_) => "RuntimeError",
            KernelError::RecursionLimit => "RecursionLimit",
            KernelError::CheckpointIo(_) => "CheckpointIo",
            KernelError::EventLogIo(_) => "EventLogIo",
        }
    }

    /// Resource failures are the only kind the scheduler treats as a
    /// signal to back off rather than simply log-and-continue.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, KernelError::RateExceeded)
    }
}
