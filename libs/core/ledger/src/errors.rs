//! Ledger- and rate-tracker-specific failure kinds.

use crucible_core_types::KernelError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("no such principal: {0}")]
    NoSuchPrincipal(String),
    #[error(transparent)]
    Kernel(#[from] KernelError),
}

impl From<LedgerError> for KernelError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NoSuchPrincipal(id) => KernelError::NotFound(id),
            LedgerError::Kernel(inner) => inner,
        }
    }
}
