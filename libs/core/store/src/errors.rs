use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("artifact in use by an active loop: {0}")]
    InUse(String),
    #[error(transparent)]
    Ledger(#[from] crucible_core_ledger::LedgerError),
}

impl From<StoreError> for crucible_core_types::KernelError {
    fn from(err: StoreError) -> Self {
        use crucible_core_types::KernelError;
        match err {
            StoreError::AlreadyExists(id) => KernelError::AlreadyExists(id),
            StoreError::NotFound(id) => KernelError::NotFound(id),
            StoreError::InUse(id) => KernelError::InUse(id),
            StoreError::Ledger(inner) => inner.into(),
        }
    }
}
