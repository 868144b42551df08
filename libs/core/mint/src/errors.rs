use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MintError {
    #[error("the auction is not accepting bids right now")]
    NotBidding,
    #[error("bid artifact {0} is not executable")]
    ArtifactNotExecutable(String),
    #[error("bidder does not own artifact {0}")]
    NotOwner(String),
    #[error("bid of {amount} is below the minimum bid of {min_bid}")]
    BelowMinimum { amount: u64, min_bid: u64 },
    #[error("bid of {amount} exceeds available balance of {balance}")]
    ExceedsBalance { amount: u64, balance: u64 },
    #[error(transparent)]
    Store(#[from] crucible_core_store::StoreError),
    #[error(transparent)]
    Ledger(#[from] crucible_core_ledger::LedgerError),
}

impl From<MintError> for crucible_core_types::KernelError {
    fn from(err: MintError) -> Self {
        use crucible_core_types::KernelError;
        match err {
            MintError::NotBidding => KernelError::InvalidArgument("auction not accepting bids".into()),
            MintError::ArtifactNotExecutable(id) => KernelError::InterfaceMismatch(format!("{id} is not executable")),
            MintError::NotOwner(id) => KernelError::PermissionDenied(format!("caller does not own {id}")),
            MintError::BelowMinimum { amount, min_bid } => {
                KernelError::InvalidArgument(format!("bid {amount} is below minimum {min_bid}"))
            }
            MintError::ExceedsBalance { amount, balance } => {
                KernelError::InvalidArgument(format!("bid {amount} exceeds balance {balance}"))
            }
            MintError::Store(inner) => inner.into(),
            MintError::Ledger(inner) => inner.into(),
        }
    }
}
