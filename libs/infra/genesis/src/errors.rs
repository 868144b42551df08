use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenesisError {
    #[error("failed to read genesis manifest {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("failed to parse genesis manifest: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("unknown artifact kind `{0}` in genesis manifest")]
    UnknownKind(String),
    #[error(transparent)]
    Kernel(#[from] crucible_core_types::KernelError),
    #[error(transparent)]
    Store(#[from] crucible_core_store::StoreError),
}
