use thiserror::Error;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("failed to write checkpoint to {path}: {source}")]
    Write { path: String, source: std::io::Error },
    #[error("failed to read checkpoint from {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to (de)serialize checkpoint: {0}")]
    Serde(#[from] serde_json::Error),
}
