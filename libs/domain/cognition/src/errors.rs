use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CognitionError {
    #[error("llm gateway error: {0}")]
    Gateway(String),
    #[error("scorer error: {0}")]
    Scorer(String),
}

impl From<CognitionError> for crucible_core_types::KernelError {
    fn from(err: CognitionError) -> Self {
        crucible_core_types::KernelError::RuntimeError(err.to_string())
    }
}
