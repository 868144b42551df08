use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("no loop registered for artifact {0}")]
    NoSuchLoop(String),
    #[error(transparent)]
    Kernel(#[from] crucible_core_types::KernelError),
}
