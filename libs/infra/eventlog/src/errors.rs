use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventLogError {
    #[error("event log io error: {0}")]
    Io(String),
    #[error("event log encode error: {0}")]
    Encode(String),
}

impl From<EventLogError> for crucible_core_types::KernelError {
    fn from(err: EventLogError) -> Self {
        crucible_core_types::KernelError::EventLogIo(err.to_string())
    }
}
