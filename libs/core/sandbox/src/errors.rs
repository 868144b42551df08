use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SandboxError {
    #[error("sandbox timed out")]
    Timeout,
    #[error("sandbox runtime error: {0}")]
    Runtime(String),
    #[error("no entry point `run` exposed by this module")]
    NoEntryPoint,
    #[error("unrecognized native method: {0}")]
    UnknownMethod(String),
    #[error(transparent)]
    Kernel(#[from] crucible_core_types::KernelError),
}

impl From<SandboxError> for crucible_core_types::KernelError {
    fn from(err: SandboxError) -> Self {
        use crucible_core_types::KernelError;
        match err {
            SandboxError::Timeout => KernelError::TimeoutError,
            SandboxError::Runtime(msg) => KernelError::RuntimeError(msg),
            SandboxError::NoEntryPoint => KernelError::InterfaceMismatch("missing `run` export".into()),
            SandboxError::UnknownMethod(m) => KernelError::InterfaceMismatch(format!("unknown method {m}")),
            SandboxError::Kernel(inner) => inner,
        }
    }
}
