//! The pluggable script engine seam.

use crate::errors::SandboxError;
use crate::kernel_bindings::SandboxContext;
use async_trait::async_trait;
use crucible_core_types::CodeModule;
use std::time::Duration;

#[async_trait]
pub trait ScriptEngine: Send + Sync {
    /// Runs `method` of `code` with `args` inside `ctx`, aborting with
    /// [`SandboxError::Timeout`] if it does not return within `timeout`.
    async fn run(
        &self,
        code: &CodeModule,
        method: &str,
        args: Vec<serde_json::Value>,
        ctx: SandboxContext,
        timeout: Duration,
    ) -> Result<serde_json::Value, SandboxError>;
}
