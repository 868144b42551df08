//! Sandbox contract: a four-symbol environment
//! exposed to artifact code, and two interchangeable engines that run
//! it — `NativeEngine` for fixed-variant system artifacts and
//! `WasmEngine` for agent-authored compiled modules.

mod engine;
mod errors;
mod kernel_bindings;
mod native;
mod wasm;

pub use engine::ScriptEngine;
pub use errors::SandboxError;
pub use kernel_bindings::{SandboxContext, SandboxKernel};
pub use native::{NativeEngine, TAG_LEDGER_CONTRACT, TAG_MINT_CONTRACT, TAG_PERMISSIVE_CONTRACT};
pub use wasm::WasmEngine;

use crucible_core_types::CodeLanguage;
use std::sync::Arc;
use std::time::Duration;

/// Routes a `CodeModule` to the engine matching its declared language —
/// a dispatch table at the engine-selection level rather than the
/// method-name level.
pub struct EngineRouter {
    native: Arc<NativeEngine>,
    wasm: Arc<WasmEngine>,
}

impl EngineRouter {
    pub fn new() -> Self {
        Self {
            native: Arc::new(NativeEngine),
            wasm: Arc::new(WasmEngine::new()),
        }
    }

    pub async fn run(
        &self,
        code: &crucible_core_types::CodeModule,
        method: &str,
        args: Vec<serde_json::Value>,
        ctx: SandboxContext,
        timeout: Duration,
    ) -> Result<serde_json::Value, SandboxError> {
        match code.language {
            CodeLanguage::Native => self.native.run(code, method, args, ctx, timeout).await,
            CodeLanguage::Wasm => self.wasm.run(code, method, args, ctx, timeout).await,
        }
    }
}

impl Default for EngineRouter {
    fn default() -> Self {
        Self::new()
    }
}
