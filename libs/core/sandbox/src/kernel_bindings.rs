//! The four-symbol environment sandboxed code receives: `kernel_state`, `kernel_actions`, `invoke`, and `caller_id`.
//!
//! The executor implements [`SandboxKernel`]; this crate only depends on
//! the trait, which keeps the dependency edge pointing the right way
//! (sandbox ← executor, not the reverse) while still letting recursive
//! `invoke` calls re-enter the executor from inside a running script.

use async_trait::async_trait;
use crucible_core_types::{Action, ActionOutcome, ArtifactId, ArtifactType, InvocationFrame, KernelError, PrincipalId};

#[async_trait]
pub trait SandboxKernel: Send + Sync {
    /// `kernel_state.read_artifact(id, caller_id)`.
    async fn read_artifact(&self, id: &ArtifactId, caller_id: &PrincipalId) -> Result<serde_json::Value, KernelError>;
    /// `kernel_state.query(type, params, caller_id)`. `params` here is
    /// narrowed to the type filter; the full predicate surface lives on
    /// `crucible-core-store::QueryFilter`, not exposed to sandboxed code.
    async fn query(&self, kind: Option<ArtifactType>, caller_id: &PrincipalId) -> Result<Vec<ArtifactId>, KernelError>;
    /// `kernel_state.balance(principal)`.
    async fn balance(&self, principal: &PrincipalId) -> Result<u64, KernelError>;

    /// `kernel_actions.write_artifact(caller_id, id, content, ...)`.
    async fn write_artifact(
        &self,
        caller_id: &PrincipalId,
        id: &ArtifactId,
        content: serde_json::Value,
    ) -> Result<(), KernelError>;
    /// `kernel_actions.transfer_scrip(caller_id, to, amount)`.
    async fn transfer_scrip(&self, caller_id: &PrincipalId, to: &PrincipalId, amount: u64) -> Result<(), KernelError>;
    /// `kernel_actions.transfer_quota(caller_id, to, resource, amount)`.
    async fn transfer_quota(
        &self,
        caller_id: &PrincipalId,
        to: &PrincipalId,
        resource: &str,
        amount: u64,
    ) -> Result<(), KernelError>;
    /// Forwards a bid to the mint's auction state. Not part of the
    /// literal spec's four symbols, but the mint artifact's native code
    /// needs some way to reach the auction the way the ledger
    /// contract's native code reaches `transfer_scrip`.
    async fn mint_bid(&self, caller_id: &PrincipalId, artifact_id: &ArtifactId, amount: u64) -> Result<serde_json::Value, KernelError>;

    /// `invoke(artifact_id, *args)`: the recursive executor entry.
    /// `frame` carries the depth counter and top-level billing caller
    /// through this nested call.
    async fn invoke(
        &self,
        frame: InvocationFrame,
        target: ArtifactId,
        method: String,
        args: Vec<serde_json::Value>,
    ) -> ActionOutcome;

    /// Re-enters the executor's full action protocol for a contract's
    /// `check_permission` call, which is itself an `invoke_artifact`
    /// under the hood.
    async fn submit_nested(&self, frame: InvocationFrame, action: Action) -> ActionOutcome;
}

/// What a running script sees: its own identity, the frame it is
/// executing under, and a handle back into the kernel.
pub struct SandboxContext {
    pub caller_id: PrincipalId,
    pub frame: InvocationFrame,
    pub kernel: std::sync::Arc<dyn SandboxKernel>,
}
