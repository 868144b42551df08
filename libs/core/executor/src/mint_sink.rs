//! Breaks the executor↔mint dependency cycle.
//!
//! The executor defines the seam the mint's native `bid` method needs;
//! `crucible-core-mint` implements it and `apps/kernel-runtime` wires
//! the two together once both exist, via [`Executor::attach_mint`].

use async_trait::async_trait;
use crucible_core_types::{ArtifactId, KernelError, PrincipalId};

#[async_trait]
pub trait MintBidSink: Send + Sync {
    async fn bid(&self, caller: &PrincipalId, artifact: &ArtifactId, amount: u64) -> Result<serde_json::Value, KernelError>;
}
