//! Breaks the ledger↔mint dependency cycle the same way
//! `crucible-core-executor::MintBidSink` does: the ledger defines the
//! seam an auction hold needs, the mint implements it, and the wiring
//! happens once both exist: scrip is held rather than debited, so
//! bidders cannot spend it elsewhere while a bid is outstanding.

use async_trait::async_trait;
use crucible_core_types::PrincipalId;

#[async_trait]
pub trait HoldProvider: Send + Sync {
    /// Total scrip currently held against `principal` by outstanding
    /// auction bids. Not a ledger balance — purely advisory capacity the
    /// ledger subtracts before approving a spend.
    async fn held_amount(&self, principal: &PrincipalId) -> u64;
}
