//! The pure Vickrey resolution rule, factored out of [`crate::mint::Mint`]'s async machinery
//! so the five numbered rules are unit-testable without a ledger, a
//! store, or a clock.

use crucible_core_types::{ArtifactId, PrincipalId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub artifact_id: ArtifactId,
    pub amount: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuctionPhase {
    Waiting,
    Bidding,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Zero bids: passes with no state change.
    Empty,
    Won { winner: PrincipalId, artifact_id: ArtifactId, price: u64 },
}

/// `tie_break(n)` must return an index in `0..n`; the caller supplies a
/// seeded RNG so outcomes are reproducible in tests.
pub fn resolve(bids: &HashMap<PrincipalId, Bid>, min_bid: u64, tie_break: impl FnOnce(usize) -> usize) -> Resolution {
    if bids.is_empty() {
        return Resolution::Empty;
    }
    if bids.len() == 1 {
        let (winner, bid) = bids.iter().next().expect("len == 1");
        // Rule 2: a lone bidder always pays exactly min_bid, not their
        // own (unknowable-to-them) bid amount.
        return Resolution::Won { winner: winner.clone(), artifact_id: bid.artifact_id.clone(), price: min_bid };
    }

    let mut sorted: Vec<(&PrincipalId, &Bid)> = bids.iter().collect();
    sorted.sort_by(|a, b| b.1.amount.cmp(&a.1.amount).then_with(|| a.0.as_str().cmp(b.0.as_str())));

    let top_amount = sorted[0].1.amount;
    let tied: Vec<usize> = sorted
        .iter()
        .enumerate()
        .filter(|(_, (_, bid))| bid.amount == top_amount)
        .map(|(idx, _)| idx)
        .collect();
    let winner_idx = if tied.len() > 1 { tied[tie_break(tied.len())] } else { tied[0] };
    let (winner, winning_bid) = sorted[winner_idx];

    // Rule 3: winner pays the highest amount among every OTHER bid —
    // which, in a tie for first place, is the same amount the winner bid.
    let price = sorted
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != winner_idx)
        .map(|(_, (_, bid))| bid.amount)
        .max()
        .unwrap_or(min_bid);

    Resolution::Won { winner: winner.clone(), artifact_id: winning_bid.artifact_id.clone(), price }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bid(artifact: &str, amount: u64) -> Bid {
        Bid { artifact_id: artifact.into(), amount }
    }

    #[test]
    fn zero_bids_is_empty() {
        let bids = HashMap::new();
        assert_eq!(resolve(&bids, 1, |_| 0), Resolution::Empty);
    }

    #[test]
    fn single_bid_pays_min_bid_not_own_amount() {
        let mut bids = HashMap::new();
        bids.insert(PrincipalId::new("x"), bid("tool_x", 500));
        let resolution = resolve(&bids, 5, |_| 0);
        assert_eq!(
            resolution,
            Resolution::Won { winner: PrincipalId::new("x"), artifact_id: "tool_x".into(), price: 5 }
        );
    }

    #[test]
    fn second_highest_bidder_sets_the_winners_price() {
        let mut bids = HashMap::new();
        bids.insert(PrincipalId::new("x"), bid("tool_x", 50));
        bids.insert(PrincipalId::new("y"), bid("tool_y", 30));
        bids.insert(PrincipalId::new("z"), bid("tool_z", 30));
        let resolution = resolve(&bids, 1, |_| 0);
        assert_eq!(
            resolution,
            Resolution::Won { winner: PrincipalId::new("x"), artifact_id: "tool_x".into(), price: 30 }
        );
    }

    #[test]
    fn tied_top_bids_resolve_via_tie_break_and_bill_the_tied_amount() {
        let mut bids = HashMap::new();
        bids.insert(PrincipalId::new("x"), bid("tool_x", 40));
        bids.insert(PrincipalId::new("y"), bid("tool_y", 40));
        let resolution = resolve(&bids, 1, |n| n - 1);
        match resolution {
            Resolution::Won { price, .. } => assert_eq!(price, 40),
            Resolution::Empty => panic!("expected a winner"),
        }
    }
}
