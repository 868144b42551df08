//! The mint: ties the pure auction rule in [`crate::auction`] to the
//! ledger, store, and event log, and runs the WAITING/BIDDING clock.

use crate::auction::{resolve, AuctionPhase, Bid, Resolution};
use crate::errors::MintError;
use async_trait::async_trait;
use crucible_core_executor::MintBidSink;
use crucible_core_ledger::{HoldProvider, Ledger};
use crucible_core_store::ArtifactStore;
use crucible_core_types::{ArtifactId, EventType, KernelError, PrincipalId};
use crucible_domain_cognition::ArtifactScorer;
use crucible_infra_eventlog::EventLog;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy)]
pub struct MintParams {
    pub auction_period: Duration,
    pub bidding_window: Duration,
    pub first_auction_tick: Duration,
    pub min_bid: u64,
    pub mint_ratio: u64,
}

struct MintState {
    phase: AuctionPhase,
    bids: HashMap<PrincipalId, Bid>,
    next_bidding_start: Duration,
    bidding_deadline: Option<Duration>,
}

/// A restartable snapshot of the mint clock. `Instant` isn't serializable, so the clock is captured as
/// durations relative to genesis and re-anchored to `Instant::now()` on
/// restore.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MintSnapshot {
    pub phase: AuctionPhase,
    pub bids: HashMap<PrincipalId, Bid>,
    pub next_bidding_start: Duration,
    pub bidding_deadline: Option<Duration>,
    pub elapsed_since_genesis: Duration,
}

enum Transition {
    None,
    Opened,
    CloseAndResolve,
}

pub struct Mint {
    store: Arc<ArtifactStore>,
    ledger: Arc<Ledger>,
    event_log: Arc<EventLog>,
    scorer: Arc<dyn ArtifactScorer>,
    params: MintParams,
    genesis_instant: Instant,
    state: Mutex<MintState>,
    rng: Mutex<StdRng>,
}

impl Mint {
    pub fn new(
        store: Arc<ArtifactStore>,
        ledger: Arc<Ledger>,
        event_log: Arc<EventLog>,
        scorer: Arc<dyn ArtifactScorer>,
        params: MintParams,
        rng_seed: Option<u64>,
    ) -> Arc<Self> {
        let rng = match rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Arc::new(Self {
            store,
            ledger,
            event_log,
            scorer,
            genesis_instant: Instant::now(),
            state: Mutex::new(MintState {
                phase: AuctionPhase::Waiting,
                bids: HashMap::new(),
                next_bidding_start: params.first_auction_tick,
                bidding_deadline: None,
            }),
            params,
            rng: Mutex::new(rng),
        })
    }

    /// Rebuilds a mint from a [`MintSnapshot`], re-anchoring the clock
    /// so `genesis_instant.elapsed()` resumes where it left off.
    pub fn from_snapshot(
        store: Arc<ArtifactStore>,
        ledger: Arc<Ledger>,
        event_log: Arc<EventLog>,
        scorer: Arc<dyn ArtifactScorer>,
        params: MintParams,
        rng_seed: Option<u64>,
        snapshot: MintSnapshot,
    ) -> Arc<Self> {
        let rng = match rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Arc::new(Self {
            store,
            ledger,
            event_log,
            scorer,
            genesis_instant: Instant::now() - snapshot.elapsed_since_genesis,
            state: Mutex::new(MintState {
                phase: snapshot.phase,
                bids: snapshot.bids,
                next_bidding_start: snapshot.next_bidding_start,
                bidding_deadline: snapshot.bidding_deadline,
            }),
            params,
            rng: Mutex::new(rng),
        })
    }

    pub async fn snapshot(&self) -> MintSnapshot {
        let state = self.state.lock().await;
        MintSnapshot {
            phase: state.phase,
            bids: state.bids.clone(),
            next_bidding_start: state.next_bidding_start,
            bidding_deadline: state.bidding_deadline,
            elapsed_since_genesis: self.genesis_instant.elapsed(),
        }
    }

    /// Spawns the background clock that drives WAITING → BIDDING →
    /// resolution. The caller keeps the handle to cancel it on shutdown.
    pub fn spawn_clock(self: &Arc<Self>) -> JoinHandle<()> {
        let mint = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(250));
            loop {
                ticker.tick().await;
                mint.advance().await;
            }
        })
    }

    async fn step(&self) -> Transition {
        let elapsed = self.genesis_instant.elapsed();
        let mut state = self.state.lock().await;
        match state.phase {
            AuctionPhase::Waiting => {
                if elapsed >= state.next_bidding_start {
                    state.phase = AuctionPhase::Bidding;
                    state.bidding_deadline = Some(elapsed + self.params.bidding_window);
                    Transition::Opened
                } else {
                    Transition::None
                }
            }
            AuctionPhase::Bidding => {
                if state.bidding_deadline.map(|deadline| elapsed >= deadline).unwrap_or(false) {
                    Transition::CloseAndResolve
                } else {
                    Transition::None
                }
            }
        }
    }

    /// Advances the clock by one tick. Public so tests can drive it
    /// directly instead of waiting on [`Mint::spawn_clock`]'s interval.
    pub async fn advance(&self) {
        match self.step().await {
            Transition::None => {}
            Transition::Opened => {
                self.event_log.append(EventType::AuctionOpened, None, None, serde_json::json!({})).await;
            }
            Transition::CloseAndResolve => {
                self.resolve_auction().await;
            }
        }
    }

    async fn place_bid(&self, caller: &PrincipalId, artifact_id: &ArtifactId, amount: u64) -> Result<serde_json::Value, MintError> {
        {
            let state = self.state.lock().await;
            if state.phase != AuctionPhase::Bidding {
                return Err(MintError::NotBidding);
            }
        }
        if amount < self.params.min_bid {
            return Err(MintError::BelowMinimum { amount, min_bid: self.params.min_bid });
        }
        let artifact = self.store.get(artifact_id).await?;
        if !artifact.can_execute {
            return Err(MintError::ArtifactNotExecutable(artifact_id.to_string()));
        }
        if &artifact.created_by != caller {
            return Err(MintError::NotOwner(artifact_id.to_string()));
        }
        let balance = self.ledger.balance(caller).await?;
        if amount > balance {
            return Err(MintError::ExceedsBalance { amount, balance });
        }

        let superseded = {
            let mut state = self.state.lock().await;
            if state.phase != AuctionPhase::Bidding {
                return Err(MintError::NotBidding);
            }
            state.bids.insert(caller.clone(), Bid { artifact_id: artifact_id.clone(), amount })
        };

        let event_type = if superseded.is_some() { EventType::AuctionBidSuperseded } else { EventType::AuctionBidPlaced };
        self.event_log
            .append(event_type, Some(caller.clone()), Some(artifact_id.clone()), serde_json::json!({"amount": amount}))
            .await;
        Ok(serde_json::json!({"accepted": true, "amount": amount}))
    }

    async fn resolve_auction(&self) {
        let bids = {
            let mut state = self.state.lock().await;
            let bids = std::mem::take(&mut state.bids);
            state.phase = AuctionPhase::Waiting;
            state.next_bidding_start = self.genesis_instant.elapsed() + self.params.auction_period;
            state.bidding_deadline = None;
            bids
        };

        let resolution = {
            let mut rng = self.rng.lock().await;
            resolve(&bids, self.params.min_bid, |n| rng.gen_range(0..n))
        };

        match resolution {
            Resolution::Empty => {
                self.event_log.append(EventType::AuctionEmpty, None, None, serde_json::json!({})).await;
            }
            Resolution::Won { winner, artifact_id, price } => {
                self.event_log
                    .append(EventType::AuctionResolved, Some(winner.clone()), Some(artifact_id.clone()), serde_json::json!({"price": price}))
                    .await;
                self.settle(winner, artifact_id, price).await;
            }
        }
    }

    /// Scores the winning artifact, burns the winning bid, mints a
    /// reward plus the UBI pool, or — on scorer failure — refunds the
    /// bid outright (the hold was already cleared when `resolve_auction`
    /// drained `bids`, so "refund" here means simply minting nothing).
    async fn settle(&self, winner: PrincipalId, artifact_id: ArtifactId, price: u64) {
        let artifact = match self.store.get(&artifact_id).await {
            Ok(artifact) => artifact,
            Err(_) => return,
        };

        match self.scorer.score(&artifact).await {
            Ok(score) => {
                if let Err(error) = self.ledger.burn(&winner, price).await {
                    tracing::warn!(%error, "mint settlement: failed to burn winning bid");
                    return;
                }
                let minted = (score as u64) / self.params.mint_ratio;
                if minted > 0 {
                    let _ = self.ledger.mint(&winner, minted).await;
                }
                self.event_log
                    .append(
                        EventType::AuctionScored,
                        Some(winner.clone()),
                        Some(artifact_id.clone()),
                        serde_json::json!({"score": score, "minted": minted}),
                    )
                    .await;
                self.distribute_ubi(price).await;
            }
            Err(error) => {
                self.event_log
                    .append(
                        EventType::AuctionScoringFailed,
                        Some(winner),
                        Some(artifact_id),
                        serde_json::json!({"error": error.to_string()}),
                    )
                    .await;
            }
        }
    }

    /// Splits the burned price evenly across every standing principal.
    /// Integer division leaves a remainder with no further distribution
    /// — it simply stays unminted, rather than rolling over to the next
    /// auction.
    async fn distribute_ubi(&self, pool: u64) {
        let principals: Vec<PrincipalId> =
            self.store.snapshot_all().await.into_iter().filter(|a| a.has_standing).map(|a| a.id.as_principal()).collect();
        if principals.is_empty() {
            return;
        }
        let share = pool / principals.len() as u64;
        if share == 0 {
            return;
        }
        for principal in &principals {
            let _ = self.ledger.mint(principal, share).await;
        }
    }
}

#[async_trait]
impl MintBidSink for Mint {
    async fn bid(&self, caller: &PrincipalId, artifact: &ArtifactId, amount: u64) -> Result<serde_json::Value, KernelError> {
        self.place_bid(caller, artifact, amount).await.map_err(Into::into)
    }
}

#[async_trait]
impl HoldProvider for Mint {
    async fn held_amount(&self, principal: &PrincipalId) -> u64 {
        self.state.lock().await.bids.get(principal).map(|bid| bid.amount).unwrap_or(0)
    }
}
