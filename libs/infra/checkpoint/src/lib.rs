//! Whole-kernel checkpoint: a single JSON file
//! holding everything needed to resume a kernel process without
//! replaying the event log from genesis.

mod errors;

pub use errors::CheckpointError;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use crucible_core_ledger::{LedgerSnapshot, RateTrackerSnapshot};
use crucible_core_mint::MintSnapshot;
use crucible_core_types::Artifact;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub event_log_watermark: u64,
    pub artifacts: Vec<Artifact>,
    pub ledger: LedgerSnapshot,
    pub rate_tracker: RateTrackerSnapshot,
    pub mint: Option<MintSnapshot>,
    pub saved_at: DateTime<Utc>,
}

/// Everything a checkpoint needs a live reference to; kept as borrows so
/// the caller doesn't need to clone its `Arc`s just to snapshot them.
pub struct CheckpointSources<'a> {
    pub store: &'a Arc<crucible_core_store::ArtifactStore>,
    pub ledger: &'a Arc<crucible_core_ledger::Ledger>,
    pub rate_tracker: &'a Arc<crucible_core_ledger::RateTracker>,
    pub event_log: &'a Arc<crucible_infra_eventlog::EventLog>,
    pub mint: Option<&'a Arc<crucible_core_mint::Mint>>,
}

impl Checkpoint {
    pub async fn capture(sources: CheckpointSources<'_>) -> Self {
        let mint = match sources.mint {
            Some(mint) => Some(mint.snapshot().await),
            None => None,
        };
        Checkpoint {
            event_log_watermark: sources.event_log.watermark().await,
            artifacts: sources.store.snapshot_all().await,
            ledger: sources.ledger.snapshot().await,
            rate_tracker: sources.rate_tracker.snapshot().await,
            mint,
            saved_at: Utc::now(),
        }
    }

    pub fn write(&self, path: &Path) -> Result<(), CheckpointError> {
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, bytes).map_err(|source| CheckpointError::Write { path: path.display().to_string(), source })
    }

    pub fn read(path: &Path) -> Result<Self, CheckpointError> {
        let bytes = std::fs::read(path).map_err(|source| CheckpointError::Read { path: path.display().to_string(), source })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
