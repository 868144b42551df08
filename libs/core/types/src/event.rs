//! The append-only event record.

use crate::ids::{ArtifactId, PrincipalId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Action,
    Transfer,
    ArtifactWritten,
    ArtifactDeleted,
    Invocation,
    AuctionOpened,
    AuctionBidPlaced,
    AuctionBidSuperseded,
    AuctionEmpty,
    AuctionResolved,
    AuctionScored,
    AuctionScoringFailed,
    LoopStarted,
    LoopCrashed,
    LoopDied,
    BudgetExhausted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub event_type: EventType,
    pub agent_id: Option<PrincipalId>,
    pub artifact_id: Option<ArtifactId>,
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(seq: u64, event_type: EventType, data: serde_json::Value) -> Self {
        Self {
            seq,
            ts: Utc::now(),
            event_type,
            agent_id: None,
            artifact_id: None,
            data,
        }
    }

    pub fn with_agent(mut self, agent_id: PrincipalId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    pub fn with_artifact(mut self, artifact_id: ArtifactId) -> Self {
        self.artifact_id = Some(artifact_id);
        self
    }
}
