//! Shared data model and error taxonomy for the simulation kernel.
//!
//! Every other kernel crate depends on this one and nothing else in the
//! workspace; it has no async runtime dependency so it can be used from
//! sandboxed code bindings as well as the executor itself.

pub mod action;
pub mod artifact;
pub mod errors;
pub mod event;
pub mod ids;

pub use action::{Action, ActionOutcome, ActionStage, InvocationFrame};
pub use artifact::{Artifact, ArtifactType, CodeLanguage, CodeModule, Role, CAP_CAN_CALL_LLM, CAP_CAN_MINT};
pub use errors::KernelError;
pub use event::{Event, EventType};
pub use ids::{ArtifactId, PrincipalId};

/// The well-known id of the default permissive access contract every
/// artifact falls back to when none is specified.
pub const DEFAULT_PERMISSIVE_CONTRACT_ID: &str = "genesis.contract.permissive";

/// The well-known id of the ledger's own contract/principal, the event
/// log's artifact id, and the mint's artifact id — installed first by the
/// genesis loader.
pub const GENESIS_LEDGER_ID: &str = "genesis.ledger";
pub const GENESIS_EVENT_LOG_ID: &str = "genesis.event_log";
pub const GENESIS_MINT_ID: &str = "genesis.mint";
