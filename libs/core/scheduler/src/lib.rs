//! Scheduler: one concurrent loop per autonomous
//! artifact, supervised with exponential-backoff crash recovery.

mod agent_loop;
mod errors;
mod scheduler;
mod supervisor;

pub use agent_loop::{IterationError, IterationOutcome, LoopDeps, LoopState, RESOURCE_LLM_RATE};
pub use errors::SchedulerError;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use supervisor::{CrashTracker, SupervisorConfig, SupervisorVerdict};
