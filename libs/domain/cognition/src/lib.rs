//! External-collaborator interfaces the kernel talks to but does not
//! implement the internals of: the LLM gateway and the
//! mint's scoring function. Both are out of scope for *implementation*
//! here, so this crate only carries the trait boundary plus
//! deterministic stubs the rest of the workspace tests against.

mod errors;
mod gateway;
mod intent;
mod scoring;

pub use errors::CognitionError;
pub use gateway::{LlmGateway, LlmResponse, StubLlmGateway};
pub use intent::parse_intent;
pub use scoring::{ArtifactScorer, FailingScorer, FixedScorer};
