//! The mint's "external scoring function": scores the
//! winning auction artifact in `[0, 100]`. Expected to call an LLM in
//! production; the kernel only needs the score back.

use crate::errors::CognitionError;
use async_trait::async_trait;
use crucible_core_types::Artifact;

#[async_trait]
pub trait ArtifactScorer: Send + Sync {
    async fn score(&self, artifact: &Artifact) -> Result<u8, CognitionError>;
}

/// Deterministic stand-in used by tests and by the reference end-to-end
/// scenarios, which specify the score literally (e.g. "score returned
/// by scorer = 80") rather than deriving it from content.
pub struct FixedScorer {
    pub score: u8,
}

impl FixedScorer {
    pub fn new(score: u8) -> Self {
        Self { score: score.min(100) }
    }
}

#[async_trait]
impl ArtifactScorer for FixedScorer {
    async fn score(&self, _artifact: &Artifact) -> Result<u8, CognitionError> {
        Ok(self.score)
    }
}

/// A scorer that always fails, exercising the mint's refund-on-failure
/// path.
pub struct FailingScorer;

#[async_trait]
impl ArtifactScorer for FailingScorer {
    async fn score(&self, _artifact: &Artifact) -> Result<u8, CognitionError> {
        Err(CognitionError::Scorer("scoring backend unreachable".into()))
    }
}
