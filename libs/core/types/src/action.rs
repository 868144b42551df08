//! The narrow waist: the three action verbs plus noop.

use crate::errors::KernelError;
use crate::ids::{ArtifactId, PrincipalId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Action {
    ReadArtifact {
        target: ArtifactId,
    },
    WriteArtifact {
        id: ArtifactId,
        body: serde_json::Value,
    },
    InvokeArtifact {
        target: ArtifactId,
        method: String,
        args: Vec<serde_json::Value>,
    },
    Noop,
}

/// The per-action state machine position, kept on the
/// outcome for observability; the executor never exposes it as a type
/// callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionStage {
    Submitted,
    Resolved,
    Permitted,
    Charged,
    Executing,
    Committed,
    Aborted,
}

/// Every action returns this, never an exception, to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub result: Option<serde_json::Value>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub stage: ActionStage,
}

impl ActionOutcome {
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error_kind: None,
            error_message: None,
            stage: ActionStage::Committed,
        }
    }

    pub fn noop() -> Self {
        Self {
            success: true,
            result: None,
            error_kind: None,
            error_message: None,
            stage: ActionStage::Committed,
        }
    }

    pub fn failed(stage: ActionStage, error: &KernelError) -> Self {
        Self {
            success: false,
            result: None,
            error_kind: Some(error.kind().to_string()),
            error_message: Some(error.to_string()),
            stage,
        }
    }
}

/// Carried through nested executor frames: the depth
/// counter and the top-level caller that nested costs are billed to.
#[derive(Debug, Clone)]
pub struct InvocationFrame {
    pub depth: u32,
    pub top_level_caller: PrincipalId,
    pub current_caller: PrincipalId,
}

impl InvocationFrame {
    pub const MAX_DEPTH: u32 = 5;

    /// The first executor entry in a causal chain is depth 1.
    pub fn root(caller: PrincipalId) -> Self {
        Self {
            depth: 1,
            top_level_caller: caller.clone(),
            current_caller: caller,
        }
    }

    /// Depths 2..=5 succeed; a 6th nested entry fails before any side
    /// effect runs.
    pub fn nested(&self, new_caller: PrincipalId) -> Result<Self, KernelError> {
        let new_depth = self.depth + 1;
        if new_depth > Self::MAX_DEPTH {
            return Err(KernelError::RecursionLimit);
        }
        Ok(Self {
            depth: new_depth,
            top_level_caller: self.top_level_caller.clone(),
            current_caller: new_caller,
        })
    }
}
