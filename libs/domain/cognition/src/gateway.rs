//! The LLM gateway collaborator: a capability boundary
//! the kernel only sees as a blocking "think" call plus token/cost
//! accounting. Debiting `cost_usd` against `llm_budget_remaining` and
//! `output_tokens` against `llm_rate` is the caller's job (the
//! scheduler's loop task), not the gateway's — the gateway only reports
//! what it spent.

use crate::errors::CognitionError;
use async_trait::async_trait;
use crucible_core_types::PrincipalId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Micro-dollars, matching the ledger's fixed-point budget unit.
    pub cost_usd_micros: i64,
}

#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn generate(&self, agent_id: &PrincipalId, prompt: &str, model: &str) -> Result<LlmResponse, CognitionError>;
}

/// Deterministic, offline stand-in for the real gateway. Cost and token
/// counts are proportional to prompt length so tests exercising budget
/// exhaustion get repeatable numbers without a
/// live backend.
pub struct StubLlmGateway {
    pub cost_per_call_micros: i64,
    pub tokens_per_call: u64,
}

impl StubLlmGateway {
    pub fn new(cost_per_call_micros: i64, tokens_per_call: u64) -> Self {
        Self { cost_per_call_micros, tokens_per_call }
    }
}

impl Default for StubLlmGateway {
    fn default() -> Self {
        Self::new(1_000, 50)
    }
}

#[async_trait]
impl LlmGateway for StubLlmGateway {
    async fn generate(&self, _agent_id: &PrincipalId, prompt: &str, _model: &str) -> Result<LlmResponse, CognitionError> {
        Ok(LlmResponse {
            text: format!("noop: observed {} bytes of world state", prompt.len()),
            input_tokens: prompt.len() as u64 / 4,
            output_tokens: self.tokens_per_call,
            cost_usd_micros: self.cost_per_call_micros,
        })
    }
}
