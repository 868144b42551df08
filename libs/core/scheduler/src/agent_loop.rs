//! One iteration of the per-agent loop contract:
//!
//! ```text
//! rate_tracker.wait_for_capacity(id, cpu_rate, 1)
//! snapshot = world.read_snapshot(id)
//! intent   = ask_llm(strategy, state, snapshot)
//! result   = executor.submit(id, intent)
//! persist(id, state.updated_with(result))
//! ```
//!
//! "persist" is read here as updating the loop task's own in-process
//! state, fed into the next `ask_llm` prompt — not a second
//! `write_artifact` per turn, since the loop contract submits exactly
//! one action per iteration.

use crucible_core_executor::Executor;
use crucible_core_ledger::{Ledger, RateTracker};
use crucible_core_store::ArtifactStore;
use crucible_core_types::{ActionOutcome, KernelError, PrincipalId};
use crucible_domain_cognition::{parse_intent, LlmGateway};
use crucible_infra_eventlog::EventLog;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

pub const RESOURCE_LLM_RATE: &str = "llm_rate";

/// Wait granularity for the cancellable capacity wait below. Short
/// enough that a deleted loop artifact is noticed promptly at its next
/// suspension point.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct LoopDeps {
    pub store: Arc<ArtifactStore>,
    pub ledger: Arc<Ledger>,
    pub rate_tracker: Arc<RateTracker>,
    pub executor: Arc<Executor>,
    pub gateway: Arc<dyn LlmGateway>,
    pub event_log: Arc<EventLog>,
    pub model: String,
}

/// Carried in-process between iterations; never written back as a
/// second artifact (see module docs).
#[derive(Debug, Clone, Default)]
pub struct LoopState {
    pub last_outcome: Option<ActionOutcome>,
    pub turn: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    Committed,
    /// The global LLM budget is exhausted; the loop should go quiescent.
    BudgetExhausted,
    /// The loop's own artifact disappeared or lost its `has_loop` flag.
    Cancelled,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum IterationError {
    #[error(transparent)]
    Kernel(#[from] KernelError),
}

/// Blocks on `cpu_rate` capacity, polling `cancel` between short waits
/// so a cancelled loop unblocks promptly instead of waiting out the
/// full window.
async fn wait_for_cpu_capacity_cancellable(
    rate_tracker: &RateTracker,
    agent_id: &PrincipalId,
    cancel: &AtomicBool,
) -> Result<bool, KernelError> {
    loop {
        if cancel.load(Ordering::Relaxed) {
            return Ok(false);
        }
        let outcome = rate_tracker
            .wait_for_capacity(agent_id, crucible_core_executor::RESOURCE_CPU_RATE, 1, Some(CANCEL_POLL_INTERVAL))
            .await
            .map_err(KernelError::from)?;
        match outcome {
            crucible_core_ledger::WaitOutcome::Ok => return Ok(true),
            crucible_core_ledger::WaitOutcome::Timeout | crucible_core_ledger::WaitOutcome::Cancelled => continue,
        }
    }
}

fn build_prompt(snapshot: &serde_json::Value, state: &LoopState) -> String {
    let last = state
        .last_outcome
        .as_ref()
        .map(|o| serde_json::to_string(o).unwrap_or_default())
        .unwrap_or_else(|| "null".to_string());
    format!(
        "turn={turn}\nsnapshot={snapshot}\nlast_outcome={last}",
        turn = state.turn,
        snapshot = snapshot,
    )
}

/// Runs exactly one pass of the loop contract for `agent_id`. Returns
/// `Ok(IterationOutcome::Committed)` with `state` mutated in place for
/// the caller's next call, or a terminal/quiescent outcome.
#[instrument(skip(deps, state, cancel), fields(%agent_id, turn = state.turn))]
pub async fn run_iteration(
    deps: &LoopDeps,
    agent_id: &PrincipalId,
    state: &mut LoopState,
    cancel: &AtomicBool,
) -> Result<IterationOutcome, IterationError> {
    let admitted = wait_for_cpu_capacity_cancellable(&deps.rate_tracker, agent_id, cancel).await?;
    if !admitted {
        return Ok(IterationOutcome::Cancelled);
    }

    let artifact_id = agent_id.as_artifact();
    let artifact = match deps.store.get(&artifact_id).await {
        Ok(a) => a,
        Err(_) => return Ok(IterationOutcome::Cancelled),
    };
    if !artifact.has_loop {
        return Ok(IterationOutcome::Cancelled);
    }
    let snapshot = artifact.content.clone();

    if deps.ledger.budget_exhausted() {
        return Ok(IterationOutcome::BudgetExhausted);
    }

    let prompt = build_prompt(&snapshot, state);
    let response = deps
        .gateway
        .generate(agent_id, &prompt, &deps.model)
        .await
        .map_err(|e| IterationError::Kernel(e.into()))?;

    if deps.ledger.debit_llm(agent_id, response.cost_usd_micros).await.is_err() {
        return Ok(IterationOutcome::BudgetExhausted);
    }
    // Backpressure on LLM usage is the rate tracker's job, not a hard
    // failure: a loop that has already paid for the call still gets to
    // act on the response.
    let _ = deps.rate_tracker.consume(agent_id, RESOURCE_LLM_RATE, response.output_tokens).await;

    let intent = parse_intent(&response.text);
    let outcome = deps.executor.submit(agent_id.clone(), intent).await;

    state.last_outcome = Some(outcome);
    state.turn += 1;
    Ok(IterationOutcome::Committed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_core_executor::ExecutorConfig;
    use crucible_core_ledger::{LedgerEntry, RateLimitConfig};
    use crucible_core_sandbox::EngineRouter;
    use crucible_core_types::{Artifact, ArtifactType, DEFAULT_PERMISSIVE_CONTRACT_ID};
    use crucible_domain_cognition::StubLlmGateway;
    use std::collections::HashMap;

    fn agent_artifact(id: &str) -> Artifact {
        Artifact {
            id: id.into(),
            kind: ArtifactType::Json,
            content: serde_json::json!({"mood": "curious"}),
            code: None,
            created_by: PrincipalId::new(id),
            access_contract_id: DEFAULT_PERMISSIVE_CONTRACT_ID.into(),
            price: 0,
            has_standing: true,
            can_execute: false,
            has_loop: true,
            capabilities: Default::default(),
            size_bytes: 0,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    async fn build_deps(api_budget_limit_micros: i64) -> (LoopDeps, PrincipalId) {
        let ledger = Arc::new(Ledger::new(api_budget_limit_micros));
        let agent = PrincipalId::new("agent-1");
        ledger.open_account(&agent, LedgerEntry::new(0, 1_000_000, 10_000)).await;

        let store = Arc::new(ArtifactStore::new(ledger.clone()));
        store.put(DEFAULT_PERMISSIVE_CONTRACT_ID.into(), permissive_contract()).await.unwrap();
        store.put(agent.as_artifact(), agent_artifact(agent.as_str())).await.unwrap();

        let mut resources = HashMap::new();
        resources.insert(
            crucible_core_executor::RESOURCE_CPU_RATE.to_string(),
            RateLimitConfig { window: Duration::from_millis(100), max_per_window: 1_000 },
        );
        resources.insert(RESOURCE_LLM_RATE.to_string(), RateLimitConfig { window: Duration::from_secs(60), max_per_window: 1_000_000 });
        let rate_tracker = Arc::new(RateTracker::new(resources));

        let event_log = Arc::new(EventLog::new());
        let engines = Arc::new(EngineRouter::new());
        let executor =
            Executor::new(store.clone(), ledger.clone(), rate_tracker.clone(), event_log.clone(), engines, ExecutorConfig::default());

        let deps = LoopDeps {
            store,
            ledger,
            rate_tracker,
            executor,
            gateway: Arc::new(StubLlmGateway::new(1_000, 10)),
            event_log,
            model: "stub-model".to_string(),
        };
        (deps, agent)
    }

    fn permissive_contract() -> Artifact {
        Artifact {
            id: DEFAULT_PERMISSIVE_CONTRACT_ID.into(),
            kind: ArtifactType::System,
            content: serde_json::Value::Null,
            code: Some(crucible_core_sandbox::NativeEngine::module(crucible_core_sandbox::TAG_PERMISSIVE_CONTRACT)),
            created_by: PrincipalId::new("genesis"),
            access_contract_id: DEFAULT_PERMISSIVE_CONTRACT_ID.into(),
            price: 0,
            has_standing: false,
            can_execute: true,
            has_loop: false,
            capabilities: Default::default(),
            size_bytes: 0,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn one_iteration_commits_a_noop_and_advances_turn() {
        let (deps, agent) = build_deps(1_000_000).await;
        let mut state = LoopState::default();
        let cancel = AtomicBool::new(false);
        let outcome = run_iteration(&deps, &agent, &mut state, &cancel).await.unwrap();
        assert_eq!(outcome, IterationOutcome::Committed);
        assert_eq!(state.turn, 1);
        assert!(state.last_outcome.is_some());
    }

    #[tokio::test]
    async fn exhausted_budget_is_reported_without_panicking() {
        let (deps, agent) = build_deps(500).await;
        let mut state = LoopState::default();
        let cancel = AtomicBool::new(false);
        // First call spends the whole global cap (cost 1_000 > limit 500).
        let outcome = run_iteration(&deps, &agent, &mut state, &cancel).await.unwrap();
        assert_eq!(outcome, IterationOutcome::BudgetExhausted);
    }

    #[tokio::test]
    async fn cancelled_flag_stops_before_any_llm_call() {
        let (deps, agent) = build_deps(1_000_000).await;
        let mut state = LoopState::default();
        let cancel = AtomicBool::new(true);
        let outcome = run_iteration(&deps, &agent, &mut state, &cancel).await.unwrap();
        assert_eq!(outcome, IterationOutcome::Cancelled);
        assert_eq!(state.turn, 0);
    }

    #[tokio::test]
    async fn deleted_artifact_is_reported_as_cancelled() {
        let (deps, agent) = build_deps(1_000_000).await;
        deps.store.delete(&agent.as_artifact()).await.unwrap();
        let mut state = LoopState::default();
        let cancel = AtomicBool::new(false);
        let outcome = run_iteration(&deps, &agent, &mut state, &cancel).await.unwrap();
        assert_eq!(outcome, IterationOutcome::Cancelled);
    }
}
