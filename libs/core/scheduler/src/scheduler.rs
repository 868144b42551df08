//! The scheduler: discovers autonomous artifacts and
//! drives one concurrent loop task per match, supervised with crash
//! backoff.
//!
//! Spawn/cancel are driven two ways: explicitly via [`Scheduler::spawn`]
//! / [`Scheduler::cancel`] (used by the genesis loader and tests), and
//! by [`Scheduler::reconcile`], a periodic poll of
//! `store.all_with_loop()` against the current registry. Polling rather
//! than a write-time hook keeps the executor free of a dependency on
//! the scheduler — the same seam style as `HoldProvider`/`MintBidSink`,
//! but a poll instead of a trait object, since there's no natural
//! "lower" crate for the executor to call back into the scheduler
//! through.

use crate::agent_loop::{run_iteration, IterationOutcome, LoopDeps, LoopState};
use crate::supervisor::{CrashTracker, SupervisorConfig, SupervisorVerdict};
use crucible_core_executor::Executor;
use crucible_core_ledger::{Ledger, RateTracker};
use crucible_core_store::ArtifactStore;
use crucible_core_types::{ArtifactId, Event, EventType, PrincipalId};
use crucible_domain_cognition::LlmGateway;
use crucible_infra_eventlog::EventLog;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub supervisor: SupervisorConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { supervisor: SupervisorConfig::default() }
    }
}

/// One supervised loop's terminal reason, returned from the crash-caught
/// inner future so `supervise` can decide whether to restart.
enum LoopExit {
    Cancelled,
    BudgetExhausted,
}

struct LoopHandle {
    cancel: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

pub struct Scheduler {
    store: Arc<ArtifactStore>,
    ledger: Arc<Ledger>,
    rate_tracker: Arc<RateTracker>,
    executor: Arc<Executor>,
    gateway: Arc<dyn LlmGateway>,
    event_log: Arc<EventLog>,
    llm_model: String,
    config: SchedulerConfig,
    handles: Mutex<HashMap<ArtifactId, LoopHandle>>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<ArtifactStore>,
        ledger: Arc<Ledger>,
        rate_tracker: Arc<RateTracker>,
        executor: Arc<Executor>,
        gateway: Arc<dyn LlmGateway>,
        event_log: Arc<EventLog>,
        llm_model: String,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            ledger,
            rate_tracker,
            executor,
            gateway,
            event_log,
            llm_model,
            config,
            handles: Mutex::new(HashMap::new()),
        })
    }

    /// Starts one loop task per artifact already flagged `has_loop` at
    /// boot.
    pub async fn boot(self: &Arc<Self>) {
        for artifact in self.store.all_with_loop().await {
            self.spawn(artifact.id).await;
        }
    }

    /// How many loops are currently registered (alive, sleeping, or
    /// about to be reaped as dead) — exposed for tests and dashboards.
    pub async fn active_loop_count(&self) -> usize {
        self.handles.lock().await.len()
    }

    /// Starts a supervised loop task for `artifact_id` if one is not
    /// already running.
    #[instrument(skip(self), fields(%artifact_id))]
    pub async fn spawn(self: &Arc<Self>, artifact_id: ArtifactId) {
        let mut handles = self.handles.lock().await;
        if handles.contains_key(&artifact_id) {
            return;
        }
        self.store.mark_loop_active(artifact_id.clone()).await;
        let cancel = Arc::new(AtomicBool::new(false));
        let scheduler = Arc::clone(self);
        let task_cancel = Arc::clone(&cancel);
        let agent_id = artifact_id.as_principal();
        let join = tokio::spawn(async move {
            scheduler.supervise(agent_id).await;
        });
        handles.insert(artifact_id, LoopHandle { cancel, join });
    }

    /// Cancels `artifact_id`'s loop at its next suspension point
    /// and waits for the task to exit.
    #[instrument(skip(self), fields(%artifact_id))]
    pub async fn cancel(&self, artifact_id: &ArtifactId) {
        let handle = self.handles.lock().await.remove(artifact_id);
        if let Some(handle) = handle {
            handle.cancel.store(true, Ordering::Relaxed);
            let _ = handle.join.await;
        }
        self.store.mark_loop_inactive(artifact_id).await;
    }

    /// Diffs `store.all_with_loop()` against the registry: spawns loops
    /// for newly-flagged artifacts, cancels ones whose artifact no
    /// longer carries `has_loop` (deleted, or edited to turn it off).
    pub async fn reconcile(self: &Arc<Self>) {
        let desired: HashMap<ArtifactId, ()> = self.store.all_with_loop().await.into_iter().map(|a| (a.id, ())).collect();
        let registered: Vec<ArtifactId> = self.handles.lock().await.keys().cloned().collect();

        for id in registered {
            if !desired.contains_key(&id) {
                self.cancel(&id).await;
            }
        }
        for id in desired.into_keys() {
            self.spawn(id).await;
        }
    }

    fn cancel_flag_for(&self, artifact_id: &ArtifactId) -> Option<Arc<AtomicBool>> {
        // Synchronous best-effort accessor used only inside `supervise`,
        // which always runs after `spawn` has inserted the handle.
        self.handles.try_lock().ok().and_then(|h| h.get(artifact_id).map(|handle| Arc::clone(&handle.cancel)))
    }

    async fn supervise(self: Arc<Self>, agent_id: PrincipalId) {
        let artifact_id = agent_id.as_artifact();
        self.log_event(EventType::LoopStarted, &agent_id, serde_json::json!({})).await;

        let cancel = loop {
            if let Some(flag) = self.cancel_flag_for(&artifact_id) {
                break flag;
            }
            tokio::task::yield_now().await;
        };

        let mut tracker = CrashTracker::new(self.config.supervisor);
        let mut budget_exhausted_emitted = false;

        'restart: loop {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            let deps = self.loop_deps();
            let agent_id = agent_id.clone();
            let loop_cancel = Arc::clone(&cancel);

            let run = std::panic::AssertUnwindSafe(async {
                let mut state = LoopState::default();
                loop {
                    if loop_cancel.load(Ordering::Relaxed) {
                        return LoopExit::Cancelled;
                    }
                    match run_iteration(&deps, &agent_id, &mut state, &loop_cancel).await {
                        Ok(IterationOutcome::Committed) => continue,
                        Ok(IterationOutcome::Cancelled) => return LoopExit::Cancelled,
                        Ok(IterationOutcome::BudgetExhausted) => return LoopExit::BudgetExhausted,
                        Err(err) => panic!("agent loop iteration failed: {err}"),
                    }
                }
            });

            match run.catch_unwind().await {
                Ok(LoopExit::Cancelled) => break 'restart,
                Ok(LoopExit::BudgetExhausted) => {
                    if !budget_exhausted_emitted {
                        budget_exhausted_emitted = true;
                        self.log_event(EventType::BudgetExhausted, &agent_id, serde_json::json!({})).await;
                    }
                    break 'restart;
                }
                Err(_) => {
                    warn!(%agent_id, "agent loop crashed");
                    self.log_event(EventType::LoopCrashed, &agent_id, serde_json::json!({})).await;
                    match tracker.record_crash(std::time::Instant::now()) {
                        SupervisorVerdict::Restart { backoff } => {
                            tokio::time::sleep(backoff).await;
                            continue 'restart;
                        }
                        SupervisorVerdict::Dead => {
                            self.log_event(EventType::LoopDied, &agent_id, serde_json::json!({})).await;
                            break 'restart;
                        }
                    }
                }
            }
        }

        self.handles.lock().await.remove(&artifact_id);
        self.store.mark_loop_inactive(&artifact_id).await;
    }

    fn loop_deps(&self) -> LoopDeps {
        LoopDeps {
            store: Arc::clone(&self.store),
            ledger: Arc::clone(&self.ledger),
            rate_tracker: Arc::clone(&self.rate_tracker),
            executor: Arc::clone(&self.executor),
            gateway: Arc::clone(&self.gateway),
            event_log: Arc::clone(&self.event_log),
            model: self.llm_model.clone(),
        }
    }

    async fn log_event(&self, event_type: EventType, agent_id: &PrincipalId, data: serde_json::Value) -> Event {
        info!(?event_type, %agent_id, "scheduler event");
        self.event_log.append(event_type, Some(agent_id.clone()), Some(agent_id.as_artifact()), data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_core_executor::ExecutorConfig;
    use crucible_core_ledger::{LedgerEntry, RateLimitConfig};
    use crucible_core_sandbox::{EngineRouter, NativeEngine, TAG_PERMISSIVE_CONTRACT};
    use crucible_core_types::{Artifact, ArtifactType, DEFAULT_PERMISSIVE_CONTRACT_ID};
    use crucible_domain_cognition::StubLlmGateway;
    use std::time::Duration;

    fn permissive_contract() -> Artifact {
        Artifact {
            id: DEFAULT_PERMISSIVE_CONTRACT_ID.into(),
            kind: ArtifactType::System,
            content: serde_json::Value::Null,
            code: Some(NativeEngine::module(TAG_PERMISSIVE_CONTRACT)),
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

    fn agent_artifact(id: &str) -> Artifact {
        Artifact {
            id: id.into(),
            kind: ArtifactType::Json,
            content: serde_json::json!({}),
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

    async fn build_scheduler() -> (Arc<Scheduler>, Arc<ArtifactStore>) {
        let ledger = Arc::new(Ledger::new(1_000_000_000));
        let agent = PrincipalId::new("agent-1");
        ledger.open_account(&agent, LedgerEntry::new(0, 1_000_000, 10_000)).await;

        let store = Arc::new(ArtifactStore::new(ledger.clone()));
        store.put(DEFAULT_PERMISSIVE_CONTRACT_ID.into(), permissive_contract()).await.unwrap();
        store.put(agent.as_artifact(), agent_artifact(agent.as_str())).await.unwrap();

        let mut resources = HashMap::new();
        resources.insert(
            crucible_core_executor::RESOURCE_CPU_RATE.to_string(),
            RateLimitConfig { window: Duration::from_millis(50), max_per_window: 1_000 },
        );
        resources.insert(
            crate::agent_loop::RESOURCE_LLM_RATE.to_string(),
            RateLimitConfig { window: Duration::from_secs(60), max_per_window: 1_000_000 },
        );
        let rate_tracker = Arc::new(RateTracker::new(resources));
        let event_log = Arc::new(EventLog::new());
        let engines = Arc::new(EngineRouter::new());
        let executor =
            Executor::new(store.clone(), ledger.clone(), rate_tracker.clone(), event_log.clone(), engines, ExecutorConfig::default());

        let scheduler = Scheduler::new(
            store.clone(),
            ledger,
            rate_tracker,
            executor,
            Arc::new(StubLlmGateway::new(1, 10)),
            event_log,
            "stub-model".to_string(),
            SchedulerConfig::default(),
        );
        (scheduler, store)
    }

    #[tokio::test]
    async fn boot_spawns_one_loop_per_has_loop_artifact() {
        let (scheduler, _store) = build_scheduler().await;
        scheduler.boot().await;
        assert_eq!(scheduler.active_loop_count().await, 1);
        scheduler.cancel(&"agent-1".into()).await;
        assert_eq!(scheduler.active_loop_count().await, 0);
    }

    #[tokio::test]
    async fn deleting_the_loop_artifact_is_reconciled_away() {
        let (scheduler, store) = build_scheduler().await;
        scheduler.boot().await;
        assert_eq!(scheduler.active_loop_count().await, 1);

        store.mark_loop_inactive(&"agent-1".into()).await;
        store.delete(&"agent-1".into()).await.unwrap();
        scheduler.reconcile().await;
        assert_eq!(scheduler.active_loop_count().await, 0);
    }
}
