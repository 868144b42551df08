//! The executor: the single choke-point through which
//! every state change flows. Every submitted [`Action`] goes through
//! resolve → permission → rate-gate → charge → execute → commit, and
//! always returns an [`ActionOutcome`] — never an exception.

mod mint_sink;
mod permission;

pub use mint_sink::MintBidSink;
pub use permission::PermissionResult;

use async_trait::async_trait;
use crucible_core_ledger::{LedgerError, RateTracker};
use crucible_core_sandbox::{EngineRouter, SandboxContext, SandboxKernel};
use crucible_core_store::{ArtifactStore, QueryFilter, StoreError};
use crucible_core_types::{
    Action, ActionOutcome, ActionStage, Artifact, ArtifactId, ArtifactType, CodeModule, Event, EventType,
    InvocationFrame, KernelError, PrincipalId, DEFAULT_PERMISSIVE_CONTRACT_ID,
};
use crucible_infra_eventlog::EventLog;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tracing::instrument;

pub const RESOURCE_CPU_RATE: &str = "cpu_rate";

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub sandbox_timeout: Duration,
    pub max_invocation_depth: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { sandbox_timeout: Duration::from_secs(5), max_invocation_depth: InvocationFrame::MAX_DEPTH }
    }
}

/// An abort before commit: the stage it happened at plus why. Carries no
/// partial side effects — every caller of an internal step either fully
/// applies its effect or returns one of these.
type Abort = (ActionStage, KernelError);

pub struct Executor {
    store: Arc<ArtifactStore>,
    ledger: Arc<crucible_core_ledger::Ledger>,
    rate_tracker: Arc<RateTracker>,
    event_log: Arc<EventLog>,
    engines: Arc<EngineRouter>,
    config: ExecutorConfig,
    mint: OnceLock<Arc<dyn MintBidSink>>,
    self_ref: OnceLock<Weak<Executor>>,
}

impl Executor {
    pub fn new(
        store: Arc<ArtifactStore>,
        ledger: Arc<crucible_core_ledger::Ledger>,
        rate_tracker: Arc<RateTracker>,
        event_log: Arc<EventLog>,
        engines: Arc<EngineRouter>,
        config: ExecutorConfig,
    ) -> Arc<Self> {
        let executor = Arc::new(Self {
            store,
            ledger,
            rate_tracker,
            event_log,
            engines,
            config,
            mint: OnceLock::new(),
            self_ref: OnceLock::new(),
        });
        let _ = executor.self_ref.set(Arc::downgrade(&executor));
        executor
    }

    /// Wires the mint in after both it and the executor exist, breaking
    /// the construction cycle.
    pub fn attach_mint(&self, mint: Arc<dyn MintBidSink>) {
        let _ = self.mint.set(mint);
    }

    fn self_dyn(&self) -> Arc<dyn SandboxKernel> {
        let arc: Arc<Executor> = self
            .self_ref
            .get()
            .and_then(Weak::upgrade)
            .expect("Executor must be constructed via Executor::new before use");
        arc
    }

    /// Top-level entry point: one agent-loop iteration submits exactly
    /// one action here. The rate gate blocks rather than rejects.
    #[instrument(skip(self, action), fields(%caller))]
    pub async fn submit(&self, caller: PrincipalId, action: Action) -> ActionOutcome {
        let frame = InvocationFrame::root(caller);
        self.run(frame, action, true).await
    }

    async fn run(&self, frame: InvocationFrame, action: Action, block_on_rate: bool) -> ActionOutcome {
        if matches!(action, Action::Noop) {
            let event = self
                .event_log
                .append(EventType::Action, Some(frame.current_caller.clone()), None, serde_json::json!({"action": "noop"}))
                .await;
            let _ = event;
            return ActionOutcome::noop();
        }

        match self.try_run(&frame, &action, block_on_rate).await {
            Ok(outcome) => outcome,
            Err((stage, err)) => {
                self.event_log
                    .append(
                        EventType::Action,
                        Some(frame.current_caller.clone()),
                        action_target(&action),
                        serde_json::json!({
                            "action": action_kind(&action),
                            "success": false,
                            "error_kind": err.kind(),
                            "error_message": err.to_string(),
                            "stage": format!("{stage:?}"),
                        }),
                    )
                    .await;
                ActionOutcome::failed(stage, &err)
            }
        }
    }

    async fn try_run(&self, frame: &InvocationFrame, action: &Action, block_on_rate: bool) -> Result<ActionOutcome, Abort> {
        match action {
            Action::ReadArtifact { target } => self.do_read(frame, target, block_on_rate).await,
            Action::WriteArtifact { id, body } => self.do_write(frame, id, body, block_on_rate).await,
            Action::InvokeArtifact { target, method, args } => {
                self.do_invoke(frame, target, method, args.clone(), block_on_rate).await
            }
            Action::Noop => unreachable!("handled in run()"),
        }
    }

    // ---- step 1: resolve ----

    async fn resolve(&self, id: &ArtifactId) -> Result<Artifact, Abort> {
        self.store.get(id).await.map_err(|e| (ActionStage::Resolved, e.into()))
    }

    // ---- step 2: permission check ----

    /// Runs `target`'s `access_contract_id.check_permission(...)`. This
    /// is a nested sandbox execution at `frame.depth + 1`, but it is not
    /// routed back through the full six-step protocol — the contract's
    /// own `invoke()` calls (if any) are what go through that, bounded
    /// by the same depth counter.
    async fn check_permission(
        &self,
        frame: &InvocationFrame,
        target: &Artifact,
        action_label: &str,
    ) -> Result<PermissionResult, Abort> {
        let contract = self
            .store
            .get(&target.access_contract_id)
            .await
            .map_err(|_| {
                (
                    ActionStage::Permitted,
                    KernelError::InterfaceMismatch(format!("access_contract_id {} does not resolve", target.access_contract_id)),
                )
            })?;
        let code = contract.code.as_ref().ok_or_else(|| {
            (
                ActionStage::Permitted,
                KernelError::InterfaceMismatch(format!("contract {} is not executable", contract.id)),
            )
        })?;

        let nested_frame = frame
            .nested(frame.current_caller.clone())
            .map_err(|e| (ActionStage::Permitted, e))?;
        if nested_frame.depth > self.config.max_invocation_depth {
            return Err((ActionStage::Permitted, KernelError::RecursionLimit));
        }

        let context = serde_json::json!({
            "caller": frame.current_caller.as_str(),
            "action": action_label,
            "target": target.id.as_str(),
        });
        let ledger_view = serde_json::json!({
            "balance": self.ledger.balance(&frame.current_caller).await.unwrap_or(0),
        });

        let ctx = SandboxContext {
            caller_id: frame.current_caller.clone(),
            frame: nested_frame,
            kernel: self.self_dyn(),
        };
        let result = self
            .engines
            .run(code, "check_permission", vec![context, ledger_view], ctx, self.config.sandbox_timeout)
            .await
            .map_err(|e| (ActionStage::Permitted, e.into()))?;
        PermissionResult::from_value(&result).map_err(|e| (ActionStage::Permitted, e))
    }

    // ---- step 3: rate gate ----

    async fn gate_rate(&self, frame: &InvocationFrame, block: bool) -> Result<(), Abort> {
        if block {
            self.rate_tracker
                .wait_for_capacity(&frame.current_caller, RESOURCE_CPU_RATE, 1, None)
                .await
                .map_err(|e| (ActionStage::Charged, e.into()))?;
        } else {
            self.rate_tracker
                .consume(&frame.current_caller, RESOURCE_CPU_RATE, 1)
                .await
                .map_err(|e| (ActionStage::Charged, e.into()))?;
        }
        Ok(())
    }

    // ---- step 4: charge ----

    /// Moves scrip but does not log the transfer event yet — a later
    /// stage (step 5, execution) can still fail, and a failed action
    /// must leave zero state mutations behind. The caller logs the
    /// event once the whole action is known to succeed, or calls
    /// [`Executor::refund`] to undo this transfer on abort.
    async fn charge(&self, frame: &InvocationFrame, target: &Artifact, contract_cost: u64) -> Result<u64, Abort> {
        let total = target.price + contract_cost;
        if total == 0 {
            return Ok(0);
        }
        self.ledger
            .transfer(&frame.current_caller, &target.created_by, total)
            .await
            .map_err(|e| (ActionStage::Charged, e.into()))?;
        Ok(total)
    }

    /// Reverses a charge made earlier in the same action after a later
    /// stage aborted. Best-effort: the transfer back can only fail if
    /// the recipient's own balance was drained in the meantime by a
    /// concurrent action, which would indicate a deeper invariant
    /// violation rather than something this action should retry.
    async fn refund(&self, frame: &InvocationFrame, target: &Artifact, total: u64) {
        if total == 0 {
            return;
        }
        if let Err(err) = self.ledger.transfer(&target.created_by, &frame.current_caller, total).await {
            tracing::error!(%err, target = %target.id, "failed to refund charge after aborted action");
        }
    }

    async fn log_transfer(&self, frame: &InvocationFrame, target: &Artifact, total: u64) {
        if total == 0 {
            return;
        }
        self.event_log
            .append(
                EventType::Transfer,
                Some(frame.current_caller.clone()),
                Some(target.id.clone()),
                serde_json::json!({"from": frame.current_caller.as_str(), "to": target.created_by.as_str(), "amount": total}),
            )
            .await;
    }

    // ---- action bodies ----

    async fn do_read(&self, frame: &InvocationFrame, target_id: &ArtifactId, block: bool) -> Result<ActionOutcome, Abort> {
        let target = self.resolve(target_id).await?;
        let permission = self.check_permission(frame, &target, "read_artifact").await?;
        if !permission.allowed {
            return Err((ActionStage::Permitted, KernelError::PermissionDenied(permission.reason)));
        }
        self.gate_rate(frame, block).await?;
        let charged = self.charge(frame, &target, permission.cost_scrip).await?;
        self.log_transfer(frame, &target, charged).await;

        let event = self
            .event_log
            .append(
                EventType::Action,
                Some(frame.current_caller.clone()),
                Some(target.id.clone()),
                serde_json::json!({"action": "read_artifact", "success": true}),
            )
            .await;
        let _ = event;
        Ok(ActionOutcome::ok(target.content))
    }

    async fn do_write(
        &self,
        frame: &InvocationFrame,
        id: &ArtifactId,
        body: &serde_json::Value,
        block: bool,
    ) -> Result<ActionOutcome, Abort> {
        let existing = self.store.get(id).await.ok();

        let charged = if let Some(existing) = &existing {
            let permission = self.check_permission(frame, existing, "write_artifact").await?;
            if !permission.allowed {
                return Err((ActionStage::Permitted, KernelError::PermissionDenied(permission.reason)));
            }
            self.gate_rate(frame, block).await?;
            self.charge(frame, existing, permission.cost_scrip).await?
        } else {
            self.gate_rate(frame, block).await?;
            0
        };

        let artifact = match self.materialize_artifact(id.clone(), body, frame, existing.as_ref()) {
            Ok(artifact) => artifact,
            Err(abort) => {
                if let Some(existing) = &existing {
                    self.refund(frame, existing, charged).await;
                }
                return Err(abort);
            }
        };
        if let Err(err) = self.store.put(id.clone(), artifact).await {
            if let Some(existing) = &existing {
                self.refund(frame, existing, charged).await;
            }
            return Err((ActionStage::Executing, err.into()));
        }

        if let Some(existing) = &existing {
            self.log_transfer(frame, existing, charged).await;
        }
        self.event_log
            .append(
                EventType::ArtifactWritten,
                Some(frame.current_caller.clone()),
                Some(id.clone()),
                serde_json::json!({"action": "write_artifact"}),
            )
            .await;
        Ok(ActionOutcome::ok(serde_json::json!({"id": id.as_str()})))
    }

    fn materialize_artifact(
        &self,
        id: ArtifactId,
        body: &serde_json::Value,
        frame: &InvocationFrame,
        existing: Option<&Artifact>,
    ) -> Result<Artifact, Abort> {
        let now = chrono::Utc::now();
        let kind = body
            .get("kind")
            .and_then(|v| v.as_str())
            .map(parse_artifact_type)
            .transpose()
            .map_err(|e| (ActionStage::Executing, e))?
            .or_else(|| existing.map(|a| a.kind))
            .unwrap_or(ArtifactType::Json);
        let content = body.get("content").cloned().unwrap_or(serde_json::Value::Null);
        let code = body
            .get("code")
            .and_then(|v| serde_json::from_value::<CodeModule>(v.clone()).ok())
            .or_else(|| existing.and_then(|a| a.code.clone()));
        let access_contract_id = body
            .get("access_contract_id")
            .and_then(|v| v.as_str())
            .map(ArtifactId::from)
            .or_else(|| existing.map(|a| a.access_contract_id.clone()))
            .unwrap_or_else(|| ArtifactId::from(DEFAULT_PERMISSIVE_CONTRACT_ID));
        let price = body.get("price").and_then(|v| v.as_u64()).or_else(|| existing.map(|a| a.price)).unwrap_or(0);
        let has_standing = body
            .get("has_standing")
            .and_then(|v| v.as_bool())
            .or_else(|| existing.map(|a| a.has_standing))
            .unwrap_or(false);
        let can_execute = body
            .get("can_execute")
            .and_then(|v| v.as_bool())
            .or_else(|| existing.map(|a| a.can_execute))
            .unwrap_or(code.is_some());
        let has_loop = body
            .get("has_loop")
            .and_then(|v| v.as_bool())
            .or_else(|| existing.map(|a| a.has_loop))
            .unwrap_or(false);

        Ok(Artifact {
            id,
            kind,
            content,
            code,
            created_by: existing.map(|a| a.created_by.clone()).unwrap_or_else(|| frame.current_caller.clone()),
            access_contract_id,
            price,
            has_standing,
            can_execute,
            has_loop,
            // Capabilities are genesis-only; `write_artifact`
            // can never grant them to itself, only preserve what a genesis
            // loader already set.
            capabilities: existing.map(|a| a.capabilities.clone()).unwrap_or_default(),
            size_bytes: 0,
            created_at: existing.map(|a| a.created_at).unwrap_or(now),
            updated_at: now,
        })
    }

    async fn do_invoke(
        &self,
        frame: &InvocationFrame,
        target_id: &ArtifactId,
        method: &str,
        args: Vec<serde_json::Value>,
        block: bool,
    ) -> Result<ActionOutcome, Abort> {
        let target = self.resolve(target_id).await?;
        if !target.can_execute || target.code.is_none() {
            return Err((
                ActionStage::Resolved,
                KernelError::InterfaceMismatch(format!("{target_id} is not executable")),
            ));
        }
        let permission = self.check_permission(frame, &target, "invoke_artifact").await?;
        if !permission.allowed {
            return Err((ActionStage::Permitted, KernelError::PermissionDenied(permission.reason)));
        }
        self.gate_rate(frame, block).await?;
        let charged = self.charge(frame, &target, permission.cost_scrip).await?;

        let nested_frame = match frame.nested(frame.current_caller.clone()) {
            Ok(nested_frame) if nested_frame.depth <= self.config.max_invocation_depth => nested_frame,
            Ok(_) => {
                self.refund(frame, &target, charged).await;
                return Err((ActionStage::Executing, KernelError::RecursionLimit));
            }
            Err(e) => {
                self.refund(frame, &target, charged).await;
                return Err((ActionStage::Executing, e));
            }
        };
        let ctx = SandboxContext { caller_id: frame.current_caller.clone(), frame: nested_frame, kernel: self.self_dyn() };
        let code = target.code.clone().expect("checked above");
        let result = match self.engines.run(&code, method, args, ctx, self.config.sandbox_timeout).await {
            Ok(result) => result,
            Err(e) => {
                self.refund(frame, &target, charged).await;
                return Err((ActionStage::Executing, e.into()));
            }
        };

        self.log_transfer(frame, &target, charged).await;
        self.event_log
            .append(
                EventType::Invocation,
                Some(frame.current_caller.clone()),
                Some(target.id.clone()),
                serde_json::json!({"method": method, "success": true}),
            )
            .await;
        Ok(ActionOutcome::ok(result))
    }

    /// Deletion is not one of the three action verbs;
    /// it is invoked directly by trusted callers (genesis tooling,
    /// admin operations), still gated by the artifact's own contract.
    #[instrument(skip(self), fields(%caller, %id))]
    pub async fn delete_artifact(&self, caller: PrincipalId, id: ArtifactId) -> ActionOutcome {
        let frame = InvocationFrame::root(caller);
        match self.do_delete(&frame, &id).await {
            Ok(outcome) => outcome,
            Err((stage, err)) => {
                self.event_log
                    .append(
                        EventType::Action,
                        Some(frame.current_caller.clone()),
                        Some(id),
                        serde_json::json!({"action": "delete_artifact", "success": false, "error_kind": err.kind()}),
                    )
                    .await;
                ActionOutcome::failed(stage, &err)
            }
        }
    }

    async fn do_delete(&self, frame: &InvocationFrame, id: &ArtifactId) -> Result<ActionOutcome, Abort> {
        let target = self.resolve(id).await?;
        let permission = self.check_permission(frame, &target, "delete_artifact").await?;
        if !permission.allowed {
            return Err((ActionStage::Permitted, KernelError::PermissionDenied(permission.reason)));
        }
        self.store.delete(id).await.map_err(|e| (ActionStage::Executing, e.into()))?;
        self.event_log
            .append(EventType::ArtifactDeleted, Some(frame.current_caller.clone()), Some(id.clone()), serde_json::json!({}))
            .await;
        Ok(ActionOutcome::ok(serde_json::json!({"deleted": id.as_str()})))
    }
}

fn parse_artifact_type(s: &str) -> Result<ArtifactType, KernelError> {
    match s {
        "text" => Ok(ArtifactType::Text),
        "json" => Ok(ArtifactType::Json),
        "executable" => Ok(ArtifactType::Executable),
        "system" => Ok(ArtifactType::System),
        "documentation" => Ok(ArtifactType::Documentation),
        other => Err(KernelError::InvalidArgument(format!("unknown artifact kind {other}"))),
    }
}

fn action_kind(action: &Action) -> &'static str {
    match action {
        Action::ReadArtifact { .. } => "read_artifact",
        Action::WriteArtifact { .. } => "write_artifact",
        Action::InvokeArtifact { .. } => "invoke_artifact",
        Action::Noop => "noop",
    }
}

fn action_target(action: &Action) -> Option<ArtifactId> {
    match action {
        Action::ReadArtifact { target } => Some(target.clone()),
        Action::WriteArtifact { id, .. } => Some(id.clone()),
        Action::InvokeArtifact { target, .. } => Some(target.clone()),
        Action::Noop => None,
    }
}

#[async_trait]
impl SandboxKernel for Executor {
    async fn read_artifact(&self, id: &ArtifactId, caller_id: &PrincipalId) -> Result<serde_json::Value, KernelError> {
        let frame = InvocationFrame::root(caller_id.clone());
        match self.run(frame, Action::ReadArtifact { target: id.clone() }, false).await {
            ActionOutcome { success: true, result: Some(v), .. } => Ok(v),
            outcome => Err(KernelError::RuntimeError(outcome.error_message.unwrap_or_default())),
        }
    }

    async fn query(&self, kind: Option<ArtifactType>, _caller_id: &PrincipalId) -> Result<Vec<ArtifactId>, KernelError> {
        Ok(self.store.query(&QueryFilter { kind, ..Default::default() }).await)
    }

    async fn balance(&self, principal: &PrincipalId) -> Result<u64, KernelError> {
        self.ledger.balance(principal).await.map_err(Into::into)
    }

    async fn write_artifact(&self, caller_id: &PrincipalId, id: &ArtifactId, content: serde_json::Value) -> Result<(), KernelError> {
        let frame = InvocationFrame::root(caller_id.clone());
        let body = serde_json::json!({"content": content});
        match self.run(frame, Action::WriteArtifact { id: id.clone(), body }, false).await {
            ActionOutcome { success: true, .. } => Ok(()),
            outcome => Err(KernelError::RuntimeError(outcome.error_message.unwrap_or_default())),
        }
    }

    async fn transfer_scrip(&self, caller_id: &PrincipalId, to: &PrincipalId, amount: u64) -> Result<(), KernelError> {
        self.ledger.transfer(caller_id, to, amount).await.map_err(Into::into)
    }

    async fn transfer_quota(&self, caller_id: &PrincipalId, to: &PrincipalId, resource: &str, amount: u64) -> Result<(), KernelError> {
        if resource == "disk" {
            self.ledger.release_disk(caller_id, amount).await.map_err(LedgerError::from)?;
            self.ledger.reserve_disk(to, amount).await.map_err(Into::into)
        } else {
            Err(KernelError::InvalidArgument(format!("unknown transferable quota resource {resource}")))
        }
    }

    async fn mint_bid(&self, caller_id: &PrincipalId, artifact_id: &ArtifactId, amount: u64) -> Result<serde_json::Value, KernelError> {
        let mint = self.mint.get().ok_or_else(|| KernelError::InvalidArgument("mint not wired into executor".into()))?;
        mint.bid(caller_id, artifact_id, amount).await
    }

    async fn invoke(
        &self,
        frame: InvocationFrame,
        target: ArtifactId,
        method: String,
        args: Vec<serde_json::Value>,
    ) -> ActionOutcome {
        self.run(frame, Action::InvokeArtifact { target, method, args }, false).await
    }

    async fn submit_nested(&self, frame: InvocationFrame, action: Action) -> ActionOutcome {
        self.run(frame, action, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_core_ledger::{Ledger, LedgerEntry};
    use crucible_core_sandbox::{NativeEngine, TAG_LEDGER_CONTRACT, TAG_PERMISSIVE_CONTRACT};
    use crucible_core_types::{CodeLanguage, DEFAULT_PERMISSIVE_CONTRACT_ID};
    use std::collections::HashMap;

    fn permissive_contract_artifact() -> Artifact {
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

    fn ledger_contract_artifact() -> Artifact {
        Artifact {
            id: "genesis.ledger".into(),
            kind: ArtifactType::System,
            content: serde_json::Value::Null,
            code: Some(NativeEngine::module(TAG_LEDGER_CONTRACT)),
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

    async fn build_executor() -> (Arc<Executor>, Arc<ArtifactStore>, Arc<Ledger>) {
        let ledger = Arc::new(Ledger::new(1_000_000_000));
        ledger.open_account(&PrincipalId::new("a"), LedgerEntry::new(100, 0, 100_000)).await;
        ledger.open_account(&PrincipalId::new("b"), LedgerEntry::new(0, 0, 100_000)).await;
        ledger.open_account(&PrincipalId::new("genesis"), LedgerEntry::new(0, 0, 100_000)).await;

        let store = Arc::new(ArtifactStore::new(ledger.clone()));
        store.put(DEFAULT_PERMISSIVE_CONTRACT_ID.into(), permissive_contract_artifact()).await.unwrap();
        store.put("genesis.ledger".into(), ledger_contract_artifact()).await.unwrap();

        let mut resources = HashMap::new();
        resources.insert(
            RESOURCE_CPU_RATE.to_string(),
            crucible_core_ledger::RateLimitConfig { window: Duration::from_secs(1), max_per_window: 1_000 },
        );
        let rate_tracker = Arc::new(RateTracker::new(resources));
        let event_log = Arc::new(EventLog::new());
        let engines = Arc::new(EngineRouter::new());
        let executor = Executor::new(store.clone(), ledger.clone(), rate_tracker, event_log, engines, ExecutorConfig::default());
        (executor, store, ledger)
    }

    #[tokio::test]
    async fn transfer_via_invoke_moves_scrip_and_logs_two_events() {
        let (executor, _store, ledger) = build_executor().await;
        let outcome = executor
            .submit(
                PrincipalId::new("a"),
                Action::InvokeArtifact {
                    target: "genesis.ledger".into(),
                    method: "transfer".to_string(),
                    args: vec![serde_json::json!("b"), serde_json::json!(30)],
                },
            )
            .await;
        assert!(outcome.success, "{outcome:?}");
        assert_eq!(ledger.balance(&PrincipalId::new("a")).await.unwrap(), 70);
        assert_eq!(ledger.balance(&PrincipalId::new("b")).await.unwrap(), 30);
    }

    #[tokio::test]
    async fn invoke_on_nonexistent_target_fails_with_not_found() {
        let (executor, _store, _ledger) = build_executor().await;
        let outcome = executor
            .submit(
                PrincipalId::new("a"),
                Action::InvokeArtifact { target: "missing".into(), method: "run".to_string(), args: vec![] },
            )
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind.as_deref(), Some("NotFound"));
    }

    #[tokio::test]
    async fn write_then_read_round_trips_content() {
        let (executor, _store, _ledger) = build_executor().await;
        let write = executor
            .submit(
                PrincipalId::new("a"),
                Action::WriteArtifact { id: "note".into(), body: serde_json::json!({"content": "hello"}) },
            )
            .await;
        assert!(write.success, "{write:?}");

        let read = executor.submit(PrincipalId::new("a"), Action::ReadArtifact { target: "note".into() }).await;
        assert!(read.success);
        assert_eq!(read.result, Some(serde_json::json!("hello")));
    }

    #[tokio::test]
    async fn failed_invoke_refunds_the_target_price() {
        let (executor, store, ledger) = build_executor().await;
        let mut priced = ledger_contract_artifact();
        priced.id = "priced.ledger".into();
        priced.price = 10;
        store.put("priced.ledger".into(), priced).await.unwrap();

        let before = ledger.balance(&PrincipalId::new("a")).await.unwrap();
        // `transfer` with no args trips the native contract's own
        // argument check and surfaces as a `RuntimeError`.
        let outcome = executor
            .submit(
                PrincipalId::new("a"),
                Action::InvokeArtifact { target: "priced.ledger".into(), method: "transfer".to_string(), args: vec![] },
            )
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind.as_deref(), Some("RuntimeError"));
        assert_eq!(
            ledger.balance(&PrincipalId::new("a")).await.unwrap(),
            before,
            "price is refunded when execution itself fails"
        );
    }

    #[tokio::test]
    async fn recursion_depth_five_succeeds_six_fails() {
        let (executor, store, ledger) = build_executor().await;
        // A chain of six mutually-invoking native "echo" artifacts would
        // require a dedicated native tag; exercise the frame bookkeeping
        // directly instead, matching what `do_invoke` enforces.
        let mut frame = InvocationFrame::root(PrincipalId::new("a"));
        for _ in 0..4 {
            frame = frame.nested(PrincipalId::new("a")).unwrap();
        }
        assert_eq!(frame.depth, 5);
        assert!(frame.nested(PrincipalId::new("a")).is_err());
        let _ = (&store, &ledger, &executor);
    }

    #[tokio::test]
    async fn noop_produces_no_side_effects() {
        let (executor, _store, ledger) = build_executor().await;
        let before = ledger.balance(&PrincipalId::new("a")).await.unwrap();
        let outcome = executor.submit(PrincipalId::new("a"), Action::Noop).await;
        assert!(outcome.success);
        assert_eq!(ledger.balance(&PrincipalId::new("a")).await.unwrap(), before);
    }
}
