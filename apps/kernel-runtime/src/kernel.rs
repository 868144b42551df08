//! Composition root: wires ledger, store, sandbox,
//! executor, mint, event log, and scheduler together, restoring from a
//! checkpoint if one exists or loading a genesis manifest otherwise.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crucible_core_executor::{Executor, ExecutorConfig};
use crucible_core_ledger::{HoldProvider, Ledger, RateLimitConfig, RateTracker};
use crucible_core_mint::{Mint, MintParams};
use crucible_core_sandbox::EngineRouter;
use crucible_core_scheduler::{Scheduler, SchedulerConfig, SupervisorConfig};
use crucible_core_store::ArtifactStore;
use crucible_domain_cognition::{FixedScorer, LlmGateway, StubLlmGateway};
use crucible_infra_checkpoint::{Checkpoint, CheckpointSources};
use crucible_infra_eventlog::EventLog;
use crucible_infra_genesis::GenesisLoader;
use crucible_shared_config::KernelConfig;
use tokio::task::JoinHandle;
use tracing::info;

pub struct Kernel {
    pub config: KernelConfig,
    pub ledger: Arc<Ledger>,
    pub store: Arc<ArtifactStore>,
    pub rate_tracker: Arc<RateTracker>,
    pub event_log: Arc<EventLog>,
    pub executor: Arc<Executor>,
    pub mint: Arc<Mint>,
    pub scheduler: Arc<Scheduler>,
}

impl Kernel {
    /// Builds every subsystem and loads initial state: from a
    /// checkpoint file if one exists at `config.checkpoint_path`,
    /// otherwise from the genesis manifest at
    /// `config.genesis_manifest_path`.
    pub async fn ignite(config: KernelConfig, gateway: Arc<dyn LlmGateway>) -> anyhow::Result<Self> {
        let checkpoint_path = Path::new(&config.checkpoint_path);
        let checkpoint = checkpoint_path.exists().then(|| Checkpoint::read(checkpoint_path)).transpose()?;

        let ledger = match &checkpoint {
            Some(checkpoint) => Arc::new(Ledger::from_snapshot(checkpoint.ledger.clone(), config.max_api_cost_micros())),
            None => Arc::new(Ledger::new(config.max_api_cost_micros())),
        };
        let store = match &checkpoint {
            Some(checkpoint) => Arc::new(ArtifactStore::from_artifacts(Arc::clone(&ledger), checkpoint.artifacts.clone())),
            None => Arc::new(ArtifactStore::new(Arc::clone(&ledger))),
        };

        let mut resource_configs = HashMap::new();
        for (resource, setting) in &config.rate_limiting.resources {
            resource_configs.insert(
                resource.clone(),
                RateLimitConfig {
                    window: Duration::from_secs(config.rate_limiting.window_seconds),
                    max_per_window: setting.max_per_window,
                },
            );
        }
        let rate_tracker = match &checkpoint {
            Some(checkpoint) => Arc::new(RateTracker::from_snapshot(resource_configs, checkpoint.rate_tracker.clone())),
            None => Arc::new(RateTracker::new(resource_configs)),
        };

        let event_log = match &checkpoint {
            Some(checkpoint) => Arc::new(EventLog::resume_from_watermark(checkpoint.event_log_watermark)),
            None => Arc::new(EventLog::new()),
        };

        if checkpoint.is_none() {
            let manifest_path = Path::new(&config.genesis_manifest_path);
            if manifest_path.exists() {
                let yaml = std::fs::read_to_string(manifest_path)?;
                let manifest = GenesisLoader::parse_manifest(&yaml)?;
                let loader = GenesisLoader::new(Arc::clone(&store), Arc::clone(&ledger));
                loader.install(&manifest).await?;
            } else {
                info!(path = %config.genesis_manifest_path, "no genesis manifest found, starting from an empty world");
            }
        }

        let engines = Arc::new(EngineRouter::new());
        let executor_config = ExecutorConfig {
            sandbox_timeout: config.executor_timeout(),
            max_invocation_depth: config.executor.max_invocation_depth,
        };
        let executor = Executor::new(Arc::clone(&store), Arc::clone(&ledger), Arc::clone(&rate_tracker), Arc::clone(&event_log), engines, executor_config);

        let mint_params = MintParams {
            auction_period: Duration::from_secs(config.mint.auction_period_seconds),
            bidding_window: Duration::from_secs(config.mint.bidding_window_seconds),
            first_auction_tick: Duration::from_secs(config.mint.first_auction_tick_seconds),
            min_bid: config.mint.min_bid,
            mint_ratio: config.mint.mint_ratio,
        };
        let mint = match checkpoint.as_ref().and_then(|c| c.mint.clone()) {
            Some(mint_snapshot) => Mint::from_snapshot(
                Arc::clone(&store),
                Arc::clone(&ledger),
                Arc::clone(&event_log),
                Arc::new(FixedScorer { score: 0 }),
                mint_params,
                None,
                mint_snapshot,
            ),
            None => Mint::new(Arc::clone(&store), Arc::clone(&ledger), Arc::clone(&event_log), Arc::new(FixedScorer { score: 0 }), mint_params, None),
        };
        ledger.attach_hold_provider(Arc::clone(&mint) as Arc<dyn HoldProvider>);
        executor.attach_mint(Arc::clone(&mint) as Arc<dyn crucible_core_executor::MintBidSink>);

        let supervisor_config = SupervisorConfig {
            max_backoff: Duration::from_secs(config.supervisor.max_backoff_seconds),
            max_consecutive_crashes: config.supervisor.max_consecutive_crashes,
            crash_window: Duration::from_secs(config.supervisor.crash_window_seconds),
        };
        let scheduler = Scheduler::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            Arc::clone(&rate_tracker),
            Arc::clone(&executor),
            gateway,
            Arc::clone(&event_log),
            "stub-model".to_string(),
            SchedulerConfig { supervisor: supervisor_config },
        );

        Ok(Kernel { config, ledger, store, rate_tracker, event_log, executor, mint, scheduler })
    }

    /// Starts the scheduler and the mint's background clock, then waits
    /// on ctrl-c before writing a final checkpoint and returning.
    pub async fn run_until_shutdown(self) -> anyhow::Result<()> {
        self.scheduler.boot().await;
        let mint_clock: JoinHandle<()> = self.mint.spawn_clock();
        info!("kernel online");

        let mut reconcile_ticker = tokio::time::interval(Duration::from_secs(2));
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                    break;
                }
                _ = reconcile_ticker.tick() => {
                    self.scheduler.reconcile().await;
                }
            }
        }

        mint_clock.abort();
        self.checkpoint_now().await?;
        Ok(())
    }

    pub async fn checkpoint_now(&self) -> anyhow::Result<()> {
        let checkpoint = Checkpoint::capture(CheckpointSources {
            store: &self.store,
            ledger: &self.ledger,
            rate_tracker: &self.rate_tracker,
            event_log: &self.event_log,
            mint: Some(&self.mint),
        })
        .await;
        checkpoint.write(Path::new(&self.config.checkpoint_path))?;
        self.event_log.flush_to(Path::new(&self.config.event_log_path)).await?;
        info!(path = %self.config.checkpoint_path, "checkpoint written");
        Ok(())
    }
}

/// Default gateway when no real LLM backend is configured; LLM gateway
/// internals are out of scope.
pub fn default_gateway() -> Arc<dyn LlmGateway> {
    Arc::new(StubLlmGateway::default())
}
