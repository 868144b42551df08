//! Install order for a genesis manifest:
//!
//! 1. kernel infra — the permissive/ledger/mint native contracts, owned
//!    by a `genesis` principal with a large disk quota
//! 2. `ledger_entries` — opens every named account
//! 3. `data` — static artifacts
//! 4. `agents` — artifacts with `has_loop`/`has_standing`
//!
//! Each step's `created_by` principal must already have a ledger
//! account before `store.put` runs, since `put` reserves disk quota
//! against the ledger; artifacts owned by a principal with no explicit
//! `ledger_entries` row get a zero-balance account opened on demand.

use std::sync::Arc;

use crucible_core_ledger::{Ledger, LedgerEntry};
use crucible_core_sandbox::{NativeEngine, TAG_LEDGER_CONTRACT, TAG_MINT_CONTRACT, TAG_PERMISSIVE_CONTRACT};
use crucible_core_store::ArtifactStore;
use crucible_core_types::{
    Artifact, ArtifactType, PrincipalId, DEFAULT_PERMISSIVE_CONTRACT_ID, GENESIS_EVENT_LOG_ID, GENESIS_LEDGER_ID, GENESIS_MINT_ID,
};
use tracing::info;

use crate::errors::GenesisError;
use crate::manifest::GenesisManifest;

/// Disk quota granted to the `genesis` principal, which owns every
/// kernel infra artifact. Large enough that genesis's own contracts
/// never contend with agent-issued disk usage.
const GENESIS_DISK_QUOTA_BYTES: u64 = 64 * 1024 * 1024;
const GENESIS_PRINCIPAL: &str = "genesis";

pub struct GenesisLoader {
    store: Arc<ArtifactStore>,
    ledger: Arc<Ledger>,
}

impl GenesisLoader {
    pub fn new(store: Arc<ArtifactStore>, ledger: Arc<Ledger>) -> Self {
        Self { store, ledger }
    }

    pub fn parse_manifest(yaml: &str) -> Result<GenesisManifest, GenesisError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Installs a full manifest. Idempotent bootstrap order: infra,
    /// then ledger entries, then data, then agents.
    pub async fn install(&self, manifest: &GenesisManifest) -> Result<(), GenesisError> {
        self.install_kernel_infra().await?;
        self.install_ledger_entries(manifest).await?;
        self.install_artifacts(&manifest.data).await?;
        self.install_artifacts(&manifest.agents).await?;
        info!(
            ledger_entries = manifest.ledger_entries.len(),
            data = manifest.data.len(),
            agents = manifest.agents.len(),
            "genesis manifest installed"
        );
        Ok(())
    }

    async fn install_kernel_infra(&self) -> Result<(), GenesisError> {
        let genesis = PrincipalId::new(GENESIS_PRINCIPAL);
        self.ledger.open_account(&genesis, LedgerEntry::new(0, 0, GENESIS_DISK_QUOTA_BYTES)).await;

        let contracts = [
            (DEFAULT_PERMISSIVE_CONTRACT_ID, TAG_PERMISSIVE_CONTRACT),
            (GENESIS_LEDGER_ID, TAG_LEDGER_CONTRACT),
            (GENESIS_MINT_ID, TAG_MINT_CONTRACT),
        ];
        for (id, tag) in contracts {
            let artifact = native_contract_artifact(id, tag);
            self.store.put(artifact.id.clone(), artifact).await?;
        }

        // The event log has no executable contract of its own; it is
        // registered here only as a discoverable artifact id so agents
        // can reference it uniformly with the other kernel services.
        let mut event_log_marker = native_contract_artifact(GENESIS_EVENT_LOG_ID, TAG_LEDGER_CONTRACT);
        event_log_marker.can_execute = false;
        event_log_marker.code = None;
        self.store.put(event_log_marker.id.clone(), event_log_marker).await?;
        Ok(())
    }

    async fn install_ledger_entries(&self, manifest: &GenesisManifest) -> Result<(), GenesisError> {
        for entry in &manifest.ledger_entries {
            let principal = PrincipalId::new(&entry.principal);
            self.ledger
                .open_account(&principal, LedgerEntry::new(entry.scrip, entry.llm_budget_micros, entry.disk_quota_bytes))
                .await;
        }
        Ok(())
    }

    async fn install_artifacts(&self, specs: &[crate::manifest::ArtifactSpec]) -> Result<(), GenesisError> {
        for spec in specs {
            let created_by = PrincipalId::new(&spec.created_by);
            if self.ledger.balance(&created_by).await.is_err() {
                self.ledger.open_account(&created_by, LedgerEntry::new(0, 0, 0)).await;
            }
            let artifact = spec.clone().into_artifact()?;
            self.store.put(artifact.id.clone(), artifact).await?;
        }
        Ok(())
    }
}

fn native_contract_artifact(id: &str, tag: &str) -> Artifact {
    let now = chrono::Utc::now();
    Artifact {
        id: id.into(),
        kind: ArtifactType::System,
        content: serde_json::Value::Null,
        code: Some(NativeEngine::module(tag)),
        created_by: PrincipalId::new(GENESIS_PRINCIPAL),
        access_contract_id: DEFAULT_PERMISSIVE_CONTRACT_ID.into(),
        price: 0,
        has_standing: false,
        can_execute: true,
        has_loop: false,
        capabilities: Default::default(),
        size_bytes: 0,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ArtifactSpec;

    fn build_loader() -> GenesisLoader {
        let ledger = Arc::new(Ledger::new(1_000_000_000));
        let store = Arc::new(ArtifactStore::new(ledger.clone()));
        GenesisLoader::new(store, ledger)
    }

    #[tokio::test]
    async fn kernel_infra_contracts_are_installed_before_anything_else() {
        let loader = build_loader();
        loader.install_kernel_infra().await.unwrap();

        assert!(loader.store.exists(&DEFAULT_PERMISSIVE_CONTRACT_ID.into()).await);
        assert!(loader.store.exists(&GENESIS_LEDGER_ID.into()).await);
        assert!(loader.store.exists(&GENESIS_MINT_ID.into()).await);
        assert!(loader.ledger.balance(&PrincipalId::new(GENESIS_PRINCIPAL)).await.is_ok());
    }

    #[tokio::test]
    async fn full_manifest_installs_in_order_and_opens_missing_accounts() {
        let loader = build_loader();
        let yaml = r#"
ledger_entries:
  - principal: alice
    scrip: 500
    llm_budget_micros: 2000000
    disk_quota_bytes: 50000
data:
  - id: readme
    kind: documentation
    content: "hello"
    created_by: genesis
agents:
  - id: alice
    kind: json
    content: {"mood": "neutral"}
    created_by: alice
    has_standing: true
    has_loop: true
"#;
        let manifest = GenesisLoader::parse_manifest(yaml).unwrap();
        loader.install(&manifest).await.unwrap();

        assert!(loader.store.exists(&"readme".into()).await);
        let alice = loader.store.get(&"alice".into()).await.unwrap();
        assert!(alice.has_loop);
        assert_eq!(loader.ledger.balance(&PrincipalId::new("alice")).await.unwrap(), 500);
    }

    #[tokio::test]
    async fn data_artifact_owned_by_an_unlisted_principal_still_installs() {
        let loader = build_loader();
        loader.install_kernel_infra().await.unwrap();
        let specs = vec![ArtifactSpec {
            id: "orphan".to_string(),
            kind: "text".to_string(),
            content: serde_json::Value::Null,
            code: None,
            created_by: "nobody".to_string(),
            access_contract_id: None,
            price: 0,
            has_standing: false,
            can_execute: false,
            has_loop: false,
            capabilities: vec![],
        }];
        loader.install_artifacts(&specs).await.unwrap();
        assert!(loader.store.exists(&"orphan".into()).await);
        assert!(loader.ledger.balance(&PrincipalId::new("nobody")).await.is_ok());
    }
}
