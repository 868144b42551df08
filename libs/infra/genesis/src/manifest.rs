//! Genesis manifest types. The exact YAML grammar is left open, but
//! ordering is load-bearing: ledger entries, static data, and agent
//! bundles are explicit, separately-ordered lists rather than one flat
//! list relying on incidental YAML document order.

use crucible_core_types::{Artifact, ArtifactId, ArtifactType, CodeLanguage, CodeModule, DEFAULT_PERMISSIVE_CONTRACT_ID};
use serde::Deserialize;
use std::collections::BTreeSet;

use crate::errors::GenesisError;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct GenesisManifest {
    #[serde(default)]
    pub ledger_entries: Vec<LedgerEntrySpec>,
    #[serde(default)]
    pub data: Vec<ArtifactSpec>,
    #[serde(default)]
    pub agents: Vec<ArtifactSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerEntrySpec {
    pub principal: String,
    #[serde(default)]
    pub scrip: u64,
    #[serde(default)]
    pub llm_budget_micros: i64,
    #[serde(default)]
    pub disk_quota_bytes: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeSpec {
    /// References one of `crucible-core-sandbox`'s compiled-in system
    /// artifacts; only meaningful at genesis.
    Native { tag: String },
    /// A compiled wasm module, given inline as a byte array.
    Wasm { bytes: Vec<u8> },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactSpec {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default)]
    pub code: Option<CodeSpec>,
    pub created_by: String,
    #[serde(default)]
    pub access_contract_id: Option<String>,
    #[serde(default)]
    pub price: u64,
    #[serde(default)]
    pub has_standing: bool,
    #[serde(default)]
    pub can_execute: bool,
    #[serde(default)]
    pub has_loop: bool,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

fn parse_kind(kind: &str) -> Result<ArtifactType, GenesisError> {
    match kind {
        "text" => Ok(ArtifactType::Text),
        "json" => Ok(ArtifactType::Json),
        "executable" => Ok(ArtifactType::Executable),
        "system" => Ok(ArtifactType::System),
        "documentation" => Ok(ArtifactType::Documentation),
        other => Err(GenesisError::UnknownKind(other.to_string())),
    }
}

impl ArtifactSpec {
    pub fn into_artifact(self) -> Result<Artifact, GenesisError> {
        let kind = parse_kind(&self.kind)?;
        let code = self
            .code
            .map(|c| match c {
                CodeSpec::Native { tag } => CodeModule { language: CodeLanguage::Native, bytes: tag.into_bytes() },
                CodeSpec::Wasm { bytes } => CodeModule { language: CodeLanguage::Wasm, bytes },
            });

        let now = chrono::Utc::now();
        let mut artifact = Artifact {
            id: ArtifactId::from(self.id),
            kind,
            content: self.content,
            code,
            created_by: self.created_by.into(),
            access_contract_id: self
                .access_contract_id
                .map(ArtifactId::from)
                .unwrap_or_else(|| ArtifactId::from(DEFAULT_PERMISSIVE_CONTRACT_ID)),
            price: self.price,
            has_standing: self.has_standing,
            can_execute: self.can_execute,
            has_loop: self.has_loop,
            capabilities: self.capabilities.into_iter().collect::<BTreeSet<_>>(),
            size_bytes: 0,
            created_at: now,
            updated_at: now,
        };
        artifact.recompute_size();
        Ok(artifact)
    }
}
