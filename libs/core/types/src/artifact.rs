//! The artifact: the one universal persistent object.

use crate::ids::{ArtifactId, PrincipalId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Advisory categorical type. Unlike the derived [`Role`], this is a
/// stored field and never changes the permission model by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Text,
    Json,
    Executable,
    System,
    Documentation,
}

/// Declared language tag for `code`. The kernel never interprets source
/// text directly; a tag routes execution to the matching sandbox engine
/// (`crucible-core-sandbox`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeLanguage {
    /// A compiled wasm module, run under a fuel-metered interpreter.
    Wasm,
    /// A fixed-variant system artifact whose `run` dispatches to native
    /// Rust, installed only at genesis.
    Native,
}

/// `executable=true` artifacts carry code; everything else leaves this
/// unset. Bytes are opaque to the store — only the executor and the
/// matching sandbox engine interpret them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeModule {
    pub language: CodeLanguage,
    pub bytes: Vec<u8>,
}

/// Capability tokens. Set only at genesis; `write_artifact` on an
/// existing artifact never changes `capabilities` (enforced by the
/// executor, not by this type).
pub const CAP_CAN_CALL_LLM: &str = "can_call_llm";
pub const CAP_CAN_MINT: &str = "can_mint";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub kind: ArtifactType,
    pub content: serde_json::Value,
    pub code: Option<CodeModule>,
    pub created_by: PrincipalId,
    pub access_contract_id: ArtifactId,
    pub price: u64,
    pub has_standing: bool,
    pub can_execute: bool,
    pub has_loop: bool,
    pub capabilities: BTreeSet<String>,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The four derived categorical identities. Never stored;
/// always recomputed from the four boolean fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Agent,
    Tool,
    Account,
    Data,
}

impl Artifact {
    pub fn role(&self) -> Role {
        match (self.has_standing, self.can_execute, self.has_loop) {
            (true, true, true) => Role::Agent,
            (false, true, _) => Role::Tool,
            (true, false, _) => Role::Account,
            _ => Role::Data,
        }
    }

    pub fn is_principal(&self) -> bool {
        self.has_standing
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    /// Recomputes `size_bytes` from the serialized payload. The caller
    /// never supplies this directly.
    pub fn recompute_size(&mut self) {
        let content_len = serde_json::to_vec(&self.content).map(|v| v.len()).unwrap_or(0);
        let code_len = self.code.as_ref().map(|c| c.bytes.len()).unwrap_or(0);
        self.size_bytes = (content_len + code_len) as u64;
    }
}
