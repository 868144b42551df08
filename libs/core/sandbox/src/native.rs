//! `NativeEngine` — compiled-Rust "system artifacts": the well-known
//! permissive contract, the genesis ledger's transfer method, and the
//! mint's bid intake. Each is installed only at genesis; no
//! agent-written code runs here.
//!
//! [`CodeModule::bytes`] for [`CodeLanguage::Native`] is the UTF-8 tag
//! naming which fixed variant to dispatch to — a dispatch table, since
//! every native artifact exposes exactly one method set rather than
//! arbitrary string-keyed methods.

use crate::engine::ScriptEngine;
use crate::errors::SandboxError;
use crate::kernel_bindings::SandboxContext;
use async_trait::async_trait;
use crucible_core_types::{CodeLanguage, CodeModule, PrincipalId};
use std::time::Duration;

pub const TAG_PERMISSIVE_CONTRACT: &str = "permissive_contract";
pub const TAG_LEDGER_CONTRACT: &str = "ledger_contract";
pub const TAG_MINT_CONTRACT: &str = "mint_contract";

pub struct NativeEngine;

impl NativeEngine {
    pub fn module(tag: &str) -> CodeModule {
        CodeModule {
            language: CodeLanguage::Native,
            bytes: tag.as_bytes().to_vec(),
        }
    }
}

#[async_trait]
impl ScriptEngine for NativeEngine {
    async fn run(
        &self,
        code: &CodeModule,
        method: &str,
        args: Vec<serde_json::Value>,
        ctx: SandboxContext,
        _timeout: Duration,
    ) -> Result<serde_json::Value, SandboxError> {
        let tag = String::from_utf8(code.bytes.clone()).map_err(|e| SandboxError::Runtime(e.to_string()))?;
        match tag.as_str() {
            TAG_PERMISSIVE_CONTRACT => permissive_contract(method),
            TAG_LEDGER_CONTRACT => ledger_contract(method, args, ctx).await,
            TAG_MINT_CONTRACT => mint_contract(method, args, ctx).await,
            other => Err(SandboxError::UnknownMethod(format!("unrecognized native artifact tag `{other}`"))),
        }
    }
}

/// `check_permission` that allows everything at zero cost — the default
/// every artifact's `access_contract_id` falls back to.
fn permissive_contract(method: &str) -> Result<serde_json::Value, SandboxError> {
    if method != "check_permission" {
        return Err(SandboxError::UnknownMethod(method.to_string()));
    }
    Ok(serde_json::json!({ "allowed": true, "reason": "permissive", "cost_scrip": 0 }))
}

async fn ledger_contract(
    method: &str,
    args: Vec<serde_json::Value>,
    ctx: SandboxContext,
) -> Result<serde_json::Value, SandboxError> {
    match method {
        "transfer" => {
            let to = args
                .first()
                .and_then(|v| v.as_str())
                .ok_or_else(|| SandboxError::Runtime("transfer requires (to, amount)".into()))?;
            let amount = args
                .get(1)
                .and_then(|v| v.as_u64())
                .ok_or_else(|| SandboxError::Runtime("transfer requires (to, amount)".into()))?;
            ctx.kernel
                .transfer_scrip(&ctx.caller_id, &PrincipalId::new(to), amount)
                .await?;
            Ok(serde_json::json!({ "ok": true }))
        }
        "balance" => {
            let balance = ctx.kernel.balance(&ctx.caller_id).await?;
            Ok(serde_json::json!({ "scrip": balance }))
        }
        "check_permission" => permissive_contract(method),
        other => Err(SandboxError::UnknownMethod(other.to_string())),
    }
}

async fn mint_contract(
    method: &str,
    args: Vec<serde_json::Value>,
    ctx: SandboxContext,
) -> Result<serde_json::Value, SandboxError> {
    match method {
        "bid" => {
            let artifact_id = args
                .first()
                .and_then(|v| v.as_str())
                .ok_or_else(|| SandboxError::Runtime("bid requires (artifact_id, amount)".into()))?;
            let amount = args
                .get(1)
                .and_then(|v| v.as_u64())
                .ok_or_else(|| SandboxError::Runtime("bid requires (artifact_id, amount)".into()))?;
            let result = ctx
                .kernel
                .mint_bid(&ctx.caller_id, &artifact_id.into(), amount)
                .await?;
            Ok(result)
        }
        "check_permission" => permissive_contract(method),
        other => Err(SandboxError::UnknownMethod(other.to_string())),
    }
}
