//! The `{allowed, reason, cost_scrip}` shape a contract's
//! `check_permission` returns.

use crucible_core_types::KernelError;

#[derive(Debug, Clone)]
pub struct PermissionResult {
    pub allowed: bool,
    pub reason: String,
    pub cost_scrip: u64,
}

impl PermissionResult {
    pub fn from_value(value: &serde_json::Value) -> Result<Self, KernelError> {
        let allowed = value
            .get("allowed")
            .and_then(|v| v.as_bool())
            .ok_or_else(|| KernelError::InterfaceMismatch("check_permission result missing `allowed`".into()))?;
        let reason = value
            .get("reason")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let cost_scrip = value.get("cost_scrip").and_then(|v| v.as_u64()).unwrap_or(0);
        Ok(Self { allowed, reason, cost_scrip })
    }
}
