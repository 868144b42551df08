//! Turns an [`LlmResponse`](crate::gateway::LlmResponse) into the one
//! [`Action`] an agent loop submits this turn, per the loop contract:
//! "intent = ask_llm(...); result = executor.submit(id, intent)". The
//! gateway is free-text; parsing its proposed action into
//! the kernel's narrow-waist alphabet is the agent-facing half of that
//! boundary, not a kernel concern, but it has to live somewhere callable
//! from the scheduler without re-opening the `cognition` boundary.

use crucible_core_types::Action;

/// Expects the gateway's `text` to carry a JSON object describing one of
/// the three verbs, e.g. `{"verb":"invoke","target":"...","method":"...",
/// "args":[...]}`. Anything that doesn't parse is treated as a noop —
/// matching "may return noop" rather than failing the turn.
pub fn parse_intent(text: &str) -> Action {
    let Some(start) = text.find('{') else { return Action::Noop };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&text[start..]) else {
        return Action::Noop;
    };
    match value.get("verb").and_then(|v| v.as_str()) {
        Some("read") => value
            .get("target")
            .and_then(|v| v.as_str())
            .map(|t| Action::ReadArtifact { target: t.into() })
            .unwrap_or(Action::Noop),
        Some("write") => {
            let (Some(id), Some(body)) = (value.get("id").and_then(|v| v.as_str()), value.get("body")) else {
                return Action::Noop;
            };
            Action::WriteArtifact { id: id.into(), body: body.clone() }
        }
        Some("invoke") => {
            let (Some(target), Some(method)) =
                (value.get("target").and_then(|v| v.as_str()), value.get("method").and_then(|v| v.as_str()))
            else {
                return Action::Noop;
            };
            let args = value.get("args").and_then(|v| v.as_array()).cloned().unwrap_or_default();
            Action::InvokeArtifact { target: target.into(), method: method.to_string(), args }
        }
        _ => Action::Noop,
    }
}
