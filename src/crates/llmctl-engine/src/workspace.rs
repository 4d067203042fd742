//! Scoped workspace directory acquisition/release, and prompt envelope
//! construction for node dispatch.
//!
//! `WorkspaceGuard` is grounded on `orchestrator::executor::streaming`'s
//! guarded-resource style: a constructor that allocates and a `Drop` impl
//! that reclaims, so every exit path — early return, `?`, panic unwind —
//! releases the directory without the caller remembering to. Prompt
//! envelope construction is ported from `original_source`
//! `core/prompt_envelope.py` (read in full), kept to its exact five
//! top-level keys and merge semantics.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::Result;

/// `<workspaces_root>/run-<run_id>/node-<node_id>-<execution_index>/`,
/// created on `acquire` and removed when the guard drops.
pub struct WorkspaceGuard {
    path: PathBuf,
}

impl WorkspaceGuard {
    /// Creates the directory (including parents) and returns a guard that
    /// removes it on drop. Acquiring the same `(run_id, node_id,
    /// execution_index)` twice is not an error — `create_dir_all` is
    /// idempotent — since a retried dispatch reuses the same directory.
    pub fn acquire(workspaces_root: &Path, run_id: Uuid, node_id: Uuid, execution_index: u32) -> Result<Self> {
        let path = workspace_path(workspaces_root, run_id, node_id, execution_index);
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_dir_all(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to reclaim node workspace directory");
            }
        }
    }
}

fn workspace_path(workspaces_root: &Path, run_id: Uuid, node_id: Uuid, execution_index: u32) -> PathBuf {
    workspaces_root
        .join(format!("run-{run_id}"))
        .join(format!("node-{node_id}-{execution_index}"))
}

/// Sweeps workspace directories whose owning run has reached a terminal
/// status — the crash-recovery counterpart to `Drop`, which only runs for
/// a process that unwinds cleanly, not one that gets killed outright.
/// `is_run_finished` is supplied by the caller (a `llmctl-store` lookup)
/// rather than taken as a parameter list of finished run ids, since the
/// set of runs can be arbitrarily large and the caller already has a
/// store handle.
pub async fn cleanup_beat<F, Fut>(workspaces_root: &Path, is_run_finished: F) -> Result<usize>
where
    F: Fn(Uuid) -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let mut swept = 0usize;
    if !workspaces_root.exists() {
        return Ok(swept);
    }

    for entry in std::fs::read_dir(workspaces_root)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();
        let Some(run_id_str) = name.strip_prefix("run-") else {
            continue;
        };
        let Ok(run_id) = Uuid::parse_str(run_id_str) else {
            continue;
        };
        if is_run_finished(run_id).await {
            std::fs::remove_dir_all(entry.path())?;
            swept += 1;
        }
    }
    Ok(swept)
}

/// The five keys that mark a JSON object as an already-structured prompt
/// envelope rather than a bare prompt string.
const PROMPT_ENVELOPE_TOP_LEVEL_KEYS: [&str; 5] =
    ["system_contract", "agent_profile", "task_context", "user_request", "output_contract"];

/// Parses raw prompt text: a trimmed value starting with `{` that decodes
/// as a JSON object carrying `user_request` or `prompt` (string) seeds the
/// envelope and supplies the request text; anything else (plain text,
/// malformed JSON, a JSON object without either key) becomes the raw
/// `user_request` with no seed envelope.
pub fn parse_prompt_input(raw_prompt: Option<&str>) -> (String, Option<Value>) {
    let Some(raw_prompt) = raw_prompt else {
        return (String::new(), None);
    };
    let stripped = raw_prompt.trim();
    if stripped.is_empty() {
        return (String::new(), None);
    }
    if !stripped.starts_with('{') {
        return (raw_prompt.to_string(), None);
    }
    let Ok(payload) = serde_json::from_str::<Value>(raw_prompt) else {
        return (raw_prompt.to_string(), None);
    };
    if !payload.is_object() {
        return (raw_prompt.to_string(), None);
    }
    let user_request = extract_user_request(&payload).unwrap_or_default();
    (user_request, Some(payload))
}

fn extract_user_request(payload: &Value) -> Option<String> {
    if let Some(value) = payload.get("user_request").and_then(Value::as_str) {
        return Some(value.to_string());
    }
    payload.get("prompt").and_then(Value::as_str).map(str::to_string)
}

fn is_prompt_envelope(payload: &Value) -> bool {
    payload
        .as_object()
        .map(|obj| PROMPT_ENVELOPE_TOP_LEVEL_KEYS.iter().all(|key| obj.contains_key(*key)))
        .unwrap_or(false)
}

/// Merges an existing (possibly seeded) envelope's four context keys with
/// explicit overrides, matching `build_prompt_envelope`'s precedence:
/// overrides win, an existing envelope's fields are the base, and a
/// non-envelope JSON payload is folded into `task_context.input_payload`
/// rather than discarded.
pub fn build_prompt_envelope(
    user_request: &str,
    system_contract: Option<&Map<String, Value>>,
    agent_profile: Option<&Map<String, Value>>,
    task_context: Option<&Map<String, Value>>,
    output_contract: Option<&Map<String, Value>>,
    source_payload: Option<&Value>,
) -> Value {
    let mut resolved_system_contract = Map::new();
    let mut resolved_agent_profile = Map::new();
    let mut resolved_task_context = Map::new();
    let mut resolved_output_contract = Map::new();
    let mut resolved_user_request = user_request.to_string();

    if let Some(payload) = source_payload {
        if is_prompt_envelope(payload) {
            let existing = payload.as_object().expect("checked by is_prompt_envelope");
            if let Some(obj) = existing.get("system_contract").and_then(Value::as_object) {
                resolved_system_contract.extend(obj.clone());
            }
            if let Some(obj) = existing.get("agent_profile").and_then(Value::as_object) {
                resolved_agent_profile.extend(obj.clone());
            }
            if let Some(obj) = existing.get("task_context").and_then(Value::as_object) {
                resolved_task_context.extend(obj.clone());
            }
            if let Some(obj) = existing.get("output_contract").and_then(Value::as_object) {
                resolved_output_contract.extend(obj.clone());
            }
            if resolved_user_request.is_empty() {
                if let Some(existing_request) = existing.get("user_request").and_then(Value::as_str) {
                    resolved_user_request = existing_request.to_string();
                }
            }
        } else if payload.is_object() {
            resolved_task_context.insert("input_payload".to_string(), payload.clone());
        }
    }

    if let Some(overrides) = system_contract {
        resolved_system_contract.extend(overrides.clone());
    }
    if let Some(overrides) = agent_profile {
        resolved_agent_profile.extend(overrides.clone());
    }
    if let Some(overrides) = task_context {
        resolved_task_context.extend(overrides.clone());
    }
    if let Some(overrides) = output_contract {
        resolved_output_contract.extend(overrides.clone());
    }

    serde_json::json!({
        "system_contract": resolved_system_contract,
        "agent_profile": resolved_agent_profile,
        "task_context": resolved_task_context,
        "user_request": resolved_user_request,
        "output_contract": resolved_output_contract,
    })
}

/// `serde_json` with sorted keys and a 2-space indent, matching
/// `json.dumps(..., indent=2, sort_keys=True)`. Routed through a
/// `BTreeMap` explicitly rather than relying on `serde_json::Value`'s
/// default map ordering, so this keeps producing sorted output even if
/// the crate later enables `preserve_order`.
pub fn serialize_prompt_envelope(payload: &Value) -> String {
    let sorted: BTreeMap<String, Value> = payload
        .as_object()
        .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();
    serde_json::to_string_pretty(&sorted).unwrap_or_default()
}

/// `id: Option<Uuid>, name, description` — the teacher's Python carries
/// `id: int | None`; this workspace's entities are all `Uuid`-keyed, so
/// the id type is adapted to match rather than ported literally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: Option<Uuid>,
    pub name: String,
    pub description: String,
}

impl AgentInfo {
    pub fn from_agent(agent: &crate::model::Agent) -> Self {
        let description = agent
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(&agent.name)
            .to_string();
        Self { id: Some(agent.id), name: agent.name.clone(), description }
    }

    pub fn from_payload(payload: &Value) -> Option<Self> {
        let obj = payload.as_object()?;
        let id = obj.get("id").and_then(Value::as_str).and_then(|s| Uuid::parse_str(s).ok());
        let name = obj.get("name").and_then(Value::as_str).unwrap_or("").to_string();
        let description = obj
            .get("description")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(&name)
            .to_string();
        Some(Self { id, name, description })
    }

    pub fn to_payload(&self) -> Value {
        let mut map = Map::new();
        map.insert("name".to_string(), Value::String(self.name.clone()));
        map.insert("description".to_string(), Value::String(self.description.clone()));
        if let Some(id) = self.id {
            map.insert("id".to_string(), Value::String(id.to_string()));
        }
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_creates_and_then_removes_its_directory() {
        let root = std::env::temp_dir().join(format!("llmctl-ws-test-{}", Uuid::new_v4()));
        let run_id = Uuid::new_v4();
        let node_id = Uuid::new_v4();
        let path = {
            let guard = WorkspaceGuard::acquire(&root, run_id, node_id, 0).unwrap();
            assert!(guard.path().exists());
            guard.path().to_path_buf()
        };
        assert!(!path.exists());
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn parse_prompt_input_treats_plain_text_as_raw_request() {
        let (request, envelope) = parse_prompt_input(Some("write a summary"));
        assert_eq!(request, "write a summary");
        assert!(envelope.is_none());
    }

    #[test]
    fn parse_prompt_input_extracts_user_request_from_json_object() {
        let (request, envelope) = parse_prompt_input(Some(r#"{"user_request": "do the thing", "output_contract": {}}"#));
        assert_eq!(request, "do the thing");
        assert!(envelope.is_some());
    }

    #[test]
    fn parse_prompt_input_falls_back_to_raw_on_malformed_json() {
        let (request, envelope) = parse_prompt_input(Some("{not json"));
        assert_eq!(request, "{not json");
        assert!(envelope.is_none());
    }

    #[test]
    fn build_prompt_envelope_merges_seed_with_overrides() {
        let source = serde_json::json!({
            "system_contract": {"role": "reviewer"},
            "agent_profile": {},
            "task_context": {"ticket": "ABC-1"},
            "user_request": "seeded request",
            "output_contract": {},
        });
        let mut agent_profile_override = Map::new();
        agent_profile_override.insert("name".to_string(), Value::String("Quick".to_string()));

        let envelope = build_prompt_envelope("", None, Some(&agent_profile_override), None, None, Some(&source));
        assert_eq!(envelope["user_request"], "seeded request");
        assert_eq!(envelope["system_contract"]["role"], "reviewer");
        assert_eq!(envelope["agent_profile"]["name"], "Quick");
        assert_eq!(envelope["task_context"]["ticket"], "ABC-1");
    }

    #[test]
    fn build_prompt_envelope_folds_non_envelope_payload_into_task_context() {
        let source = serde_json::json!({"ticket_id": 42});
        let envelope = build_prompt_envelope("do it", None, None, None, None, Some(&source));
        assert_eq!(envelope["task_context"]["input_payload"]["ticket_id"], 42);
        assert_eq!(envelope["user_request"], "do it");
    }

    #[test]
    fn serialize_prompt_envelope_sorts_keys() {
        let envelope = serde_json::json!({"user_request": "x", "agent_profile": {}, "system_contract": {}, "task_context": {}, "output_contract": {}});
        let text = serialize_prompt_envelope(&envelope);
        let agent_pos = text.find("agent_profile").unwrap();
        let user_pos = text.find("user_request").unwrap();
        assert!(agent_pos < user_pos);
    }

    #[test]
    fn agent_info_round_trips_through_payload() {
        let info = AgentInfo { id: Some(Uuid::new_v4()), name: "Reviewer".to_string(), description: "careful".to_string() };
        let payload = info.to_payload();
        let back = AgentInfo::from_payload(&payload).unwrap();
        assert_eq!(info, back);
    }
}
