//! Layered YAML/env configuration for queue names, budgeter defaults,
//! provider registry entries, and timeouts.
//!
//! Grounded on `orchestrator::config::loader`'s `$include` + `${ENV:default}`
//! expansion over `serde_yaml`, reused here unchanged (the expansion rules
//! don't depend on what's being configured) and layered with the engine's
//! own typed sections instead of `orchestrator`'s `server`/`router`/
//! `workflow` split.

use std::env;
use std::fs;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;

use crate::context::budget::BudgetConfig;
use crate::error::{EngineRuntimeError, Result};

/// One entry in the provider registry: a named model reachable through
/// either the frontier or local adapter family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRegistryEntry {
    pub name: String,
    pub family: ProviderFamily,
    pub base_url: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFamily {
    Frontier,
    Local,
}

fn default_timeout_seconds() -> u64 {
    60
}

/// Named in-process work queues the scheduler and RAG indexers dispatch
/// onto (spec.md §2 item 2 / §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    StudioDefault,
    RagIndex,
    RagGit,
    RagDrive,
}

impl QueueName {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueName::StudioDefault => "studio.default",
            QueueName::RagIndex => "rag.index",
            QueueName::RagGit => "rag.git",
            QueueName::RagDrive => "rag.drive",
        }
    }

    /// Routes a source kind string (e.g. `"git"`, `"drive"`) to its
    /// dedicated indexing queue, falling back to `rag.index`.
    pub fn for_source_kind(kind: &str) -> QueueName {
        match kind {
            "git" => QueueName::RagGit,
            "drive" => QueueName::RagDrive,
            _ => QueueName::RagIndex,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_count")]
    pub workers_per_queue: usize,
    #[serde(default = "default_node_timeout_seconds")]
    pub default_node_timeout_seconds: u64,
    #[serde(default = "default_grace_seconds")]
    pub force_kill_grace_seconds: u64,
}

fn default_worker_count() -> usize {
    4
}

fn default_node_timeout_seconds() -> u64 {
    600
}

fn default_grace_seconds() -> u64 {
    10
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers_per_queue: default_worker_count(),
            default_node_timeout_seconds: default_node_timeout_seconds(),
            force_kill_grace_seconds: default_grace_seconds(),
        }
    }
}

/// Root engine configuration, layered from a YAML file plus environment
/// variable expansion, the way `orchestrator::config` assembles its
/// `server`/`router`/`workflow` sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub providers: Vec<ProviderRegistryEntry>,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub workspaces_root: Option<String>,
}

impl EngineConfig {
    pub fn provider(&self, name: &str) -> Option<&ProviderRegistryEntry> {
        self.providers.iter().find(|p| p.name == name)
    }
}

/// Load and parse a YAML file, resolving `$include` directives relative to
/// the file's parent directory and expanding `${ENV_VAR:default}` strings.
pub fn load_yaml_file<P: AsRef<Path>>(path: P) -> Result<YamlValue> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let mut value: YamlValue = serde_yaml::from_str(&content)
        .map_err(|e| EngineRuntimeError::Config(format!("failed to parse {path:?}: {e}")))?;

    let base_dir = path
        .parent()
        .ok_or_else(|| EngineRuntimeError::Config(format!("invalid config path {path:?}")))?;

    process_includes(&mut value, base_dir)?;
    expand_variables(&mut value);
    Ok(value)
}

/// Load and deserialize a YAML file into `EngineConfig` (or any typed
/// config section).
pub fn load_yaml_config<T: serde::de::DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let yaml = load_yaml_file(path)?;
    let json = yaml_to_json(&yaml)?;
    serde_json::from_value(json).map_err(EngineRuntimeError::Serialization)
}

fn process_includes(value: &mut YamlValue, base_dir: &Path) -> Result<()> {
    match value {
        YamlValue::Mapping(map) => {
            if let Some(YamlValue::String(include_path)) =
                map.get(&YamlValue::String("$include".to_string()))
            {
                let included = load_yaml_file(base_dir.join(include_path))?;
                *value = included;
                return Ok(());
            }
            for (_, v) in map.iter_mut() {
                process_includes(v, base_dir)?;
            }
        }
        YamlValue::Sequence(seq) => {
            for item in seq.iter_mut() {
                process_includes(item, base_dir)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn expand_variables(value: &mut YamlValue) {
    match value {
        YamlValue::String(s) => {
            if let Some(expanded) = expand_env_in_string(s) {
                *s = expanded;
            }
        }
        YamlValue::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                expand_variables(v);
            }
        }
        YamlValue::Sequence(seq) => {
            for item in seq.iter_mut() {
                expand_variables(item);
            }
        }
        _ => {}
    }
}

fn expand_env_in_string(s: &str) -> Option<String> {
    if !s.contains("${") {
        return None;
    }
    let re = Regex::new(r"\$\{([^:}]+)(?::([^}]*))?\}").ok()?;
    let mut result = s.to_string();
    for cap in re.captures_iter(s) {
        let full_match = cap.get(0)?.as_str();
        let var_name = cap.get(1)?.as_str();
        let default_value = cap.get(2).map(|m| m.as_str()).unwrap_or("");
        let value = env::var(var_name).unwrap_or_else(|_| default_value.to_string());
        result = result.replace(full_match, &value);
    }
    Some(result)
}

fn yaml_to_json(yaml: &YamlValue) -> Result<JsonValue> {
    match yaml {
        YamlValue::Null => Ok(JsonValue::Null),
        YamlValue::Bool(b) => Ok(JsonValue::Bool(*b)),
        YamlValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(JsonValue::Number(i.into()))
            } else if let Some(u) = n.as_u64() {
                Ok(JsonValue::Number(u.into()))
            } else if let Some(f) = n.as_f64() {
                serde_json::Number::from_f64(f)
                    .map(JsonValue::Number)
                    .ok_or_else(|| EngineRuntimeError::Config(format!("invalid number: {f}")))
            } else {
                Err(EngineRuntimeError::Config("invalid number".to_string()))
            }
        }
        YamlValue::String(s) => Ok(JsonValue::String(s.clone())),
        YamlValue::Sequence(seq) => {
            let json_seq: Result<Vec<JsonValue>> = seq.iter().map(yaml_to_json).collect();
            Ok(JsonValue::Array(json_seq?))
        }
        YamlValue::Mapping(map) => {
            let mut json_map = serde_json::Map::new();
            for (k, v) in map {
                let key = match k {
                    YamlValue::String(s) => s.clone(),
                    _ => return Err(EngineRuntimeError::Config("map keys must be strings".to_string())),
                };
                json_map.insert(key, yaml_to_json(v)?);
            }
            Ok(JsonValue::Object(json_map))
        }
        YamlValue::Tagged(tagged) => yaml_to_json(&tagged.value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_name_routes_by_source_kind() {
        assert_eq!(QueueName::for_source_kind("git").as_str(), "rag.git");
        assert_eq!(QueueName::for_source_kind("drive").as_str(), "rag.drive");
        assert_eq!(QueueName::for_source_kind("unknown").as_str(), "rag.index");
    }

    #[test]
    fn expand_env_in_string_uses_default_when_unset() {
        std::env::remove_var("LLMCTL_TEST_VAR_DOES_NOT_EXIST");
        let expanded = expand_env_in_string("${LLMCTL_TEST_VAR_DOES_NOT_EXIST:fallback}").unwrap();
        assert_eq!(expanded, "fallback");
    }

    #[test]
    fn provider_lookup_by_name() {
        let config = EngineConfig {
            providers: vec![ProviderRegistryEntry {
                name: "claude-frontier".to_string(),
                family: ProviderFamily::Frontier,
                base_url: "https://api.anthropic.com".to_string(),
                api_key_env: Some("ANTHROPIC_API_KEY".to_string()),
                timeout_seconds: 60,
            }],
            ..Default::default()
        };
        assert!(config.provider("claude-frontier").is_some());
        assert!(config.provider("missing").is_none());
    }
}
