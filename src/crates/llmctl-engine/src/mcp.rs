//! MCP server config JSON-shape handling: accepts either a plain config
//! object or a `{mcp_servers: {...}}` wrapper, normalizes both to the same
//! shape before handing configs to a provider adapter.
//!
//! Grounded on `original_source` `app/llmctl-mcp/src/constants.py`'s
//! `MODEL_REGISTRY`-style dispatch table, reexpressed as a Rust `match`
//! over a `ConfigShape` enum instead of a runtime string-to-type map
//! (spec.md §9 redesign flag: the shape space here is exactly two
//! variants, known at compile time, so a match is the direct translation
//! rather than a registry indirection with nothing left to register).

use serde_json::{Map, Value};

use crate::error::{EngineRuntimeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigShape {
    /// The server's config object appears directly, keyed by server_key at
    /// the call site rather than nested under a wrapper key.
    Plain,
    /// `{"mcp_servers": {"<server_key>": {...}, ...}}`.
    Wrapped,
}

/// Detects which of the two accepted shapes `raw` is, and returns the
/// normalized `(server_key -> config)` map either way.
pub fn parse_mcp_config(raw: &Value, server_key: Option<&str>) -> Result<Map<String, Value>> {
    match detect_shape(raw) {
        ConfigShape::Wrapped => {
            let servers = raw
                .get("mcp_servers")
                .and_then(Value::as_object)
                .ok_or_else(|| EngineRuntimeError::Config("mcp_servers must be an object".to_string()))?;
            match server_key {
                Some(key) => {
                    let mut out = Map::new();
                    if let Some(config) = servers.get(key) {
                        out.insert(key.to_string(), config.clone());
                    }
                    Ok(out)
                }
                None => Ok(servers.clone()),
            }
        }
        ConfigShape::Plain => {
            let object = raw
                .as_object()
                .ok_or_else(|| EngineRuntimeError::Config("mcp server config must be a JSON object".to_string()))?;
            match server_key {
                Some(key) => {
                    let mut out = Map::new();
                    out.insert(key.to_string(), Value::Object(object.clone()));
                    Ok(out)
                }
                None => Ok(object.clone()),
            }
        }
    }
}

fn detect_shape(raw: &Value) -> ConfigShape {
    match raw.get("mcp_servers") {
        Some(Value::Object(_)) => ConfigShape::Wrapped,
        _ => ConfigShape::Plain,
    }
}

/// Renders a normalized `(server_key -> config)` map back to the wrapped
/// wire shape, the inverse `parse_mcp_config` round-trips against.
pub fn render_mcp_config(servers: &Map<String, Value>) -> Value {
    serde_json::json!({ "mcp_servers": servers })
}

/// `print-mcp-configs` CLI surface: parse errors are captured per server
/// key rather than failing the whole command, matching
/// `scripts/print_mcp_configs.py`'s `{"error": str(exc)}` wrapping.
pub fn parse_mcp_config_or_error(raw: &Value, server_key: &str) -> Value {
    match parse_mcp_config(raw, Some(server_key)) {
        Ok(map) => Value::Object(map),
        Err(err) => serde_json::json!({ "error": err.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_wrapped_shape() {
        let raw = serde_json::json!({"mcp_servers": {"filesystem": {"command": "mcp-fs"}}});
        assert_eq!(detect_shape(&raw), ConfigShape::Wrapped);
    }

    #[test]
    fn detects_plain_shape() {
        let raw = serde_json::json!({"command": "mcp-fs"});
        assert_eq!(detect_shape(&raw), ConfigShape::Plain);
    }

    #[test]
    fn parse_wrapped_filters_by_server_key() {
        let raw = serde_json::json!({
            "mcp_servers": {
                "filesystem": {"command": "mcp-fs"},
                "git": {"command": "mcp-git"},
            }
        });
        let parsed = parse_mcp_config(&raw, Some("git")).unwrap();
        assert_eq!(parsed.len(), 1);
        assert!(parsed.contains_key("git"));
    }

    #[test]
    fn parse_plain_wraps_under_server_key() {
        let raw = serde_json::json!({"command": "mcp-fs"});
        let parsed = parse_mcp_config(&raw, Some("filesystem")).unwrap();
        assert_eq!(parsed["filesystem"]["command"], serde_json::json!("mcp-fs"));
    }

    #[test]
    fn render_then_parse_is_identity_for_wrapped_shape() {
        let mut servers = Map::new();
        servers.insert("filesystem".to_string(), serde_json::json!({"command": "mcp-fs"}));
        let rendered = render_mcp_config(&servers);
        let parsed = parse_mcp_config(&rendered, None).unwrap();
        assert_eq!(parsed, servers);
    }
}
