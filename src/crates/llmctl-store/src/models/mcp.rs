//! MCP server registry entries. `config_json` is stored verbatim — shape
//! normalization (plain object vs. `{mcp_servers:{...}}` wrapper) is
//! `llmctl-engine::mcp`'s job, not the store's.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MCPServer {
    pub server_key: String,
    pub config_json: Value,
}
