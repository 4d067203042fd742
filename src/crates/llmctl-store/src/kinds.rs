//! Canonical `EntityKind` strings, one per spec §3 entity. Centralized here
//! so `llmctl-engine` and `llmctl-cli` never hand-type a kind literal that
//! could drift from what the store actually indexes.

use crate::store::EntityKind;

pub const FLOWCHART: EntityKind = "flowchart";
pub const FLOWCHART_NODE: EntityKind = "flowchart_node";
pub const FLOWCHART_CONNECTOR: EntityKind = "flowchart_connector";
pub const FLOWCHART_RUN: EntityKind = "flowchart_run";
pub const NODE_RUN: EntityKind = "node_run";
pub const NODE_ARTIFACT: EntityKind = "node_artifact";
pub const AGENT: EntityKind = "agent";
pub const SCRIPT_ATTACHMENT: EntityKind = "script_attachment";
pub const MCP_SERVER: EntityKind = "mcp_server";
pub const RAG_COLLECTION: EntityKind = "rag_collection";
pub const CHAT_THREAD: EntityKind = "chat_thread";
pub const CHAT_MESSAGE: EntityKind = "chat_message";
/// Dispatch idempotency claims (spec §7): a `(run_id, dispatch_id) ->
/// node_run_id` row persisted as an ordinary entity rather than a
/// bespoke table, so every `Store` backend gets the same guarantee for
/// free.
pub const DISPATCH_KEY: EntityKind = "dispatch_key";
