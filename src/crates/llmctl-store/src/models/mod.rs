//! Entity types persisted by the store, matching spec §3's data model.

pub mod agent;
pub mod chat;
pub mod flowchart;
pub mod mcp;
pub mod rag;
pub mod run;

pub use agent::{Agent, ScriptAttachment};
pub use chat::{ChatMessage, ChatThread};
pub use flowchart::{Flowchart, FlowchartConnector, FlowchartNode, NodeType};
pub use mcp::MCPServer;
pub use rag::{CollectionHealth, RAGCollection};
pub use run::{
    ArtifactType, ConnectorEvaluation, FlowchartRun, NodeArtifact, NodeRun, NodeRunError,
    NodeRunStatus, RoutingState, RunStatus,
};
