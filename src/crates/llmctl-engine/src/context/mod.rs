//! Context budgeter: token counting plus the history/RAG/MCP packing
//! split a node dispatch assembles its prompt from.

pub mod budget;
pub mod token_counter;

pub use budget::{pack, pack_with_compaction, BudgetConfig, McpState, PackInputs, PackedContext};
pub use token_counter::TokenCounter;
