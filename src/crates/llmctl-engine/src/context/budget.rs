//! Three-way history/RAG/MCP token budget split and context packing.
//!
//! Grounded on `orchestrator::context::manager::ContextManager` +
//! `trimmer::ContextTrimmer`, generalized from a single "history vs.
//! limit" trim into the three-way split spec.md §4.7 describes: the
//! teacher only ever trims conversation history against one limit, this
//! module additionally reserves separate budgets for retrieved RAG
//! context and MCP tool state, since a flowchart node's prompt carries
//! all three.

use serde::{Deserialize, Serialize};

use crate::context::token_counter::TokenCounter;
use crate::retrieval::{build_context, HistoryTurn, RetrievalSource};

/// Defaults and normalization rules for the three-way split. Percentages
/// are u32 so `proptest` can generate arbitrary inputs without fighting
/// floating point equality in the round-trip test.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub history_percent: u32,
    pub rag_percent: u32,
    pub mcp_percent: u32,
    pub compaction_trigger_percent: u32,
    pub compaction_target_percent: u32,
    pub preserve_recent_turns: usize,
    pub rag_top_k: usize,
    pub default_context_window: usize,
    pub max_compaction_summary_chars: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            history_percent: 60,
            rag_percent: 25,
            mcp_percent: 15,
            compaction_trigger_percent: 100,
            compaction_target_percent: 85,
            preserve_recent_turns: 4,
            rag_top_k: 5,
            default_context_window: 16_000,
            max_compaction_summary_chars: 2_400,
        }
    }
}

impl BudgetConfig {
    /// Enforces `history∈[10,90]`, `rag∈[0,80]`, `history+rag≤95`,
    /// `mcp=100-history-rag`, `target<trigger`, for any input — including
    /// the degenerate cases a property test throws at it (`trigger=0`,
    /// `history` and `rag` both at `u32::MAX`).
    pub fn normalize(&self) -> BudgetConfig {
        let history = self.history_percent.clamp(10, 90);
        let mut rag = self.rag_percent.min(80);
        if history + rag > 95 {
            rag = 95 - history;
        }
        let mcp = 100 - history - rag;

        let trigger = self.compaction_trigger_percent.clamp(1, 100);
        let target = self.compaction_target_percent.min(trigger - 1);

        BudgetConfig {
            history_percent: history,
            rag_percent: rag,
            mcp_percent: mcp,
            compaction_trigger_percent: trigger,
            compaction_target_percent: target,
            ..*self
        }
    }
}

/// Result of one packing pass: the three formatted sections plus enough
/// bookkeeping for the caller to decide whether to re-pack at a stricter
/// target.
#[derive(Debug, Clone)]
pub struct PackedContext {
    pub history_text: String,
    pub compaction_summary: Option<String>,
    pub rag_text: String,
    pub rag_sources: Vec<RetrievalSource>,
    pub mcp_text: String,
    pub total_tokens: usize,
}

/// MCP tool state the budgeter truncates to fit `mcp_budget`, keyed by
/// server_key.
pub type McpState = std::collections::BTreeMap<String, String>;

pub struct PackInputs<'a> {
    pub system_prompt: &'a str,
    pub agent_profile: &'a str,
    pub user_request: &'a str,
    pub history: &'a [HistoryTurn],
    pub rag_documents: &'a [String],
    pub rag_metadatas: &'a [serde_json::Value],
    pub mcp_state: &'a McpState,
}

/// Implements spec.md §4.7 steps 1-4: reserve system/profile/request
/// tokens from the window, split the remainder by normalized
/// percentages, select the most recent history within budget (always
/// keeping the last `preserve_recent_turns`), summarize the rest,
/// retrieve/format RAG context bounded by its budget, and append MCP
/// state truncated to its own budget.
pub fn pack(config: &BudgetConfig, counter: &TokenCounter, window: usize, inputs: &PackInputs) -> PackedContext {
    let config = config.normalize();

    let reserved = counter.count_str(inputs.system_prompt)
        + counter.count_str(inputs.agent_profile)
        + counter.count_str(inputs.user_request);
    let remaining = window.saturating_sub(reserved);

    let history_budget = remaining * config.history_percent as usize / 100;
    let rag_budget = remaining * config.rag_percent as usize / 100;
    let mcp_budget = remaining * config.mcp_percent as usize / 100;

    let (kept, dropped) = select_recent_within_budget(counter, inputs.history, history_budget, config.preserve_recent_turns);
    let compaction_summary = if dropped.is_empty() {
        None
    } else {
        Some(summarize_turns(&dropped, config.max_compaction_summary_chars))
    };
    let history_text = render_history(&kept);
    let history_tokens = counter.count_str(&history_text)
        + compaction_summary.as_deref().map(|s| counter.count_str(s)).unwrap_or(0);

    let (rag_text, rag_sources) = if rag_budget > 0 && !inputs.rag_documents.is_empty() {
        let top_k = config.rag_top_k.min(inputs.rag_documents.len());
        build_context(
            &inputs.rag_documents[..top_k],
            &inputs.rag_metadatas[..top_k],
            rag_budget,
            rag_budget.min(400),
        )
    } else {
        (String::new(), Vec::new())
    };
    let rag_tokens = counter.count_str(&rag_text);

    let mcp_text = render_mcp_state(inputs.mcp_state, mcp_budget);
    let mcp_tokens = counter.count_str(&mcp_text);

    PackedContext {
        history_text,
        compaction_summary,
        rag_text,
        rag_sources,
        mcp_text,
        total_tokens: reserved + history_tokens + rag_tokens + mcp_tokens,
    }
}

/// Re-packs at progressively stricter history budgets while the
/// projected total exceeds `compaction_trigger_percent × window`, until
/// it settles at or below `compaction_target_percent × window` or no
/// further history remains to drop.
pub fn pack_with_compaction(config: &BudgetConfig, counter: &TokenCounter, window: usize, inputs: &PackInputs) -> PackedContext {
    let config = config.normalize();
    let trigger_tokens = window * config.compaction_trigger_percent as usize / 100;
    let target_tokens = window * config.compaction_target_percent as usize / 100;

    let mut history = inputs.history.to_vec();
    loop {
        let narrowed = PackInputs { history: &history, ..*inputs };
        let packed = pack(&config, counter, window, &narrowed);
        if packed.total_tokens <= trigger_tokens || history.len() <= config.preserve_recent_turns {
            return packed;
        }
        if packed.total_tokens <= target_tokens {
            return packed;
        }
        // Drop the oldest surviving turn and retry, shrinking history
        // faster than a percentage-only retry would until we're back
        // under the trigger.
        history.remove(0);
    }
}

fn select_recent_within_budget(counter: &TokenCounter, history: &[HistoryTurn], budget_tokens: usize, preserve_recent: usize) -> (Vec<HistoryTurn>, Vec<HistoryTurn>) {
    if history.len() <= preserve_recent {
        return (history.to_vec(), Vec::new());
    }

    let split_at = history.len() - preserve_recent;
    let (older, recent) = history.split_at(split_at);

    let mut kept: Vec<HistoryTurn> = recent.to_vec();
    let mut used_tokens: usize = kept.iter().map(|t| counter.count_str(&t.content)).sum();

    let mut dropped = Vec::new();
    for turn in older.iter().rev() {
        let turn_tokens = counter.count_str(&turn.content);
        if used_tokens + turn_tokens <= budget_tokens {
            kept.insert(0, turn.clone());
            used_tokens += turn_tokens;
        } else {
            dropped.push(turn.clone());
        }
    }
    dropped.reverse();
    (kept, dropped)
}

fn render_history(turns: &[HistoryTurn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.role, t.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn summarize_turns(turns: &[HistoryTurn], max_chars: usize) -> String {
    let joined = turns
        .iter()
        .map(|t| format!("{}: {}", t.role, t.content))
        .collect::<Vec<_>>()
        .join(" ");
    let prefix = "prior conversation summary: ";
    let budget = max_chars.saturating_sub(prefix.len());
    let truncated: String = joined.chars().take(budget).collect();
    format!("{prefix}{truncated}")
}

fn render_mcp_state(state: &McpState, budget_tokens: usize) -> String {
    let rendered = state
        .iter()
        .map(|(key, value)| format!("{key}: {value}"))
        .collect::<Vec<_>>()
        .join("\n");
    // MCP budgets are small relative to history/RAG; approximate the
    // token ceiling as a character ceiling (4 chars/token) since MCP tool
    // state is short-lived status text, not prose worth tokenizing
    // precisely.
    let char_budget = budget_tokens.saturating_mul(4);
    if rendered.chars().count() <= char_budget {
        rendered
    } else {
        rendered.chars().take(char_budget).collect()
    }
}
