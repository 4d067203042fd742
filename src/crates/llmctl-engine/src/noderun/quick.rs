//! Fallback agent profile and system contract for nodes with no bound
//! agent ("quick nodes" running a free-form prompt).
//!
//! Carried over from `original_source` `core/quick_node.py`'s
//! `QUICK_NODE_FALLBACK_*` constants.

use serde_json::{json, Value};

pub const QUICK_NODE_FALLBACK_ROLE_NAME: &str = "Quick";

pub const QUICK_NODE_FALLBACK_ROLE_DESCRIPTION: &str = "You are Quick.\r\nHandle short, one-off tasks with minimal overhead.\r\nAsk only essential questions and respond concisely.";

/// `build_quick_node_system_contract()`: a single `role` key carrying name,
/// description, and the detailed deliverables/focus/tone/ways_of_working
/// breakdown the Python ships as a nested dict literal.
pub fn fallback_system_contract() -> Value {
    json!({
        "role": {
            "name": QUICK_NODE_FALLBACK_ROLE_NAME,
            "description": QUICK_NODE_FALLBACK_ROLE_DESCRIPTION,
            "details": {
                "name": "Quick",
                "description": "You are a generic, lightweight assistant for one-off tasks. You have no specialized domain role and do not assume extra context. You focus on fast, clear execution with minimal overhead.",
                "details": {
                    "deliverables": [
                        "Direct answers",
                        "Short checklists",
                        "Light drafting/editing",
                        "Simple summaries",
                        "Small code snippets or commands (when asked)",
                    ],
                    "focus": ["Speed", "Clarity", "Low ceremony", "Doing the asked task only"],
                    "tone": ["Neutral", "Friendly", "Concise", "Pragmatic"],
                    "ways_of_working": {
                        "response_format": {
                            "default": ["Result", "Next step (optional)"],
                            "style_rules": [
                                "Prefer bullets over paragraphs",
                                "Keep it short unless asked for detail",
                                "Avoid deep theory or long background",
                            ],
                        },
                        "rules": [
                            "Do not overthink or over-scope",
                            "Ask at most one clarifying question only if absolutely required",
                            "Prefer actionable output over explanation",
                            "Use the user's wording and constraints as the source of truth",
                            "If multiple valid options exist, present 2-3 and recommend one",
                        ],
                    },
                },
            },
        }
    })
}

/// `build_quick_node_agent_profile()`.
pub fn fallback_agent_profile() -> Value {
    json!({
        "id": "quick-node-default",
        "name": "Quick Node",
        "description": "Default quick node profile for running free-form prompts.",
    })
}

/// `build_quick_node_agent_info()`: the same fallback profile, shaped as
/// an [`crate::workspace::AgentInfo`] rather than a raw profile payload.
pub fn fallback_agent_info() -> crate::workspace::AgentInfo {
    crate::workspace::AgentInfo {
        id: None,
        name: "Quick Node".to_string(),
        description: "Default quick node profile for running free-form prompts.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_system_contract_carries_role_name() {
        let contract = fallback_system_contract();
        assert_eq!(contract["role"]["name"], "Quick");
    }

    #[test]
    fn fallback_agent_profile_has_default_id() {
        let profile = fallback_agent_profile();
        assert_eq!(profile["id"], "quick-node-default");
    }

    #[test]
    fn fallback_agent_info_has_no_bound_id() {
        let info = fallback_agent_info();
        assert!(info.id.is_none());
        assert_eq!(info.name, "Quick Node");
    }
}
