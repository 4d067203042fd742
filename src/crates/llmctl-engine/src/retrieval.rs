//! Vector retrieval contract: merge results from multiple collections,
//! build the query text from recent history, and format a bounded context
//! block with citable sources.
//!
//! Grounded on `original_source` `rag/engine/retrieval.py` (full source
//! read: `query_collections`, `build_query_text`, `trim_history`,
//! `build_context`, `format_label`, `truncate`), contract only — chunking
//! and embedding stay out of scope (spec.md §1 non-goal); this module
//! assumes a collection already returns scored documents.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One hit from a single collection's similarity search, before merging
/// across collections.
#[derive(Debug, Clone)]
pub struct CollectionHit {
    pub document: String,
    pub metadata: Value,
    pub distance: f64,
}

/// The narrow seam `llmctl-engine::retrieval` depends on; chunking,
/// embedding, and the concrete vector backend (Chroma, pgvector, ...) live
/// behind it.
#[async_trait]
pub trait VectorCollection: Send + Sync {
    async fn query(&self, query_text: &str, top_k: usize) -> Vec<CollectionHit>;
    fn source_id(&self) -> Option<&str>;
    fn source_name(&self) -> Option<&str>;
    fn source_kind(&self) -> Option<&str>;
}

/// One role/content turn from chat history, as fed to `build_query_text`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
}

/// Keeps only `user`/`assistant` turns with non-empty trimmed content,
/// trimmed to the last `max_items`.
pub fn trim_history(history: &[HistoryTurn], max_items: usize) -> Vec<HistoryTurn> {
    let cleaned: Vec<HistoryTurn> = history
        .iter()
        .filter(|turn| turn.role == "user" || turn.role == "assistant")
        .filter_map(|turn| {
            let text = turn.content.trim();
            if text.is_empty() {
                None
            } else {
                Some(HistoryTurn {
                    role: turn.role.clone(),
                    content: text.to_string(),
                })
            }
        })
        .collect();
    let start = cleaned.len().saturating_sub(max_items);
    cleaned[start..].to_vec()
}

const QUERY_TEXT_MAX_CHARS: usize = 800;

/// Up to two prior user turns plus the current message, joined with `\n`
/// and truncated to the last 800 characters (keeping the tail, not the
/// head, so the most recent content survives truncation).
pub fn build_query_text(message: &str, history: &[HistoryTurn], max_history: usize) -> String {
    let trimmed = trim_history(history, max_history);
    let mut recent_users: Vec<&str> = trimmed
        .iter()
        .filter(|turn| turn.role == "user")
        .map(|turn| turn.content.as_str())
        .collect();
    if recent_users.len() > 2 {
        let start = recent_users.len() - 2;
        recent_users = recent_users[start..].to_vec();
    }

    let mut parts: Vec<&str> = recent_users;
    parts.push(message);
    let combined = parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    let combined = combined.trim();

    if combined.is_empty() {
        return message.to_string();
    }
    if combined.chars().count() > QUERY_TEXT_MAX_CHARS {
        let chars: Vec<char> = combined.chars().collect();
        let start = chars.len() - QUERY_TEXT_MAX_CHARS;
        return chars[start..].iter().collect();
    }
    combined.to_string()
}

/// Merges hits across collections by ascending distance, drops empty
/// documents, defaults `source_id`/`source_name`/`source_kind` metadata
/// from the owning collection, and trims to `top_k`.
pub async fn query_collections(
    message: &str,
    collections: &[std::sync::Arc<dyn VectorCollection>],
    top_k: usize,
) -> (Vec<String>, Vec<Value>) {
    let mut merged: Vec<(f64, String, Value)> = Vec::new();

    for collection in collections {
        for hit in collection.query(message, top_k).await {
            if hit.document.is_empty() {
                continue;
            }
            let mut meta = hit.metadata.as_object().cloned().unwrap_or_default();
            if let Some(id) = collection.source_id() {
                meta.entry("source_id").or_insert_with(|| Value::String(id.to_string()));
            }
            if let Some(name) = collection.source_name() {
                meta.entry("source_name").or_insert_with(|| Value::String(name.to_string()));
            }
            if let Some(kind) = collection.source_kind() {
                meta.entry("source_kind").or_insert_with(|| Value::String(kind.to_string()));
            }
            merged.push((hit.distance, hit.document, Value::Object(meta)));
        }
    }

    merged.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    merged.truncate(top_k);

    let documents = merged.iter().map(|(_, doc, _)| doc.clone()).collect();
    let metadatas = merged.into_iter().map(|(_, _, meta)| meta).collect();
    (documents, metadatas)
}

/// One citable source entry accompanying the formatted context block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSource {
    pub id: usize,
    pub label: String,
    pub path: Option<String>,
    pub start_line: Option<i64>,
    pub end_line: Option<i64>,
    pub snippet: String,
}

/// Builds `[i] <label>\n<doc>` blocks truncated to fit `max_chars` total,
/// stopping as soon as the remaining budget is exhausted, alongside a
/// parallel list of citable sources with a `snippet_chars`-bounded preview.
pub fn build_context(documents: &[String], metadatas: &[Value], max_chars: usize, snippet_chars: usize) -> (String, Vec<RetrievalSource>) {
    let mut blocks = Vec::new();
    let mut sources = Vec::new();
    let mut remaining = max_chars as i64;

    for (idx, (doc, meta)) in documents.iter().zip(metadatas.iter()).enumerate() {
        if doc.is_empty() {
            continue;
        }
        let idx = idx + 1;
        let label = format_label(meta);
        let snippet = truncate(doc.trim(), snippet_chars);
        sources.push(RetrievalSource {
            id: idx,
            label: label.clone(),
            path: meta.get("path").and_then(Value::as_str).map(str::to_string),
            start_line: meta.get("start_line").and_then(Value::as_i64),
            end_line: meta.get("end_line").and_then(Value::as_i64),
            snippet,
        });

        let mut block_text = format!("[{idx}] {label}\n{}", doc.trim());
        if block_text.chars().count() as i64 > remaining && remaining > 0 {
            let take = remaining as usize;
            block_text = block_text.chars().take(take).collect::<String>().trim_end().to_string();
        }
        let block_len = block_text.chars().count() as i64;
        blocks.push(block_text);
        remaining -= block_len;
        if remaining <= 0 {
            break;
        }
    }

    (blocks.join("\n\n"), sources)
}

fn format_label(meta: &Value) -> String {
    let source_name = meta.get("source_name").and_then(Value::as_str);
    let path = meta.get("path").and_then(Value::as_str).unwrap_or("unknown");
    let start_line = meta.get("start_line").and_then(Value::as_i64);
    let end_line = meta.get("end_line").and_then(Value::as_i64);
    let prefix = source_name.map(|n| format!("{n} • ")).unwrap_or_default();

    match (start_line, end_line) {
        (Some(start), Some(end)) => format!("{prefix}{path}:{start}-{end}"),
        (Some(start), None) => format!("{prefix}{path}:{start}"),
        _ => format!("{prefix}{path}"),
    }
}

/// Ellipsis-truncate: keeps `limit - 3` characters then appends `...`.
fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let take = limit.saturating_sub(3);
    let truncated: String = text.chars().take(take).collect();
    format!("{}...", truncated.trim_end())
}
