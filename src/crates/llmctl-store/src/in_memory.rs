//! In-memory [`Store`] implementation, grounded on
//! `langgraph-checkpoint::memory::InMemoryCheckpointSaver`'s
//! `Arc<RwLock<HashMap<...>>>` shape. Used by engine unit/integration tests
//! and anywhere a flowchart run doesn't need to survive process restart.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{Result, StoreError};
use crate::store::{query_matches, BoxAtomicFuture, EntityKind, Query, Store, StoreSession};

type Table = HashMap<String, Value>;
type Tables = HashMap<&'static str, Table>;

/// Thread-safe, process-local store. Every write lands immediately — there
/// is no write-ahead log, so a crash loses everything, same tradeoff
/// `InMemoryCheckpointSaver` documents for its own use cases.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops all stored entities. Test-isolation helper, mirroring
    /// `InMemoryCheckpointSaver::clear()`.
    pub async fn clear(&self) {
        self.tables.write().await.clear();
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin_session(&self) -> Result<Box<dyn StoreSession>> {
        let snapshot = self.tables.read().await.clone();
        Ok(Box::new(InMemorySession {
            tables: self.tables.clone(),
            pending: RwLock::new(snapshot),
        }))
    }

    async fn get_json(&self, kind: EntityKind, id: &str) -> Result<Option<Value>> {
        Ok(self.tables.read().await.get(kind).and_then(|t| t.get(id)).cloned())
    }

    async fn find_json(&self, kind: EntityKind, query: &Query) -> Result<Vec<Value>> {
        let tables = self.tables.read().await;
        let Some(table) = tables.get(kind) else {
            return Ok(Vec::new());
        };
        let mut rows: Vec<Value> = table.values().filter(|row| query_matches(query, row)).cloned().collect();
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn insert_json(&self, kind: EntityKind, id: &str, value: Value) -> Result<()> {
        let mut tables = self.tables.write().await;
        let table = tables.entry(kind).or_default();
        if table.contains_key(id) {
            return Err(StoreError::ConstraintViolation(format!(
                "{kind} with id {id} already exists"
            )));
        }
        table.insert(id.to_string(), value);
        Ok(())
    }

    async fn update_json(&self, kind: EntityKind, id: &str, value: Value) -> Result<()> {
        let mut tables = self.tables.write().await;
        let table = tables.entry(kind).or_default();
        if !table.contains_key(id) {
            return Err(StoreError::not_found(kind, id));
        }
        table.insert(id.to_string(), value);
        Ok(())
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<()> {
        if let Some(table) = self.tables.write().await.get_mut(kind) {
            table.remove(id);
        }
        Ok(())
    }

    async fn execute_atomic<'a>(
        &'a self,
        f: Box<dyn FnOnce(&dyn StoreSession) -> BoxAtomicFuture<'_> + Send + 'a>,
    ) -> Result<()> {
        let session = self.begin_session().await?;
        let result = f(session.as_ref()).await;
        match result {
            Ok(()) => session.commit().await,
            Err(err) => {
                session.rollback().await?;
                Err(err)
            }
        }
    }
}

/// A session's writes land in its own snapshot of the tables until
/// `commit`, at which point the snapshot replaces the shared state whole.
/// This gives last-writer-wins isolation, which is sufficient for a
/// single-process test double — `SqliteStore` is what gives real
/// row-level transactional isolation.
struct InMemorySession {
    tables: Arc<RwLock<Tables>>,
    pending: RwLock<Tables>,
}

#[async_trait]
impl StoreSession for InMemorySession {
    async fn get_json(&self, kind: EntityKind, id: &str) -> Result<Option<Value>> {
        Ok(self.pending.read().await.get(kind).and_then(|t| t.get(id)).cloned())
    }

    async fn find_json(&self, kind: EntityKind, query: &Query) -> Result<Vec<Value>> {
        let pending = self.pending.read().await;
        let Some(table) = pending.get(kind) else {
            return Ok(Vec::new());
        };
        let mut rows: Vec<Value> = table.values().filter(|row| query_matches(query, row)).cloned().collect();
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn insert_json(&self, kind: EntityKind, id: &str, value: Value) -> Result<()> {
        let mut pending = self.pending.write().await;
        let table = pending.entry(kind).or_default();
        if table.contains_key(id) {
            return Err(StoreError::ConstraintViolation(format!(
                "{kind} with id {id} already exists"
            )));
        }
        table.insert(id.to_string(), value);
        Ok(())
    }

    async fn update_json(&self, kind: EntityKind, id: &str, value: Value) -> Result<()> {
        let mut pending = self.pending.write().await;
        let table = pending.entry(kind).or_default();
        if !table.contains_key(id) {
            return Err(StoreError::not_found(kind, id));
        }
        table.insert(id.to_string(), value);
        Ok(())
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<()> {
        if let Some(table) = self.pending.write().await.get_mut(kind) {
            table.remove(id);
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let pending = self.pending.into_inner();
        *self.tables.write().await = pending;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{StoreExt, StoreSessionExt};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Widget {
        id: String,
        count: i64,
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let store = InMemoryStore::new();
        let widget = Widget { id: "w1".into(), count: 3 };
        store.insert("widget", "w1", &widget).await.unwrap();
        let loaded: Option<Widget> = store.get("widget", "w1").await.unwrap();
        assert_eq!(loaded, Some(widget));
    }

    #[tokio::test]
    async fn duplicate_insert_is_a_constraint_violation() {
        let store = InMemoryStore::new();
        let widget = Widget { id: "w1".into(), count: 1 };
        store.insert("widget", "w1", &widget).await.unwrap();
        let err = store.insert("widget", "w1", &widget).await.unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn update_missing_row_is_not_found() {
        let store = InMemoryStore::new();
        let widget = Widget { id: "ghost".into(), count: 0 };
        let err = store.update("widget", "ghost", &widget).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn failed_atomic_block_rolls_back() {
        let store = InMemoryStore::new();
        let widget = Widget { id: "w1".into(), count: 1 };
        let result = store
            .execute_atomic(Box::new(|session| {
                let widget = widget.clone();
                Box::pin(async move {
                    session.insert("widget", "w1", &widget).await?;
                    Err(StoreError::Other("forced failure".into()))
                })
            }))
            .await;
        assert!(result.is_err());
        let loaded: Option<Widget> = store.get("widget", "w1").await.unwrap();
        assert_eq!(loaded, None);
    }

    #[tokio::test]
    async fn successful_atomic_block_commits() {
        let store = InMemoryStore::new();
        let widget = Widget { id: "w1".into(), count: 1 };
        store
            .execute_atomic(Box::new(|session| {
                let widget = widget.clone();
                Box::pin(async move { session.insert("widget", "w1", &widget).await })
            }))
            .await
            .unwrap();
        let loaded: Option<Widget> = store.get("widget", "w1").await.unwrap();
        assert_eq!(loaded, Some(widget));
    }
}
