//! `Store`/`StoreSession` backed by the `entities` table, grounded on
//! `orchestrator::db::repositories::task_repo`'s static-fn-over-pool
//! pattern, generalized from one typed table to the generic
//! `(kind, id, payload)` shape every entity kind shares.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Row, Sqlite, Transaction};
use tokio::sync::Mutex;

use super::connection::DatabasePool;
use crate::error::{Result, StoreError};
use crate::store::{query_matches, BoxAtomicFuture, EntityKind, Query, Store, StoreSession};

#[derive(Clone)]
pub struct SqliteStore {
    pool: DatabasePool,
}

impl SqliteStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn begin_session(&self) -> Result<Box<dyn StoreSession>> {
        let tx = self.pool.begin().await.map_err(StoreError::from)?;
        Ok(Box::new(SqliteSession { tx: Mutex::new(Some(tx)) }))
    }

    async fn get_json(&self, kind: EntityKind, id: &str) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT payload FROM entities WHERE kind = ? AND id = ?")
            .bind(kind)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;
        row.map(|row| decode_payload(row.get::<String, _>("payload")))
            .transpose()
    }

    async fn find_json(&self, kind: EntityKind, query: &Query) -> Result<Vec<Value>> {
        let rows = sqlx::query("SELECT payload FROM entities WHERE kind = ?")
            .bind(kind)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from)?;

        let mut out = Vec::new();
        for row in rows {
            let value = decode_payload(row.get::<String, _>("payload"))?;
            if query_matches(query, &value) {
                out.push(value);
            }
        }
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn insert_json(&self, kind: EntityKind, id: &str, value: Value) -> Result<()> {
        let payload = serde_json::to_string(&value).map_err(StoreError::from)?;
        sqlx::query("INSERT INTO entities (kind, id, payload) VALUES (?, ?, ?)")
            .bind(kind)
            .bind(id)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn update_json(&self, kind: EntityKind, id: &str, value: Value) -> Result<()> {
        let payload = serde_json::to_string(&value).map_err(StoreError::from)?;
        let result = sqlx::query(
            "UPDATE entities SET payload = ?, updated_at = datetime('now') WHERE kind = ? AND id = ?",
        )
        .bind(payload)
        .bind(kind)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(kind, id));
        }
        Ok(())
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM entities WHERE kind = ? AND id = ?")
            .bind(kind)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn execute_atomic<'a>(
        &'a self,
        f: Box<dyn FnOnce(&dyn StoreSession) -> BoxAtomicFuture<'_> + Send + 'a>,
    ) -> Result<()> {
        let session = self.begin_session().await?;
        match f(session.as_ref()).await {
            Ok(()) => session.commit().await,
            Err(err) => {
                session.rollback().await?;
                Err(err)
            }
        }
    }
}

/// A session backed by one `sqlx::Transaction`. Guarded by a `Mutex`
/// because `StoreSession`'s methods take `&self` but `sqlx::Transaction`
/// queries need `&mut Transaction`.
struct SqliteSession {
    tx: Mutex<Option<Transaction<'static, Sqlite>>>,
}

#[async_trait]
impl StoreSession for SqliteSession {
    async fn get_json(&self, kind: EntityKind, id: &str) -> Result<Option<Value>> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(|| StoreError::Other("session already closed".into()))?;
        let row = sqlx::query("SELECT payload FROM entities WHERE kind = ? AND id = ?")
            .bind(kind)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(StoreError::from)?;
        row.map(|row| decode_payload(row.get::<String, _>("payload")))
            .transpose()
    }

    async fn find_json(&self, kind: EntityKind, query: &Query) -> Result<Vec<Value>> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(|| StoreError::Other("session already closed".into()))?;
        let rows = sqlx::query("SELECT payload FROM entities WHERE kind = ?")
            .bind(kind)
            .fetch_all(&mut **tx)
            .await
            .map_err(StoreError::from)?;

        let mut out = Vec::new();
        for row in rows {
            let value = decode_payload(row.get::<String, _>("payload"))?;
            if query_matches(query, &value) {
                out.push(value);
            }
        }
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn insert_json(&self, kind: EntityKind, id: &str, value: Value) -> Result<()> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(|| StoreError::Other("session already closed".into()))?;
        let payload = serde_json::to_string(&value).map_err(StoreError::from)?;
        sqlx::query("INSERT INTO entities (kind, id, payload) VALUES (?, ?, ?)")
            .bind(kind)
            .bind(id)
            .bind(payload)
            .execute(&mut **tx)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn update_json(&self, kind: EntityKind, id: &str, value: Value) -> Result<()> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(|| StoreError::Other("session already closed".into()))?;
        let payload = serde_json::to_string(&value).map_err(StoreError::from)?;
        let result = sqlx::query(
            "UPDATE entities SET payload = ?, updated_at = datetime('now') WHERE kind = ? AND id = ?",
        )
        .bind(payload)
        .bind(kind)
        .bind(id)
        .execute(&mut **tx)
        .await
        .map_err(StoreError::from)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(kind, id));
        }
        Ok(())
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<()> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(|| StoreError::Other("session already closed".into()))?;
        sqlx::query("DELETE FROM entities WHERE kind = ? AND id = ?")
            .bind(kind)
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let tx = self.tx.into_inner().ok_or_else(|| StoreError::Other("session already closed".into()))?;
        tx.commit().await.map_err(StoreError::from)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let tx = self.tx.into_inner().ok_or_else(|| StoreError::Other("session already closed".into()))?;
        tx.rollback().await.map_err(StoreError::from)
    }
}

fn decode_payload(raw: String) -> Result<Value> {
    serde_json::from_str(&raw).map_err(StoreError::from)
}
