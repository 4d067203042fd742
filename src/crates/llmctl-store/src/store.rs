//! The `Store` trait: the persistence seam every engine component talks to.
//!
//! Generalizes `langgraph-checkpoint::CheckpointSaver` from "one graph state
//! blob keyed by thread_id" to "many entity kinds keyed by id", since the
//! flowchart engine persists twelve distinct entity types rather than a
//! single serialized checkpoint.
//!
//! `Store` itself is kept dyn-safe (no generic methods) so the engine can
//! hold a single `Arc<dyn Store>` regardless of backend. Typed, generic
//! access is layered on top via [`StoreExt`], the same split `sqlx` draws
//! between its row-level API and `query_as::<_, T>`.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::{Result, StoreError};

/// Name of a persisted entity kind, e.g. `"flowchart_run"` or `"node_run"`.
/// A `&'static str` rather than an enum so `llmctl-engine` can introduce new
/// entity kinds without a version bump to this crate.
pub type EntityKind = &'static str;

/// A query against one entity kind. `InMemoryStore` and `SqliteStore` both
/// interpret `equals` as an AND of exact-match filters; anything richer
/// belongs in a dedicated repository method, not in `Store::find`.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub equals: Vec<(String, Value)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.equals.push((field.into(), value));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    fn matches(&self, row: &Value) -> bool {
        self.equals.iter().all(|(field, expected)| {
            row.get(field).map(|actual| actual == expected).unwrap_or(false)
        })
    }
}

/// Storage backend for flowchart engine entities.
///
/// Implementations must be `Send + Sync`: the scheduler, node dispatcher,
/// and context budgeter all hold a shared `Arc<dyn Store>` and call into it
/// from concurrently spawned tasks.
///
/// Top-level calls auto-commit. `execute_atomic` is the one place true
/// transactional semantics are guaranteed: everything the closure does
/// through the passed `&dyn StoreSession` either all lands or all rolls
/// back, matching the all-or-nothing `(NodeRun, dispatch_key)` write spec
/// §7 requires for idempotent dispatch.
#[async_trait]
pub trait Store: Send + Sync {
    /// Start a session. Calls made through the returned handle are not
    /// visible to other sessions until `commit` is called.
    async fn begin_session(&self) -> Result<Box<dyn StoreSession>>;

    /// Fetch a single entity by id as raw JSON. `None` if it does not
    /// exist — this is not an error, matching `CheckpointSaver::get_tuple`'s
    /// `Ok(None)` convention for "not found".
    async fn get_json(&self, kind: EntityKind, id: &str) -> Result<Option<Value>>;

    /// Fetch entities matching `query` as raw JSON.
    async fn find_json(&self, kind: EntityKind, query: &Query) -> Result<Vec<Value>>;

    /// Insert a new entity. Returns `StoreError::ConstraintViolation` if
    /// `id` already exists for `kind`.
    async fn insert_json(&self, kind: EntityKind, id: &str, value: Value) -> Result<()>;

    /// Replace an existing entity in place. Returns `StoreError::NotFound`
    /// if no row with `id` exists.
    async fn update_json(&self, kind: EntityKind, id: &str, value: Value) -> Result<()>;

    /// Remove an entity. Deleting a nonexistent id is not an error
    /// (idempotent, matching `delete_thread`'s best-effort semantics).
    async fn delete(&self, kind: EntityKind, id: &str) -> Result<()>;

    /// Run `f` against a transactional session. If `f` returns `Err`, every
    /// write it made is rolled back before the error propagates.
    async fn execute_atomic<'a>(
        &'a self,
        f: Box<dyn FnOnce(&dyn StoreSession) -> BoxAtomicFuture<'_> + Send + 'a>,
    ) -> Result<()>;
}

/// Boxed future returned from an `execute_atomic` closure body, since the
/// closure itself cannot be `async fn` (those aren't expressible as trait
/// object fields without `async_trait`-style desugaring, and the closure
/// here is supplied by the caller, not defined on a trait).
pub type BoxAtomicFuture<'a> = std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>>;

/// A unit of work opened by `Store::begin_session` or handed to an
/// `execute_atomic` closure. Mirrors `Store`'s read/write surface so the
/// same calling code works whether it runs standalone or inside a
/// transaction.
#[async_trait]
pub trait StoreSession: Send + Sync {
    async fn get_json(&self, kind: EntityKind, id: &str) -> Result<Option<Value>>;
    async fn find_json(&self, kind: EntityKind, query: &Query) -> Result<Vec<Value>>;
    async fn insert_json(&self, kind: EntityKind, id: &str, value: Value) -> Result<()>;
    async fn update_json(&self, kind: EntityKind, id: &str, value: Value) -> Result<()>;
    async fn delete(&self, kind: EntityKind, id: &str) -> Result<()>;

    /// Commit all writes made through this session. Consumes `self` so a
    /// committed session cannot be reused.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard all writes made through this session.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Typed convenience methods layered over the JSON-based [`Store`] core.
/// Blanket-implemented for every `Store`, so callers write
/// `store.get::<NodeRun>("node_run", &id)` instead of deserializing
/// `Value` by hand at every call site.
#[async_trait]
pub trait StoreExt: Store {
    async fn get<T: DeserializeOwned>(&self, kind: EntityKind, id: &str) -> Result<Option<T>> {
        match self.get_json(kind, id).await? {
            Some(value) => Ok(Some(serde_json::from_value(value).map_err(StoreError::from)?)),
            None => Ok(None),
        }
    }

    async fn find<T: DeserializeOwned>(&self, kind: EntityKind, query: &Query) -> Result<Vec<T>> {
        let rows = self.find_json(kind, query).await?;
        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(StoreError::from))
            .collect()
    }

    async fn insert<T: Serialize + Sync>(&self, kind: EntityKind, id: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(StoreError::from)?;
        self.insert_json(kind, id, value).await
    }

    async fn update<T: Serialize + Sync>(&self, kind: EntityKind, id: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(StoreError::from)?;
        self.update_json(kind, id, value).await
    }
}

impl<S: Store + ?Sized> StoreExt for S {}

/// Typed convenience methods for [`StoreSession`], mirroring [`StoreExt`].
#[async_trait]
pub trait StoreSessionExt: StoreSession {
    async fn get<T: DeserializeOwned>(&self, kind: EntityKind, id: &str) -> Result<Option<T>> {
        match self.get_json(kind, id).await? {
            Some(value) => Ok(Some(serde_json::from_value(value).map_err(StoreError::from)?)),
            None => Ok(None),
        }
    }

    async fn find<T: DeserializeOwned>(&self, kind: EntityKind, query: &Query) -> Result<Vec<T>> {
        let rows = self.find_json(kind, query).await?;
        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(StoreError::from))
            .collect()
    }

    async fn insert<T: Serialize + Sync>(&self, kind: EntityKind, id: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(StoreError::from)?;
        self.insert_json(kind, id, value).await
    }

    async fn update<T: Serialize + Sync>(&self, kind: EntityKind, id: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(StoreError::from)?;
        self.update_json(kind, id, value).await
    }
}

impl<S: StoreSession + ?Sized> StoreSessionExt for S {}

pub(crate) fn query_matches(query: &Query, row: &Value) -> bool {
    query.matches(row)
}
