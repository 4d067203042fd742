//! Persistent and in-memory storage for the flowchart engine's twelve
//! entity kinds (spec §3), plus the dispatch idempotency ledger (spec §7).
//!
//! Generalizes `langgraph-checkpoint`'s single-checkpoint-blob storage
//! trait into a multi-entity `Store`, and `orchestrator::db`'s SQLite
//! connection/repository layer into a backend for it.

pub mod error;
pub mod in_memory;
pub mod kinds;
pub mod models;
pub mod sqlite;
pub mod store;

pub use error::{Result, StoreError};
pub use in_memory::InMemoryStore;
pub use sqlite::{DatabaseConnection, DatabasePool, SqliteStore};
pub use store::{EntityKind, Query, Store, StoreExt, StoreSession, StoreSessionExt};
