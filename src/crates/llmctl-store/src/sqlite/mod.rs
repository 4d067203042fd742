//! SQLite-backed `Store`, grounded on `orchestrator::db::{connection, error}`
//! and the static-fn repository pattern in `orchestrator::db::repositories`.

pub mod connection;
pub mod store;

pub use connection::{DatabaseConnection, DatabasePool};
pub use store::SqliteStore;
