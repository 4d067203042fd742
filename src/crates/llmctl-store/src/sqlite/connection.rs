//! Pool setup and health checks, grounded on
//! `orchestrator::db::connection::DatabaseConnection`.

use std::sync::Arc;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::error::{Result, StoreError};

pub type DatabasePool = SqlitePool;

#[derive(Clone)]
pub struct DatabaseConnection {
    pool: Arc<DatabasePool>,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_max_connections(database_url, 5).await
    }

    pub async fn with_max_connections(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(StoreError::from)?;

        Ok(Self { pool: Arc::new(pool) })
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(self.pool.as_ref())
            .await
            .map_err(|err| StoreError::Migration(err.to_string()))
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(self.pool.as_ref())
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_check_succeeds_against_in_memory_db() {
        let conn = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        assert!(conn.health_check().await.is_ok());
    }
}
