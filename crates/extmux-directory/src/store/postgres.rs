//! PostgreSQL directory store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::info;

use crate::{DirectoryEntry, DirectoryError, Result, store::DirectoryStore};

/// Directory entries kept in a `service_directory` table, one row per tenant.
#[derive(Clone)]
pub struct PostgresDirectoryStore {
    pool: Arc<PgPool>,
}

impl PostgresDirectoryStore {
    /// Connect and make sure the schema exists.
    ///
    /// # Errors
    /// - `DirectoryError::Store` if connection or migration fails
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await.map_err(|e| {
            DirectoryError::Store(format!("Failed to connect to PostgreSQL: {}", e))
        })?;

        let store = Self::from_pool(pool);
        store.run_migrations().await?;

        info!("Initialized PostgresDirectoryStore");
        Ok(store)
    }

    /// Create from an existing pool; the caller is responsible for the schema
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS service_directory (
                tenant_id TEXT PRIMARY KEY,
                address TEXT NOT NULL,
                secret TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            DirectoryError::Store(format!("Failed to create service_directory table: {}", e))
        })?;
        Ok(())
    }
}

impl std::fmt::Debug for PostgresDirectoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresDirectoryStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl DirectoryStore for PostgresDirectoryStore {
    async fn get(&self, tenant_id: &str) -> Result<Option<DirectoryEntry>> {
        let row = sqlx::query(
            "SELECT tenant_id, address, secret, created_at FROM service_directory WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| DirectoryError::Store(format!("Failed to fetch entry: {}", e)))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let read = |e: sqlx::Error| DirectoryError::Store(format!("Failed to read entry: {}", e));
        Ok(Some(DirectoryEntry {
            tenant_id: row.try_get("tenant_id").map_err(read)?,
            address: row.try_get("address").map_err(read)?,
            secret: row.try_get("secret").map_err(read)?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(read)?,
        }))
    }

    async fn put(&self, entry: &DirectoryEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO service_directory (tenant_id, address, secret, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id) DO UPDATE
            SET address = EXCLUDED.address,
                secret = EXCLUDED.secret,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(&entry.tenant_id)
        .bind(&entry.address)
        .bind(&entry.secret)
        .bind(entry.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| DirectoryError::Store(format!("Failed to write entry: {}", e)))?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&*self.pool)
            .await
            .map(|_| ())
            .map_err(|e| DirectoryError::Store(format!("PostgreSQL unreachable: {}", e)))
    }

    async fn delete(&self, tenant_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM service_directory WHERE tenant_id = $1")
            .bind(tenant_id)
            .execute(&*self.pool)
            .await
            .map_err(|e| DirectoryError::Store(format!("Failed to delete entry: {}", e)))?;
        Ok(result.rows_affected() > 0)
    }
}
