//! Durable directory stores

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::{DirectoryEntry, Result};

mod file;
#[cfg(feature = "postgres")]
mod postgres;

pub use file::FileDirectoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresDirectoryStore;

/// Source of truth for tenant → instance entries.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    /// Fetch the entry for a tenant, `None` if there is none.
    async fn get(&self, tenant_id: &str) -> Result<Option<DirectoryEntry>>;

    /// Insert or replace the entry for `entry.tenant_id`.
    async fn put(&self, entry: &DirectoryEntry) -> Result<()>;

    /// Remove a tenant's entry. Returns whether an entry existed.
    async fn delete(&self, tenant_id: &str) -> Result<bool>;

    /// Check that the store can currently be read.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Process-local store, for tests and single-node development.
#[derive(Debug, Default)]
pub struct MemoryDirectoryStore {
    entries: RwLock<HashMap<String, DirectoryEntry>>,
}

impl MemoryDirectoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl DirectoryStore for MemoryDirectoryStore {
    async fn get(&self, tenant_id: &str) -> Result<Option<DirectoryEntry>> {
        Ok(self.entries.read().await.get(tenant_id).cloned())
    }

    async fn put(&self, entry: &DirectoryEntry) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(entry.tenant_id.clone(), entry.clone());
        Ok(())
    }

    async fn delete(&self, tenant_id: &str) -> Result<bool> {
        Ok(self.entries.write().await.remove(tenant_id).is_some())
    }
}
