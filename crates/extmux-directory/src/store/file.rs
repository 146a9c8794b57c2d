//! JSON file directory store
//!
//! The whole directory is one JSON object keyed by tenant id. Writes go to a
//! sibling temp file which is then renamed over the original, so readers never
//! observe a half-written file.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::{DirectoryEntry, DirectoryError, Result, store::DirectoryStore};

type Entries = BTreeMap<String, DirectoryEntry>;

#[derive(Debug)]
pub struct FileDirectoryStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileDirectoryStore {
    /// Open (or lazily create) a store at `path`. A leading `~` is expanded
    /// to the home directory.
    ///
    /// # Errors
    /// - `DirectoryError::Store` if the home directory cannot be determined
    /// - `DirectoryError::Io` if the parent directory cannot be created
    pub async fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = expand_home(path.into())?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                error!("Failed to create directory store parent {:?}: {}", parent, e);
                DirectoryError::Io(e)
            })?;
        }

        info!("Initialized FileDirectoryStore at {:?}", path);

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Entries> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Entries::new()),
            Err(e) => {
                error!("Failed to read directory file: {}", e);
                return Err(DirectoryError::Io(e));
            }
        };
        if contents.is_empty() {
            return Ok(Entries::new());
        }
        serde_json::from_slice(&contents).map_err(|e| {
            error!("Failed to parse directory file {:?}: {}", self.path, e);
            DirectoryError::Store(format!("invalid directory file: {}", e))
        })
    }

    async fn save(&self, entries: &Entries) -> Result<()> {
        let json = serde_json::to_vec_pretty(entries)
            .map_err(|e| DirectoryError::Store(format!("serialization failed: {}", e)))?;

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await.map_err(|e| {
            error!("Failed to write directory file: {}", e);
            DirectoryError::Io(e)
        })?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            error!("Failed to replace directory file: {}", e);
            DirectoryError::Io(e)
        })?;
        Ok(())
    }
}

fn expand_home(path: PathBuf) -> Result<PathBuf> {
    let Ok(rest) = path.strip_prefix("~") else {
        return Ok(path);
    };
    let home = dirs::home_dir()
        .ok_or_else(|| DirectoryError::Store("Could not determine home directory".to_string()))?;
    Ok(home.join(rest))
}

#[async_trait]
impl DirectoryStore for FileDirectoryStore {
    async fn get(&self, tenant_id: &str) -> Result<Option<DirectoryEntry>> {
        Ok(self.load().await?.remove(tenant_id))
    }

    async fn put(&self, entry: &DirectoryEntry) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        entries.insert(entry.tenant_id.clone(), entry.clone());
        self.save(&entries).await?;
        debug!(tenant = %entry.tenant_id, "directory entry written");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.load().await.map(|_| ())
    }

    async fn delete(&self, tenant_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        if entries.remove(tenant_id).is_none() {
            return Ok(false);
        }
        self.save(&entries).await?;
        debug!(tenant = %tenant_id, "directory entry removed");
        Ok(true)
    }
}
