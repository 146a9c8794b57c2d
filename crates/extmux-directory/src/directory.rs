//! Service directory: resolve, provision and deprovision tenant instances

use extmux_observability::Metrics;
use extmux_provision::{InstanceProvisioner, ServiceDefinition};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{DirectoryCache, DirectoryEntry, DirectoryError, DirectoryStore, Lookup, Result};

/// Tenant → instance directory backed by a durable store and a provisioner.
///
/// Cheap to clone; clones share the store, provisioner and cache.
#[derive(Clone)]
pub struct ServiceDirectory {
    store: Arc<dyn DirectoryStore>,
    provisioner: Arc<dyn InstanceProvisioner>,
    definition: Arc<ServiceDefinition>,
    cache: Arc<DirectoryCache>,
    metrics: Option<Arc<Metrics>>,
}

impl ServiceDirectory {
    pub fn new(
        store: Arc<dyn DirectoryStore>,
        provisioner: Arc<dyn InstanceProvisioner>,
        definition: ServiceDefinition,
    ) -> Self {
        Self {
            store,
            provisioner,
            definition: Arc::new(definition),
            cache: Arc::new(DirectoryCache::default()),
            metrics: None,
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache = Arc::new(DirectoryCache::new(ttl));
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn cache(&self) -> &DirectoryCache {
        &self.cache
    }

    pub fn definition(&self) -> &ServiceDefinition {
        &self.definition
    }

    /// Find the tenant's instance, consulting the cache first.
    ///
    /// # Errors
    /// - `DirectoryError::NotFound` if the tenant has no instance
    /// - `DirectoryError::Store` / `Io` if the durable store fails
    #[instrument(skip(self))]
    pub async fn resolve(&self, tenant_id: &str) -> Result<DirectoryEntry> {
        match self.cache.get(tenant_id) {
            Lookup::Hit(entry) => {
                self.record_lookup("hit");
                return Ok(entry);
            }
            Lookup::Expired => {
                debug!("directory cache expired");
                if let Some(metrics) = &self.metrics {
                    metrics.record_refresh("ttl_expired", 0);
                }
            }
            Lookup::Miss => {}
        }

        let generation = self.cache.generation();
        match self.store.get(tenant_id).await? {
            Some(entry) => {
                self.record_lookup("miss");
                if self.cache.insert_if_current(entry.clone(), generation) {
                    self.record_cached();
                } else {
                    debug!("entry removed during lookup, not caching");
                }
                Ok(entry)
            }
            None => {
                self.record_lookup("not_found");
                Err(DirectoryError::NotFound(tenant_id.to_string()))
            }
        }
    }

    /// Create an instance for the tenant and register it.
    ///
    /// The instance is only made reachable once its entry is persisted. Any
    /// failure after creation rolls back what was done; the rollback runs to
    /// completion even if the caller stops waiting.
    ///
    /// Callers are expected to check [`resolve`](Self::resolve) first.
    pub async fn provision(&self, tenant_id: &str) -> Result<DirectoryEntry> {
        let this = self.clone();
        let tenant = tenant_id.to_string();
        let result = tokio::spawn(async move { this.provision_inner(&tenant).await })
            .await
            .map_err(|e| DirectoryError::Store(format!("provisioning task failed: {}", e)))?;

        self.record_provisioning("provision", &result);
        result
    }

    #[instrument(skip(self))]
    async fn provision_inner(&self, tenant_id: &str) -> Result<DirectoryEntry> {
        let secret = Uuid::new_v4().to_string();

        let address = self
            .provisioner
            .create(tenant_id, &self.definition, &secret)
            .await?;
        let entry = DirectoryEntry::new(tenant_id, address, secret);

        if let Err(e) = self.store.put(&entry).await {
            error!("failed to persist directory entry: {}", e);
            self.destroy_after(tenant_id, &e).await?;
            return Err(e);
        }

        if let Err(e) = self
            .provisioner
            .make_reachable(tenant_id, &entry.address)
            .await
        {
            error!("failed to make instance reachable: {}", e);
            let original = DirectoryError::from(e);
            if let Err(cleanup) = self.store.delete(tenant_id).await {
                return Err(compensation(tenant_id, &original, &cleanup));
            }
            self.destroy_after(tenant_id, &original).await?;
            return Err(original);
        }

        self.cache.insert(entry.clone());
        self.record_cached();
        info!(address = %entry.address, "tenant instance provisioned");
        Ok(entry)
    }

    /// Destroy a freshly created instance after `original` went wrong.
    async fn destroy_after(&self, tenant_id: &str, original: &DirectoryError) -> Result<()> {
        match self.provisioner.destroy(tenant_id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(compensation(tenant_id, original, &e)),
        }
    }

    /// Tear down the tenant's instance and forget it.
    ///
    /// The instance is destroyed before the entry is removed, so a failure
    /// never leaves a running instance without a record. An instance that is
    /// already gone counts as destroyed.
    pub async fn deprovision(&self, tenant_id: &str) -> Result<()> {
        let this = self.clone();
        let tenant = tenant_id.to_string();
        let result = tokio::spawn(async move { this.deprovision_inner(&tenant).await })
            .await
            .map_err(|e| DirectoryError::Store(format!("deprovisioning task failed: {}", e)))?;

        self.record_provisioning("deprovision", &result);
        result
    }

    #[instrument(skip(self))]
    async fn deprovision_inner(&self, tenant_id: &str) -> Result<()> {
        match self.provisioner.destroy(tenant_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                warn!("instance already gone");
            }
            Err(e) => return Err(e.into()),
        }

        let removed = self.store.delete(tenant_id).await?;
        self.cache.remove(tenant_id);
        self.record_cached();

        if removed {
            info!("tenant instance deprovisioned");
        } else {
            debug!("no directory entry to remove");
        }
        Ok(())
    }

    fn record_lookup(&self, result: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_lookup(result);
        }
    }

    fn record_cached(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.record_cached(self.cache.len());
        }
    }

    fn record_provisioning<T>(&self, operation: &str, result: &Result<T>) {
        if let Some(metrics) = &self.metrics {
            let outcome = match result {
                Ok(_) => "success",
                Err(DirectoryError::Compensation { .. }) => "compensation_failed",
                Err(_) => "failure",
            };
            metrics.record_provisioning(operation, outcome);
        }
    }
}

fn compensation(
    tenant_id: &str,
    original: &DirectoryError,
    cause: &dyn std::fmt::Display,
) -> DirectoryError {
    error!(tenant = %tenant_id, "rollback failed: {}", cause);
    DirectoryError::Compensation {
        tenant: tenant_id.to_string(),
        original: original.to_string(),
        cause: cause.to_string(),
    }
}

impl std::fmt::Debug for ServiceDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDirectory")
            .field("image", &self.definition.image)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
