//! Instance provisioner trait

use async_trait::async_trait;

use crate::{Result, ServiceDefinition};

/// Creates, exposes and destroys tenant-dedicated instances.
///
/// Creation and public exposure are separate steps so that an instance only
/// becomes reachable after its directory entry has been persisted.
#[async_trait]
pub trait InstanceProvisioner: Send + Sync {
    /// Create the instance for `tenant_id` and return its address.
    ///
    /// # Errors
    /// Returns an error if the instance could not be created; no instance is
    /// left behind in that case.
    async fn create(
        &self,
        tenant_id: &str,
        definition: &ServiceDefinition,
        secret: &str,
    ) -> Result<String>;

    /// Grant public invocation rights on the tenant's instance.
    async fn make_reachable(&self, tenant_id: &str, address: &str) -> Result<()>;

    /// Destroy the tenant's instance.
    ///
    /// # Errors
    /// Returns `ProvisionError::NotFound` if no such instance exists.
    async fn destroy(&self, tenant_id: &str) -> Result<()>;
}
