//! Tenant-scoped clients handed to handlers

use async_trait::async_trait;
use extmux_core::TenantAccess;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ClientError(pub String);

/// Client bound to one tenant's credentials.
///
/// Handlers use it to call back into the platform on the tenant's behalf.
/// `Debug` never prints the credential.
#[derive(Debug, Clone)]
pub struct TenantClient {
    access: TenantAccess,
}

impl TenantClient {
    pub fn new(access: TenantAccess) -> Self {
        Self { access }
    }

    pub fn tenant_id(&self) -> &str {
        &self.access.id
    }

    pub fn credential(&self) -> &str {
        self.access.credential()
    }

    /// Identity of the user on whose behalf the call is made, if any
    pub fn ident(&self) -> Option<&str> {
        self.access.ident.as_deref()
    }

    pub fn access(&self) -> &TenantAccess {
        &self.access
    }
}

/// Builds a [`TenantClient`] from the access block of an inbound call.
#[async_trait]
pub trait TenantClientFactory: Send + Sync {
    /// # Errors
    /// Returns an error when the access block cannot produce a usable client.
    async fn build(&self, access: &TenantAccess) -> Result<TenantClient, ClientError>;
}

/// Factory that only checks the access block is complete.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClientFactory;

#[async_trait]
impl TenantClientFactory for DefaultClientFactory {
    async fn build(&self, access: &TenantAccess) -> Result<TenantClient, ClientError> {
        access
            .validate()
            .map_err(|e| ClientError(e.to_string()))?;
        Ok(TenantClient::new(access.clone()))
    }
}
