//! Directory entry

use chrono::{DateTime, Utc};
use extmux_core::masking::REDACTED;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a tenant's instance lives and the secret it shares with us.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub tenant_id: String,
    pub address: String,
    pub secret: String,
    pub created_at: DateTime<Utc>,
}

impl DirectoryEntry {
    pub fn new(
        tenant_id: impl Into<String>,
        address: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            address: address.into(),
            secret: secret.into(),
            created_at: Utc::now(),
        }
    }
}

impl fmt::Debug for DirectoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryEntry")
            .field("tenant_id", &self.tenant_id)
            .field("address", &self.address)
            .field("secret", &REDACTED)
            .field("created_at", &self.created_at)
            .finish()
    }
}
