//! Tenant access data carried by tenant-bound payloads

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// Identifies a tenant and carries the bearer credential used to build a
/// tenant-scoped client.
///
/// The credential is never rendered by `Debug`; use [`TenantAccess::credential`]
/// explicitly when it has to leave the process (for example when forwarding).
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantAccess {
    /// Stable tenant identifier
    #[serde(rename = "oid", default)]
    pub id: String,

    /// Bearer credential for the tenant
    #[serde(rename = "jwt", default)]
    pub credential: String,

    /// Identity of the caller acting on behalf of the tenant, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ident: Option<String>,
}

impl TenantAccess {
    pub fn new(id: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            credential: credential.into(),
            ident: None,
        }
    }

    pub fn with_ident(mut self, ident: impl Into<String>) -> Self {
        self.ident = Some(ident.into());
        self
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }

    /// Reject access data that cannot possibly identify a tenant.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidTenant("missing tenant id".to_string()));
        }
        if self.credential.is_empty() {
            return Err(Error::InvalidTenant(format!(
                "missing credential for tenant {}",
                self.id
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for TenantAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantAccess")
            .field("id", &self.id)
            .field("credential", &"<redacted>")
            .field("ident", &self.ident)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        let access: TenantAccess =
            serde_json::from_str(r#"{"oid":"abc","jwt":"tok","ident":"user@example.com"}"#)
                .unwrap();
        assert_eq!(access.id, "abc");
        assert_eq!(access.credential(), "tok");
        assert_eq!(access.ident.as_deref(), Some("user@example.com"));

        let json = serde_json::to_value(TenantAccess::new("abc", "tok")).unwrap();
        assert_eq!(json, serde_json::json!({"oid": "abc", "jwt": "tok"}));
    }

    #[test]
    fn test_debug_hides_credential() {
        let access = TenantAccess::new("abc", "super-secret-token");
        let rendered = format!("{:?}", access);
        assert!(rendered.contains("abc"));
        assert!(!rendered.contains("super-secret-token"));
    }

    #[test]
    fn test_validate() {
        assert!(TenantAccess::new("abc", "tok").validate().is_ok());
        assert!(TenantAccess::new("", "tok").validate().is_err());
        assert!(TenantAccess::new("abc", "").validate().is_err());
    }
}
