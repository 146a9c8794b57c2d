//! Service definition template and per-tenant instance specs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

use crate::{ProvisionError, Result};

/// Environment variable replaced with the per-instance shared secret.
pub const SHARED_SECRET_ENV: &str = "LC_SHARED_SECRET";

/// Environment variable carrying the tenant id into the instance.
pub const TENANT_ID_ENV: &str = "FROM_LC_OID";

pub const TENANT_LABEL: &str = "lc-oid";
pub const EXTENSION_LABEL: &str = "lc-extension";

/// Template every tenant instance is created from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub image: String,

    /// Static environment as `NAME=value` entries
    #[serde(default)]
    pub env: Vec<String>,

    #[serde(default)]
    pub cpu: String,

    #[serde(default)]
    pub memory: String,

    #[serde(default)]
    pub min_instances: u32,

    #[serde(default)]
    pub max_instances: u32,

    /// Per-request execution timeout, in seconds
    #[serde(default)]
    pub timeout: u32,

    #[serde(default)]
    pub service_account: String,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ServiceDefinition {
    /// Parse a definition from its JSON form.
    ///
    /// # Errors
    /// Returns `InvalidDefinition` on malformed JSON or a missing image.
    pub fn from_json(json: &str) -> Result<Self> {
        let definition: Self = serde_json::from_str(json)
            .map_err(|e| ProvisionError::InvalidDefinition(e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn validate(&self) -> Result<()> {
        if self.image.trim().is_empty() {
            return Err(ProvisionError::InvalidDefinition(
                "image is required".to_string(),
            ));
        }
        if self.max_instances != 0 && self.min_instances > self.max_instances {
            return Err(ProvisionError::InvalidDefinition(format!(
                "min_instances ({}) exceeds max_instances ({})",
                self.min_instances, self.max_instances
            )));
        }
        Ok(())
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl fmt::Debug for EnvVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = if self.name == SHARED_SECRET_ENV {
            "<redacted>"
        } else {
            self.value.as_str()
        };
        write!(f, "{}={}", self.name, value)
    }
}

/// Fully resolved description of one tenant's instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<EnvVar>,
    pub cpu: String,
    pub memory: String,
    pub min_instances: u32,
    pub max_instances: u32,
    pub timeout_secs: u32,
    pub service_account: String,
    pub labels: BTreeMap<String, String>,
}

impl InstanceSpec {
    /// Instance name for a tenant of an extension.
    pub fn instance_name(extension: &str, tenant_id: &str) -> String {
        format!("{}-{}", extension, tenant_id)
    }

    /// Resolve `definition` for one tenant.
    ///
    /// The shared-secret variable is set to `secret` whether or not the
    /// template declares it, and the tenant id is always injected. Malformed
    /// `env` entries are skipped.
    pub fn build(
        extension: &str,
        tenant_id: &str,
        definition: &ServiceDefinition,
        secret: &str,
    ) -> Self {
        let mut env = Vec::with_capacity(definition.env.len() + 2);
        let mut has_secret = false;
        for entry in &definition.env {
            let Some((name, value)) = entry.split_once('=') else {
                warn!("skipping malformed env entry for {}", tenant_id);
                continue;
            };
            if name == TENANT_ID_ENV {
                continue;
            }
            let value = if name == SHARED_SECRET_ENV {
                has_secret = true;
                secret
            } else {
                value
            };
            env.push(EnvVar {
                name: name.to_string(),
                value: value.to_string(),
            });
        }
        if !has_secret {
            env.push(EnvVar {
                name: SHARED_SECRET_ENV.to_string(),
                value: secret.to_string(),
            });
        }
        env.push(EnvVar {
            name: TENANT_ID_ENV.to_string(),
            value: tenant_id.to_string(),
        });

        let mut labels = definition.labels.clone();
        labels.insert(TENANT_LABEL.to_string(), tenant_id.to_string());
        labels.insert(EXTENSION_LABEL.to_string(), extension.to_string());

        Self {
            name: Self::instance_name(extension, tenant_id),
            image: definition.image.clone(),
            env,
            cpu: definition.cpu.clone(),
            memory: definition.memory.clone(),
            min_instances: definition.min_instances,
            max_instances: definition.max_instances,
            timeout_secs: definition.timeout,
            service_account: definition.service_account.clone(),
            labels,
        }
    }

    pub fn env_value(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.value.as_str())
    }
}
