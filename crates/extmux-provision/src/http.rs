//! Provisioner backed by a control-plane REST API
//!
//! - `POST {base}/services` with an [`InstanceSpec`], answered by `{name, address}`
//! - `POST {base}/services/{name}/invokers` to grant public invocation
//! - `DELETE {base}/services/{name}`, 404 meaning the instance is gone

use async_trait::async_trait;
use extmux_egress::{HttpClientConfig, create_client};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::{InstanceProvisioner, InstanceSpec, ProvisionError, Result, ServiceDefinition};

#[derive(Debug, Clone)]
pub struct HttpProvisionerConfig {
    /// Base URL of the control-plane API
    pub base_url: String,

    /// Bearer token, if the API requires one
    pub token: Option<String>,

    /// Extension name used to derive instance names and labels
    pub extension_name: String,

    pub client_config: HttpClientConfig,
}

#[derive(Debug, Deserialize)]
struct CreatedInstance {
    #[serde(default)]
    address: String,
}

#[derive(Serialize)]
struct InvokerBinding<'a> {
    role: &'a str,
    members: [&'a str; 1],
}

const PUBLIC_INVOKER: InvokerBinding<'static> = InvokerBinding {
    role: "invoker",
    members: ["allUsers"],
};

pub struct HttpProvisioner {
    client: Client,
    config: HttpProvisionerConfig,
}

impl HttpProvisioner {
    pub fn new(config: HttpProvisionerConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(ProvisionError::Config("base_url is required".to_string()));
        }
        if config.extension_name.trim().is_empty() {
            return Err(ProvisionError::Config(
                "extension_name is required".to_string(),
            ));
        }
        let client =
            create_client(&config.client_config).map_err(|e| ProvisionError::Config(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn instance_name(&self, tenant_id: &str) -> String {
        InstanceSpec::instance_name(&self.config.extension_name, tenant_id)
    }
}

impl std::fmt::Debug for HttpProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvisioner")
            .field("base_url", &self.config.base_url)
            .field("extension_name", &self.config.extension_name)
            .field("token", &self.config.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

async fn check(response: Response, name: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ProvisionError::NotFound(name.to_string()));
    }
    let message = response.text().await.unwrap_or_default();
    Err(ProvisionError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl InstanceProvisioner for HttpProvisioner {
    #[instrument(skip(self, definition, secret))]
    async fn create(
        &self,
        tenant_id: &str,
        definition: &ServiceDefinition,
        secret: &str,
    ) -> Result<String> {
        let spec = InstanceSpec::build(&self.config.extension_name, tenant_id, definition, secret);
        debug!(instance = %spec.name, "creating instance");

        let response = self
            .authorize(self.client.post(self.url("/services")))
            .json(&spec)
            .send()
            .await?;
        let created: CreatedInstance = check(response, &spec.name)
            .await?
            .json()
            .await
            .map_err(|e| ProvisionError::InvalidResponse(e.to_string()))?;

        if created.address.is_empty() {
            return Err(ProvisionError::InvalidResponse(format!(
                "no address returned for {}",
                spec.name
            )));
        }

        info!(instance = %spec.name, address = %created.address, "instance created");
        Ok(created.address)
    }

    #[instrument(skip(self))]
    async fn make_reachable(&self, tenant_id: &str, address: &str) -> Result<()> {
        let name = self.instance_name(tenant_id);
        let response = self
            .authorize(
                self.client
                    .post(self.url(&format!("/services/{}/invokers", name))),
            )
            .json(&PUBLIC_INVOKER)
            .send()
            .await?;
        check(response, &name).await?;
        debug!(instance = %name, "instance made reachable");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn destroy(&self, tenant_id: &str) -> Result<()> {
        let name = self.instance_name(tenant_id);
        let response = self
            .authorize(self.client.delete(self.url(&format!("/services/{}", name))))
            .send()
            .await?;
        check(response, &name).await?;
        info!(instance = %name, "instance destroyed");
        Ok(())
    }
}
