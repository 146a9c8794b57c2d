//! Application wiring
//!
//! Builds the directory store, provisioner, multiplexer and dispatcher from a
//! validated [`ServerConfig`], and assembles the HTTP router.

use anyhow::{Context, bail};
use async_trait::async_trait;
use axum::{Router, middleware};
use extmux_directory::{
    DirectoryStore, FileDirectoryStore, MemoryDirectoryStore, ServiceDirectory,
};
use extmux_egress::{Forwarder, HttpClientConfig};
use extmux_ingress::{Dispatcher, request_context_middleware};
use extmux_multiplexer::{Multiplexer, TimingHook, fetch_reference_schema};
use extmux_observability::{
    ComponentStatus, HealthState, Metrics, ReadinessChecker, health_router,
};
use extmux_provision::{HttpProvisioner, HttpProvisionerConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{DirectoryBackend, DirectoryConfig, ForwardingConfig, ServerConfig};

pub fn client_config(config: &ForwardingConfig) -> HttpClientConfig {
    HttpClientConfig {
        timeout_secs: config.timeout_secs,
        connect_timeout_secs: config.connect_timeout_secs,
        ..Default::default()
    }
}

pub async fn build_store(config: &DirectoryConfig) -> anyhow::Result<Arc<dyn DirectoryStore>> {
    match config.backend {
        DirectoryBackend::Memory => {
            warn!("Using in-memory service directory; entries are lost on restart");
            Ok(Arc::new(MemoryDirectoryStore::new()))
        }
        DirectoryBackend::File => {
            let store = FileDirectoryStore::new(&config.path)
                .await
                .with_context(|| format!("failed to open directory file {}", config.path))?;
            Ok(Arc::new(store))
        }
        DirectoryBackend::Postgres => postgres_store(config).await,
    }
}

#[cfg(feature = "postgres")]
async fn postgres_store(config: &DirectoryConfig) -> anyhow::Result<Arc<dyn DirectoryStore>> {
    let url = config
        .database_url
        .as_deref()
        .context("directory.database_url is not set")?;
    let store = extmux_directory::PostgresDirectoryStore::new(url)
        .await
        .context("failed to open PostgreSQL directory")?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn postgres_store(_config: &DirectoryConfig) -> anyhow::Result<Arc<dyn DirectoryStore>> {
    bail!("PostgreSQL directory support not compiled in; rebuild with --features postgres")
}

/// Wire the multiplexer behind a dispatcher.
///
/// Fetches the schema from the reference service, so this fails if that
/// service is unreachable.
pub async fn build_dispatcher(
    config: &ServerConfig,
    store: Arc<dyn DirectoryStore>,
    metrics: Arc<Metrics>,
) -> anyhow::Result<Arc<Dispatcher>> {
    let client_config = client_config(&config.forwarding);
    let forwarder = Forwarder::new(&client_config)?.with_metrics(metrics.clone());

    let schema = fetch_reference_schema(&forwarder, &config.reference.url, &config.reference.secret)
        .await
        .with_context(|| format!("failed to load schema from {}", config.reference.url))?;

    let Some(definition) = config.provisioner.service_definition.clone() else {
        bail!("provisioner.service_definition is not set");
    };
    let provisioner = HttpProvisioner::new(HttpProvisionerConfig {
        base_url: config.provisioner.base_url.clone(),
        token: config.provisioner.token.clone(),
        extension_name: config.extension.name.clone(),
        client_config,
    })?;

    let directory = ServiceDirectory::new(store, Arc::new(provisioner), definition)
        .with_cache_ttl(Duration::from_secs(config.directory.cache_ttl_secs))
        .with_metrics(metrics.clone());

    let multiplexer =
        Arc::new(Multiplexer::new(directory, forwarder).with_hook(Arc::new(TimingHook)));
    let dispatcher = multiplexer
        .dispatcher(&config.extension.name, &config.extension.secret, schema)
        .with_metrics(metrics);

    info!(
        actions = ?dispatcher.registry().actions(),
        events = ?dispatcher.registry().event_names(),
        "multiplexer ready"
    );
    Ok(Arc::new(dispatcher))
}

/// Readiness of the durable directory store.
pub struct DirectoryReadiness {
    store: Arc<dyn DirectoryStore>,
}

impl DirectoryReadiness {
    pub fn new(store: Arc<dyn DirectoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ReadinessChecker for DirectoryReadiness {
    async fn components(&self) -> Vec<ComponentStatus> {
        let reachable = match self.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!("directory store is not reachable: {}", e);
                false
            }
        };
        vec![ComponentStatus::new("directory", reachable)]
    }
}

/// Extension endpoint plus health and metrics routes.
pub fn build_router(
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<Metrics>,
    store: Arc<dyn DirectoryStore>,
) -> Router {
    let health = HealthState::with_readiness_checker(metrics, Arc::new(DirectoryReadiness::new(store)));
    dispatcher
        .router()
        .merge(health_router(health))
        .layer(middleware::from_fn(request_context_middleware))
}
