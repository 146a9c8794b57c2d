//! Per-tenant forwarding and instance lifecycle

use extmux_core::{
    ConfigValidationMessage, Dict, EventMessage, Message, PROTOCOL_VERSION, RequestMessage,
    Response, SchemaResponse, TenantAccess,
    events::{SUBSCRIBE, UNSUBSCRIBE},
};
use extmux_directory::{DirectoryEntry, ServiceDirectory};
use extmux_egress::Forwarder;
use extmux_ingress::{
    Dispatcher, EventParams, HandlerRegistry, HandlerResult, RequestParams,
    RequestRoute, TenantClient, reply_from_response,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::hook::{MessageHook, PassThroughHook};
use crate::{MultiplexError, Result};

/// Forwards every call to the calling tenant's dedicated instance.
pub struct Multiplexer {
    directory: ServiceDirectory,
    forwarder: Forwarder,
    hook: Arc<dyn MessageHook>,
}

impl Multiplexer {
    pub fn new(directory: ServiceDirectory, forwarder: Forwarder) -> Self {
        Self {
            directory,
            forwarder,
            hook: Arc::new(PassThroughHook),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn MessageHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn directory(&self) -> &ServiceDirectory {
        &self.directory
    }

    /// Forward a request to the tenant's instance.
    #[instrument(skip(self, params), fields(tenant = %params.client.tenant_id(), action = %params.action))]
    pub async fn forward_request(&self, params: RequestParams<Dict>) -> Result<Response> {
        let tenant = params.client.access().clone();
        let message = Message::new(PROTOCOL_VERSION, params.idempotency_key).with_request(
            RequestMessage {
                tenant: tenant.clone(),
                action: params.action.clone(),
                data: params.request,
                config: params.config,
                resource_state: params.resource_state,
                investigation_id: params.investigation_id,
            },
        );
        self.forward(&tenant, message, &params.action).await
    }

    /// Forward an event, provisioning or deprovisioning on lifecycle events.
    #[instrument(skip(self, params), fields(tenant = %params.client.tenant_id(), event = %params.event_name))]
    pub async fn forward_event(&self, params: EventParams) -> Result<Response> {
        let tenant = params.client.access().clone();
        let event_name = params.event_name.clone();
        let message = Message::new(PROTOCOL_VERSION, params.idempotency_key).with_event(
            EventMessage {
                tenant: tenant.clone(),
                event_name: params.event_name,
                data: params.data,
                config: params.config,
            },
        );

        match event_name.as_str() {
            SUBSCRIBE => self.subscribe(&tenant, message).await,
            UNSUBSCRIBE => self.unsubscribe(&tenant, message).await,
            other => self.forward(&tenant, message, other).await,
        }
    }

    /// Forward a configuration validation to the tenant's instance.
    #[instrument(skip(self, client, config), fields(tenant = %client.tenant_id()))]
    pub async fn forward_config_validation(
        &self,
        client: &TenantClient,
        config: Dict,
    ) -> Result<Response> {
        let tenant = client.access().clone();
        let message =
            Message::new(PROTOCOL_VERSION, "").with_config_validation(ConfigValidationMessage {
                tenant: tenant.clone(),
                config,
            });
        self.forward(&tenant, message, "config_validation").await
    }

    async fn forward(&self, tenant: &TenantAccess, message: Message, target: &str) -> Result<Response> {
        let entry = self.directory.resolve(&tenant.id).await?;
        self.send_to(&entry, tenant, message, target).await
    }

    async fn send_to(
        &self,
        entry: &DirectoryEntry,
        tenant: &TenantAccess,
        message: Message,
        target: &str,
    ) -> Result<Response> {
        let message = self.hook.on_send(tenant, message).await?;
        let started_at = Instant::now();
        let response = self
            .forwarder
            .send(&entry.address, &entry.secret, &message, target)
            .await?;
        self.hook
            .on_response(tenant, &message, response, started_at)
            .await
    }

    async fn subscribe(&self, tenant: &TenantAccess, message: Message) -> Result<Response> {
        let (entry, provisioned) = match self.directory.resolve(&tenant.id).await {
            Ok(entry) => {
                warn!("tenant already has an instance, forwarding subscribe only");
                (entry, false)
            }
            Err(e) if e.is_not_found() => (self.directory.provision(&tenant.id).await?, true),
            Err(e) => return Err(e.into()),
        };

        let result = self.send_to(&entry, tenant, message, SUBSCRIBE).await;
        if !provisioned {
            return result;
        }

        let failure = match &result {
            Ok(response) if !response.is_error() => None,
            Ok(response) => Some(response.error.clone()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(original) = failure {
            warn!("subscribe was not accepted, removing instance: {}", original);
            if let Err(e) = self.directory.deprovision(&tenant.id).await {
                error!("failed to remove instance after failed subscribe: {}", e);
                return Err(MultiplexError::Rollback {
                    original,
                    cause: e.to_string(),
                });
            }
        } else {
            info!("tenant subscribed");
        }
        result
    }

    async fn unsubscribe(&self, tenant: &TenantAccess, message: Message) -> Result<Response> {
        let result = self.forward(tenant, message, UNSUBSCRIBE).await;
        if let Err(e) = &result {
            warn!("unsubscribe could not be delivered: {}", e);
        }

        self.directory.deprovision(&tenant.id).await?;
        info!("tenant unsubscribed");

        // The instance is gone, re-delivery cannot succeed
        match result {
            Ok(response) if response.is_error() => Ok(response.with_retriable(false)),
            Ok(response) => Ok(response),
            Err(e) => Err(MultiplexError::Fatal(e.to_string())),
        }
    }

    async fn handle_request(&self, params: RequestParams<Dict>) -> HandlerResult {
        reply_from_response(self.forward_request(params).await?)
    }

    async fn handle_event(&self, params: EventParams) -> HandlerResult {
        reply_from_response(self.forward_event(params).await?)
    }

    async fn handle_config_validation(&self, client: TenantClient, config: Dict) -> HandlerResult {
        reply_from_response(self.forward_config_validation(&client, config).await?)
    }

    /// Build a handler registry forwarding every action of `schema`, every
    /// event it requires, and the lifecycle events.
    pub fn registry(self: &Arc<Self>, schema: &SchemaResponse) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();

        for action in schema.actions() {
            let mux = Arc::clone(self);
            registry = registry.request(
                action,
                RequestRoute::untyped(move |params: RequestParams<Dict>| {
                    let mux = Arc::clone(&mux);
                    async move { mux.handle_request(params).await }
                }),
            );
        }

        let mut events: BTreeSet<&str> = schema.required_events.iter().map(String::as_str).collect();
        events.insert(SUBSCRIBE);
        events.insert(UNSUBSCRIBE);
        for name in events {
            let mux = Arc::clone(self);
            registry = registry.event(name, move |params: EventParams| {
                let mux = Arc::clone(&mux);
                async move { mux.handle_event(params).await }
            });
        }

        let mux = Arc::clone(self);
        registry = registry.validate_config(move |client: TenantClient, config: Dict| {
            let mux = Arc::clone(&mux);
            async move { mux.handle_config_validation(client, config).await }
        });

        debug!(?registry, "multiplexer registry assembled");
        registry
    }

    /// Dispatcher serving `schema` through this multiplexer.
    pub fn dispatcher(
        self: &Arc<Self>,
        name: impl Into<String>,
        secret: impl Into<String>,
        schema: SchemaResponse,
    ) -> Dispatcher {
        let registry = self.registry(&schema);
        Dispatcher::new(name, secret, registry).with_schema(schema)
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("directory", &self.directory)
            .field("forwarder", &self.forwarder)
            .finish_non_exhaustive()
    }
}
