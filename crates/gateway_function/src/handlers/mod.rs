//! Per-event operations and the dispatcher that routes to them.
//!
//! Handlers are plain functions over [`Gateway`]: the resource registry, the
//! configuration, and one boxed adapter per external collaborator. Tests
//! swap adapters for in-memory fakes.

pub mod dispatch;
pub mod jobs;
pub mod logs;
pub mod objects;
pub mod store;

use std::sync::Arc;

use gateway_core::registry::ResourceRegistry;
use gateway_core::token_cache::ScopedTokenCache;
use gateway_core::GatewayError;

use crate::adapters::blob_store::{AzureBlobRest, BlobStore, HttpSourceFetcher, SourceFetcher};
use crate::adapters::broker::{CachingTokenBroker, HttpTokenBroker, TokenBroker};
use crate::adapters::credential::{AccessTokenSource, ManagedIdentityCredential};
use crate::adapters::document_store::{CosmosRestStore, DocumentStore};
use crate::adapters::log_analytics::{LogAnalyticsRest, LogQuery};
use crate::adapters::orchestrator::{AciRestOrchestrator, JobOrchestrator};
use crate::config::GatewayConfig;

pub use dispatch::{handle_api_request, panic_response, ApiResponse};

pub struct Backends {
    pub broker: Box<dyn TokenBroker>,
    pub documents: Box<dyn DocumentStore>,
    pub blobs: Box<dyn BlobStore>,
    pub fetcher: Box<dyn SourceFetcher>,
    pub orchestrator: Box<dyn JobOrchestrator>,
    pub logs: Box<dyn LogQuery>,
}

pub struct Gateway {
    pub registry: ResourceRegistry,
    pub config: GatewayConfig,
    pub backends: Backends,
}

impl Gateway {
    pub fn new(registry: ResourceRegistry, config: GatewayConfig, backends: Backends) -> Self {
        Self {
            registry,
            config,
            backends,
        }
    }

    /// Production wiring: REST adapters sharing one managed identity.
    pub fn from_config(
        registry: ResourceRegistry,
        config: GatewayConfig,
    ) -> Result<Self, GatewayError> {
        let identity: Arc<dyn AccessTokenSource> = Arc::new(ManagedIdentityCredential::from_env(
            config.managed_identity_client_id.clone(),
        )?);

        let http_broker = HttpTokenBroker::new(
            config.broker_url.clone(),
            config.broker_scope.clone(),
            Arc::clone(&identity),
        )?;
        let broker: Box<dyn TokenBroker> = if config.token_cache_ttl.is_zero() {
            Box::new(http_broker)
        } else {
            Box::new(CachingTokenBroker::new(
                Box::new(http_broker),
                ScopedTokenCache::new(config.token_cache_ttl, config.token_cache_capacity),
            ))
        };

        let backends = Backends {
            broker,
            documents: Box::new(CosmosRestStore::new(
                config.cosmos_endpoint.clone(),
                config.cosmos_database.clone(),
                Arc::clone(&identity),
            )?),
            blobs: Box::new(AzureBlobRest::new(Arc::clone(&identity))?),
            fetcher: Box::new(HttpSourceFetcher::new()?),
            orchestrator: Box::new(AciRestOrchestrator::new(Arc::clone(&identity))?),
            logs: Box::new(LogAnalyticsRest::new(identity)?),
        };

        tracing::info!(
            component = "gateway",
            event = "backends_ready",
            token_cache_ttl_secs = config.token_cache_ttl.as_secs(),
        );
        Ok(Self::new(registry, config, backends))
    }

    /// The tenant a request acts for: the principal forwarded by the auth
    /// layer, or the deployment's own subscription when none was forwarded.
    pub fn principal<'a>(&'a self, caller: &'a Caller) -> Result<&'a str, GatewayError> {
        match caller.forwarded_principal() {
            Some(principal) => Ok(principal),
            None => self.config.default_principal(),
        }
    }
}

/// Identity the transport layer attached to a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller {
    forwarded_principal: Option<String>,
}

impl Caller {
    pub fn new(forwarded_principal: Option<String>) -> Self {
        Self {
            forwarded_principal: forwarded_principal
                .map(|principal| principal.trim().to_string())
                .filter(|principal| !principal.is_empty()),
        }
    }

    pub fn forwarded_principal(&self) -> Option<&str> {
        self.forwarded_principal.as_deref()
    }
}

#[cfg(test)]
pub(crate) mod fakes;
