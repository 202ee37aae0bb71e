//! Identity broker client.
//!
//! Exchanges a tenant principal for per-resource scoped credentials. The
//! broker's answer is authoritative: any non-success response (or a success
//! response that is not a token map) is surfaced with its original status and
//! raw body, never reinterpreted. Calls are not retried.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use gateway_core::token_cache::ScopedTokenCache;
use gateway_core::GatewayError;
use reqwest::blocking::Client;
use serde_json::{json, Value};

use super::credential::{resource_from_scope, AccessTokenSource};
use super::http_client;
use crate::config::required;

pub const BROKER_TIMEOUT: Duration = Duration::from_secs(30);

/// Physical resource name → credential valid for that resource only. For
/// blob containers the credential is a ready-made access query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopedTokens(BTreeMap<String, String>);

impl ScopedTokens {
    pub fn new(tokens: BTreeMap<String, String>) -> Self {
        Self(tokens)
    }

    pub fn for_resource(&self, resource: &str) -> Result<&str, GatewayError> {
        self.0
            .get(resource)
            .map(String::as_str)
            .ok_or_else(|| GatewayError::ScopeNotGranted(resource.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .map(|(resource, token)| (resource.as_str(), token.as_str()))
    }

    fn from_broker_body(body: &str) -> Option<Self> {
        let Value::Object(entries) = serde_json::from_str::<Value>(body).ok()? else {
            return None;
        };
        Some(Self(
            entries
                .into_iter()
                .filter_map(|(resource, token)| match token {
                    Value::String(token) => Some((resource, token)),
                    _ => None,
                })
                .collect(),
        ))
    }
}

pub trait TokenBroker: Send + Sync {
    fn obtain(&self, principal: &str) -> Result<ScopedTokens, GatewayError>;

    fn scoped_token(&self, principal: &str, resource: &str) -> Result<String, GatewayError> {
        self.obtain(principal)?
            .for_resource(resource)
            .map(str::to_string)
    }
}

pub struct HttpTokenBroker {
    client: Client,
    broker_url: Option<String>,
    scope: Option<String>,
    identity: Arc<dyn AccessTokenSource>,
}

impl HttpTokenBroker {
    pub fn new(
        broker_url: Option<String>,
        scope: Option<String>,
        identity: Arc<dyn AccessTokenSource>,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            client: http_client(BROKER_TIMEOUT).map_err(GatewayError::BrokerUnavailable)?,
            broker_url,
            scope,
            identity,
        })
    }
}

impl TokenBroker for HttpTokenBroker {
    fn obtain(&self, principal: &str) -> Result<ScopedTokens, GatewayError> {
        let broker_url = required(&self.broker_url, "BROKER_URL")?;
        let scope = required(&self.scope, "BROKER_SCOPE")?;
        let service_token = self.identity.access_token(resource_from_scope(scope))?;

        let response = self
            .client
            .post(format!("{}/token", broker_url.trim_end_matches('/')))
            .bearer_auth(service_token)
            .json(&json!({ "data": { "partitionKey": principal } }))
            .send()
            .map_err(|error| GatewayError::BrokerUnavailable(error.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|error| GatewayError::BrokerUnavailable(error.to_string()))?;

        if !status.is_success() {
            tracing::warn!(
                component = "broker",
                event = "broker_rejected",
                status = status.as_u16(),
            );
            return Err(GatewayError::Broker {
                status: status.as_u16(),
                body,
            });
        }

        ScopedTokens::from_broker_body(&body).ok_or(GatewayError::Broker {
            status: status.as_u16(),
            body,
        })
    }
}

/// Broker wrapper that reuses scoped tokens across requests until their TTL
/// lapses. Misses fall through to the wrapped broker.
pub struct CachingTokenBroker {
    inner: Box<dyn TokenBroker>,
    cache: ScopedTokenCache,
}

impl CachingTokenBroker {
    pub fn new(inner: Box<dyn TokenBroker>, cache: ScopedTokenCache) -> Self {
        Self { inner, cache }
    }
}

impl TokenBroker for CachingTokenBroker {
    fn obtain(&self, principal: &str) -> Result<ScopedTokens, GatewayError> {
        let tokens = self.inner.obtain(principal)?;
        for (resource, token) in tokens.iter() {
            self.cache.insert(principal, resource, token.to_string());
        }
        Ok(tokens)
    }

    fn scoped_token(&self, principal: &str, resource: &str) -> Result<String, GatewayError> {
        if let Some(token) = self.cache.get(principal, resource) {
            return Ok(token);
        }
        self.obtain(principal)?
            .for_resource(resource)
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingBroker {
        calls: AtomicUsize,
    }

    impl TokenBroker for CountingBroker {
        fn obtain(&self, principal: &str) -> Result<ScopedTokens, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ScopedTokens::new(BTreeMap::from([
                ("deployments".to_string(), format!("tok-{principal}-deployments")),
                ("events".to_string(), format!("tok-{principal}-events")),
            ])))
        }
    }

    #[test]
    fn broker_body_keeps_only_string_tokens() {
        let tokens = ScopedTokens::from_broker_body(r#"{"deployments":"sig=1","meta":{"x":1}}"#)
            .expect("object body parses");

        assert_eq!(tokens.for_resource("deployments"), Ok("sig=1"));
        assert_eq!(
            tokens.for_resource("meta"),
            Err(GatewayError::ScopeNotGranted("meta".to_string()))
        );
        assert!(ScopedTokens::from_broker_body("[]").is_none());
        assert!(ScopedTokens::from_broker_body("denied").is_none());
    }

    #[test]
    fn caching_broker_reuses_tokens_per_principal() {
        let broker = CachingTokenBroker::new(
            Box::new(CountingBroker {
                calls: AtomicUsize::new(0),
            }),
            ScopedTokenCache::new(Duration::from_secs(300), 16),
        );

        assert_eq!(
            broker.scoped_token("tenant-a", "deployments"),
            Ok("tok-tenant-a-deployments".to_string())
        );
        assert_eq!(
            broker.scoped_token("tenant-a", "events"),
            Ok("tok-tenant-a-events".to_string())
        );
        assert_eq!(
            broker.scoped_token("tenant-b", "events"),
            Ok("tok-tenant-b-events".to_string())
        );
        assert_eq!(broker.cache.len(), 4);
    }

    #[test]
    fn disabled_cache_always_asks_the_broker() {
        let broker = CachingTokenBroker::new(
            Box::new(CountingBroker {
                calls: AtomicUsize::new(0),
            }),
            ScopedTokenCache::new(Duration::ZERO, 16),
        );

        broker
            .scoped_token("tenant-a", "deployments")
            .expect("token issued");
        broker
            .scoped_token("tenant-a", "deployments")
            .expect("token issued");
        assert!(broker.cache.is_empty());
    }
}
