//! This service's own managed identity.

use std::time::Duration;

use gateway_core::GatewayError;
use reqwest::blocking::Client;
use serde::Deserialize;

use super::http_client;

const IDENTITY_TIMEOUT: Duration = Duration::from_secs(10);
const INSTANCE_METADATA_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

pub const STORAGE_RESOURCE: &str = "https://storage.azure.com/";
pub const MANAGEMENT_RESOURCE: &str = "https://management.azure.com/";
pub const LOG_ANALYTICS_RESOURCE: &str = "https://api.loganalytics.io";

/// Issues bearer tokens for this service, never for a tenant.
pub trait AccessTokenSource: Send + Sync {
    fn access_token(&self, resource: &str) -> Result<String, GatewayError>;
}

/// Converts an OAuth scope such as `api://broker/.default` to its resource.
pub fn resource_from_scope(scope: &str) -> &str {
    scope.strip_suffix("/.default").unwrap_or(scope)
}

#[derive(Debug, Clone)]
enum IdentityEndpoint {
    /// Serverless host endpoint (`IDENTITY_ENDPOINT` + `IDENTITY_HEADER`).
    Hosted { endpoint: String, secret: String },
    InstanceMetadata,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Clone)]
pub struct ManagedIdentityCredential {
    client: Client,
    endpoint: IdentityEndpoint,
    client_id: Option<String>,
}

impl ManagedIdentityCredential {
    pub fn from_env(client_id: Option<String>) -> Result<Self, GatewayError> {
        let endpoint = match (
            std::env::var("IDENTITY_ENDPOINT").ok(),
            std::env::var("IDENTITY_HEADER").ok(),
        ) {
            (Some(endpoint), Some(secret)) => IdentityEndpoint::Hosted { endpoint, secret },
            _ => IdentityEndpoint::InstanceMetadata,
        };
        Ok(Self {
            client: http_client(IDENTITY_TIMEOUT).map_err(GatewayError::Identity)?,
            endpoint,
            client_id,
        })
    }
}

impl AccessTokenSource for ManagedIdentityCredential {
    fn access_token(&self, resource: &str) -> Result<String, GatewayError> {
        let mut request = match &self.endpoint {
            IdentityEndpoint::Hosted { endpoint, secret } => self
                .client
                .get(endpoint)
                .query(&[("api-version", "2019-08-01"), ("resource", resource)])
                .header("X-IDENTITY-HEADER", secret),
            IdentityEndpoint::InstanceMetadata => self
                .client
                .get(INSTANCE_METADATA_ENDPOINT)
                .query(&[("api-version", "2018-02-01"), ("resource", resource)])
                .header("Metadata", "true"),
        };
        if let Some(client_id) = &self.client_id {
            request = request.query(&[("client_id", client_id.as_str())]);
        }

        let response = request
            .send()
            .map_err(|error| GatewayError::Identity(error.to_string()))?;
        if !response.status().is_success() {
            return Err(GatewayError::Identity(super::describe_rejection(response)));
        }
        response
            .json::<TokenResponse>()
            .map(|token| token.access_token)
            .map_err(|error| GatewayError::Identity(format!("invalid token response: {error}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_suffix_is_stripped() {
        assert_eq!(
            resource_from_scope("api://token-broker/.default"),
            "api://token-broker"
        );
        assert_eq!(resource_from_scope("https://storage.azure.com/"), "https://storage.azure.com/");
    }
}
