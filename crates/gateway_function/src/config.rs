//! Process configuration, read once from the environment at start.
//!
//! Optional settings stay `None` until an operation needs them; the operation
//! then fails with `MissingConfiguration` naming the variable.

use std::time::Duration;

use gateway_core::job_spec::JobSettings;
use gateway_core::registry::ResourceRegistry;
use gateway_core::token_cache::DEFAULT_TOKEN_CACHE_CAPACITY;
use gateway_core::GatewayError;

use crate::observability::LogFormat;

pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayConfig {
    pub cosmos_endpoint: Option<String>,
    pub cosmos_database: Option<String>,
    pub broker_url: Option<String>,
    pub broker_scope: Option<String>,
    pub storage_account: Option<String>,
    pub public_storage_account: Option<String>,
    pub subscription_id: Option<String>,
    pub principal_header: Option<String>,
    pub resource_group: Option<String>,
    pub image: Option<String>,
    pub region: Option<String>,
    pub region_short: Option<String>,
    pub location: Option<String>,
    pub environment: Option<String>,
    pub tf_state_container: Option<String>,
    pub user_assigned_identity: Option<String>,
    pub subnet_id: Option<String>,
    pub tf_client_id: Option<String>,
    pub tf_tenant_id: Option<String>,
    pub log_analytics_workspace_id: Option<String>,
    pub log_analytics_workspace_key: Option<String>,
    pub managed_identity_client_id: Option<String>,
    pub token_cache_ttl: Duration,
    pub token_cache_capacity: usize,
    pub port: u16,
    pub log_format: LogFormat,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let number = |key: &str| value(key).and_then(|raw| raw.parse::<u64>().ok());

        Self {
            cosmos_endpoint: value("COSMOS_DB_ENDPOINT"),
            cosmos_database: value("COSMOS_DB_DATABASE"),
            broker_url: value("BROKER_URL"),
            broker_scope: value("BROKER_SCOPE"),
            storage_account: value("STORAGE_ACCOUNT_NAME"),
            public_storage_account: value("PUBLIC_STORAGE_ACCOUNT_NAME"),
            subscription_id: value("AZURE_SUBSCRIPTION_ID"),
            principal_header: value("PRINCIPAL_HEADER").map(|header| header.to_ascii_lowercase()),
            resource_group: value("RESOURCE_GROUP_NAME"),
            image: value("IMAGE"),
            region: value("REGION"),
            region_short: value("REGION_SHORT"),
            location: value("LOCATION"),
            environment: value("INFRAWEAVE_ENV"),
            tf_state_container: value("TF_STATE_CONTAINER"),
            user_assigned_identity: value("USER_ASSIGNED_IDENTITY_RESOURCE_ID"),
            subnet_id: value("ACI_SUBNET_ID"),
            tf_client_id: value("TF_AZURE_CLIENT_ID"),
            tf_tenant_id: value("TF_AZURE_TENANT_ID"),
            log_analytics_workspace_id: value("LOG_ANALYTICS_WORKSPACE_ID"),
            log_analytics_workspace_key: value("LOG_ANALYTICS_WORKSPACE_KEY"),
            managed_identity_client_id: value("AZURE_CLIENT_ID"),
            token_cache_ttl: Duration::from_secs(number("TOKEN_CACHE_TTL_SECS").unwrap_or(0)),
            token_cache_capacity: number("TOKEN_CACHE_CAPACITY")
                .and_then(|capacity| usize::try_from(capacity).ok())
                .unwrap_or(DEFAULT_TOKEN_CACHE_CAPACITY),
            port: number("FUNCTIONS_CUSTOMHANDLER_PORT")
                .and_then(|port| u16::try_from(port).ok())
                .unwrap_or(DEFAULT_PORT),
            log_format: match value("LOG_FORMAT").as_deref() {
                Some("pretty") => LogFormat::Pretty,
                _ => LogFormat::Json,
            },
        }
    }

    /// Principal used when the auth layer forwards none: the deployment's
    /// own subscription.
    pub fn default_principal(&self) -> Result<&str, GatewayError> {
        required(&self.subscription_id, "AZURE_SUBSCRIPTION_ID")
    }

    pub fn job_settings(&self) -> Result<JobSettings, GatewayError> {
        Ok(JobSettings {
            subscription_id: required(&self.subscription_id, "AZURE_SUBSCRIPTION_ID")?.to_string(),
            resource_group: required(&self.resource_group, "RESOURCE_GROUP_NAME")?.to_string(),
            image: required(&self.image, "IMAGE")?.to_string(),
            location: required(&self.location, "LOCATION")?.to_string(),
            region: self.region.clone(),
            region_short: required(&self.region_short, "REGION_SHORT")?.to_string(),
            environment: self.environment.clone(),
            tf_state_container: self.tf_state_container.clone(),
            storage_account: self.storage_account.clone(),
            user_assigned_identity: self.user_assigned_identity.clone(),
            subnet_id: self.subnet_id.clone(),
            tf_client_id: self.tf_client_id.clone(),
            tf_tenant_id: self.tf_tenant_id.clone(),
            log_analytics_workspace_id: self.log_analytics_workspace_id.clone(),
            log_analytics_workspace_key: self.log_analytics_workspace_key.clone(),
        })
    }
}

pub fn registry_from_env() -> ResourceRegistry {
    ResourceRegistry::from_lookup(|key| std::env::var(key).ok())
}

pub fn required<'a>(value: &'a Option<String>, variable: &str) -> Result<&'a str, GatewayError> {
    value
        .as_deref()
        .ok_or_else(|| GatewayError::MissingConfiguration(variable.to_string()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> GatewayConfig {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        GatewayConfig::from_lookup(|key| values.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]);

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.token_cache_ttl, Duration::ZERO);
        assert_eq!(config.token_cache_capacity, DEFAULT_TOKEN_CACHE_CAPACITY);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn missing_subscription_is_reported_by_name() {
        let error = config(&[("AZURE_SUBSCRIPTION_ID", "   ")])
            .default_principal()
            .expect_err("blank subscription is missing");

        assert_eq!(
            error,
            GatewayError::MissingConfiguration("AZURE_SUBSCRIPTION_ID".to_string())
        );
        assert_eq!(error.status_code(), 500);
    }

    #[test]
    fn job_settings_require_core_launch_values() {
        let partial = config(&[
            ("AZURE_SUBSCRIPTION_ID", "sub"),
            ("RESOURCE_GROUP_NAME", "rg"),
            ("IMAGE", "runner:1"),
        ]);
        assert_eq!(
            partial.job_settings(),
            Err(GatewayError::MissingConfiguration("LOCATION".to_string()))
        );

        let complete = config(&[
            ("AZURE_SUBSCRIPTION_ID", "sub"),
            ("RESOURCE_GROUP_NAME", "rg"),
            ("IMAGE", "runner:1"),
            ("LOCATION", "westeurope"),
            ("REGION_SHORT", "weu"),
            ("TF_STATE_CONTAINER", "tfstate"),
        ]);
        let settings = complete.job_settings().expect("settings complete");
        assert_eq!(settings.region_short, "weu");
        assert_eq!(settings.tf_state_container.as_deref(), Some("tfstate"));
    }

    #[test]
    fn numeric_settings_ignore_garbage() {
        let config = config(&[
            ("FUNCTIONS_CUSTOMHANDLER_PORT", "not-a-port"),
            ("TOKEN_CACHE_TTL_SECS", "300"),
            ("PRINCIPAL_HEADER", "X-Tenant-Principal"),
        ]);

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.token_cache_ttl, Duration::from_secs(300));
        assert_eq!(config.principal_header.as_deref(), Some("x-tenant-principal"));
    }
}
