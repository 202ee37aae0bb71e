//! Static mapping from logical resource names to physical backing-store names.
//!
//! Built once at process start from configuration and never mutated.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{GatewayError, ResourceKind};

pub const DEFAULT_SHARED_TABLES: &[&str] = &["modules", "policies", "config"];
pub const DEFAULT_PRIVATE_CONTAINER_PREFIX: &str = "workload-";

/// Logical table name and the environment variable holding its container name.
pub const TABLE_VARIABLES: &[(&str, &str)] = &[
    ("events", "EVENTS_TABLE_NAME"),
    ("modules", "MODULES_TABLE_NAME"),
    ("policies", "POLICIES_TABLE_NAME"),
    ("deployments", "DEPLOYMENTS_TABLE_NAME"),
    ("change_records", "CHANGE_RECORDS_TABLE_NAME"),
    ("config", "CONFIG_TABLE_NAME"),
];

/// Logical bucket name and the environment variable holding its container name.
pub const BUCKET_VARIABLES: &[(&str, &str)] = &[
    ("modules", "MODULE_S3_BUCKET"),
    ("policies", "POLICY_S3_BUCKET"),
    ("change_records", "CHANGE_RECORD_S3_BUCKET"),
    ("providers", "PROVIDERS_S3_BUCKET"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketVisibility {
    /// Reachable only through broker-issued, container-scoped credentials.
    TenantPrivate,
    /// Readable through delegated-signing URLs issued by this service.
    Public,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRegistry {
    tables: BTreeMap<String, String>,
    buckets: BTreeMap<String, String>,
    shared_tables: BTreeSet<String>,
    private_container_prefix: String,
}

impl ResourceRegistry {
    pub fn new(
        tables: BTreeMap<String, String>,
        buckets: BTreeMap<String, String>,
        shared_tables: BTreeSet<String>,
        private_container_prefix: impl Into<String>,
    ) -> Self {
        Self {
            tables,
            buckets,
            shared_tables,
            private_container_prefix: private_container_prefix.into(),
        }
    }

    /// Builds the registry from a variable lookup. Unset or blank variables
    /// leave the logical name unregistered.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let resolve = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .filter_map(|(logical, variable)| {
                    lookup(variable)
                        .map(|value| value.trim().to_string())
                        .filter(|value| !value.is_empty())
                        .map(|value| (logical.to_string(), value))
                })
                .collect::<BTreeMap<_, _>>()
        };

        let shared_tables = match lookup("SHARED_TABLES") {
            Some(value) => value
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
            None => DEFAULT_SHARED_TABLES
                .iter()
                .map(|name| name.to_string())
                .collect(),
        };

        let private_container_prefix = lookup("PRIVATE_CONTAINER_PREFIX")
            .unwrap_or_else(|| DEFAULT_PRIVATE_CONTAINER_PREFIX.to_string());

        Self::new(
            resolve(TABLE_VARIABLES),
            resolve(BUCKET_VARIABLES),
            shared_tables,
            private_container_prefix,
        )
    }

    pub fn table(&self, logical: &str) -> Result<&str, GatewayError> {
        self.tables
            .get(logical)
            .map(String::as_str)
            .ok_or_else(|| GatewayError::UnknownResource {
                kind: ResourceKind::Table,
                name: logical.to_string(),
            })
    }

    pub fn bucket(&self, logical: &str) -> Result<&str, GatewayError> {
        self.buckets
            .get(logical)
            .map(String::as_str)
            .ok_or_else(|| GatewayError::UnknownResource {
                kind: ResourceKind::Bucket,
                name: logical.to_string(),
            })
    }

    /// Shared tables are readable across every tenant's partition.
    pub fn is_shared_table(&self, logical: &str) -> bool {
        self.shared_tables.contains(logical)
    }

    pub fn container_visibility(&self, container: &str) -> BucketVisibility {
        if !self.private_container_prefix.is_empty()
            && container.starts_with(&self.private_container_prefix)
        {
            BucketVisibility::TenantPrivate
        } else {
            BucketVisibility::Public
        }
    }
}
