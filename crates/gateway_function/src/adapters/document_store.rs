//! Partitioned document store (SQL REST dialect).

use std::sync::Arc;

use gateway_core::GatewayError;
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use url::form_urlencoded;

use super::credential::AccessTokenSource;
use super::{describe_rejection, http_client, request_date, BACKEND_TIMEOUT};
use crate::config::required;

const API_VERSION: &str = "2018-12-31";
pub const COSMOS_RESOURCE: &str = "https://cosmos.azure.com";

/// How a store call authenticates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCredential {
    /// Broker-issued token valid for exactly one container.
    ResourceToken(String),
    /// This service's own identity; used only for shared-table reads.
    ServiceIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryScope {
    Partition(String),
    CrossPartition,
}

pub trait DocumentStore: Send + Sync {
    fn query(
        &self,
        container: &str,
        query: &str,
        scope: &QueryScope,
        credential: &StoreCredential,
    ) -> Result<Vec<Value>, GatewayError>;

    /// Idempotent upsert; returns the stored document.
    fn upsert(
        &self,
        container: &str,
        document: &Map<String, Value>,
        partition_key: &str,
        credential: &StoreCredential,
    ) -> Result<Value, GatewayError>;

    fn delete(
        &self,
        container: &str,
        id: &str,
        partition_key: &str,
        credential: &StoreCredential,
    ) -> Result<(), GatewayError>;
}

#[derive(Debug, Deserialize)]
struct QueryPage {
    #[serde(rename = "Documents", default)]
    documents: Vec<Value>,
}

pub struct CosmosRestStore {
    client: Client,
    endpoint: Option<String>,
    database: Option<String>,
    identity: Arc<dyn AccessTokenSource>,
}

impl CosmosRestStore {
    pub fn new(
        endpoint: Option<String>,
        database: Option<String>,
        identity: Arc<dyn AccessTokenSource>,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            client: http_client(BACKEND_TIMEOUT).map_err(GatewayError::Store)?,
            endpoint,
            database,
            identity,
        })
    }

    fn documents_url(&self, container: &str) -> Result<String, GatewayError> {
        let endpoint = required(&self.endpoint, "COSMOS_DB_ENDPOINT")?;
        let database = required(&self.database, "COSMOS_DB_DATABASE")?;
        Ok(format!(
            "{}/dbs/{database}/colls/{container}/docs",
            endpoint.trim_end_matches('/')
        ))
    }

    fn authorization(&self, credential: &StoreCredential) -> Result<String, GatewayError> {
        let raw = match credential {
            StoreCredential::ResourceToken(token) => token.clone(),
            StoreCredential::ServiceIdentity => format!(
                "type=aad&ver=1.0&sig={}",
                self.identity.access_token(COSMOS_RESOURCE)?
            ),
        };
        Ok(form_urlencoded::byte_serialize(raw.as_bytes()).collect())
    }

    fn authorized(
        &self,
        request: RequestBuilder,
        credential: &StoreCredential,
    ) -> Result<RequestBuilder, GatewayError> {
        Ok(request
            .header("authorization", self.authorization(credential)?)
            .header("x-ms-version", API_VERSION)
            .header("x-ms-date", request_date()))
    }
}

fn partition_header(partition_key: &str) -> String {
    json!([partition_key]).to_string()
}

fn transport(error: reqwest::Error) -> GatewayError {
    GatewayError::Store(error.to_string())
}

impl DocumentStore for CosmosRestStore {
    fn query(
        &self,
        container: &str,
        query: &str,
        scope: &QueryScope,
        credential: &StoreCredential,
    ) -> Result<Vec<Value>, GatewayError> {
        let url = self.documents_url(container)?;
        let body = json!({ "query": query, "parameters": [] });
        let mut documents = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self
                .authorized(self.client.post(&url), credential)?
                .header("content-type", "application/query+json")
                .header("x-ms-documentdb-isquery", "True")
                .json(&body);
            request = match scope {
                QueryScope::Partition(partition_key) => {
                    request.header("x-ms-documentdb-partitionkey", partition_header(partition_key))
                }
                QueryScope::CrossPartition => {
                    request.header("x-ms-documentdb-query-enablecrosspartition", "True")
                }
            };
            if let Some(token) = &continuation {
                request = request.header("x-ms-continuation", token);
            }

            let response = request.send().map_err(transport)?;
            if !response.status().is_success() {
                return Err(GatewayError::Store(describe_rejection(response)));
            }
            continuation = response
                .headers()
                .get("x-ms-continuation")
                .and_then(|value| value.to_str().ok())
                .filter(|value| !value.is_empty())
                .map(str::to_string);
            let page: QueryPage = response
                .json()
                .map_err(|error| GatewayError::Store(format!("invalid query page: {error}")))?;
            documents.extend(page.documents);

            if continuation.is_none() {
                return Ok(documents);
            }
        }
    }

    fn upsert(
        &self,
        container: &str,
        document: &Map<String, Value>,
        partition_key: &str,
        credential: &StoreCredential,
    ) -> Result<Value, GatewayError> {
        let response = self
            .authorized(self.client.post(self.documents_url(container)?), credential)?
            .header("x-ms-documentdb-is-upsert", "True")
            .header("x-ms-documentdb-partitionkey", partition_header(partition_key))
            .json(document)
            .send()
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(GatewayError::Store(describe_rejection(response)));
        }
        response
            .json()
            .map_err(|error| GatewayError::Store(format!("invalid upsert response: {error}")))
    }

    fn delete(
        &self,
        container: &str,
        id: &str,
        partition_key: &str,
        credential: &StoreCredential,
    ) -> Result<(), GatewayError> {
        let encoded_id: String = form_urlencoded::byte_serialize(id.as_bytes()).collect();
        let url = format!("{}/{encoded_id}", self.documents_url(container)?);
        let response = self
            .authorized(self.client.delete(url), credential)?
            .header("x-ms-documentdb-partitionkey", partition_header(partition_key))
            .send()
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(GatewayError::Store(describe_rejection(response)));
        }
        Ok(())
    }
}
