//! Log-analytics workspace queries.

use std::sync::Arc;

use gateway_core::GatewayError;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::credential::{AccessTokenSource, LOG_ANALYTICS_RESOURCE};
use super::{describe_rejection, http_client, BACKEND_TIMEOUT};

const QUERY_ENDPOINT: &str = "https://api.loganalytics.io/v1/workspaces";

/// First result table of a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl LogTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }
}

pub trait LogQuery: Send + Sync {
    fn query(&self, workspace_id: &str, query: &str, timespan: &str)
        -> Result<LogTable, GatewayError>;
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    tables: Vec<RawTable>,
}

#[derive(Debug, Deserialize)]
struct RawTable {
    columns: Vec<RawColumn>,
    rows: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct RawColumn {
    name: String,
}

impl From<RawTable> for LogTable {
    fn from(table: RawTable) -> Self {
        Self {
            columns: table.columns.into_iter().map(|column| column.name).collect(),
            rows: table.rows,
        }
    }
}

pub struct LogAnalyticsRest {
    client: Client,
    identity: Arc<dyn AccessTokenSource>,
}

impl LogAnalyticsRest {
    pub fn new(identity: Arc<dyn AccessTokenSource>) -> Result<Self, GatewayError> {
        Ok(Self {
            client: http_client(BACKEND_TIMEOUT).map_err(GatewayError::LogQuery)?,
            identity,
        })
    }
}

impl LogQuery for LogAnalyticsRest {
    fn query(
        &self,
        workspace_id: &str,
        query: &str,
        timespan: &str,
    ) -> Result<LogTable, GatewayError> {
        let response = self
            .client
            .post(format!("{QUERY_ENDPOINT}/{workspace_id}/query"))
            .bearer_auth(self.identity.access_token(LOG_ANALYTICS_RESOURCE)?)
            .json(&json!({ "query": query, "timespan": timespan }))
            .send()
            .map_err(|error| GatewayError::LogQuery(error.to_string()))?;
        if !response.status().is_success() {
            return Err(GatewayError::LogQuery(describe_rejection(response)));
        }
        let body: QueryResponse = response
            .json()
            .map_err(|error| GatewayError::LogQuery(format!("invalid query response: {error}")))?;
        Ok(body
            .tables
            .into_iter()
            .next()
            .map(LogTable::from)
            .unwrap_or_default())
    }
}
