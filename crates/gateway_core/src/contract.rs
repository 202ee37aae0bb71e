//! Request and response shapes of the single `{event, data}` endpoint.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GatewayError;

/// Raw request envelope. Event-specific fields are decoded lazily so that an
/// unknown event is reported before its payload is inspected.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ApiRequest {
    #[serde(default)]
    pub event: Option<Value>,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    /// Batch items of `transact_write`, accepted at the top level. Only
    /// inspected for that event.
    #[serde(default)]
    pub items: Option<Value>,
}

impl ApiRequest {
    pub fn parse(body: &[u8]) -> Result<Self, GatewayError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|error| GatewayError::MalformedRequest(error.to_string()))?;
        if !value.is_object() {
            return Err(GatewayError::MalformedRequest(
                "request body must be a JSON object".to_string(),
            ));
        }
        serde_json::from_value(value)
            .map_err(|error| GatewayError::MalformedRequest(error.to_string()))
    }

    /// The event name as sent. Non-string values are rendered as JSON text
    /// so they can be reported back as an unknown event.
    pub fn event_name(&self) -> Option<String> {
        match &self.event {
            None | Some(Value::Null) => None,
            Some(Value::String(name)) => Some(name.clone()),
            Some(other) => Some(other.to_string()),
        }
    }

    pub fn table(&self) -> Result<&str, GatewayError> {
        self.table
            .as_deref()
            .filter(|table| !table.is_empty())
            .ok_or_else(|| GatewayError::missing_field("table"))
    }

    /// The `data` object, or an empty object when absent.
    pub fn data_object(&self) -> Result<Map<String, Value>, GatewayError> {
        match &self.data {
            None | Some(Value::Null) => Ok(Map::new()),
            Some(Value::Object(map)) => Ok(map.clone()),
            Some(_) => Err(GatewayError::BadRequest(
                "data must be a JSON object".to_string(),
            )),
        }
    }

    /// Decodes `data` into an event-specific payload.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, GatewayError> {
        serde_json::from_value(Value::Object(self.data_object()?))
            .map_err(|error| GatewayError::BadRequest(format!("Invalid data: {error}")))
    }

    /// Raw batch items from `data.items`, falling back to top-level `items`.
    /// Items are decoded one by one by the batch writer.
    pub fn batch_items(&self) -> Result<Vec<Value>, GatewayError> {
        let raw = match self.data_object()?.remove("items") {
            Some(items) => items,
            None => self
                .items
                .clone()
                .ok_or_else(|| GatewayError::missing_field("items"))?,
        };
        match raw {
            Value::Array(items) => Ok(items),
            _ => Err(GatewayError::BadRequest(
                "items must be an array".to_string(),
            )),
        }
    }
}

/// The closed set of supported events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiEvent {
    InsertDb,
    ReadDb,
    TransactWrite,
    StartRunner,
    UploadFileBase64,
    UploadFileUrl,
    GeneratePresignedUrl,
    ReadLogs,
}

impl ApiEvent {
    pub const ALL: [ApiEvent; 8] = [
        Self::InsertDb,
        Self::ReadDb,
        Self::TransactWrite,
        Self::StartRunner,
        Self::UploadFileBase64,
        Self::UploadFileUrl,
        Self::GeneratePresignedUrl,
        Self::ReadLogs,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InsertDb => "insert_db",
            Self::ReadDb => "read_db",
            Self::TransactWrite => "transact_write",
            Self::StartRunner => "start_runner",
            Self::UploadFileBase64 => "upload_file_base64",
            Self::UploadFileUrl => "upload_file_url",
            Self::GeneratePresignedUrl => "generate_presigned_url",
            Self::ReadLogs => "read_logs",
        }
    }

    /// Exact, case-sensitive match against the supported event names.
    pub fn parse(name: Option<&str>) -> Result<Self, GatewayError> {
        let name = name.unwrap_or_default();
        Self::ALL
            .into_iter()
            .find(|event| event.as_str() == name)
            .ok_or_else(|| {
                GatewayError::UnknownEvent(if name.is_empty() { "None" } else { name }.to_string())
            })
    }
}

impl std::fmt::Display for ApiEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadQuery {
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum BatchItem {
    Put {
        #[serde(rename = "TableName")]
        table_name: String,
        #[serde(rename = "Item")]
        item: Map<String, Value>,
    },
    Delete {
        #[serde(rename = "TableName")]
        table_name: String,
        #[serde(rename = "Key")]
        key: DeleteKey,
    },
}

impl BatchItem {
    /// Decodes the item at `index` of a batch.
    pub fn decode(index: usize, raw: Value) -> Result<Self, GatewayError> {
        serde_json::from_value(raw)
            .map_err(|error| GatewayError::BadRequest(format!("Invalid item {index}: {error}")))
    }

    pub fn table_name(&self) -> &str {
        match self {
            Self::Put { table_name, .. } | Self::Delete { table_name, .. } => table_name,
        }
    }

    pub fn operation(&self) -> BatchOperation {
        match self {
            Self::Put { .. } => BatchOperation::Put,
            Self::Delete { .. } => BatchOperation::Delete,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteKey {
    pub id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BatchOperation {
    Put,
    Delete,
}

/// Outcome of one batch item. Serialized untagged so the wire shape is
/// `{operation, status, item_id}` or `{error}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum BatchOutcome {
    Applied {
        operation: BatchOperation,
        status: String,
        item_id: String,
    },
    Failed {
        error: String,
    },
}

impl BatchOutcome {
    pub fn applied(operation: BatchOperation, item_id: impl Into<String>) -> Self {
        Self::Applied {
            operation,
            status: "Success".to_string(),
            item_id: item_id.into(),
        }
    }

    pub fn failed(error: &GatewayError) -> Self {
        Self::Failed {
            error: error.to_string(),
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Ordered per-item outcomes of a best-effort, non-atomic batch write.
/// Always holds exactly one outcome per input item, in input order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct BatchResult(pub Vec<BatchOutcome>);

impl BatchResult {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn failures(&self) -> usize {
        self.0.iter().filter(|outcome| !outcome.is_applied()).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadBase64Payload {
    pub bucket_name: String,
    pub key: String,
    pub base64_content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadUrlPayload {
    pub bucket_name: String,
    pub key: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresignPayload {
    pub bucket_name: String,
    pub key: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReadLogsPayload {
    #[serde(default)]
    pub job_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunnerStartedResponse {
    pub status: String,
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadFromUrlResponse {
    pub object_already_exists: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresignedUrlResponse {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEvent {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEventsResponse {
    pub events: Vec<LogEvent>,
}
