use thiserror::Error;

/// Every failure the gateway can report to a caller.
///
/// Validation kinds map to 4xx and are produced before any backend call.
/// Broker failures carry the broker's own status and raw body so they can be
/// forwarded unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("Invalid JSON body: {0}")]
    MalformedRequest(String),

    #[error("Invalid event type ({0})")]
    UnknownEvent(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Unknown {kind} '{name}'")]
    UnknownResource { kind: ResourceKind, name: String },

    #[error("Record is missing required key field {0}")]
    MissingKey(&'static str),

    #[error("Missing {0}")]
    MissingConfiguration(String),

    #[error("Broker returned status {status}")]
    Broker { status: u16, body: String },

    #[error("Broker request failed: {0}")]
    BrokerUnavailable(String),

    #[error("Broker issued no token for resource '{0}'")]
    ScopeNotGranted(String),

    #[error("Failed to obtain service identity token: {0}")]
    Identity(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Blob error: {0}")]
    Blob(String),

    #[error("Orchestration error: {0}")]
    Orchestration(String),

    #[error("Error querying logs: {0}")]
    LogQuery(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Table,
    Bucket,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => f.write_str("table"),
            Self::Bucket => f.write_str("bucket"),
        }
    }
}

impl GatewayError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MalformedRequest(_)
            | Self::UnknownEvent(_)
            | Self::BadRequest(_)
            | Self::UnknownResource { .. }
            | Self::MissingKey(_) => 400,
            Self::ScopeNotGranted(_) => 403,
            Self::Broker { status, .. } => *status,
            Self::MissingConfiguration(_)
            | Self::BrokerUnavailable(_)
            | Self::Identity(_)
            | Self::Store(_)
            | Self::Blob(_)
            | Self::Orchestration(_)
            | Self::LogQuery(_) => 500,
        }
    }

    pub fn missing_field(field: &str) -> Self {
        Self::BadRequest(format!("Missing {field}."))
    }
}
