//! Narrow interfaces to external collaborators and their REST implementations.
//!
//! Every trait is synchronous: one call is one blocking backend round-trip.
//! The HTTP server runs handlers on the blocking pool.

pub mod blob_store;
pub mod broker;
pub mod credential;
pub mod document_store;
pub mod log_analytics;
pub mod orchestrator;

use std::time::Duration;

use reqwest::blocking::{Client, Response};

pub(crate) const BACKEND_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) fn http_client(timeout: Duration) -> Result<Client, String> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|error| format!("failed to build http client: {error}"))
}

/// `"<status>: <body>"` of a rejected backend call.
pub(crate) fn describe_rejection(response: Response) -> String {
    let status = response.status();
    let body = response.text().unwrap_or_default();
    if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", body.trim())
    }
}

/// RFC 1123 timestamp for `x-ms-date` headers.
pub(crate) fn request_date() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}
