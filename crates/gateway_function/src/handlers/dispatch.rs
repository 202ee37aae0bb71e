//! Routes one `{event, ...}` request to its handler and renders the reply.
//!
//! Every outcome, including handler errors, becomes an [`ApiResponse`];
//! nothing propagates past [`handle_api_request`].

use gateway_core::contract::{
    ApiEvent, ApiRequest, LogEvent, LogEventsResponse, PresignPayload, ReadLogsPayload, ReadQuery,
    UploadBase64Payload, UploadUrlPayload,
};
use gateway_core::GatewayError;
use serde::Serialize;
use serde_json::{json, Value};

use super::{Caller, Gateway};

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status_code: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl ApiResponse {
    pub fn json_body(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

pub fn handle_api_request(
    gateway: &Gateway,
    body: &[u8],
    forwarded_principal: Option<String>,
) -> ApiResponse {
    let request = match ApiRequest::parse(body) {
        Ok(request) => request,
        Err(error) => return error_response(&error, None),
    };
    let event = match ApiEvent::parse(request.event_name().as_deref()) {
        Ok(event) => event,
        Err(error) => return error_response(&error, None),
    };
    let caller = Caller::new(forwarded_principal);

    tracing::info!(
        component = "dispatcher",
        event = "request_received",
        api_event = event.as_str(),
        table = request.table.as_deref().unwrap_or_default(),
        forwarded_principal = caller.forwarded_principal().is_some(),
    );

    match route(gateway, &caller, event, &request) {
        Ok(response) => response,
        Err(error) => error_response(&error, Some(event)),
    }
}

fn route(
    gateway: &Gateway,
    caller: &Caller,
    event: ApiEvent,
    request: &ApiRequest,
) -> Result<ApiResponse, GatewayError> {
    match event {
        ApiEvent::InsertDb => {
            let table = request.table()?;
            let record = request.data_object()?;
            let principal = gateway.principal(caller)?;
            Ok(json_response(
                200,
                &gateway.insert_record(table, record, principal)?,
            ))
        }
        ApiEvent::ReadDb => {
            let table = request.table()?;
            let ReadQuery { query } = request.payload()?;
            let principal = gateway.principal(caller)?;
            Ok(json_response(
                200,
                &gateway.read_records(table, &query, principal)?,
            ))
        }
        ApiEvent::TransactWrite => {
            let items = request.batch_items()?;
            let principal = gateway.principal(caller)?;
            Ok(json_response(200, &gateway.write_batch(items, principal)))
        }
        ApiEvent::StartRunner => {
            let payload = request.data_object()?;
            let principal = gateway.principal(caller)?;
            Ok(json_response(200, &gateway.start_runner(payload, principal)?))
        }
        ApiEvent::UploadFileBase64 => {
            let payload: UploadBase64Payload = request.payload()?;
            let principal = gateway.principal(caller)?;
            Ok(json_response(
                200,
                &gateway.upload_inline(
                    &payload.bucket_name,
                    &payload.key,
                    &payload.base64_content,
                    principal,
                )?,
            ))
        }
        ApiEvent::UploadFileUrl => {
            let payload: UploadUrlPayload = request.payload()?;
            let principal = gateway.principal(caller)?;
            Ok(json_response(
                200,
                &gateway.upload_from_url(&payload.bucket_name, &payload.key, &payload.url, principal)?,
            ))
        }
        ApiEvent::GeneratePresignedUrl => {
            let payload: PresignPayload = request.payload()?;
            let principal = gateway.principal(caller)?;
            Ok(json_response(
                200,
                &gateway.presign_read(
                    &payload.bucket_name,
                    &payload.key,
                    payload.expires_in,
                    principal,
                )?,
            ))
        }
        ApiEvent::ReadLogs => {
            let payload: ReadLogsPayload = request.payload()?;
            let events = gateway
                .read_logs(payload.job_id.as_deref())?
                .map(|message| LogEvent { message })
                .collect();
            Ok(json_response(200, &LogEventsResponse { events }))
        }
    }
}

fn json_response(status_code: u16, payload: &impl Serialize) -> ApiResponse {
    match serde_json::to_string(payload) {
        Ok(body) => ApiResponse {
            status_code,
            content_type: JSON_CONTENT_TYPE,
            body,
        },
        Err(error) => ApiResponse {
            status_code: 500,
            content_type: JSON_CONTENT_TYPE,
            body: json!({ "result": format!("Api error: response serialization failed: {error}") })
                .to_string(),
        },
    }
}

/// Broker refusals pass through with the broker's own status and body.
/// Client errors get `{result}`; everything else the 500 envelope with a
/// diagnostic trace.
pub fn error_response(error: &GatewayError, event: Option<ApiEvent>) -> ApiResponse {
    let api_event = event.map(ApiEvent::as_str).unwrap_or("none");
    let status_code = error.status_code();

    if status_code >= 500 {
        tracing::error!(
            component = "dispatcher",
            event = "request_failed",
            api_event,
            status = status_code,
            error = %error,
        );
    } else {
        tracing::warn!(
            component = "dispatcher",
            event = "request_rejected",
            api_event,
            status = status_code,
            error = %error,
        );
    }

    if let GatewayError::Broker { status, body } = error {
        let content_type = if serde_json::from_str::<Value>(body).is_ok() {
            JSON_CONTENT_TYPE
        } else {
            TEXT_CONTENT_TYPE
        };
        return ApiResponse {
            status_code: *status,
            content_type,
            body: body.clone(),
        };
    }

    if status_code < 500 {
        return json_response(status_code, &json!({ "result": error.to_string() }));
    }

    json_response(
        500,
        &json!({
            "result": format!("Api error: {error}"),
            "trace": [format!("{error:?}"), format!("event: {api_event}")],
        }),
    )
}

/// Reply for a handler that panicked instead of returning.
pub fn panic_response(detail: &str) -> ApiResponse {
    tracing::error!(component = "dispatcher", event = "handler_panicked", detail);
    json_response(
        500,
        &json!({
            "result": "Api error: request handler panicked",
            "trace": [detail],
        }),
    )
}
