//! Custom handler process for the serverless host.
//!
//! The host forwards every HTTP request for the `generic_api` function to
//! `POST /api` on `FUNCTIONS_CUSTOMHANDLER_PORT`. Handlers make blocking
//! backend calls, so each request runs on the blocking pool.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use gateway_function::config::{registry_from_env, GatewayConfig};
use gateway_function::handlers::{handle_api_request, panic_response, ApiResponse, Gateway};
use gateway_function::observability::init_logging;

/// Largest request body the host itself accepts.
const MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

struct AppState {
    gateway: Gateway,
    principal_header: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = GatewayConfig::from_env();
    init_logging(config.log_format);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let principal_header = config.principal_header.clone();
    // Blocking HTTP clients must be built outside the async runtime.
    let gateway = Gateway::from_config(registry_from_env(), config)?;
    let state = Arc::new(AppState {
        gateway,
        principal_header,
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(addr, Arc::clone(&state)))?;
    drop(runtime);
    drop(state);
    tracing::info!(component = "function_handler", event = "stopped");
    Ok(())
}

async fn serve(addr: SocketAddr, state: Arc<AppState>) -> std::io::Result<()> {
    let app = Router::new()
        .route("/api", post(api))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(component = "function_handler", event = "listening", %addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn api(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    let forwarded_principal = state
        .principal_header
        .as_deref()
        .and_then(|name| headers.get(name))
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let worker = Arc::clone(&state);
    let response = match tokio::task::spawn_blocking(move || {
        handle_api_request(&worker.gateway, &body, forwarded_principal)
    })
    .await
    {
        Ok(response) => response,
        Err(error) => panic_response(&error.to_string()),
    };
    render(response)
}

fn render(response: ApiResponse) -> Response {
    let status =
        StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(header::CONTENT_TYPE, response.content_type)],
        response.body,
    )
        .into_response()
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(
            component = "function_handler",
            event = "signal_handler_failed",
            error = %error,
        );
    }
}
