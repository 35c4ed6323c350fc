//! Single-shot HTTP binding (`streamable-http`)
//!
//! `POST /mcp` carries one JSON-RPC message and the response comes back in
//! the HTTP body. Notifications are answered with `202 Accepted` and no body.

use super::{trace_layer, InFlight, DRAIN_DEADLINE, MAX_FRAME_BYTES};
use crate::error::TransportError;
use crate::health::{liveness_report, HealthReport};
use crate::protocol::{Dispatcher, JsonRpcResponse};
use crate::shutdown::ShutdownCoordinator;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Debug, Clone)]
struct HttpState {
    dispatcher: Dispatcher,
    in_flight: InFlight,
}

/// Routes of the HTTP binding
pub fn router(dispatcher: Dispatcher) -> Router {
    router_with(HttpState {
        dispatcher,
        in_flight: InFlight::default(),
    })
}

fn router_with(state: HttpState) -> Router {
    Router::new()
        .route("/mcp", post(handle_call))
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(MAX_FRAME_BYTES))
        .layer(trace_layer())
        .with_state(state)
}

async fn handle_call(State(state): State<HttpState>, body: String) -> Response {
    let message: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(JsonRpcResponse::parse_error(e))).into_response()
        }
    };

    let _guard = state.in_flight.enter();
    match state.dispatcher.handle_value(message).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn healthz(State(state): State<HttpState>) -> Json<HealthReport> {
    Json(liveness_report(state.dispatcher.registry(), state.in_flight.count()).await)
}

/// Serve the HTTP binding on `listener` until shutdown
pub async fn serve(
    listener: TcpListener,
    dispatcher: Dispatcher,
    shutdown: ShutdownCoordinator,
) -> Result<(), TransportError> {
    let state = HttpState {
        dispatcher,
        in_flight: InFlight::default(),
    };
    let in_flight = state.in_flight.clone();

    axum::serve(listener, router_with(state).into_make_service())
        .with_graceful_shutdown(async move { shutdown.wait_for_shutdown().await })
        .await?;

    in_flight.drain(DRAIN_DEADLINE).await;
    info!("HTTP binding shut down gracefully");
    Ok(())
}
