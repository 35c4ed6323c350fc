//! Event-stream binding
//!
//! `GET /sse` opens a session whose first event names the endpoint for
//! posting calls. `POST /messages?session_id=…` accepts one JSON-RPC message
//! and answers `202 Accepted` at once; the call runs on its own task and its
//! response is pushed to the session as a `message` event when it finishes.
//! Responses can therefore arrive out of request order; the JSON-RPC id is
//! the only correlation.

use super::{trace_layer, InFlight, DRAIN_DEADLINE, KEEP_ALIVE_INTERVAL, MAX_FRAME_BYTES};
use crate::error::TransportError;
use crate::health::{liveness_report, HealthReport};
use crate::protocol::{Dispatcher, JsonRpcResponse};
use crate::shutdown::ShutdownCoordinator;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dashmap::DashMap;
use futures::Stream;
use serde::Deserialize;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Path a session posts its calls to
pub const MESSAGES_PATH: &str = "/messages";

type SessionSender = mpsc::UnboundedSender<JsonRpcResponse>;

/// Shared state of the event-stream binding
#[derive(Clone)]
pub struct SseState {
    dispatcher: Dispatcher,
    sessions: Arc<DashMap<Uuid, SessionSender>>,
    in_flight: InFlight,
    shutdown: ShutdownCoordinator,
}

impl std::fmt::Debug for SseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseState")
            .field("sessions", &self.sessions.len())
            .field("in_flight", &self.in_flight.count())
            .finish()
    }
}

impl SseState {
    pub fn new(dispatcher: Dispatcher, shutdown: ShutdownCoordinator) -> Self {
        Self {
            dispatcher,
            sessions: Arc::new(DashMap::new()),
            in_flight: InFlight::default(),
            shutdown,
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }
}

/// Removes the session when its event stream is dropped
struct SessionGuard {
    id: Uuid,
    sessions: Arc<DashMap<Uuid, SessionSender>>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.remove(&self.id);
        info!(session_id = %self.id, "Session closed");
    }
}

#[derive(Debug, Deserialize)]
struct SessionParams {
    session_id: Option<String>,
}

/// Routes of the event-stream binding
pub fn router(state: SseState) -> Router {
    Router::new()
        .route("/sse", get(open_session))
        .route(MESSAGES_PATH, post(post_message))
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(MAX_FRAME_BYTES))
        .layer(trace_layer())
        .with_state(state)
}

async fn open_session(
    State(state): State<SseState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcResponse>();
    state.sessions.insert(id, tx);
    info!(session_id = %id, sessions = state.sessions.len(), "Session opened");

    let guard = SessionGuard {
        id,
        sessions: state.sessions.clone(),
    };
    let shutdown = state.shutdown.clone();

    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok(Event::default()
            .event("endpoint")
            .data(format!("{}?session_id={}", MESSAGES_PATH, id)));

        loop {
            let next = tokio::select! {
                response = rx.recv() => response,
                _ = shutdown.wait_for_shutdown() => None,
            };
            let Some(response) = next else { break };
            yield Ok(Event::default().event("message").data(response.to_json()));
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

async fn post_message(
    State(state): State<SseState>,
    Query(params): Query<SessionParams>,
    body: String,
) -> Response {
    let session = params
        .session_id
        .as_deref()
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .and_then(|id| state.sessions.get(&id).map(|entry| (id, entry.value().clone())));

    let Some((session_id, sender)) = session else {
        debug!(session_id = ?params.session_id, "Message for unknown session");
        return (StatusCode::NOT_FOUND, "unknown session").into_response();
    };

    let message: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(e) => {
            warn!(%session_id, error = %e, "Malformed message body");
            return (StatusCode::BAD_REQUEST, format!("malformed JSON: {}", e)).into_response();
        }
    };

    let dispatcher = state.dispatcher.clone();
    let guard = state.in_flight.enter();
    tokio::spawn(async move {
        let _guard = guard;
        if let Some(response) = dispatcher.handle_value(message).await {
            if sender.send(response).is_err() {
                debug!(%session_id, "Session gone, response discarded");
            }
        }
    });

    StatusCode::ACCEPTED.into_response()
}

async fn healthz(State(state): State<SseState>) -> Json<HealthReport> {
    Json(liveness_report(state.dispatcher.registry(), state.sessions.len()).await)
}

/// Serve the event-stream binding on `listener` until shutdown
///
/// Open sessions are closed when shutdown is requested; calls already
/// running get [`DRAIN_DEADLINE`] to finish.
pub async fn serve(
    listener: TcpListener,
    dispatcher: Dispatcher,
    shutdown: ShutdownCoordinator,
) -> Result<(), TransportError> {
    let state = SseState::new(dispatcher, shutdown.clone());
    let in_flight = state.in_flight.clone();
    let app = router(state);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move { shutdown.wait_for_shutdown().await })
        .await?;

    in_flight.drain(DRAIN_DEADLINE).await;
    info!("Event-stream binding shut down gracefully");
    Ok(())
}
