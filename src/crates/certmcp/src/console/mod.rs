//! Optional debug console
//!
//! A small loopback-only web surface for trying tools from a browser. Every
//! call is relayed through the event-stream binding, so the console sees
//! exactly what an MCP client would, policy included.
//!
//! Routes (all behind HTTP Basic auth):
//!
//! - `GET /` - HTML index of the tool catalog
//! - `GET /api/tools` - `tools/list` result
//! - `POST /api/tools/:name` - `tools/call` with the JSON body as arguments
//! - `GET /api/client-config` - MCP client configuration snippet

pub mod auth;
pub mod relay;

pub use auth::Credentials;
pub use relay::SseRelay;

use crate::config::ResolvedConfig;
use crate::error::{ConsoleError, TransportError};
use crate::protocol::codes;
use crate::shutdown::ShutdownCoordinator;
use crate::transport::{bind_listener, trace_layer};
use axum::extract::{Path, State};
use axum::http::header::WWW_AUTHENTICATE;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// How long the console waits for a relayed response
pub const RELAY_TIMEOUT: Duration = Duration::from_secs(30);

/// Name of the console's own log file
pub const CONSOLE_LOG_NAME: &str = "mcp_console.log";

/// Error body returned by the console API
#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    pub code: String,
}

impl IntoResponse for ConsoleError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Rpc { code, .. } if *code == codes::INVALID_PARAMS => StatusCode::BAD_REQUEST,
            Self::Rpc { code, .. } if *code == codes::METHOD_NOT_FOUND => StatusCode::NOT_FOUND,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Relay(_) | Self::Rpc { .. } => StatusCode::BAD_GATEWAY,
        };
        let body = ApiErrorResponse {
            error: status
                .canonical_reason()
                .unwrap_or("error")
                .to_string(),
            message: self.to_string(),
            code: self.error_code().to_string(),
        };

        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                WWW_AUTHENTICATE,
                axum::http::HeaderValue::from_static("Basic realm=\"certmcp console\""),
            );
        }
        response
    }
}

/// Shared state of the console routes
#[derive(Debug, Clone)]
pub struct ConsoleState {
    relay: Arc<SseRelay>,
    credentials: Arc<Credentials>,
    client_config: Arc<Value>,
}

impl ConsoleState {
    pub fn new(relay: Arc<SseRelay>, credentials: Credentials, client_config: Value) -> Self {
        Self {
            relay,
            credentials: Arc::new(credentials),
            client_config: Arc::new(client_config),
        }
    }
}

/// MCP client configuration pointing at this installation
pub fn client_config(config: &ResolvedConfig) -> Value {
    let command = std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "certmcp".to_string());
    let flag = |on: bool| if on { "1" } else { "0" };
    json!({
        "mcpServers": {
            "certificate": {
                "command": command,
                "args": ["serve"],
                "env": {
                    "CERT_MCP_ALLOW_WRITE": flag(config.policy.allow_write),
                    "CERT_MCP_REDACT_PII": flag(config.policy.redact_pii),
                    "CERT_MCP_MAX_BYTES": config.policy.max_bytes.to_string(),
                },
            },
            "certificate-sse": {
                "url": format!("{}/sse", config.base_url()),
            },
        }
    })
}

/// Console routes, authenticated
pub fn router(state: ConsoleState) -> Router {
    let credentials = state.credentials.clone();
    Router::new()
        .route("/", get(index))
        .route("/api/tools", get(list_tools))
        .route("/api/tools/:name", post(call_tool))
        .route("/api/client-config", get(show_client_config))
        .layer(middleware::from_fn_with_state(credentials, auth::require_basic))
        .layer(trace_layer())
        .with_state(state)
}

async fn index(State(state): State<ConsoleState>) -> Result<Html<String>, ConsoleError> {
    let listing = state.relay.list_tools().await?;
    Ok(Html(render_index(&listing)))
}

async fn list_tools(State(state): State<ConsoleState>) -> Result<Json<Value>, ConsoleError> {
    Ok(Json(state.relay.list_tools().await?))
}

async fn call_tool(
    State(state): State<ConsoleState>,
    Path(name): Path<String>,
    body: String,
) -> Result<Json<Value>, ConsoleError> {
    let arguments = if body.trim().is_empty() {
        Map::new()
    } else {
        serde_json::from_str::<Map<String, Value>>(&body)
            .map_err(|e| ConsoleError::BadRequest(format!("arguments must be a JSON object: {}", e)))?
    };
    Ok(Json(state.relay.call_tool(&name, arguments).await?))
}

async fn show_client_config(State(state): State<ConsoleState>) -> Json<Value> {
    Json(state.client_config.as_ref().clone())
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn render_index(listing: &Value) -> String {
    let mut rows = String::new();
    let tools = listing
        .get("tools")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for tool in &tools {
        let name = tool.get("name").and_then(Value::as_str).unwrap_or_default();
        let description = tool
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();
        rows.push_str(&format!(
            "<li><code>{}</code>: {}</li>\n",
            escape_html(name),
            escape_html(description)
        ));
    }

    format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>certmcp console</title></head>\n\
<body>\n<h1>certmcp console</h1>\n<p>{} tools. POST a JSON object of arguments to \
<code>/api/tools/&lt;name&gt;</code> to call one.</p>\n<ul>\n{}</ul>\n\
<p><a href=\"/api/client-config\">MCP client configuration</a></p>\n</body></html>\n",
        tools.len(),
        rows
    )
}

/// Run the console until shutdown
///
/// When no password is configured one is generated and printed once to
/// stdout; it is never written to the log.
pub async fn serve(config: &ResolvedConfig, shutdown: ShutdownCoordinator) -> crate::error::Result<()> {
    let bind_host = config.console.bind_host()?;
    let addr = SocketAddr::new(bind_host.ip(), config.console.port);

    let (credentials, generated) = Credentials::resolve(&config.console);
    let relay = Arc::new(SseRelay::new(config.base_url(), RELAY_TIMEOUT)?);
    let listener = bind_listener(addr).await?;

    if generated {
        println!(
            "certmcp console: http://{}:{}/ user `{}` password `{}`",
            bind_host.url_host(),
            config.console.port,
            credentials.username(),
            credentials.password()
        );
    }
    info!(
        %addr,
        relay = %relay.base_url(),
        username = %credentials.username(),
        generated_password = generated,
        "Debug console listening"
    );

    let state = ConsoleState::new(relay, credentials, client_config(config));
    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(async move { shutdown.wait_for_shutdown().await })
        .await
        .map_err(TransportError::from)?;

    info!("Debug console shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> ConsoleState {
        let relay = SseRelay::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        ConsoleState::new(
            Arc::new(relay),
            Credentials::new("local", "pw"),
            json!({ "mcpServers": {} }),
        )
    }

    #[tokio::test]
    async fn test_requires_credentials() {
        let request = Request::builder()
            .uri("/api/client-config")
            .body(Body::empty())
            .unwrap();
        let response = router(state()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(WWW_AUTHENTICATE));
    }

    #[tokio::test]
    async fn test_client_config_with_credentials() {
        let request = Request::builder()
            .uri("/api/client-config")
            .header("authorization", Credentials::new("local", "pw").header_value())
            .body(Body::empty())
            .unwrap();
        let response = router(state()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bad_arguments_rejected_before_relay() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/tools/list_records")
            .header("authorization", Credentials::new("local", "pw").header_value())
            .body(Body::from("[1]"))
            .unwrap();
        let response = router(state()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_render_index_escapes() {
        let html = render_index(&json!({
            "tools": [{ "name": "health", "description": "a <b> & c" }]
        }));
        assert!(html.contains("<code>health</code>"));
        assert!(html.contains("a &lt;b&gt; &amp; c"));
        assert!(html.contains("1 tools"));
    }

    #[test]
    fn test_client_config_snippet() {
        let config = crate::config::resolve(
            &Default::default(),
            &Default::default(),
            &crate::config::SettingsLayer::defaults_in("/tmp/certmcp"),
        )
        .unwrap();
        let snippet = client_config(&config);
        let server = &snippet["mcpServers"]["certificate"];
        assert_eq!(server["args"][0], "serve");
        assert_eq!(server["env"]["CERT_MCP_ALLOW_WRITE"], "0");
        assert_eq!(server["env"]["CERT_MCP_MAX_BYTES"], "1048576");
        assert_eq!(
            snippet["mcpServers"]["certificate-sse"]["url"],
            "http://127.0.0.1:8000/sse"
        );
    }
}
