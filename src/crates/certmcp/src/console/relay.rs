//! Client side of the event-stream binding
//!
//! The console holds one session open against `GET /sse`, posts calls to the
//! announced endpoint and matches `message` events back to waiting callers
//! by JSON-RPC id. A dropped stream is reconnected on the next call.

use crate::error::ConsoleError;
use crate::protocol::{JsonRpcResponse, PROTOCOL_VERSION};
use axum::body::Bytes;
use dashmap::DashMap;
use futures::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tooling::async_utils::with_timeout;
use tooling::runtime::CorrelationId;
use tracing::{debug, info, warn};

/// One decoded server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental parser for a `text/event-stream` body
#[derive(Debug, Default)]
pub struct EventParser {
    buffer: Vec<u8>,
}

impl EventParser {
    /// Feed one chunk; returns every event it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(end) = find_blank_line(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..end.0).collect();
            self.buffer.drain(..end.1);
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block)) {
                events.push(event);
            }
        }
        events
    }
}

/// Start of the first blank line and the length of the separator
fn find_blank_line(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = String::from("message");
    let mut data: Vec<&str> = Vec::new();
    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = value.to_string(),
            "data" => data.push(value),
            _ => {}
        }
    }
    if data.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data.join("\n"),
    })
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

type Pending = Arc<DashMap<i64, oneshot::Sender<JsonRpcResponse>>>;

struct RelaySession {
    post_url: String,
    pending: Pending,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl Drop for RelaySession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Relays JSON-RPC calls through the event-stream binding
pub struct SseRelay {
    base_url: String,
    client: Client,
    timeout: Duration,
    session: Mutex<Option<Arc<RelaySession>>>,
    next_id: AtomicI64,
}

impl std::fmt::Debug for SseRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseRelay")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl SseRelay {
    /// Relay to the event-stream binding at `base_url` (`http://127.0.0.1:8000`)
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ConsoleError> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ConsoleError::Relay(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            timeout,
            session: Mutex::new(None),
            next_id: AtomicI64::new(1),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `tools/list` result
    pub async fn list_tools(&self) -> Result<Value, ConsoleError> {
        self.request("tools/list", json!({})).await
    }

    /// `tools/call` result for `name` with `arguments`
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Map<String, Value>,
    ) -> Result<Value, ConsoleError> {
        self.request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await
    }

    /// Send one request and wait for its result
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, ConsoleError> {
        let session = self.session().await?;
        let result = self.exchange(&session, method, params).await;
        if matches!(result, Err(ConsoleError::Relay(_))) {
            session.closed.store(true, Ordering::SeqCst);
        }
        result
    }

    async fn session(&self) -> Result<Arc<RelaySession>, ConsoleError> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            if !session.closed.load(Ordering::SeqCst) {
                return Ok(session.clone());
            }
            debug!("Relay session closed, reconnecting");
        }
        let session = Arc::new(self.connect().await?);
        *slot = Some(session.clone());
        Ok(session)
    }

    async fn connect(&self) -> Result<RelaySession, ConsoleError> {
        let url = format!("{}/sse", self.base_url);
        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| ConsoleError::Relay(format!("cannot open {}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(ConsoleError::Relay(format!(
                "{} answered {}",
                url,
                response.status()
            )));
        }

        let mut stream: ByteStream = Box::pin(response.bytes_stream());
        let mut parser = EventParser::default();
        let endpoint = with_timeout(self.timeout, async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| ConsoleError::Relay(e.to_string()))?;
                if let Some(event) = parser.push(&chunk).into_iter().find(|e| e.event == "endpoint") {
                    return Ok(event.data);
                }
            }
            Err(ConsoleError::Relay("event stream ended before endpoint".into()))
        })
        .await
        .map_err(|e| match e {
            tooling::async_utils::TimeoutError::OperationFailed(inner) => inner,
            tooling::async_utils::TimeoutError::Timeout(d) => ConsoleError::Timeout(d),
        })?;

        let pending: Pending = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_events(stream, parser, pending.clone(), closed.clone()));
        let session = RelaySession {
            post_url: format!("{}{}", self.base_url, endpoint),
            pending,
            closed,
            reader,
        };
        info!(endpoint = %session.post_url, "Relay session established");

        self.exchange(
            &session,
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": { "name": "certmcp-console", "version": env!("CARGO_PKG_VERSION") },
            }),
        )
        .await?;
        self.post(&session, json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
            .await?;
        Ok(session)
    }

    async fn post(&self, session: &RelaySession, body: Value) -> Result<(), ConsoleError> {
        let response = self
            .client
            .post(&session.post_url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| ConsoleError::Relay(e.to_string()))?;
        match response.status() {
            StatusCode::ACCEPTED => Ok(()),
            status => Err(ConsoleError::Relay(format!("message rejected with {}", status))),
        }
    }

    async fn exchange(
        &self,
        session: &RelaySession,
        method: &str,
        params: Value,
    ) -> Result<Value, ConsoleError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        session.pending.insert(id, tx);

        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        if let Err(e) = self.post(session, body).await {
            session.pending.remove(&id);
            return Err(e);
        }

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(ConsoleError::Relay("event stream closed".into())),
            Err(_) => {
                session.pending.remove(&id);
                return Err(ConsoleError::Timeout(self.timeout));
            }
        };

        match (response.result, response.error) {
            (_, Some(error)) => Err(ConsoleError::Rpc {
                code: error.code,
                message: error.message,
            }),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

async fn read_events(
    mut stream: ByteStream,
    mut parser: EventParser,
    pending: Pending,
    closed: Arc<AtomicBool>,
) {
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, "Relay event stream failed");
                break;
            }
        };
        for event in parser.push(&chunk) {
            if event.event != "message" {
                continue;
            }
            let response: JsonRpcResponse = match serde_json::from_str(&event.data) {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, "Unreadable relay event");
                    continue;
                }
            };
            let id = response.id.as_ref().and_then(CorrelationId::as_i64);
            match id {
                Some(id) => {
                    if let Some((_, waiter)) = pending.remove(&id) {
                        let _ = waiter.send(response);
                    }
                }
                None => debug!(id = ?response.id, "Relay event with no waiting caller"),
            }
        }
    }
    closed.store(true, Ordering::SeqCst);
    pending.clear();
    info!("Relay event stream ended");
}
