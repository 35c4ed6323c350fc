//! Event-stream binding over a real loopback socket

mod common;

use certmcp::config::{resolve, SettingsLayer};
use certmcp::console::relay::{EventParser, SseEvent};
use certmcp::{CertMcpError, ExitCode, TransportKind};
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

type Body = Pin<Box<dyn futures::Stream<Item = reqwest::Result<axum::body::Bytes>> + Send>>;

/// Minimal event-stream client for driving the binding by hand
struct Stream {
    body: Body,
    parser: EventParser,
    queued: VecDeque<SseEvent>,
}

impl Stream {
    async fn open(client: &Client, base_url: &str) -> Self {
        let response = client
            .get(format!("{}/sse", base_url))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
        assert!(response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream")));
        Self {
            body: Box::pin(response.bytes_stream()),
            parser: EventParser::default(),
            queued: VecDeque::new(),
        }
    }

    async fn next_event(&mut self) -> Option<SseEvent> {
        loop {
            if let Some(event) = self.queued.pop_front() {
                return Some(event);
            }
            let chunk = tokio::time::timeout(Duration::from_secs(5), self.body.next())
                .await
                .expect("event stream stalled")?
                .ok()?;
            self.queued.extend(self.parser.push(&chunk));
        }
    }
}

async fn post(client: &Client, url: &str, body: Value) -> reqwest::StatusCode {
    client.post(url).json(&body).send().await.unwrap().status()
}

#[tokio::test]
async fn test_session_answers_each_call_on_its_stream() {
    let server = common::SseServer::start(common::dispatcher(common::populated_store())).await;
    let client = Client::new();
    let mut stream = Stream::open(&client, &server.base_url()).await;

    let endpoint = stream.next_event().await.unwrap();
    assert_eq!(endpoint.event, "endpoint");
    assert!(endpoint.data.starts_with("/messages?session_id="));
    let post_url = format!("{}{}", server.base_url(), endpoint.data);

    // Several calls in flight at once; responses are matched by id
    let calls = [
        (11, json!({ "name": "read_attachment", "arguments": { "record_id": 1, "attachment_id": 100 } })),
        (12, json!({ "name": "health", "arguments": {} })),
        (13, json!({ "name": "get_member", "arguments": { "member_id": 11 } })),
    ];
    for (id, params) in &calls {
        let status = post(
            &client,
            &post_url,
            json!({ "jsonrpc": "2.0", "id": id, "method": "tools/call", "params": params }),
        )
        .await;
        assert_eq!(status, reqwest::StatusCode::ACCEPTED);
    }

    let mut by_id = std::collections::HashMap::new();
    while by_id.len() < calls.len() {
        let event = stream.next_event().await.unwrap();
        assert_eq!(event.event, "message");
        let response: Value = serde_json::from_str(&event.data).unwrap();
        by_id.insert(response["id"].as_i64().unwrap(), response);
    }

    assert_eq!(
        by_id[&11]["result"]["structuredContent"]["truncated"],
        true
    );
    assert_eq!(by_id[&12]["result"]["isError"], false);
    assert_eq!(
        by_id[&13]["result"]["structuredContent"]["id_card"],
        "110101********0011"
    );

    server.stop().await;
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let server = common::SseServer::start(common::dispatcher(common::populated_store())).await;
    let client = Client::new();
    let mut first = Stream::open(&client, &server.base_url()).await;
    let mut second = Stream::open(&client, &server.base_url()).await;

    let first_url = format!("{}{}", server.base_url(), first.next_event().await.unwrap().data);
    let second_endpoint = second.next_event().await.unwrap();
    assert_ne!(
        first_url,
        format!("{}{}", server.base_url(), second_endpoint.data)
    );

    post(
        &client,
        &first_url,
        json!({ "jsonrpc": "2.0", "id": "only-first", "method": "ping" }),
    )
    .await;
    let event = first.next_event().await.unwrap();
    let response: Value = serde_json::from_str(&event.data).unwrap();
    assert_eq!(response["id"], "only-first");

    // Nothing is queued for the second session
    let pending = tokio::time::timeout(Duration::from_millis(200), second.next_event()).await;
    assert!(pending.is_err());

    server.stop().await;
}

#[tokio::test]
async fn test_post_rejections_and_health() {
    let server = common::SseServer::start(common::dispatcher(common::populated_store())).await;
    let client = Client::new();

    let unknown = format!(
        "{}/messages?session_id={}",
        server.base_url(),
        uuid::Uuid::new_v4()
    );
    assert_eq!(
        post(&client, &unknown, json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" })).await,
        reqwest::StatusCode::NOT_FOUND
    );

    let health: Value = client
        .get(format!("{}/healthz", server.base_url()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");

    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_open_streams() {
    let server = common::SseServer::start(common::dispatcher(common::populated_store())).await;
    let client = Client::new();
    let mut stream = Stream::open(&client, &server.base_url()).await;
    assert_eq!(stream.next_event().await.unwrap().event, "endpoint");

    let base_url = server.base_url();
    tokio::time::timeout(Duration::from_secs(10), server.stop())
        .await
        .expect("graceful shutdown hung on an open stream");
    assert!(stream.next_event().await.is_none());
    assert!(client.get(format!("{}/healthz", base_url)).send().await.is_err());
}

#[test]
fn test_non_loopback_host_refused_for_network_bindings() {
    let env = SettingsLayer {
        transport: Some(TransportKind::Sse),
        host: Some("0.0.0.0".into()),
        ..SettingsLayer::default()
    };
    let err = resolve(
        &env,
        &SettingsLayer::default(),
        &SettingsLayer::defaults_in("/tmp/certmcp"),
    )
    .unwrap_err();
    assert_eq!(
        CertMcpError::from(err).exit_code(),
        ExitCode::NonLoopbackRefused
    );

    let stdio = SettingsLayer {
        transport: Some(TransportKind::Stdio),
        host: Some("0.0.0.0".into()),
        ..SettingsLayer::default()
    };
    assert!(resolve(
        &stdio,
        &SettingsLayer::default(),
        &SettingsLayer::defaults_in("/tmp/certmcp")
    )
    .is_ok());
}
