//! Debug console relaying through a live event-stream binding

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use certmcp::console::{self, ConsoleState, Credentials, SseRelay};
use futures::future::join_all;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn console_for(server: &common::SseServer) -> (axum::Router, Credentials) {
    let credentials = Credentials::new("local", "pw");
    let relay = SseRelay::new(server.base_url(), Duration::from_secs(5)).unwrap();
    let state = ConsoleState::new(Arc::new(relay), credentials.clone(), json!({}));
    (console::router(state), credentials)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_relay_lists_and_calls_tools() {
    let server = common::SseServer::start(common::dispatcher(common::populated_store())).await;
    let relay = SseRelay::new(server.base_url(), Duration::from_secs(5)).unwrap();

    let listing = relay.list_tools().await.unwrap();
    assert_eq!(
        listing["tools"].as_array().unwrap().len(),
        certmcp::registry::CATALOG.len()
    );

    let mut args = Map::new();
    args.insert("member_id".into(), json!(10));
    let result = relay.call_tool("get_member", args).await.unwrap();
    assert_eq!(result["structuredContent"]["id_card"], "110101********0011");

    // Concurrent calls share one session
    let calls = (0..8).map(|_| relay.call_tool("health", Map::new()));
    for result in join_all(calls).await {
        assert_eq!(result.unwrap()["isError"], false);
    }

    server.stop().await;
}

#[tokio::test]
async fn test_relay_reconnects_after_restart() {
    let store = common::populated_store();
    let server = common::SseServer::start(common::dispatcher(store.clone())).await;
    let addr = server.addr;
    let relay = SseRelay::new(server.base_url(), Duration::from_secs(5)).unwrap();
    relay.list_tools().await.unwrap();
    server.stop().await;

    // The first call after the restart may still see the old session
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    let shutdown = certmcp::ShutdownCoordinator::new();
    let handle = tokio::spawn(certmcp::transport::sse::serve(
        listener,
        common::dispatcher(store),
        shutdown.clone(),
    ));

    let mut recovered = false;
    for _ in 0..3 {
        if relay.list_tools().await.is_ok() {
            recovered = true;
            break;
        }
    }
    assert!(recovered);

    shutdown.request_shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_console_routes_through_relay() {
    let server = common::SseServer::start(common::dispatcher(common::populated_store())).await;
    let (router, credentials) = console_for(&server);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/tools/list_records")
                .header("authorization", credentials.header_value())
                .body(Body::from(r#"{"limit": 1}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["structuredContent"]["count"], 1);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/tools/rebuild_search_index")
                .header("authorization", credentials.header_value())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["isError"], true);
    assert_eq!(body["structuredContent"]["error"]["kind"], "policy_denied");

    let response = router
        .oneshot(
            Request::builder()
                .uri("/")
                .header("authorization", credentials.header_value())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains("<code>read_attachment</code>"));

    server.stop().await;
}

#[tokio::test]
async fn test_console_without_binding_is_bad_gateway() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let credentials = Credentials::new("local", "pw");
    let relay = SseRelay::new(format!("http://{}", addr), Duration::from_secs(1)).unwrap();
    let router = console::router(ConsoleState::new(
        Arc::new(relay),
        credentials.clone(),
        json!({}),
    ));

    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/tools")
                .header("authorization", credentials.header_value())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(response).await;
    assert_eq!(body["code"], "E_RELAY");
}
