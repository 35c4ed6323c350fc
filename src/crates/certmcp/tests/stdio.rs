//! Interactive sessions over the stream binding

mod common;

use certmcp::transport::stdio::serve_connection;
use certmcp::ShutdownCoordinator;
use serde_json::{json, Value};
use tokio::io::{duplex, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};

struct Session {
    input: DuplexStream,
    output: BufReader<DuplexStream>,
    shutdown: ShutdownCoordinator,
    task: tokio::task::JoinHandle<Result<(), certmcp::error::TransportError>>,
}

impl Session {
    fn start() -> Self {
        let (input, server_in) = duplex(1 << 16);
        let (server_out, output) = duplex(4 << 20);
        let shutdown = ShutdownCoordinator::new();
        let dispatcher = common::dispatcher(common::populated_store());
        let stop = shutdown.clone();
        let task = tokio::spawn(async move {
            serve_connection(&dispatcher, BufReader::new(server_in), server_out, &stop).await
        });
        Self {
            input,
            output: BufReader::new(output),
            shutdown,
            task,
        }
    }

    async fn send(&mut self, message: Value) {
        let mut line = message.to_string();
        line.push('\n');
        self.input.write_all(line.as_bytes()).await.unwrap();
    }

    async fn receive(&mut self) -> Value {
        let mut line = String::new();
        self.output.read_line(&mut line).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    async fn call(&mut self, id: i64, method: &str, params: Value) -> Value {
        self.send(json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))
            .await;
        let response = self.receive().await;
        assert_eq!(response["id"], id);
        response
    }
}

#[tokio::test]
async fn test_handshake_then_tool_calls() {
    let mut session = Session::start();

    let init = session
        .call(
            1,
            "initialize",
            json!({ "protocolVersion": "2024-11-05", "capabilities": {}, "clientInfo": { "name": "test" } }),
        )
        .await;
    assert_eq!(init["result"]["protocolVersion"], "2024-11-05");
    assert!(init["result"]["capabilities"]["tools"].is_object());

    session
        .send(json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
        .await;

    let listing = session.call(2, "tools/list", json!({})).await;
    let names: Vec<&str> = listing["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert!(names.contains(&"read_attachment"));
    assert!(names.contains(&"rebuild_search_index"));

    let records = session
        .call(3, "tools/call", json!({ "name": "list_records", "arguments": {} }))
        .await;
    assert_eq!(records["result"]["isError"], false);
    assert_eq!(records["result"]["structuredContent"]["count"], 2);

    let denied = session
        .call(4, "tools/call", json!({ "name": "rebuild_search_index", "arguments": {} }))
        .await;
    assert_eq!(denied["result"]["isError"], true);
    assert_eq!(
        denied["result"]["structuredContent"]["error"]["kind"],
        "policy_denied"
    );

    session.shutdown.request_shutdown();
    assert!(session.task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_unknown_method_keeps_session_alive() {
    let mut session = Session::start();

    let missing = session.call(7, "prompts/list", json!({})).await;
    assert_eq!(missing["error"]["code"], -32601);

    let pong = session.call(8, "ping", json!({})).await;
    assert_eq!(pong["result"], json!({}));

    drop(session.input);
    assert!(session.task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_fault_ends_session_with_parse_error() {
    let mut session = Session::start();
    session.input.write_all(b"{\"jsonrpc\": \n").await.unwrap();

    let fault = session.receive().await;
    assert_eq!(fault["error"]["code"], -32700);
    assert!(fault["id"].is_null());

    let result = session.task.await.unwrap();
    assert!(matches!(
        result,
        Err(certmcp::error::TransportError::Fault(_))
    ));

    let mut rest = String::new();
    session.output.read_to_string(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}
