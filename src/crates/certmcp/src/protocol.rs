//! JSON-RPC 2.0 messages and the method dispatcher
//!
//! Both transport bindings decode frames into [`JsonRpcRequest`] and hand
//! them to one [`Dispatcher`]; only the framing differs between them.

use crate::registry::{ToolRegistry, SERVER_NAME};
use crate::resources::ResourceCatalog;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tooling::runtime::{CallRequest, CallResult, CorrelationId};
use tracing::{debug, warn};

/// Protocol revision advertised during `initialize`
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC error codes
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const RESOURCE_NOT_FOUND: i64 = -32002;
}

/// An inbound request or notification
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,

    /// Absent (or null) for notifications
    #[serde(default)]
    pub id: Option<CorrelationId>,

    pub method: String,

    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<CorrelationId>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            method: method.into(),
            params: Some(params),
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// An outbound response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,

    /// Echoes the request id; null when the request could not be read
    pub id: Option<CorrelationId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<CorrelationId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<CorrelationId>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Response sent when a frame cannot be decoded at all
    pub fn parse_error(detail: impl std::fmt::Display) -> Self {
        Self::error(None, codes::PARSE_ERROR, format!("Parse error: {}", detail))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"jsonrpc":"2.0","id":null,"error":{{"code":{},"message":"failed to encode response: {}"}}}}"#,
                codes::INTERNAL_ERROR,
                e
            )
        })
    }
}

/// `tools/call` result body for a call outcome
pub fn tool_call_result(result: &CallResult) -> Value {
    let payload = result.to_value();
    json!({
        "content": [{ "type": "text", "text": payload.to_string() }],
        "structuredContent": payload,
        "isError": !result.is_success(),
    })
}

/// Routes JSON-RPC methods to the registry and resource catalog
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: ToolRegistry,
    resources: ResourceCatalog,
}

impl Dispatcher {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            resources: ResourceCatalog::new(),
        }
    }

    /// Serve `docs://` resources from `dir`
    pub fn with_docs_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.resources = self.resources.with_docs_dir(dir);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Handle one raw frame
    ///
    /// Returns `None` when nothing should be written back.
    pub async fn handle_text(&self, text: &str) -> Option<JsonRpcResponse> {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => self.handle_value(value).await,
            Err(e) => Some(JsonRpcResponse::parse_error(e)),
        }
    }

    /// Handle one decoded JSON value
    pub async fn handle_value(&self, value: Value) -> Option<JsonRpcResponse> {
        let Value::Object(ref object) = value else {
            return Some(JsonRpcResponse::error(
                None,
                codes::INVALID_REQUEST,
                "Invalid request: expected a JSON object",
            ));
        };

        if !object.contains_key("method") {
            // A client response to a server request; this server sends none.
            if object.contains_key("result") || object.contains_key("error") {
                debug!("Ignoring client response message");
                return None;
            }
            return Some(JsonRpcResponse::error(
                recover_id(object),
                codes::INVALID_REQUEST,
                "Invalid request: missing method",
            ));
        }

        let id = recover_id(object);
        match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(request) => self.handle(request).await,
            Err(e) => Some(JsonRpcResponse::error(
                id,
                codes::INVALID_REQUEST,
                format!("Invalid request: {}", e),
            )),
        }
    }

    /// Handle one request
    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::error(
                request.id,
                codes::INVALID_REQUEST,
                "Invalid request: jsonrpc must be \"2.0\"",
            ));
        }

        if request.is_notification() {
            debug!(method = %request.method, "Notification received");
            return None;
        }

        let id = request.id.clone();
        let outcome = match request.method.as_str() {
            "initialize" => Ok(self.initialize()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.tools_list()),
            "tools/call" => self.tools_call(&request).await,
            "resources/list" => Ok(json!({ "resources": self.resources.list() })),
            "resources/templates/list" => Ok(json!({ "resourceTemplates": [] })),
            "resources/read" => self.resources_read(request.params.as_ref()).await,
            other => {
                warn!(method = other, "Unknown method");
                Err((codes::METHOD_NOT_FOUND, format!("Method not found: {}", other)))
            }
        };

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err((code, message)) => JsonRpcResponse::error(id, code, message),
        })
    }

    fn initialize(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": false },
                "resources": { "subscribe": false, "listChanged": false },
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
        })
    }

    fn tools_list(&self) -> Value {
        let tools: Vec<Value> = self
            .registry
            .list_tools()
            .iter()
            .map(|descriptor| descriptor.to_catalog_entry())
            .collect();
        json!({ "tools": tools })
    }

    async fn tools_call(&self, request: &JsonRpcRequest) -> Result<Value, (i64, String)> {
        let params = request
            .params
            .as_ref()
            .and_then(Value::as_object)
            .ok_or_else(|| invalid_params("tools/call params must be an object"))?;

        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid_params("tools/call requires a string `name`"))?;

        let args = match params.get("arguments") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => return Err(invalid_params("tools/call `arguments` must be an object")),
        };

        let call = CallRequest {
            id: request.id.clone().unwrap_or(CorrelationId::from(0)),
            tool: name.to_string(),
            args,
        };
        let result = self.registry.call(&call).await;
        Ok(tool_call_result(&result))
    }

    async fn resources_read(&self, params: Option<&Value>) -> Result<Value, (i64, String)> {
        let uri = params
            .and_then(|p| p.get("uri"))
            .and_then(Value::as_str)
            .ok_or_else(|| invalid_params("resources/read requires a string `uri`"))?;

        match self.resources.read(uri).await {
            Some(content) => Ok(json!({ "contents": [content.to_value()] })),
            None => Err((
                codes::RESOURCE_NOT_FOUND,
                format!("Resource not found: {}", uri),
            )),
        }
    }
}

fn invalid_params(message: &str) -> (i64, String) {
    (codes::INVALID_PARAMS, format!("Invalid params: {}", message))
}

/// Best-effort id of a message that failed to decode
fn recover_id(object: &Map<String, Value>) -> Option<CorrelationId> {
    object
        .get("id")
        .cloned()
        .and_then(|id| serde_json::from_value(id).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Collaborators, MemoryStore};
    use std::sync::Arc;
    use tooling::runtime::PolicySnapshot;

    fn dispatcher() -> Dispatcher {
        let store = Arc::new(MemoryStore::new());
        Dispatcher::new(ToolRegistry::new(
            Collaborators::memory(store),
            Arc::new(PolicySnapshot::default()),
        ))
    }

    #[tokio::test]
    async fn test_initialize() {
        let response = dispatcher()
            .handle_text(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#)
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "certificate-management");
        assert_eq!(response.id, Some(CorrelationId::from(1)));
    }

    #[tokio::test]
    async fn test_notification_gets_no_response() {
        let response = dispatcher()
            .handle_text(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn test_tools_list_matches_catalog() {
        let response = dispatcher()
            .handle(JsonRpcRequest::new("a", "tools/list", json!({})))
            .await
            .unwrap();
        let tools = response.result.unwrap()["tools"].as_array().unwrap().len();
        assert_eq!(tools, crate::registry::CATALOG.len());
    }

    #[tokio::test]
    async fn test_tools_call_wraps_failure() {
        let response = dispatcher()
            .handle(JsonRpcRequest::new(
                7,
                "tools/call",
                json!({ "name": "rebuild_search_index" }),
            ))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        assert_eq!(result["structuredContent"]["error"]["kind"], "policy_denied");
        assert_eq!(result["content"][0]["type"], "text");
    }

    #[tokio::test]
    async fn test_error_codes() {
        let d = dispatcher();
        let cases = [
            (r#"{"jsonrpc":"2.0","id":1,"method":"nope"}"#, codes::METHOD_NOT_FOUND),
            (r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":[]}"#, codes::INVALID_PARAMS),
            (
                r#"{"jsonrpc":"2.0","id":1,"method":"resources/read","params":{"uri":"x://y"}}"#,
                codes::RESOURCE_NOT_FOUND,
            ),
            (r#"{"jsonrpc":"2.0","id":1,"method":"#, codes::PARSE_ERROR),
            (r#"[1,2]"#, codes::INVALID_REQUEST),
        ];
        for (text, code) in cases {
            let response = d.handle_text(text).await.unwrap();
            assert_eq!(response.error.unwrap().code, code, "{}", text);
        }
    }

    #[tokio::test]
    async fn test_docs_resources() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "# Certificates").unwrap();
        let d = dispatcher().with_docs_dir(dir.path());

        let response = d
            .handle(JsonRpcRequest::new(1, "resources/list", json!({})))
            .await
            .unwrap();
        let uris: Vec<Value> = response.result.unwrap()["resources"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["uri"].clone())
            .collect();
        assert!(uris.contains(&json!("docs://readme")));
        assert!(uris.contains(&json!("docs://agents")));

        let response = d
            .handle(JsonRpcRequest::new(
                2,
                "resources/read",
                json!({ "uri": "docs://readme" }),
            ))
            .await
            .unwrap();
        assert_eq!(
            response.result.unwrap()["contents"][0]["text"],
            "# Certificates"
        );

        let response = d
            .handle(JsonRpcRequest::new(
                3,
                "resources/read",
                json!({ "uri": "docs://agents" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, codes::RESOURCE_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_wide_and_fractional_ids_echoed() {
        let d = dispatcher();
        for id in ["18446744073709551615", "1.5", "-9223372036854775808"] {
            let text = format!(r#"{{"jsonrpc":"2.0","id":{},"method":"ping"}}"#, id);
            let response = d.handle_text(&text).await.unwrap();
            let wire = response.to_json();
            assert!(wire.contains(&format!(r#""id":{}"#, id)), "{}", wire);
            assert!(response.error.is_none());
        }
    }

    #[tokio::test]
    async fn test_string_id_echoed() {
        let response = dispatcher()
            .handle_text(r#"{"jsonrpc":"2.0","id":"req-9","method":"ping"}"#)
            .await
            .unwrap();
        let wire: Value = serde_json::from_str(&response.to_json()).unwrap();
        assert_eq!(wire["id"], "req-9");
        assert_eq!(wire["result"], json!({}));
    }
}
