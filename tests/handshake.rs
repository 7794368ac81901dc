//! Initialization handshake driven over the raw wire.

use mcp_runtime::features::ToolSpec;
use mcp_runtime::transport::{InMemoryTransport, McpMessage, Transport};
use mcp_runtime::types::{JsonRpcNotification, JsonRpcRequest, RequestId, Tool};
use mcp_runtime::McpServer;
use serde_json::{json, Value};
use std::sync::Arc;

fn test_server() -> McpServer {
    McpServer::builder()
        .server_info("test-server", "1.0")
        .tool(ToolSpec::new(
            Tool::new("echo", "Echo the message back", json!({"type": "object"})),
            |_ctx, params| async move {
                Ok(mcp_runtime::types::CallToolResult::text(
                    params.arguments["msg"].as_str().unwrap_or_default().to_string(),
                ))
            },
        ))
        .build()
        .unwrap()
}

async fn expect_response(endpoint: &InMemoryTransport) -> mcp_runtime::types::JsonRpcResponse {
    match endpoint.receive().await.unwrap().unwrap() {
        McpMessage::Response(response) => response,
        other => panic!("expected response, got {other:?}"),
    }
}

#[tokio::test]
async fn initialize_negotiates_version_and_reports_capabilities() {
    let (server_end, client_end) = InMemoryTransport::pair();
    let server = test_server();
    let _session = server.accept(Arc::new(server_end)).await;

    client_end
        .send_request(JsonRpcRequest::new(
            1,
            "initialize",
            Some(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "t", "version": "1"}
            })),
        ))
        .await
        .unwrap();

    let response = expect_response(&client_end).await;
    assert_eq!(response.id, RequestId::Number(1));
    let result = response.result.unwrap();
    assert_eq!(result["protocolVersion"], json!("2024-11-05"));
    assert_eq!(result["serverInfo"]["name"], json!("test-server"));
    assert!(result["capabilities"]["tools"].is_object());
    assert!(result["capabilities"]["logging"].is_object());
    // No resources registered, so the capability is absent.
    assert!(result["capabilities"].get("resources").is_none());
}

#[tokio::test]
async fn requests_before_initialized_are_rejected() {
    let (server_end, client_end) = InMemoryTransport::pair();
    let server = test_server();
    let _session = server.accept(Arc::new(server_end)).await;

    client_end
        .send_request(JsonRpcRequest::new(1, "tools/list", None))
        .await
        .unwrap();

    let response = expect_response(&client_end).await;
    let error = response.error.unwrap();
    assert_eq!(error.code, -32002);
    assert!(error.message.contains("not initialized"));
}

#[tokio::test]
async fn ping_is_gated_until_operational() {
    let (server_end, client_end) = InMemoryTransport::pair();
    let server = test_server();
    let _session = server.accept(Arc::new(server_end)).await;

    client_end
        .send_request(JsonRpcRequest::new(1, "ping", None))
        .await
        .unwrap();
    let response = expect_response(&client_end).await;
    assert_eq!(response.error.unwrap().code, -32002);
}

#[tokio::test]
async fn full_handshake_unlocks_dispatch() {
    let (server_end, client_end) = InMemoryTransport::pair();
    let server = test_server();
    let _session = server.accept(Arc::new(server_end)).await;

    client_end
        .send_request(JsonRpcRequest::new(
            1,
            "initialize",
            Some(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "t", "version": "1"}
            })),
        ))
        .await
        .unwrap();
    expect_response(&client_end).await;

    // Still gated: the initialized notification has not arrived yet.
    client_end
        .send_request(JsonRpcRequest::new(2, "tools/list", None))
        .await
        .unwrap();
    assert_eq!(expect_response(&client_end).await.error.unwrap().code, -32002);

    client_end
        .send_notification(JsonRpcNotification::new("notifications/initialized", None))
        .await
        .unwrap();

    client_end
        .send_request(JsonRpcRequest::new(3, "tools/list", None))
        .await
        .unwrap();
    let response = expect_response(&client_end).await;
    let tools = &response.result.unwrap()["tools"];
    assert_eq!(tools[0]["name"], json!("echo"));

    client_end.send_request(JsonRpcRequest::new(4, "ping", None)).await.unwrap();
    let response = expect_response(&client_end).await;
    assert_eq!(response.result.unwrap(), json!({}));
}

#[tokio::test]
async fn unsupported_protocol_version_fails_handshake() {
    let (server_end, client_end) = InMemoryTransport::pair();
    let server = test_server();
    let _session = server.accept(Arc::new(server_end)).await;

    client_end
        .send_request(JsonRpcRequest::new(
            1,
            "initialize",
            Some(json!({
                "protocolVersion": "1999-01-01",
                "capabilities": {},
                "clientInfo": {"name": "t", "version": "1"}
            })),
        ))
        .await
        .unwrap();

    let response = expect_response(&client_end).await;
    let error = response.error.unwrap();
    assert_eq!(error.code, -32602);
    assert!(error.message.contains("Unsupported protocol version"));
}

#[tokio::test]
async fn unknown_method_after_handshake_is_32601() {
    let (server_end, client_end) = InMemoryTransport::pair();
    let server = test_server();
    let _session = server.accept(Arc::new(server_end)).await;

    client_end
        .send_request(JsonRpcRequest::new(
            1,
            "initialize",
            Some(json!({
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "clientInfo": {"name": "t", "version": "1"}
            })),
        ))
        .await
        .unwrap();
    expect_response(&client_end).await;
    client_end
        .send_notification(JsonRpcNotification::new("notifications/initialized", None))
        .await
        .unwrap();

    client_end
        .send_request(JsonRpcRequest::new(2, "foo/bar", None))
        .await
        .unwrap();
    assert_eq!(expect_response(&client_end).await.error.unwrap().code, -32601);
}

#[tokio::test]
async fn malformed_frame_keeps_session_open() {
    let (server_end, client_end) = InMemoryTransport::pair();
    let server = test_server();
    let _session = server.accept(Arc::new(server_end)).await;

    client_end.send_raw("this is not json").await.unwrap();
    let response = expect_response(&client_end).await;
    assert_eq!(response.error.unwrap().code, -32700);

    // Session survives and still answers the handshake.
    client_end
        .send_request(JsonRpcRequest::new(
            1,
            "initialize",
            Some(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "t", "version": "1"}
            })),
        ))
        .await
        .unwrap();
    let response = expect_response(&client_end).await;
    assert!(response.result.is_some());
}

#[tokio::test]
async fn batch_frame_is_rejected_as_invalid_request() {
    let (server_end, client_end) = InMemoryTransport::pair();
    let server = test_server();
    let _session = server.accept(Arc::new(server_end)).await;

    let batch: Value = json!([{"jsonrpc": "2.0", "id": 1, "method": "ping"}]);
    client_end.send_raw(batch.to_string()).await.unwrap();

    let response = expect_response(&client_end).await;
    assert_eq!(response.error.unwrap().code, -32600);
}
