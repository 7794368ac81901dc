//! Stateless server semantics: no handshake required, notifications
//! accepted and ignored, no per-session state.

use mcp_runtime::features::ToolSpec;
use mcp_runtime::types::{
    CallToolResult, JsonRpcNotification, JsonRpcRequest, RequestId, Resource, Tool,
};
use mcp_runtime::{McpStatelessServer, SyncResourceSpec, ResourceSpec};
use serde_json::json;

fn stateless() -> McpStatelessServer {
    McpStatelessServer::builder()
        .server_info("stateless", "1.0")
        .tool(ToolSpec::new(
            Tool::new("echo", "Echo", json!({"type": "object"})),
            |_ctx, params| async move {
                Ok(CallToolResult::text(params.arguments["msg"].as_str().unwrap_or("").to_string()))
            },
        ))
        .resource(ResourceSpec::from_sync(
            SyncResourceSpec::new(Resource::new("mem://greeting", "greeting"), |_ctx, params| {
                Ok(mcp_runtime::types::ReadResourceResult {
                    contents: vec![mcp_runtime::types::ResourceContents {
                        uri: params.uri,
                        mime_type: Some("text/plain".to_string()),
                        content: mcp_runtime::types::ResourceData::Text {
                            text: "hello".to_string(),
                        },
                    }],
                })
            }),
            false,
        ))
        .build_stateless()
        .unwrap()
}

#[tokio::test]
async fn requests_work_without_handshake() {
    let server = stateless();

    let response = server
        .handle(JsonRpcRequest::new(
            1,
            "tools/call",
            Some(json!({"name": "echo", "arguments": {"msg": "hi"}})),
        ))
        .await;

    assert_eq!(response.id, RequestId::Number(1));
    let result = response.result.unwrap();
    assert_eq!(result["content"][0]["text"], json!("hi"));
}

#[tokio::test]
async fn initialize_is_answered_statelessly() {
    let server = stateless();

    let response = server
        .handle(JsonRpcRequest::new(
            1,
            "initialize",
            Some(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "t", "version": "1"}
            })),
        ))
        .await;

    let result = response.result.unwrap();
    assert_eq!(result["protocolVersion"], json!("2024-11-05"));
    assert_eq!(result["serverInfo"]["name"], json!("stateless"));
    // No push channel: listChanged / subscribe are not advertised.
    assert_eq!(result["capabilities"]["tools"]["listChanged"], json!(false));
    assert_eq!(result["capabilities"]["resources"]["subscribe"], json!(false));
}

#[tokio::test]
async fn initialized_notification_is_ignored() {
    let server = stateless();
    server.handle_notification(JsonRpcNotification::new("notifications/initialized", None));

    // Still serving afterwards.
    let response = server.handle(JsonRpcRequest::new(2, "ping", None)).await;
    assert_eq!(response.result.unwrap(), json!({}));
}

#[tokio::test]
async fn resources_read_and_unknown_method() {
    let server = stateless();

    let response = server
        .handle(JsonRpcRequest::new(
            1,
            "resources/read",
            Some(json!({"uri": "mem://greeting"})),
        ))
        .await;
    assert_eq!(response.result.unwrap()["contents"][0]["text"], json!("hello"));

    let response = server
        .handle(JsonRpcRequest::new(2, "resources/read", Some(json!({"uri": "mem://missing"}))))
        .await;
    assert_eq!(response.error.unwrap().code, -32002);

    // Session-scoped methods do not exist here.
    let response = server
        .handle(JsonRpcRequest::new(3, "resources/subscribe", Some(json!({"uri": "mem://greeting"}))))
        .await;
    assert_eq!(response.error.unwrap().code, -32601);
}
