//! Tool dispatch through the typed client, including structured-output
//! validation and tool-channel error reporting.

use mcp_runtime::features::ToolSpec;
use mcp_runtime::transport::InMemoryTransport;
use mcp_runtime::types::{CallToolResult, Content, Tool};
use mcp_runtime::{McpClient, McpError, McpServer};
use serde_json::json;
use std::sync::Arc;

async fn connect(server: McpServer) -> (McpServer, Arc<McpClient>) {
    let (server_end, client_end) = InMemoryTransport::pair();
    server.accept(Arc::new(server_end)).await;
    let client = McpClient::builder(Arc::new(client_end))
        .client_info("t", "1")
        .connect()
        .await
        .unwrap();
    (server, client)
}

fn echo_tool() -> ToolSpec {
    ToolSpec::new(
        Tool::new(
            "echo",
            "Echo the msg argument",
            json!({
                "type": "object",
                "properties": {"msg": {"type": "string"}},
                "required": ["msg"]
            }),
        ),
        |_ctx, params| async move {
            let msg = params.arguments["msg"].as_str().unwrap_or_default().to_string();
            Ok(CallToolResult::text(msg))
        },
    )
}

fn count_tool(output: serde_json::Value) -> ToolSpec {
    ToolSpec::new(
        Tool::new("count", "Count things", json!({"type": "object"})).with_output_schema(json!({
            "type": "object",
            "properties": {"n": {"type": "integer"}},
            "required": ["n"]
        })),
        move |_ctx, _params| {
            let output = output.clone();
            async move { Ok(CallToolResult::structured(output)) }
        },
    )
}

#[tokio::test]
async fn tool_call_success() {
    let server = McpServer::builder().tool(echo_tool()).build().unwrap();
    let (_server, client) = connect(server).await;

    let result = client.call_tool("echo", json!({"msg": "hi"})).await.unwrap();
    assert!(!result.is_error());
    match &result.content[0] {
        Content::Text { text } => assert_eq!(text, "hi"),
        other => panic!("expected text content, got {other:?}"),
    }
}

#[tokio::test]
async fn output_schema_violation_is_tool_level_error() {
    let server = McpServer::builder()
        .tool(count_tool(json!({"n": "five"})))
        .build()
        .unwrap();
    let (_server, client) = connect(server).await;

    let result = client.call_tool("count", json!({})).await.unwrap();
    assert!(result.is_error());
    match &result.content[0] {
        Content::Text { text } => {
            assert!(text
                .contains("Validation failed: structuredContent does not match tool outputSchema"));
        }
        other => panic!("expected text content, got {other:?}"),
    }
}

#[tokio::test]
async fn valid_structured_output_passes_through() {
    let server = McpServer::builder()
        .tool(count_tool(json!({"n": 5})))
        .build()
        .unwrap();
    let (_server, client) = connect(server).await;

    let result = client.call_tool("count", json!({})).await.unwrap();
    assert!(!result.is_error());
    assert_eq!(result.structured_content, Some(json!({"n": 5})));
}

#[tokio::test]
async fn handler_failure_reports_through_result_channel() {
    let failing = ToolSpec::new(
        Tool::new("broken", "Always fails", json!({"type": "object"})),
        |_ctx, _params| async move { Err(anyhow::anyhow!("disk on fire")) },
    );
    let server = McpServer::builder().tool(failing).build().unwrap();
    let (_server, client) = connect(server).await;

    // Not a protocol error: the call itself succeeds.
    let result = client.call_tool("broken", json!({})).await.unwrap();
    assert!(result.is_error());
    match &result.content[0] {
        Content::Text { text } => assert!(text.contains("disk on fire")),
        other => panic!("expected text content, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_tool_is_invalid_params() {
    let server = McpServer::builder().tool(echo_tool()).build().unwrap();
    let (_server, client) = connect(server).await;

    let err = client.call_tool("nope", json!({})).await.unwrap_err();
    match err {
        McpError::Protocol { code, message } => {
            assert_eq!(code, -32602);
            assert!(message.contains("Unknown tool"));
        }
        other => panic!("expected protocol error, got {other}"),
    }
}

#[tokio::test]
async fn list_tools_preserves_registration_order() {
    let mut builder = McpServer::builder();
    for name in ["zeta", "alpha", "mid"] {
        builder = builder.tool(ToolSpec::new(
            Tool::new(name, "noop", json!({"type": "object"})),
            |_ctx, _params| async move { Ok(CallToolResult::text("ok")) },
        ));
    }
    let (_server, client) = connect(builder.build().unwrap()).await;

    let tools = client.list_tools().await.unwrap().tools;
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["zeta", "alpha", "mid"]);
}

#[test]
fn duplicate_tool_fails_build() {
    let result = McpServer::builder().tool(echo_tool()).tool(echo_tool()).build();
    assert!(result.is_err());
}
