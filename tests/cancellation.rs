//! Cancellation: peer-issued `notifications/cancelled` reaches the
//! in-flight handler and suppresses the response.

use mcp_runtime::features::ToolSpec;
use mcp_runtime::transport::{InMemoryTransport, McpMessage, Transport};
use mcp_runtime::types::{CallToolResult, JsonRpcNotification, JsonRpcRequest, RequestId, Tool};
use mcp_runtime::McpServer;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn cancelled_request_writes_no_response() {
    let observed_cancel = Arc::new(AtomicBool::new(false));
    let observed = Arc::clone(&observed_cancel);

    let wait_tool = ToolSpec::new(
        Tool::new("wait", "Waits until cancelled", json!({"type": "object"})),
        move |ctx, _params| {
            let observed = Arc::clone(&observed);
            async move {
                ctx.cancelled().await;
                observed.store(true, Ordering::SeqCst);
                Ok(CallToolResult::text("too late"))
            }
        },
    );

    let server = McpServer::builder().tool(wait_tool).build().unwrap();
    let (server_end, client_end) = InMemoryTransport::pair();
    server.accept(Arc::new(server_end)).await;

    // Handshake by hand.
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
    client_end.receive().await.unwrap().unwrap();
    client_end
        .send_notification(JsonRpcNotification::new("notifications/initialized", None))
        .await
        .unwrap();

    // Kick off the long-running call, then cancel it.
    client_end
        .send_request(JsonRpcRequest::new(
            7,
            "tools/call",
            Some(json!({"name": "wait", "arguments": {}})),
        ))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    client_end
        .send_notification(JsonRpcNotification::new(
            "notifications/cancelled",
            Some(json!({"requestId": 7, "reason": "user gave up"})),
        ))
        .await
        .unwrap();

    // A follow-up ping is answered while no id=7 response ever arrives.
    client_end.send_request(JsonRpcRequest::new(8, "ping", None)).await.unwrap();

    match tokio::time::timeout(Duration::from_secs(2), client_end.receive())
        .await
        .unwrap()
        .unwrap()
        .unwrap()
    {
        McpMessage::Response(response) => assert_eq!(response.id, RequestId::Number(8)),
        other => panic!("expected ping response, got {other:?}"),
    }

    // The handler saw its cancellation signal.
    tokio::time::timeout(Duration::from_secs(2), async {
        while !observed_cancel.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("handler never observed cancellation");

    // Nothing further shows up on the wire for id=7.
    let extra = tokio::time::timeout(Duration::from_millis(200), client_end.receive()).await;
    assert!(extra.is_err(), "unexpected extra frame after cancellation: {extra:?}");
}
