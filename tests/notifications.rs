//! Notification fan-out: ordering, list-changed broadcasts, subscriptions
//! and the per-session logging filter.

use mcp_runtime::features::{consumer, ToolSpec};
use mcp_runtime::transport::InMemoryTransport;
use mcp_runtime::types::{
    CallToolResult, LogLevel, LoggingMessageParams, Resource, Tool,
};
use mcp_runtime::{McpClient, McpServer, ResourceSpec, SyncResourceSpec};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never became true");
}

fn noop_resource(uri: &str) -> ResourceSpec {
    ResourceSpec::from_sync(
        SyncResourceSpec::new(Resource::new(uri, "res"), |_ctx, params| {
            Ok(mcp_runtime::types::ReadResourceResult {
                contents: vec![mcp_runtime::types::ResourceContents {
                    uri: params.uri,
                    mime_type: Some("text/plain".to_string()),
                    content: mcp_runtime::types::ResourceData::Text { text: "data".to_string() },
                }],
            })
        }),
        false,
    )
}

#[tokio::test]
async fn logging_notifications_arrive_in_send_order() {
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let server = McpServer::builder().build().unwrap();
    let (server_end, client_end) = InMemoryTransport::pair();
    server.accept(Arc::new(server_end)).await;

    let _client = McpClient::builder(Arc::new(client_end))
        .on_logging_message(consumer(move |params: LoggingMessageParams| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(params.data.as_str().unwrap_or_default().to_string());
                Ok(())
            }
        }))
        .connect()
        .await
        .unwrap();

    for n in ["N1", "N2", "N3"] {
        server
            .log_message(LoggingMessageParams {
                level: LogLevel::Info,
                logger: None,
                data: json!(n),
            })
            .await;
    }

    wait_until(|| seen.lock().len() == 3).await;
    assert_eq!(*seen.lock(), ["N1", "N2", "N3"]);
}

#[tokio::test]
async fn set_level_filters_less_severe_messages() {
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let server = McpServer::builder().build().unwrap();
    let (server_end, client_end) = InMemoryTransport::pair();
    server.accept(Arc::new(server_end)).await;

    let client = McpClient::builder(Arc::new(client_end))
        .on_logging_message(consumer(move |params: LoggingMessageParams| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(params.data.as_str().unwrap_or_default().to_string());
                Ok(())
            }
        }))
        .connect()
        .await
        .unwrap();

    client.set_logging_level(LogLevel::Warning).await.unwrap();

    server
        .log_message(LoggingMessageParams {
            level: LogLevel::Info,
            logger: None,
            data: json!("filtered"),
        })
        .await;
    server
        .log_message(LoggingMessageParams {
            level: LogLevel::Error,
            logger: None,
            data: json!("delivered"),
        })
        .await;

    wait_until(|| !seen.lock().is_empty()).await;
    assert_eq!(*seen.lock(), ["delivered"]);
}

#[tokio::test]
async fn registry_mutation_broadcasts_list_changed() {
    let changes = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = Arc::clone(&changes);

    let server = McpServer::builder().build().unwrap();
    let (server_end, client_end) = InMemoryTransport::pair();
    server.accept(Arc::new(server_end)).await;

    let client = McpClient::builder(Arc::new(client_end))
        .on_tools_list_changed(consumer(move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            }
        }))
        .connect()
        .await
        .unwrap();

    server
        .add_tool(ToolSpec::new(
            Tool::new("late", "Added after startup", json!({"type": "object"})),
            |_ctx, _params| async move { Ok(CallToolResult::text("ok")) },
        ))
        .await
        .unwrap();

    wait_until(|| changes.load(std::sync::atomic::Ordering::SeqCst) == 1).await;

    // The mutated registry serves the new tool.
    let tools = client.list_tools().await.unwrap().tools;
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "late");

    server.remove_tool("late").await;
    wait_until(|| changes.load(std::sync::atomic::Ordering::SeqCst) == 2).await;
}

#[tokio::test]
async fn resource_updates_reach_subscribers_only() {
    let updated: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&updated);

    let server = McpServer::builder()
        .resource(noop_resource("file:///watched"))
        .resource(noop_resource("file:///other"))
        .build()
        .unwrap();
    let (server_end, client_end) = InMemoryTransport::pair();
    server.accept(Arc::new(server_end)).await;

    let client = McpClient::builder(Arc::new(client_end))
        .on_resource_updated(consumer(move |params: mcp_runtime::types::ResourceUpdatedParams| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(params.uri);
                Ok(())
            }
        }))
        .connect()
        .await
        .unwrap();

    client.subscribe_resource("file:///watched").await.unwrap();

    server.notify_resource_updated("file:///other").await;
    server.notify_resource_updated("file:///watched").await;

    wait_until(|| !updated.lock().is_empty()).await;
    assert_eq!(*updated.lock(), ["file:///watched"]);

    client.unsubscribe_resource("file:///watched").await.unwrap();
    server.notify_resource_updated("file:///watched").await;

    // Allow any stray delivery to surface before checking.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(updated.lock().len(), 1);
}
