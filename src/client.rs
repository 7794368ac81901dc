//! MCP client core
//!
//! Owns the initiator side of the handshake, typed request builders for
//! the full client method surface, handlers for server-initiated requests
//! (roots, sampling, elicitation) and ordered fan-out of server
//! notifications to registered consumers.

use crate::config::RuntimeConfig;
use crate::context::RequestContext;
use crate::error::{McpError, INVALID_PARAMS};
use crate::features::{ElicitationHandler, NotificationConsumer, SamplingHandler};
use crate::session::{Session, SessionHandler, SessionRole, SessionState};
use crate::transport::Transport;
use crate::types::*;
use async_trait::async_trait;
use futures::future::FutureExt;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Client-side feature set: what we expose to the server.
struct ClientFeatures {
    roots: RwLock<Vec<Root>>,
    sampling: Option<SamplingHandler>,
    elicitation: Option<ElicitationHandler>,
    tools_change_consumers: Vec<NotificationConsumer<()>>,
    resources_change_consumers: Vec<NotificationConsumer<()>>,
    resources_update_consumers: Vec<NotificationConsumer<ResourceUpdatedParams>>,
    prompts_change_consumers: Vec<NotificationConsumer<()>>,
    logging_consumers: Vec<NotificationConsumer<LoggingMessageParams>>,
    progress_consumers: Vec<NotificationConsumer<ProgressParams>>,
}

/// MCP client bound to one session.
pub struct McpClient {
    session: Arc<Session>,
    features: Arc<ClientFeatures>,
    init_result: InitializeResult,
}

pub struct McpClientBuilder {
    transport: Arc<dyn Transport>,
    info: Implementation,
    capabilities: Option<ClientCapabilities>,
    protocol_version: String,
    roots: Vec<Root>,
    sampling: Option<SamplingHandler>,
    elicitation: Option<ElicitationHandler>,
    tools_change_consumers: Vec<NotificationConsumer<()>>,
    resources_change_consumers: Vec<NotificationConsumer<()>>,
    resources_update_consumers: Vec<NotificationConsumer<ResourceUpdatedParams>>,
    prompts_change_consumers: Vec<NotificationConsumer<()>>,
    logging_consumers: Vec<NotificationConsumer<LoggingMessageParams>>,
    progress_consumers: Vec<NotificationConsumer<ProgressParams>>,
    config: RuntimeConfig,
}

impl McpClient {
    pub fn builder(transport: Arc<dyn Transport>) -> McpClientBuilder {
        McpClientBuilder {
            transport,
            info: Implementation::new("mcp-runtime", env!("CARGO_PKG_VERSION")),
            capabilities: None,
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            roots: Vec::new(),
            sampling: None,
            elicitation: None,
            tools_change_consumers: Vec::new(),
            resources_change_consumers: Vec::new(),
            resources_update_consumers: Vec::new(),
            prompts_change_consumers: Vec::new(),
            logging_consumers: Vec::new(),
            progress_consumers: Vec::new(),
            config: RuntimeConfig::default(),
        }
    }

    // ===== Typed request surface =====

    pub async fn list_tools(&self) -> Result<ListToolsResult, McpError> {
        let value = self.session.request("tools/list", None, None).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        self.call_tool_with_timeout(name, arguments, None).await
    }

    pub async fn call_tool_with_timeout(
        &self,
        name: &str,
        arguments: Value,
        timeout: Option<Duration>,
    ) -> Result<CallToolResult, McpError> {
        let params = CallToolParams { name: name.to_string(), arguments };
        let value = self
            .session
            .request("tools/call", Some(serde_json::to_value(&params)?), timeout)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn list_resources(&self) -> Result<ListResourcesResult, McpError> {
        let value = self.session.request("resources/list", None, None).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, McpError> {
        let params = ReadResourceParams { uri: uri.to_string() };
        let value = self
            .session
            .request("resources/read", Some(serde_json::to_value(&params)?), None)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn list_resource_templates(&self) -> Result<ListResourceTemplatesResult, McpError> {
        let value = self.session.request("resources/templates/list", None, None).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn subscribe_resource(&self, uri: &str) -> Result<(), McpError> {
        let params = SubscribeParams { uri: uri.to_string() };
        self.session
            .request("resources/subscribe", Some(serde_json::to_value(&params)?), None)
            .await?;
        Ok(())
    }

    pub async fn unsubscribe_resource(&self, uri: &str) -> Result<(), McpError> {
        let params = UnsubscribeParams { uri: uri.to_string() };
        self.session
            .request("resources/unsubscribe", Some(serde_json::to_value(&params)?), None)
            .await?;
        Ok(())
    }

    pub async fn list_prompts(&self) -> Result<ListPromptsResult, McpError> {
        let value = self.session.request("prompts/list", None, None).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn get_prompt(&self, name: &str, arguments: Value) -> Result<GetPromptResult, McpError> {
        let params = GetPromptParams { name: name.to_string(), arguments };
        let value = self
            .session
            .request("prompts/get", Some(serde_json::to_value(&params)?), None)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn complete(&self, params: CompleteParams) -> Result<CompleteResult, McpError> {
        let value = self
            .session
            .request("completion/complete", Some(serde_json::to_value(&params)?), None)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn set_logging_level(&self, level: LogLevel) -> Result<(), McpError> {
        let params = SetLevelParams { level };
        self.session
            .request("logging/setLevel", Some(serde_json::to_value(&params)?), None)
            .await?;
        Ok(())
    }

    pub async fn ping(&self) -> Result<(), McpError> {
        self.session.request("ping", None, None).await?;
        Ok(())
    }

    /// Escape hatch for methods without a typed wrapper.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, McpError> {
        self.session.request(method, params, timeout).await
    }

    // ===== Introspection =====

    pub fn server_info(&self) -> &Implementation {
        &self.init_result.server_info
    }

    pub fn server_capabilities(&self) -> &ServerCapabilities {
        &self.init_result.capabilities
    }

    pub fn instructions(&self) -> Option<&str> {
        self.init_result.instructions.as_deref()
    }

    pub fn protocol_version(&self) -> &str {
        &self.init_result.protocol_version
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Replace the advertised roots and notify the server.
    pub async fn set_roots(&self, roots: Vec<Root>) -> Result<(), McpError> {
        *self.features.roots.write() = roots;
        self.session.notify("notifications/roots/list_changed", None).await
    }

    pub async fn close(&self) {
        self.session.close().await;
    }

    pub async fn close_gracefully(&self) {
        self.session.close_gracefully().await;
    }
}

impl McpClientBuilder {
    pub fn client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.info = Implementation::new(name, version);
        self
    }

    pub fn capabilities(mut self, capabilities: ClientCapabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn root(mut self, root: Root) -> Self {
        self.roots.push(root);
        self
    }

    pub fn roots(mut self, roots: impl IntoIterator<Item = Root>) -> Self {
        self.roots.extend(roots);
        self
    }

    pub fn sampling_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(RequestContext, CreateMessageParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<CreateMessageResult>> + Send + 'static,
    {
        self.sampling = Some(Arc::new(move |ctx, params| handler(ctx, params).boxed()));
        self
    }

    /// Blocking sampling handler, offloaded per the sync bridge.
    pub fn sync_sampling_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(RequestContext, CreateMessageParams) -> anyhow::Result<CreateMessageResult>
            + Send
            + Sync
            + 'static,
    {
        let handler = Arc::new(handler);
        self.sampling = Some(Arc::new(move |ctx, params| {
            let handler = Arc::clone(&handler);
            async move {
                tokio::task::spawn_blocking(move || handler(ctx, params))
                    .await
                    .map_err(|e| anyhow::anyhow!("blocking sampling handler panicked: {e}"))?
            }
            .boxed()
        }));
        self
    }

    pub fn elicitation_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(RequestContext, ElicitParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ElicitResult>> + Send + 'static,
    {
        self.elicitation = Some(Arc::new(move |ctx, params| handler(ctx, params).boxed()));
        self
    }

    pub fn on_tools_list_changed(mut self, consumer: NotificationConsumer<()>) -> Self {
        self.tools_change_consumers.push(consumer);
        self
    }

    pub fn on_resources_list_changed(mut self, consumer: NotificationConsumer<()>) -> Self {
        self.resources_change_consumers.push(consumer);
        self
    }

    pub fn on_resource_updated(
        mut self,
        consumer: NotificationConsumer<ResourceUpdatedParams>,
    ) -> Self {
        self.resources_update_consumers.push(consumer);
        self
    }

    pub fn on_prompts_list_changed(mut self, consumer: NotificationConsumer<()>) -> Self {
        self.prompts_change_consumers.push(consumer);
        self
    }

    pub fn on_logging_message(mut self, consumer: NotificationConsumer<LoggingMessageParams>) -> Self {
        self.logging_consumers.push(consumer);
        self
    }

    pub fn on_progress(mut self, consumer: NotificationConsumer<ProgressParams>) -> Self {
        self.progress_consumers.push(consumer);
        self
    }

    /// Perform the initialize handshake and return the ready client.
    pub async fn connect(self) -> Result<Arc<McpClient>, McpError> {
        // Absent an explicit capability set, advertise what handlers exist.
        let capabilities = self.capabilities.clone().unwrap_or_else(|| ClientCapabilities {
            roots: (!self.roots.is_empty())
                .then(|| RootsCapability { list_changed: true }),
            sampling: self.sampling.as_ref().map(|_| SamplingCapability {}),
            elicitation: self.elicitation.as_ref().map(|_| ElicitationCapability {}),
            experimental: None,
        });

        let features = Arc::new(ClientFeatures {
            roots: RwLock::new(self.roots),
            sampling: self.sampling,
            elicitation: self.elicitation,
            tools_change_consumers: self.tools_change_consumers,
            resources_change_consumers: self.resources_change_consumers,
            resources_update_consumers: self.resources_update_consumers,
            prompts_change_consumers: self.prompts_change_consumers,
            logging_consumers: self.logging_consumers,
            progress_consumers: self.progress_consumers,
        });

        let handler = Arc::new(ClientSessionHandler { features: Arc::clone(&features) });
        let session = Session::spawn(self.transport, handler, SessionRole::Client, &self.config);
        session.set_state(SessionState::Initializing);

        let params = InitializeParams {
            protocol_version: self.protocol_version,
            capabilities,
            client_info: self.info,
        };

        let value = session
            .request("initialize", Some(serde_json::to_value(&params)?), None)
            .await?;
        let init_result: InitializeResult = serde_json::from_value(value)?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&init_result.protocol_version.as_str()) {
            session.close().await;
            return Err(McpError::Protocol {
                code: INVALID_PARAMS,
                message: format!(
                    "server negotiated unsupported protocol version: {}",
                    init_result.protocol_version
                ),
            });
        }

        session.set_peer_info(init_result.server_info.clone());
        session.set_negotiated_version(init_result.protocol_version.clone());
        session.notify("notifications/initialized", None).await?;
        session.set_state(SessionState::Operational);

        info!(
            "connected to MCP server: {} v{}",
            init_result.server_info.name, init_result.server_info.version
        );

        Ok(Arc::new(McpClient { session, features, init_result }))
    }
}

/// Session-facing side of the client: answers server-initiated requests
/// and fans notifications out to consumers.
struct ClientSessionHandler {
    features: Arc<ClientFeatures>,
}

#[async_trait]
impl SessionHandler for ClientSessionHandler {
    async fn handle_request(
        &self,
        _session: &Arc<Session>,
        ctx: RequestContext,
        request: &JsonRpcRequest,
    ) -> Result<Value, JsonRpcError> {
        match request.method.as_str() {
            "ping" => Ok(json!({})),
            "roots/list" => {
                let result = ListRootsResult { roots: self.features.roots.read().clone() };
                serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
            }
            "sampling/createMessage" => {
                let handler = self
                    .features
                    .sampling
                    .as_ref()
                    .ok_or_else(|| JsonRpcError::method_not_found("sampling/createMessage"))?;
                let params: CreateMessageParams = parse_params(request.params.clone())?;
                let result = handler(ctx, params)
                    .await
                    .map_err(|e| JsonRpcError::internal_error(e.to_string()))?;
                serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
            }
            "elicitation/create" => {
                let handler = self
                    .features
                    .elicitation
                    .as_ref()
                    .ok_or_else(|| JsonRpcError::method_not_found("elicitation/create"))?;
                let params: ElicitParams = parse_params(request.params.clone())?;
                let result = handler(ctx, params)
                    .await
                    .map_err(|e| JsonRpcError::internal_error(e.to_string()))?;
                serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
            }
            other => Err(JsonRpcError::method_not_found(other)),
        }
    }

    async fn handle_notification(&self, _session: &Arc<Session>, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            "notifications/tools/list_changed" => {
                fan_out(&self.features.tools_change_consumers, ()).await;
            }
            "notifications/resources/list_changed" => {
                fan_out(&self.features.resources_change_consumers, ()).await;
            }
            "notifications/resources/updated" => {
                if let Some(params) = decode(notification.params) {
                    fan_out::<ResourceUpdatedParams>(&self.features.resources_update_consumers, params)
                        .await;
                }
            }
            "notifications/prompts/list_changed" => {
                fan_out(&self.features.prompts_change_consumers, ()).await;
            }
            "notifications/message" => {
                if let Some(params) = decode(notification.params) {
                    fan_out::<LoggingMessageParams>(&self.features.logging_consumers, params).await;
                }
            }
            "notifications/progress" => {
                if let Some(params) = decode(notification.params) {
                    fan_out::<ProgressParams>(&self.features.progress_consumers, params).await;
                }
            }
            other => debug!("unhandled notification: {other}"),
        }
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> Result<T, JsonRpcError> {
    let params = params.ok_or_else(|| JsonRpcError::invalid_params("Missing params"))?;
    serde_json::from_value(params).map_err(|e| JsonRpcError::invalid_params(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(params: Option<Value>) -> Option<T> {
    let decoded = params.and_then(|p| serde_json::from_value(p).ok());
    if decoded.is_none() {
        warn!("notification payload failed to decode, skipping consumers");
    }
    decoded
}

/// Deliver to consumers in registration order; a failing consumer is
/// logged and skipped.
async fn fan_out<T: Clone>(consumers: &[NotificationConsumer<T>], payload: T) {
    for consumer in consumers {
        if let Err(e) = consumer(payload.clone()).await {
            warn!("notification consumer failed, skipping: {e}");
        }
    }
}

/// Convenience re-export so callers can write
/// `.on_logging_message(client_consumer(|m| async move { … }))`.
pub use crate::features::consumer as client_consumer;
