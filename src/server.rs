//! MCP server cores
//!
//! [`McpServer`] is the stateful variant: it accepts sessions from any
//! transport, enforces the handshake, shares one feature registry across
//! sessions and pushes list-changed / resource-updated / logging
//! notifications. [`McpStatelessServer`] answers single requests with no
//! per-connection state for request/response transports.

use crate::config::RuntimeConfig;
use crate::context::RequestContext;
use crate::error::McpError;
use crate::features::{
    CompletionSpec, FeatureRegistry, PromptSpec, ResourceSpec, SyncCompletionSpec, SyncPromptSpec,
    SyncResourceSpec, SyncToolSpec, ToolSpec,
};
use crate::schema::{DefaultSchemaValidator, SchemaValidator, ValidationResponse};
use crate::session::{Session, SessionHandler, SessionRole};
use crate::transport::Transport;
use crate::types::*;
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Completion results are capped at this many values.
const MAX_COMPLETION_VALUES: usize = 100;

pub struct McpServerBuilder {
    info: Implementation,
    instructions: Option<String>,
    tools: Vec<ToolSpec>,
    resources: Vec<ResourceSpec>,
    resource_templates: Vec<ResourceTemplate>,
    prompts: Vec<PromptSpec>,
    completions: Vec<CompletionSpec>,
    validator: Arc<dyn SchemaValidator>,
    config: RuntimeConfig,
}

impl McpServerBuilder {
    pub fn server_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.info = Implementation::new(name, version);
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn tool(mut self, spec: ToolSpec) -> Self {
        self.tools.push(spec);
        self
    }

    /// Register a blocking tool through the sync bridge.
    pub fn sync_tool(mut self, spec: SyncToolSpec) -> Self {
        let immediate = self.config.immediate_execution;
        self.tools.push(ToolSpec::from_sync(spec, immediate));
        self
    }

    pub fn resource(mut self, spec: ResourceSpec) -> Self {
        self.resources.push(spec);
        self
    }

    pub fn sync_resource(mut self, spec: SyncResourceSpec) -> Self {
        let immediate = self.config.immediate_execution;
        self.resources.push(ResourceSpec::from_sync(spec, immediate));
        self
    }

    pub fn resource_template(mut self, template: ResourceTemplate) -> Self {
        self.resource_templates.push(template);
        self
    }

    pub fn prompt(mut self, spec: PromptSpec) -> Self {
        self.prompts.push(spec);
        self
    }

    pub fn sync_prompt(mut self, spec: SyncPromptSpec) -> Self {
        let immediate = self.config.immediate_execution;
        self.prompts.push(PromptSpec::from_sync(spec, immediate));
        self
    }

    pub fn completion(mut self, spec: CompletionSpec) -> Self {
        self.completions.push(spec);
        self
    }

    pub fn sync_completion(mut self, spec: SyncCompletionSpec) -> Self {
        let immediate = self.config.immediate_execution;
        self.completions.push(CompletionSpec::from_sync(spec, immediate));
        self
    }

    fn build_registry(&mut self) -> Result<FeatureRegistry, McpError> {
        let mut registry = FeatureRegistry::new();
        for spec in self.tools.drain(..) {
            registry.add_tool(spec)?;
        }
        for spec in self.resources.drain(..) {
            registry.add_resource(spec)?;
        }
        for template in self.resource_templates.drain(..) {
            registry.add_resource_template(template);
        }
        for spec in self.prompts.drain(..) {
            registry.add_prompt(spec)?;
        }
        for spec in self.completions.drain(..) {
            registry.add_completion(spec)?;
        }
        Ok(registry)
    }

    /// Build the stateful server. Duplicate registrations fail here,
    /// before any session can open.
    pub fn build(mut self) -> Result<McpServer, McpError> {
        let registry = self.build_registry()?;
        Ok(McpServer {
            core: Arc::new(ServerCore {
                info: self.info,
                instructions: self.instructions,
                registry: RwLock::new(registry),
                sessions: RwLock::new(HashMap::new()),
                validator: self.validator,
                config: self.config,
            }),
        })
    }

    /// Build the stateless variant for request/response transports.
    pub fn build_stateless(mut self) -> Result<McpStatelessServer, McpError> {
        let registry = self.build_registry()?;
        Ok(McpStatelessServer {
            info: self.info,
            instructions: self.instructions,
            registry,
            validator: self.validator,
        })
    }
}

struct ServerCore {
    info: Implementation,
    instructions: Option<String>,
    registry: RwLock<FeatureRegistry>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    validator: Arc<dyn SchemaValidator>,
    config: RuntimeConfig,
}

/// Stateful MCP server.
pub struct McpServer {
    core: Arc<ServerCore>,
}

impl McpServer {
    pub fn builder() -> McpServerBuilder {
        McpServerBuilder {
            info: Implementation::new("mcp-runtime", env!("CARGO_PKG_VERSION")),
            instructions: None,
            tools: Vec::new(),
            resources: Vec::new(),
            resource_templates: Vec::new(),
            prompts: Vec::new(),
            completions: Vec::new(),
            validator: Arc::new(DefaultSchemaValidator::new()),
            config: RuntimeConfig::default(),
        }
    }

    /// Accept a new connection: bind a session to the shared registry and
    /// start serving it.
    pub async fn accept(&self, transport: Arc<dyn Transport>) -> Arc<Session> {
        let handler = Arc::new(ServerSessionHandler { core: Arc::clone(&self.core) });
        let session = Session::spawn(transport, handler, SessionRole::Server, &self.core.config);
        self.core
            .sessions
            .write()
            .await
            .insert(session.id().to_string(), Arc::clone(&session));
        debug!("accepted session {}", session.id());
        session
    }

    pub async fn session_count(&self) -> usize {
        self.core.sessions.read().await.len()
    }

    /// Broadcast a notification to every live session in parallel. A
    /// session whose write fails is removed; the broadcast itself never
    /// fails.
    pub async fn notify_clients(&self, method: &str, params: Option<Value>) {
        self.core.notify_clients(method, params).await;
    }

    // ===== Registry mutation (mutate, release, then broadcast) =====

    pub async fn add_tool(&self, spec: ToolSpec) -> Result<(), McpError> {
        self.core.registry.write().await.add_tool(spec)?;
        self.core.notify_clients("notifications/tools/list_changed", None).await;
        Ok(())
    }

    pub async fn remove_tool(&self, name: &str) -> bool {
        let removed = self.core.registry.write().await.remove_tool(name);
        if removed {
            self.core.notify_clients("notifications/tools/list_changed", None).await;
        }
        removed
    }

    pub async fn add_resource(&self, spec: ResourceSpec) -> Result<(), McpError> {
        self.core.registry.write().await.add_resource(spec)?;
        self.core.notify_clients("notifications/resources/list_changed", None).await;
        Ok(())
    }

    pub async fn remove_resource(&self, uri: &str) -> bool {
        let removed = self.core.registry.write().await.remove_resource(uri);
        if removed {
            self.core.notify_clients("notifications/resources/list_changed", None).await;
        }
        removed
    }

    pub async fn add_prompt(&self, spec: PromptSpec) -> Result<(), McpError> {
        self.core.registry.write().await.add_prompt(spec)?;
        self.core.notify_clients("notifications/prompts/list_changed", None).await;
        Ok(())
    }

    pub async fn remove_prompt(&self, name: &str) -> bool {
        let removed = self.core.registry.write().await.remove_prompt(name);
        if removed {
            self.core.notify_clients("notifications/prompts/list_changed", None).await;
        }
        removed
    }

    // ===== Server-initiated traffic =====

    /// Tell sessions subscribed to `uri` that the resource changed.
    pub async fn notify_resource_updated(&self, uri: &str) {
        let sessions = self.core.snapshot_sessions().await;
        let params = serde_json::to_value(ResourceUpdatedParams { uri: uri.to_string() }).ok();
        for session in sessions {
            if session.is_subscribed(uri) {
                if let Err(e) = session
                    .notify("notifications/resources/updated", params.clone())
                    .await
                {
                    warn!("session {}: resource-updated push failed: {e}", session.id());
                }
            }
        }
    }

    /// Send a log message to every session, honoring each session's
    /// `logging/setLevel` filter.
    pub async fn log_message(&self, params: LoggingMessageParams) {
        let sessions = self.core.snapshot_sessions().await;
        for session in sessions {
            if let Err(e) = session.send_log(params.clone()).await {
                warn!("session {}: log push failed: {e}", session.id());
            }
        }
    }

    /// Ask the client behind `session` to sample its model.
    pub async fn create_message(
        &self,
        session: &Arc<Session>,
        params: CreateMessageParams,
    ) -> Result<CreateMessageResult, McpError> {
        let value = session
            .request("sampling/createMessage", Some(serde_json::to_value(&params)?), None)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Fetch the client's filesystem roots.
    pub async fn list_roots(&self, session: &Arc<Session>) -> Result<ListRootsResult, McpError> {
        let value = session.request("roots/list", None, None).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Request structured input from the user behind `session`.
    pub async fn elicit(
        &self,
        session: &Arc<Session>,
        params: ElicitParams,
    ) -> Result<ElicitResult, McpError> {
        let value = session
            .request("elicitation/create", Some(serde_json::to_value(&params)?), None)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    // ===== Shutdown =====

    /// Signal all sessions to close and await drain.
    pub async fn close_gracefully(&self) {
        let sessions: Vec<Arc<Session>> =
            self.core.sessions.write().await.drain().map(|(_, s)| s).collect();
        join_all(sessions.iter().map(|s| s.close_gracefully())).await;
        info!("server closed {} sessions", sessions.len());
    }

    pub async fn close(&self) {
        let sessions: Vec<Arc<Session>> =
            self.core.sessions.write().await.drain().map(|(_, s)| s).collect();
        join_all(sessions.iter().map(|s| s.close())).await;
    }
}

impl ServerCore {
    /// Snapshot-then-iterate: never hold the session map (or the registry
    /// lock) while writing to a session.
    async fn snapshot_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    async fn notify_clients(&self, method: &str, params: Option<Value>) {
        let sessions = self.snapshot_sessions().await;
        let sends = sessions.iter().map(|session| {
            let params = params.clone();
            async move { (session.id().to_string(), session.notify(method, params).await) }
        });

        let mut failed: Vec<String> = Vec::new();
        for (id, outcome) in join_all(sends).await {
            if let Err(e) = outcome {
                warn!("session {id}: broadcast of {method} failed, dropping session: {e}");
                failed.push(id);
            }
        }

        if !failed.is_empty() {
            let mut sessions = self.sessions.write().await;
            for id in failed {
                if let Some(session) = sessions.remove(&id) {
                    session.close().await;
                }
            }
        }
    }

    async fn capabilities(&self) -> ServerCapabilities {
        let registry = self.registry.read().await;
        ServerCapabilities {
            tools: registry.has_tools().then(|| ToolsCapability { list_changed: true }),
            resources: registry
                .has_resources()
                .then(|| ResourcesCapability { subscribe: true, list_changed: true }),
            prompts: registry.has_prompts().then(|| PromptsCapability { list_changed: true }),
            completions: registry.has_completions().then(CompletionsCapability::default),
            logging: Some(LoggingCapability {}),
            experimental: None,
        }
    }

    fn initialize_result(
        &self,
        capabilities: ServerCapabilities,
        protocol_version: String,
    ) -> InitializeResult {
        InitializeResult {
            protocol_version,
            capabilities,
            server_info: self.info.clone(),
            instructions: self.instructions.clone(),
        }
    }
}

struct ServerSessionHandler {
    core: Arc<ServerCore>,
}

#[async_trait]
impl SessionHandler for ServerSessionHandler {
    async fn handle_request(
        &self,
        session: &Arc<Session>,
        ctx: RequestContext,
        request: &JsonRpcRequest,
    ) -> Result<Value, JsonRpcError> {
        let core = &self.core;
        match request.method.as_str() {
            "initialize" => {
                let params: InitializeParams = parse_params(request.params.clone())?;
                let version = negotiate_version(&params.protocol_version)?;
                session.set_peer_info(params.client_info);
                session.set_negotiated_version(version.clone());
                let result = core.initialize_result(core.capabilities().await, version);
                to_result(result)
            }
            "ping" => Ok(json!({})),
            "tools/list" => {
                let tools = core.registry.read().await.list_tools();
                to_result(ListToolsResult { tools, next_cursor: None })
            }
            "tools/call" => {
                let params: CallToolParams = parse_params(request.params.clone())?;
                let spec = core
                    .registry
                    .read()
                    .await
                    .tool(&params.name)
                    .cloned()
                    .ok_or_else(|| {
                        JsonRpcError::invalid_params(format!("Unknown tool: {}", params.name))
                    })?;

                // User failure travels through the result channel, never as
                // a JSON-RPC error.
                let mut result = match (spec.handler)(ctx, params).await {
                    Ok(result) => result,
                    Err(e) => CallToolResult::error(e.to_string()),
                };

                if let (Some(schema), Some(content)) =
                    (&spec.tool.output_schema, &result.structured_content)
                {
                    if let ValidationResponse::Invalid { error_message } =
                        core.validator.validate(schema, content)
                    {
                        result = CallToolResult::error(error_message);
                    }
                }

                to_result(result)
            }
            "resources/list" => {
                let resources = core.registry.read().await.list_resources();
                to_result(ListResourcesResult { resources, next_cursor: None })
            }
            "resources/read" => {
                let params: ReadResourceParams = parse_params(request.params.clone())?;
                let spec = core
                    .registry
                    .read()
                    .await
                    .resource(&params.uri)
                    .cloned()
                    .ok_or_else(|| JsonRpcError::resource_not_found(&params.uri))?;
                let result = (spec.handler)(ctx, params)
                    .await
                    .map_err(|e| JsonRpcError::internal_error(e.to_string()))?;
                to_result(result)
            }
            "resources/templates/list" => {
                let resource_templates = core.registry.read().await.list_resource_templates();
                to_result(ListResourceTemplatesResult { resource_templates, next_cursor: None })
            }
            "resources/subscribe" => {
                let params: SubscribeParams = parse_params(request.params.clone())?;
                if core.registry.read().await.resource(&params.uri).is_none() {
                    return Err(JsonRpcError::resource_not_found(&params.uri));
                }
                session.subscribe(params.uri);
                Ok(json!({}))
            }
            "resources/unsubscribe" => {
                let params: UnsubscribeParams = parse_params(request.params.clone())?;
                session.unsubscribe(&params.uri);
                Ok(json!({}))
            }
            "prompts/list" => {
                let prompts = core.registry.read().await.list_prompts();
                to_result(ListPromptsResult { prompts, next_cursor: None })
            }
            "prompts/get" => {
                let params: GetPromptParams = parse_params(request.params.clone())?;
                let spec = core
                    .registry
                    .read()
                    .await
                    .prompt(&params.name)
                    .cloned()
                    .ok_or_else(|| {
                        JsonRpcError::invalid_params(format!("Unknown prompt: {}", params.name))
                    })?;
                let result = (spec.handler)(ctx, params)
                    .await
                    .map_err(|e| JsonRpcError::internal_error(e.to_string()))?;
                to_result(result)
            }
            "completion/complete" => {
                let params: CompleteParams = parse_params(request.params.clone())?;
                let spec = core
                    .registry
                    .read()
                    .await
                    .completion(&params.reference)
                    .cloned()
                    .ok_or_else(|| {
                        JsonRpcError::invalid_params(format!(
                            "Unknown completion reference: {:?}",
                            params.reference
                        ))
                    })?;
                let mut result = (spec.handler)(ctx, params)
                    .await
                    .map_err(|e| JsonRpcError::internal_error(e.to_string()))?;
                result.completion.values.truncate(MAX_COMPLETION_VALUES);
                to_result(result)
            }
            "logging/setLevel" => {
                let params: SetLevelParams = parse_params(request.params.clone())?;
                session.set_log_level(params.level);
                Ok(json!({}))
            }
            other => Err(JsonRpcError::method_not_found(other)),
        }
    }

    async fn handle_notification(&self, session: &Arc<Session>, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            "notifications/initialized" => {
                debug!("session {}: client initialized", session.id());
            }
            "notifications/roots/list_changed" => {
                debug!("session {}: client roots changed", session.id());
            }
            other => debug!("session {}: unhandled notification {other}", session.id()),
        }
    }
}

/// Server variant holding no per-session state: every request is handled
/// as if operational, nothing is pushed back.
pub struct McpStatelessServer {
    info: Implementation,
    instructions: Option<String>,
    registry: FeatureRegistry,
    validator: Arc<dyn SchemaValidator>,
}

impl McpStatelessServer {
    pub fn builder() -> McpServerBuilder {
        McpServer::builder()
    }

    /// Handle one request envelope and produce its response.
    pub async fn handle(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        let ctx = RequestContext::detached(id.clone());
        match self.dispatch(ctx, request).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::error(id, error),
        }
    }

    /// Notifications carry no response; `notifications/initialized` is
    /// accepted and ignored.
    pub fn handle_notification(&self, notification: JsonRpcNotification) {
        debug!("stateless server ignoring notification {}", notification.method);
    }

    async fn dispatch(
        &self,
        ctx: RequestContext,
        request: JsonRpcRequest,
    ) -> Result<Value, JsonRpcError> {
        match request.method.as_str() {
            "initialize" => {
                let params: InitializeParams = parse_params(request.params)?;
                let version = negotiate_version(&params.protocol_version)?;
                let registry = &self.registry;
                let result = InitializeResult {
                    protocol_version: version,
                    capabilities: ServerCapabilities {
                        tools: registry.has_tools().then(ToolsCapability::default),
                        resources: registry.has_resources().then(ResourcesCapability::default),
                        prompts: registry.has_prompts().then(PromptsCapability::default),
                        completions: registry.has_completions().then(CompletionsCapability::default),
                        logging: Some(LoggingCapability {}),
                        experimental: None,
                    },
                    server_info: self.info.clone(),
                    instructions: self.instructions.clone(),
                };
                to_result(result)
            }
            "ping" => Ok(json!({})),
            "tools/list" => {
                to_result(ListToolsResult { tools: self.registry.list_tools(), next_cursor: None })
            }
            "tools/call" => {
                let params: CallToolParams = parse_params(request.params)?;
                let spec = self.registry.tool(&params.name).ok_or_else(|| {
                    JsonRpcError::invalid_params(format!("Unknown tool: {}", params.name))
                })?;

                let mut result = match (spec.handler)(ctx, params).await {
                    Ok(result) => result,
                    Err(e) => CallToolResult::error(e.to_string()),
                };

                if let (Some(schema), Some(content)) =
                    (&spec.tool.output_schema, &result.structured_content)
                {
                    if let ValidationResponse::Invalid { error_message } =
                        self.validator.validate(schema, content)
                    {
                        result = CallToolResult::error(error_message);
                    }
                }

                to_result(result)
            }
            "resources/list" => to_result(ListResourcesResult {
                resources: self.registry.list_resources(),
                next_cursor: None,
            }),
            "resources/read" => {
                let params: ReadResourceParams = parse_params(request.params)?;
                let spec = self
                    .registry
                    .resource(&params.uri)
                    .ok_or_else(|| JsonRpcError::resource_not_found(&params.uri))?;
                let result = (spec.handler)(ctx, params)
                    .await
                    .map_err(|e| JsonRpcError::internal_error(e.to_string()))?;
                to_result(result)
            }
            "resources/templates/list" => to_result(ListResourceTemplatesResult {
                resource_templates: self.registry.list_resource_templates(),
                next_cursor: None,
            }),
            "prompts/list" => to_result(ListPromptsResult {
                prompts: self.registry.list_prompts(),
                next_cursor: None,
            }),
            "prompts/get" => {
                let params: GetPromptParams = parse_params(request.params)?;
                let spec = self.registry.prompt(&params.name).ok_or_else(|| {
                    JsonRpcError::invalid_params(format!("Unknown prompt: {}", params.name))
                })?;
                let result = (spec.handler)(ctx, params)
                    .await
                    .map_err(|e| JsonRpcError::internal_error(e.to_string()))?;
                to_result(result)
            }
            "completion/complete" => {
                let params: CompleteParams = parse_params(request.params)?;
                let spec = self.registry.completion(&params.reference).ok_or_else(|| {
                    JsonRpcError::invalid_params(format!(
                        "Unknown completion reference: {:?}",
                        params.reference
                    ))
                })?;
                let mut result = (spec.handler)(ctx, params)
                    .await
                    .map_err(|e| JsonRpcError::internal_error(e.to_string()))?;
                result.completion.values.truncate(MAX_COMPLETION_VALUES);
                to_result(result)
            }
            other => Err(JsonRpcError::method_not_found(other)),
        }
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> Result<T, JsonRpcError> {
    let params = params.ok_or_else(|| JsonRpcError::invalid_params("Missing params"))?;
    serde_json::from_value(params).map_err(|e| JsonRpcError::invalid_params(e.to_string()))
}

fn to_result<T: serde::Serialize>(value: T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal_error(e.to_string()))
}

/// Echo the requested revision when supported, else fail the handshake.
fn negotiate_version(requested: &str) -> Result<String, JsonRpcError> {
    if SUPPORTED_PROTOCOL_VERSIONS.contains(&requested) {
        Ok(requested.to_string())
    } else {
        Err(JsonRpcError::invalid_params(format!(
            "Unsupported protocol version: {requested} (supported: {})",
            SUPPORTED_PROTOCOL_VERSIONS.join(", ")
        )))
    }
}
