//! Feature specifications and registries
//!
//! A spec pairs a declarative definition (the record served by `*/list`)
//! with the handler invoked on dispatch. Handlers come in two shapes:
//! async handlers returning a boxed future, and blocking handlers adapted
//! through [`ToolSpec::from_sync`] and friends so they execute on the
//! blocking pool instead of the session's reader task.

use crate::context::RequestContext;
use crate::error::McpError;
use crate::types::{
    CallToolParams, CallToolResult, CompleteParams, CompleteReference, CompleteResult,
    CreateMessageParams, CreateMessageResult, ElicitParams, ElicitResult, GetPromptParams,
    GetPromptResult, Prompt, ReadResourceParams, ReadResourceResult, Resource, ResourceTemplate,
    Tool,
};
use anyhow::Result;
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

pub type ToolHandler =
    Arc<dyn Fn(RequestContext, CallToolParams) -> BoxFuture<'static, Result<CallToolResult>> + Send + Sync>;
pub type ResourceHandler = Arc<
    dyn Fn(RequestContext, ReadResourceParams) -> BoxFuture<'static, Result<ReadResourceResult>>
        + Send
        + Sync,
>;
pub type PromptHandler =
    Arc<dyn Fn(RequestContext, GetPromptParams) -> BoxFuture<'static, Result<GetPromptResult>> + Send + Sync>;
pub type CompletionHandler =
    Arc<dyn Fn(RequestContext, CompleteParams) -> BoxFuture<'static, Result<CompleteResult>> + Send + Sync>;

/// Client-side handler for `sampling/createMessage`.
pub type SamplingHandler = Arc<
    dyn Fn(RequestContext, CreateMessageParams) -> BoxFuture<'static, Result<CreateMessageResult>>
        + Send
        + Sync,
>;
/// Client-side handler for `elicitation/create`.
pub type ElicitationHandler =
    Arc<dyn Fn(RequestContext, ElicitParams) -> BoxFuture<'static, Result<ElicitResult>> + Send + Sync>;

/// Async consumer of one notification payload.
pub type NotificationConsumer<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wrap an async closure into a [`NotificationConsumer`].
pub fn consumer<T, F, Fut>(f: F) -> NotificationConsumer<T>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |payload| f(payload).boxed())
}

/// Wrap a blocking closure into a [`NotificationConsumer`], offloading each
/// call onto the blocking pool.
pub fn sync_consumer<T, F>(f: F) -> NotificationConsumer<T>
where
    T: Send + 'static,
    F: Fn(T) -> Result<()> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |payload| {
        let f = Arc::clone(&f);
        async move {
            tokio::task::spawn_blocking(move || f(payload))
                .await
                .map_err(|e| anyhow::anyhow!("blocking consumer panicked: {e}"))?
        }
        .boxed()
    })
}

/// Tool definition plus its async handler.
#[derive(Clone)]
pub struct ToolSpec {
    pub tool: Tool,
    pub handler: ToolHandler,
}

impl ToolSpec {
    pub fn new<F, Fut>(tool: Tool, handler: F) -> Self
    where
        F: Fn(RequestContext, CallToolParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CallToolResult>> + Send + 'static,
    {
        Self { tool, handler: Arc::new(move |ctx, params| handler(ctx, params).boxed()) }
    }

    /// Adapt a blocking tool. Unless `immediate_execution` is set the
    /// handler runs on the blocking pool; inline execution is only safe on
    /// transports whose reader is already decoupled from user code.
    pub fn from_sync(spec: SyncToolSpec, immediate_execution: bool) -> Self {
        let handler = spec.handler;
        let wrapped: ToolHandler = if immediate_execution {
            Arc::new(move |ctx, params| {
                let handler = Arc::clone(&handler);
                async move { handler(ctx, params) }.boxed()
            })
        } else {
            Arc::new(move |ctx, params| {
                let handler = Arc::clone(&handler);
                async move {
                    tokio::task::spawn_blocking(move || handler(ctx, params))
                        .await
                        .map_err(|e| anyhow::anyhow!("blocking tool handler panicked: {e}"))?
                }
                .boxed()
            })
        };
        Self { tool: spec.tool, handler: wrapped }
    }
}

/// Tool definition plus a blocking handler.
#[derive(Clone)]
pub struct SyncToolSpec {
    pub tool: Tool,
    pub handler: Arc<dyn Fn(RequestContext, CallToolParams) -> Result<CallToolResult> + Send + Sync>,
}

impl SyncToolSpec {
    pub fn new<F>(tool: Tool, handler: F) -> Self
    where
        F: Fn(RequestContext, CallToolParams) -> Result<CallToolResult> + Send + Sync + 'static,
    {
        Self { tool, handler: Arc::new(handler) }
    }
}

/// Resource definition plus its async read handler.
#[derive(Clone)]
pub struct ResourceSpec {
    pub resource: Resource,
    pub handler: ResourceHandler,
}

impl ResourceSpec {
    pub fn new<F, Fut>(resource: Resource, handler: F) -> Self
    where
        F: Fn(RequestContext, ReadResourceParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ReadResourceResult>> + Send + 'static,
    {
        Self { resource, handler: Arc::new(move |ctx, params| handler(ctx, params).boxed()) }
    }

    pub fn from_sync(spec: SyncResourceSpec, immediate_execution: bool) -> Self {
        let handler = spec.handler;
        let wrapped: ResourceHandler = if immediate_execution {
            Arc::new(move |ctx, params| {
                let handler = Arc::clone(&handler);
                async move { handler(ctx, params) }.boxed()
            })
        } else {
            Arc::new(move |ctx, params| {
                let handler = Arc::clone(&handler);
                async move {
                    tokio::task::spawn_blocking(move || handler(ctx, params))
                        .await
                        .map_err(|e| anyhow::anyhow!("blocking resource handler panicked: {e}"))?
                }
                .boxed()
            })
        };
        Self { resource: spec.resource, handler: wrapped }
    }
}

#[derive(Clone)]
pub struct SyncResourceSpec {
    pub resource: Resource,
    pub handler:
        Arc<dyn Fn(RequestContext, ReadResourceParams) -> Result<ReadResourceResult> + Send + Sync>,
}

impl SyncResourceSpec {
    pub fn new<F>(resource: Resource, handler: F) -> Self
    where
        F: Fn(RequestContext, ReadResourceParams) -> Result<ReadResourceResult>
            + Send
            + Sync
            + 'static,
    {
        Self { resource, handler: Arc::new(handler) }
    }
}

/// Prompt definition plus its async handler.
#[derive(Clone)]
pub struct PromptSpec {
    pub prompt: Prompt,
    pub handler: PromptHandler,
}

impl PromptSpec {
    pub fn new<F, Fut>(prompt: Prompt, handler: F) -> Self
    where
        F: Fn(RequestContext, GetPromptParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<GetPromptResult>> + Send + 'static,
    {
        Self { prompt, handler: Arc::new(move |ctx, params| handler(ctx, params).boxed()) }
    }

    pub fn from_sync(spec: SyncPromptSpec, immediate_execution: bool) -> Self {
        let handler = spec.handler;
        let wrapped: PromptHandler = if immediate_execution {
            Arc::new(move |ctx, params| {
                let handler = Arc::clone(&handler);
                async move { handler(ctx, params) }.boxed()
            })
        } else {
            Arc::new(move |ctx, params| {
                let handler = Arc::clone(&handler);
                async move {
                    tokio::task::spawn_blocking(move || handler(ctx, params))
                        .await
                        .map_err(|e| anyhow::anyhow!("blocking prompt handler panicked: {e}"))?
                }
                .boxed()
            })
        };
        Self { prompt: spec.prompt, handler: wrapped }
    }
}

#[derive(Clone)]
pub struct SyncPromptSpec {
    pub prompt: Prompt,
    pub handler: Arc<dyn Fn(RequestContext, GetPromptParams) -> Result<GetPromptResult> + Send + Sync>,
}

impl SyncPromptSpec {
    pub fn new<F>(prompt: Prompt, handler: F) -> Self
    where
        F: Fn(RequestContext, GetPromptParams) -> Result<GetPromptResult> + Send + Sync + 'static,
    {
        Self { prompt, handler: Arc::new(handler) }
    }
}

/// Completion handler registered against a prompt or resource reference.
#[derive(Clone)]
pub struct CompletionSpec {
    pub reference: CompleteReference,
    pub handler: CompletionHandler,
}

impl CompletionSpec {
    pub fn new<F, Fut>(reference: CompleteReference, handler: F) -> Self
    where
        F: Fn(RequestContext, CompleteParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CompleteResult>> + Send + 'static,
    {
        Self { reference, handler: Arc::new(move |ctx, params| handler(ctx, params).boxed()) }
    }

    pub fn from_sync(spec: SyncCompletionSpec, immediate_execution: bool) -> Self {
        let handler = spec.handler;
        let wrapped: CompletionHandler = if immediate_execution {
            Arc::new(move |ctx, params| {
                let handler = Arc::clone(&handler);
                async move { handler(ctx, params) }.boxed()
            })
        } else {
            Arc::new(move |ctx, params| {
                let handler = Arc::clone(&handler);
                async move {
                    tokio::task::spawn_blocking(move || handler(ctx, params))
                        .await
                        .map_err(|e| anyhow::anyhow!("blocking completion handler panicked: {e}"))?
                }
                .boxed()
            })
        };
        Self { reference: spec.reference, handler: wrapped }
    }
}

#[derive(Clone)]
pub struct SyncCompletionSpec {
    pub reference: CompleteReference,
    pub handler: Arc<dyn Fn(RequestContext, CompleteParams) -> Result<CompleteResult> + Send + Sync>,
}

impl SyncCompletionSpec {
    pub fn new<F>(reference: CompleteReference, handler: F) -> Self
    where
        F: Fn(RequestContext, CompleteParams) -> Result<CompleteResult> + Send + Sync + 'static,
    {
        Self { reference, handler: Arc::new(handler) }
    }
}

/// Typed registries for every feature kind a server exposes.
///
/// Tools keep registration order (observable through `tools/list`);
/// resources, prompts and completions are keyed maps with unique keys.
/// Built before any session opens; the stateful server guards mutation
/// behind a lock and notifies connected sessions.
#[derive(Default, Clone)]
pub struct FeatureRegistry {
    tools: Vec<ToolSpec>,
    resources: HashMap<String, ResourceSpec>,
    resource_templates: Vec<ResourceTemplate>,
    prompts: HashMap<String, PromptSpec>,
    completions: HashMap<CompleteReference, CompletionSpec>,
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tool(&mut self, spec: ToolSpec) -> Result<(), McpError> {
        if self.tools.iter().any(|t| t.tool.name == spec.tool.name) {
            return Err(McpError::registration(format!(
                "tool already registered: {}",
                spec.tool.name
            )));
        }
        self.tools.push(spec);
        Ok(())
    }

    pub fn remove_tool(&mut self, name: &str) -> bool {
        let before = self.tools.len();
        self.tools.retain(|t| t.tool.name != name);
        self.tools.len() != before
    }

    pub fn tool(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.tool.name == name)
    }

    pub fn list_tools(&self) -> Vec<Tool> {
        self.tools.iter().map(|t| t.tool.clone()).collect()
    }

    pub fn has_tools(&self) -> bool {
        !self.tools.is_empty()
    }

    pub fn add_resource(&mut self, spec: ResourceSpec) -> Result<(), McpError> {
        let uri = spec.resource.uri.clone();
        if self.resources.contains_key(&uri) {
            return Err(McpError::registration(format!("resource already registered: {uri}")));
        }
        self.resources.insert(uri, spec);
        Ok(())
    }

    pub fn remove_resource(&mut self, uri: &str) -> bool {
        self.resources.remove(uri).is_some()
    }

    pub fn resource(&self, uri: &str) -> Option<&ResourceSpec> {
        self.resources.get(uri)
    }

    pub fn list_resources(&self) -> Vec<Resource> {
        let mut resources: Vec<Resource> =
            self.resources.values().map(|r| r.resource.clone()).collect();
        resources.sort_by(|a, b| a.uri.cmp(&b.uri));
        resources
    }

    pub fn has_resources(&self) -> bool {
        !self.resources.is_empty()
    }

    pub fn add_resource_template(&mut self, template: ResourceTemplate) {
        self.resource_templates.push(template);
    }

    pub fn list_resource_templates(&self) -> Vec<ResourceTemplate> {
        self.resource_templates.clone()
    }

    pub fn add_prompt(&mut self, spec: PromptSpec) -> Result<(), McpError> {
        let name = spec.prompt.name.clone();
        if self.prompts.contains_key(&name) {
            return Err(McpError::registration(format!("prompt already registered: {name}")));
        }
        self.prompts.insert(name, spec);
        Ok(())
    }

    pub fn remove_prompt(&mut self, name: &str) -> bool {
        self.prompts.remove(name).is_some()
    }

    pub fn prompt(&self, name: &str) -> Option<&PromptSpec> {
        self.prompts.get(name)
    }

    pub fn list_prompts(&self) -> Vec<Prompt> {
        let mut prompts: Vec<Prompt> = self.prompts.values().map(|p| p.prompt.clone()).collect();
        prompts.sort_by(|a, b| a.name.cmp(&b.name));
        prompts
    }

    pub fn has_prompts(&self) -> bool {
        !self.prompts.is_empty()
    }

    pub fn add_completion(&mut self, spec: CompletionSpec) -> Result<(), McpError> {
        let reference = spec.reference.clone();
        if self.completions.contains_key(&reference) {
            return Err(McpError::registration(format!(
                "completion already registered: {reference:?}"
            )));
        }
        self.completions.insert(reference, spec);
        Ok(())
    }

    pub fn completion(&self, reference: &CompleteReference) -> Option<&CompletionSpec> {
        self.completions.get(reference)
    }

    pub fn has_completions(&self) -> bool {
        !self.completions.is_empty()
    }
}
