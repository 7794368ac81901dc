//! mcp-runtime - bidirectional JSON-RPC 2.0 messaging runtime for the
//! Model Context Protocol
//!
//! The crate provides the session and feature-dispatch layer of MCP:
//! - per-connection sessions driving the initialization handshake,
//!   request/response correlation, notification routing and shutdown
//! - typed registries of tools, resources, prompts and completions
//! - a sync-to-async bridge so blocking handlers never stall a transport
//! - validation of structured tool output against declared schemas
//!
//! Concrete transports (stdio, SSE, streamable HTTP) plug in through the
//! [`transport::Transport`] trait; an in-memory pair ships for tests and
//! in-process wiring.

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod features;
pub mod logging;
pub mod schema;
pub mod server;
pub mod session;
pub mod transport;
pub mod types;

pub use client::{McpClient, McpClientBuilder};
pub use config::RuntimeConfig;
pub use context::RequestContext;
pub use error::McpError;
pub use features::{
    CompletionSpec, FeatureRegistry, PromptSpec, ResourceSpec, SyncCompletionSpec, SyncPromptSpec,
    SyncResourceSpec, SyncToolSpec, ToolSpec,
};
pub use schema::{DefaultSchemaValidator, SchemaValidator, ValidationResponse};
pub use server::{McpServer, McpServerBuilder, McpStatelessServer};
pub use session::{Session, SessionRole, SessionState};
pub use transport::{InMemoryTransport, McpMessage, Transport};
