//! Error taxonomy for the runtime
//!
//! Protocol-visible failures travel as [`JsonRpcError`] objects; everything
//! a local caller can observe (timeouts, cancellation, a closed session)
//! is an [`McpError`].

use crate::types::JsonRpcError;
use thiserror::Error;

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
/// LSP-heritage code, required before the initialized notification arrives.
pub const SERVER_NOT_INITIALIZED: i32 = -32002;
/// MCP assigns the same value to resource lookups; the collision is the
/// protocol's own.
pub const RESOURCE_NOT_FOUND: i32 = -32002;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("MCP error {code}: {message}")]
    Protocol { code: i32, message: String },

    #[error("request timed out")]
    Timeout,

    #[error("request cancelled")]
    Cancelled,

    #[error("session closed")]
    SessionClosed,

    #[error("registration error: {0}")]
    Registration(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    pub fn transport(msg: impl Into<String>) -> Self {
        McpError::Transport(msg.into())
    }

    pub fn registration(msg: impl Into<String>) -> Self {
        McpError::Registration(msg.into())
    }
}

impl From<JsonRpcError> for McpError {
    fn from(e: JsonRpcError) -> Self {
        McpError::Protocol { code: e.code, message: e.message }
    }
}
