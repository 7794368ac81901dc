//! Transport layer contracts
//!
//! A transport is an opaque byte-framed bidirectional channel. The session
//! layer never frames bytes itself: it hands complete envelopes to
//! [`Transport::send`] and pulls classified envelopes out of
//! [`Transport::receive`]. Concrete stdio/SSE/HTTP transports live outside
//! this crate; the in-memory pair below serves tests and in-process wiring.

use crate::error::{McpError, INVALID_REQUEST};
use crate::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::trace;

/// Incoming envelope, classified by shape.
#[derive(Debug, Clone)]
pub enum McpMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

impl McpMessage {
    /// Classify a decoded JSON value: an `id` plus `method` is a request,
    /// an `id` alone is a response, no `id` is a notification.
    pub fn from_json(value: Value) -> Result<Self, McpError> {
        if value.is_array() {
            return Err(McpError::Protocol {
                code: INVALID_REQUEST,
                message: "batch messages are not supported".to_string(),
            });
        }
        if !value.is_object() {
            return Err(McpError::Protocol {
                code: INVALID_REQUEST,
                message: "message must be a JSON object".to_string(),
            });
        }

        if value.get("id").is_some() {
            if value.get("method").is_some() {
                let request: JsonRpcRequest = serde_json::from_value(value)
                    .map_err(|e| McpError::MalformedMessage(e.to_string()))?;
                Ok(McpMessage::Request(request))
            } else {
                let response: JsonRpcResponse = serde_json::from_value(value)
                    .map_err(|e| McpError::MalformedMessage(e.to_string()))?;
                Ok(McpMessage::Response(response))
            }
        } else {
            let notification: JsonRpcNotification = serde_json::from_value(value)
                .map_err(|e| McpError::MalformedMessage(e.to_string()))?;
            Ok(McpMessage::Notification(notification))
        }
    }
}

/// Bidirectional message channel bound to one session.
///
/// Implementations guarantee FIFO ordering of writes and surface malformed
/// inbound frames as [`McpError::MalformedMessage`] so the session can
/// answer with a parse error and keep reading.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one envelope to the peer.
    async fn send(&self, message: McpMessage) -> Result<(), McpError>;

    /// Pull the next envelope. `None` means the peer closed the stream.
    async fn receive(&self) -> Result<Option<McpMessage>, McpError>;

    /// Stop accepting writes once queued frames have drained.
    async fn close_gracefully(&self) -> Result<(), McpError>;

    /// Drop the channel immediately.
    async fn close(&self) -> Result<(), McpError>;

    async fn send_request(&self, request: JsonRpcRequest) -> Result<(), McpError> {
        self.send(McpMessage::Request(request)).await
    }

    async fn send_response(&self, response: JsonRpcResponse) -> Result<(), McpError> {
        self.send(McpMessage::Response(response)).await
    }

    async fn send_notification(&self, notification: JsonRpcNotification) -> Result<(), McpError> {
        self.send(McpMessage::Notification(notification)).await
    }
}

/// In-memory transport pair connected by bounded channels.
///
/// Frames travel as serialized JSON strings so the receive side exercises
/// the same decode path a wire transport would.
pub struct InMemoryTransport {
    tx: Mutex<Option<mpsc::Sender<String>>>,
    rx: Mutex<mpsc::Receiver<String>>,
}

impl InMemoryTransport {
    /// Create two connected endpoints.
    pub fn pair() -> (InMemoryTransport, InMemoryTransport) {
        Self::pair_with_capacity(100)
    }

    pub fn pair_with_capacity(capacity: usize) -> (InMemoryTransport, InMemoryTransport) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        (
            InMemoryTransport { tx: Mutex::new(Some(a_tx)), rx: Mutex::new(a_rx) },
            InMemoryTransport { tx: Mutex::new(Some(b_tx)), rx: Mutex::new(b_rx) },
        )
    }

    /// Inject a raw frame, bypassing envelope serialization. Lets tests
    /// exercise the malformed-input path.
    pub async fn send_raw(&self, frame: impl Into<String>) -> Result<(), McpError> {
        let tx = self.tx.lock().await;
        let tx = tx.as_ref().ok_or(McpError::SessionClosed)?;
        tx.send(frame.into())
            .await
            .map_err(|_| McpError::transport("peer closed"))
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, message: McpMessage) -> Result<(), McpError> {
        let json = match &message {
            McpMessage::Request(r) => serde_json::to_string(r)?,
            McpMessage::Response(r) => serde_json::to_string(r)?,
            McpMessage::Notification(n) => serde_json::to_string(n)?,
        };
        trace!("TX: {}", json);
        self.send_raw(json).await
    }

    async fn receive(&self) -> Result<Option<McpMessage>, McpError> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(frame) => {
                trace!("RX: {}", frame);
                let value: Value = serde_json::from_str(&frame)
                    .map_err(|e| McpError::MalformedMessage(e.to_string()))?;
                McpMessage::from_json(value).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn close_gracefully(&self) -> Result<(), McpError> {
        // Dropping the sender lets the peer drain buffered frames first.
        self.tx.lock().await.take();
        Ok(())
    }

    async fn close(&self) -> Result<(), McpError> {
        self.tx.lock().await.take();
        self.rx.lock().await.close();
        Ok(())
    }
}
