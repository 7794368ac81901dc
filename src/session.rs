//! Per-connection session: handshake state, request correlation,
//! notification routing, cancellation and shutdown
//!
//! One logical task reads envelopes off the transport; every inbound
//! request runs as its own task so a slow handler never stalls the reader.
//! Outbound requests register a waiter resolved exactly once: by the
//! matching response, a local cancel, the deadline, or session close.

use crate::config::RuntimeConfig;
use crate::context::RequestContext;
use crate::error::McpError;
use crate::transport::{McpMessage, Transport};
use crate::types::{
    CancelledParams, Implementation, JsonRpcError, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, LogLevel, LoggingMessageParams, RequestId,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Initializing,
    Operational,
    Closing,
    Closed,
}

/// Routes inbound traffic to the owning client or server core.
#[async_trait]
pub trait SessionHandler: Send + Sync {
    async fn handle_request(
        &self,
        session: &Arc<Session>,
        ctx: RequestContext,
        request: &JsonRpcRequest,
    ) -> Result<Value, JsonRpcError>;

    async fn handle_notification(&self, session: &Arc<Session>, notification: JsonRpcNotification);
}

/// Outstanding outbound request.
struct Waiter {
    method: String,
    created_at: Instant,
    tx: oneshot::Sender<Result<Value, McpError>>,
}

pub struct Session {
    id: String,
    role: SessionRole,
    state: RwLock<SessionState>,
    transport: Arc<dyn Transport>,
    handler: Arc<dyn SessionHandler>,
    pending: DashMap<RequestId, Waiter>,
    inflight: DashMap<RequestId, CancellationToken>,
    next_request_id: AtomicI64,
    close_token: CancellationToken,
    default_timeout: Duration,
    notify_tx: mpsc::Sender<JsonRpcNotification>,
    min_log_level: RwLock<Option<LogLevel>>,
    subscriptions: RwLock<HashSet<String>>,
    peer_info: RwLock<Option<Implementation>>,
    negotiated_version: RwLock<Option<String>>,
}

impl Session {
    /// Attach a session to a transport and start its reader and
    /// notification-dispatch tasks. Server sessions enforce the
    /// initialization handshake; client sessions drive it from
    /// [`crate::client::McpClient`].
    pub fn spawn(
        transport: Arc<dyn Transport>,
        handler: Arc<dyn SessionHandler>,
        role: SessionRole,
        config: &RuntimeConfig,
    ) -> Arc<Self> {
        let (notify_tx, notify_rx) = mpsc::channel(config.notification_queue_size);

        let session = Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            role,
            state: RwLock::new(SessionState::Created),
            transport,
            handler,
            pending: DashMap::new(),
            inflight: DashMap::new(),
            next_request_id: AtomicI64::new(1),
            close_token: CancellationToken::new(),
            default_timeout: config.request_timeout(),
            notify_tx,
            min_log_level: RwLock::new(None),
            subscriptions: RwLock::new(HashSet::new()),
            peer_info: RwLock::new(None),
            negotiated_version: RwLock::new(None),
        });

        let reader = Arc::clone(&session);
        tokio::spawn(async move { reader.read_loop().await });

        let dispatcher = Arc::clone(&session);
        tokio::spawn(async move { dispatcher.notification_loop(notify_rx).await });

        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }

    pub fn peer_info(&self) -> Option<Implementation> {
        self.peer_info.read().clone()
    }

    pub(crate) fn set_peer_info(&self, info: Implementation) {
        *self.peer_info.write() = Some(info);
    }

    pub fn negotiated_version(&self) -> Option<String> {
        self.negotiated_version.read().clone()
    }

    pub(crate) fn set_negotiated_version(&self, version: String) {
        *self.negotiated_version.write() = Some(version);
    }

    // ===== Outbound =====

    /// Send a request and await its response. The waiter resolves exactly
    /// once; on deadline expiry the peer is told via
    /// `notifications/cancelled` and the caller sees [`McpError::Timeout`].
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, McpError> {
        if matches!(self.state(), SessionState::Closing | SessionState::Closed) {
            return Err(McpError::SessionClosed);
        }

        let id = RequestId::Number(self.next_request_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id.clone(),
            Waiter { method: method.to_string(), created_at: Instant::now(), tx },
        );

        let request = JsonRpcRequest::new(id.clone(), method, params);
        if let Err(e) = self.transport.send_request(request).await {
            self.pending.remove(&id);
            return Err(e);
        }

        let deadline = timeout.unwrap_or(self.default_timeout);
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(McpError::SessionClosed),
            Err(_) => {
                if self.pending.remove(&id).is_some() {
                    debug!("request {id} ({method}) timed out after {deadline:?}");
                    let _ = self.send_cancelled(&id, Some("timeout".to_string())).await;
                }
                Err(McpError::Timeout)
            }
        }
    }

    /// Fire-and-forget notification to the peer.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        self.transport
            .send_notification(JsonRpcNotification::new(method, params))
            .await
    }

    /// Cancel an outstanding outbound request: resolve the waiter locally
    /// with `Cancelled` and tell the peer.
    pub async fn cancel_request(
        &self,
        id: &RequestId,
        reason: Option<String>,
    ) -> Result<(), McpError> {
        if let Some((_, waiter)) = self.pending.remove(id) {
            debug!("cancelling request {id} ({})", waiter.method);
            let _ = waiter.tx.send(Err(McpError::Cancelled));
            self.send_cancelled(id, reason).await?;
        }
        Ok(())
    }

    async fn send_cancelled(&self, id: &RequestId, reason: Option<String>) -> Result<(), McpError> {
        let params = CancelledParams { request_id: id.clone(), reason };
        self.notify("notifications/cancelled", Some(serde_json::to_value(params)?))
            .await
    }

    // ===== Session-local protocol state =====

    pub fn set_log_level(&self, level: LogLevel) {
        *self.min_log_level.write() = Some(level);
    }

    /// Emit a `notifications/message` unless filtered by the level the
    /// peer requested through `logging/setLevel`.
    pub async fn send_log(&self, params: LoggingMessageParams) -> Result<(), McpError> {
        if let Some(min) = *self.min_log_level.read() {
            if params.level < min {
                return Ok(());
            }
        }
        self.notify("notifications/message", Some(serde_json::to_value(params)?))
            .await
    }

    pub fn subscribe(&self, uri: impl Into<String>) {
        self.subscriptions.write().insert(uri.into());
    }

    pub fn unsubscribe(&self, uri: &str) {
        self.subscriptions.write().remove(uri);
    }

    pub fn is_subscribed(&self, uri: &str) -> bool {
        self.subscriptions.read().contains(uri)
    }

    // ===== Shutdown =====

    /// Close after letting queued outbound frames drain.
    pub async fn close_gracefully(&self) {
        self.set_state(SessionState::Closing);
        let _ = self.transport.close_gracefully().await;
        self.shutdown().await;
    }

    /// Close immediately.
    pub async fn close(&self) {
        self.shutdown().await;
    }

    async fn shutdown(&self) {
        {
            let mut state = self.state.write();
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closing;
        }

        // Stops the reader, the dispatcher, and every in-flight handler
        // token derived from this one.
        self.close_token.cancel();

        let outstanding: Vec<RequestId> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in outstanding {
            if let Some((_, waiter)) = self.pending.remove(&id) {
                debug!("resolving waiter {id} ({}) with session-closed", waiter.method);
                let _ = waiter.tx.send(Err(McpError::SessionClosed));
            }
        }

        let _ = self.transport.close().await;
        self.set_state(SessionState::Closed);
    }

    // ===== Inbound =====

    async fn read_loop(self: Arc<Self>) {
        loop {
            let message = tokio::select! {
                _ = self.close_token.cancelled() => break,
                message = self.transport.receive() => message,
            };

            match message {
                Ok(Some(McpMessage::Request(request))) => self.accept_request(request).await,
                Ok(Some(McpMessage::Response(response))) => self.accept_response(response),
                Ok(Some(McpMessage::Notification(notification))) => {
                    self.accept_notification(notification).await
                }
                Ok(None) => {
                    debug!("session {}: transport reached end of stream", self.id);
                    break;
                }
                Err(McpError::MalformedMessage(cause)) => {
                    warn!("session {}: malformed frame: {cause}", self.id);
                    let reply = JsonRpcResponse::error(
                        RequestId::Null,
                        JsonRpcError::parse_error(cause),
                    );
                    if self.transport.send_response(reply).await.is_err() {
                        break;
                    }
                }
                Err(McpError::Protocol { code, message }) => {
                    warn!("session {}: invalid frame: {message}", self.id);
                    let reply = JsonRpcResponse::error(
                        RequestId::Null,
                        JsonRpcError { code, message, data: None },
                    );
                    if self.transport.send_response(reply).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("session {}: transport error: {e}", self.id);
                    break;
                }
            }
        }

        self.shutdown().await;
    }

    async fn accept_request(self: &Arc<Self>, request: JsonRpcRequest) {
        // Handshake gating applies to the responder side only: anything but
        // `initialize` before the initialized notification earns -32002.
        if self.role == SessionRole::Server {
            let state = self.state();
            match state {
                SessionState::Operational => {}
                SessionState::Created | SessionState::Initializing => {
                    if request.method == "initialize" {
                        self.set_state(SessionState::Initializing);
                    } else {
                        let reply =
                            JsonRpcResponse::error(request.id, JsonRpcError::not_initialized());
                        let _ = self.transport.send_response(reply).await;
                        return;
                    }
                }
                SessionState::Closing | SessionState::Closed => return,
            }
        }

        let token = self.close_token.child_token();
        self.inflight.insert(request.id.clone(), token.clone());

        let session = Arc::clone(self);
        tokio::spawn(async move {
            let id = request.id.clone();
            let ctx = RequestContext::new(session.id.clone(), id.clone(), token.clone());
            let outcome = session.handler.handle_request(&session, ctx, &request).await;
            session.inflight.remove(&id);

            if token.is_cancelled() {
                debug!("request {id} cancelled, discarding result");
                return;
            }

            let response = match outcome {
                Ok(result) => JsonRpcResponse::success(id, result),
                Err(error) => JsonRpcResponse::error(id, error),
            };
            if let Err(e) = session.transport.send_response(response).await {
                warn!("session {}: failed to write response: {e}", session.id);
            }
        });
    }

    fn accept_response(&self, response: JsonRpcResponse) {
        match self.pending.remove(&response.id) {
            Some((id, waiter)) => {
                debug!(
                    "response for {id} ({}) after {:?}",
                    waiter.method,
                    waiter.created_at.elapsed()
                );
                let outcome = match response.error {
                    Some(error) => Err(error.into()),
                    None => Ok(response.result.unwrap_or(Value::Null)),
                };
                let _ = waiter.tx.send(outcome);
            }
            None => {
                warn!("session {}: response for unknown request {}", self.id, response.id);
            }
        }
    }

    async fn accept_notification(self: &Arc<Self>, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            // Handled inline so a queued backlog cannot delay cancellation.
            "notifications/cancelled" => {
                let params = notification
                    .params
                    .and_then(|p| serde_json::from_value::<CancelledParams>(p).ok());
                match params {
                    Some(params) => {
                        if let Some(entry) = self.inflight.get(&params.request_id) {
                            debug!(
                                "peer cancelled request {} ({})",
                                params.request_id,
                                params.reason.as_deref().unwrap_or("no reason")
                            );
                            entry.value().cancel();
                        }
                    }
                    None => warn!("session {}: cancelled notification without requestId", self.id),
                }
            }
            "notifications/initialized" => {
                if self.role == SessionRole::Server {
                    self.set_state(SessionState::Operational);
                    debug!("session {}: operational", self.id);
                }
                self.enqueue_notification(notification).await;
            }
            _ => {
                if self.role == SessionRole::Server && self.state() != SessionState::Operational {
                    debug!(
                        "session {}: dropping early notification {}",
                        self.id, notification.method
                    );
                    return;
                }
                self.enqueue_notification(notification).await;
            }
        }
    }

    async fn enqueue_notification(&self, notification: JsonRpcNotification) {
        if self.notify_tx.send(notification).await.is_err() {
            debug!("session {}: notification queue closed", self.id);
        }
    }

    /// Single dispatcher per session: consumers observe notifications in
    /// receive order, and a failing consumer is the handler's problem, not
    /// the reader's.
    async fn notification_loop(self: Arc<Self>, mut rx: mpsc::Receiver<JsonRpcNotification>) {
        loop {
            let notification = tokio::select! {
                _ = self.close_token.cancelled() => break,
                notification = rx.recv() => match notification {
                    Some(notification) => notification,
                    None => break,
                },
            };
            self.handler.handle_notification(&self, notification).await;
        }
    }
}
