//! Per-request context handed to every handler

use crate::types::RequestId;
use tokio_util::sync::CancellationToken;

/// Correlation and cancellation state for one inbound request.
///
/// Created when the session accepts a request from the transport, dropped
/// when the response is written or discarded. Handlers observe cancellation
/// cooperatively through this context; nothing is torn down from outside.
#[derive(Debug, Clone)]
pub struct RequestContext {
    session_id: String,
    request_id: RequestId,
    token: CancellationToken,
}

impl RequestContext {
    pub fn new(session_id: String, request_id: RequestId, token: CancellationToken) -> Self {
        Self { session_id, request_id, token }
    }

    /// Detached context for callers invoking handlers outside a session,
    /// e.g. the stateless server.
    pub fn detached(request_id: RequestId) -> Self {
        Self {
            session_id: String::new(),
            request_id,
            token: CancellationToken::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// True once the peer cancelled this request, the deadline fired, or
    /// the session is closing.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when cancellation is signalled. Long-running handlers
    /// should select against this.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}
