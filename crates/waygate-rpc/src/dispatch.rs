//! The resource tool dispatcher contract.

use async_trait::async_trait;

use waygate_core::Session;

use crate::types::{JsonRpcRequest, JsonRpcResponse};

/// Dispatches an authenticated JSON-RPC request to the service's tool
/// backend (Drive/Forms/Gmail/Calendar wrappers).
///
/// The gateway guarantees `session.authenticated` and `session.tokens`
/// are set before calling.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Handle one request and produce its response.
    async fn dispatch(&self, session: &Session, request: JsonRpcRequest) -> JsonRpcResponse;
}
