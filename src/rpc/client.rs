//! The call contract between the transcoder and the backend.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use http::HeaderMap;
use serde_json::Value;

use crate::rpc::status::RpcStatus;

/// Fully-qualified backend method, e.g. `queue.Queue/GetQueue`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RpcMethod {
    pub service: String,
    pub method: String,
}

impl RpcMethod {
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
        }
    }

    /// HTTP/2 path used on the wire: `/<service>/<method>`.
    pub fn path(&self) -> String {
        format!("/{}/{}", self.service, self.method)
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.method)
    }
}

/// One backend call, built per request and consumed exactly once.
#[derive(Debug, Clone)]
pub struct OutboundCall {
    pub method: RpcMethod,
    /// Request message as a JSON object.
    pub message: Value,
    /// Outgoing metadata, lower-case keys.
    pub metadata: HeaderMap,
    /// Deadline advertised to the backend.
    pub timeout: Option<Duration>,
}

/// Successful unary result.
#[derive(Debug, Clone, Default)]
pub struct UnaryResponse {
    pub message: Value,
    /// Response metadata returned by the backend.
    pub metadata: HeaderMap,
}

/// Messages of a server-streaming call. Dropping the stream cancels the call.
pub type MessageStream = BoxStream<'static, Result<Value, RpcStatus>>;

/// A reusable, internally synchronized connection to the backend.
///
/// Implementations must tolerate concurrent calls; the gateway never
/// serializes access.
#[async_trait]
pub trait RpcClient: Send + Sync + 'static {
    async fn unary(&self, call: OutboundCall) -> Result<UnaryResponse, RpcStatus>;

    async fn server_streaming(&self, call: OutboundCall) -> Result<MessageStream, RpcStatus>;
}
