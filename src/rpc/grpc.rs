//! gRPC client on a shared tonic channel.
//!
//! # Responsibilities
//! - Check backend reachability once at startup
//! - Send JSON messages through tonic with the `application/grpc+json` content type
//! - Enforce the response size limit and the single-message unary contract
//! - Expose server streams as a lazily-polled message stream
//!
//! # Design Decisions
//! - One `Channel` shared by every request; HTTP/2 multiplexing carries
//!   concurrent calls, there is no gateway-level lock
//! - Unary calls are read through the streaming path so a second response
//!   message is an error rather than silently discarded
//! - Dropping a stream drops the tonic body, which resets the HTTP/2 stream
//!   and cancels the call on the backend
//! - No retries at this layer

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use http::{header, uri::PathAndQuery, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tonic::body::BoxBody;
use tonic::client::Grpc;
use tonic::metadata::MetadataMap;
use tonic::transport::{Channel, Endpoint};
use tower::util::MapRequest;

use crate::rpc::client::{MessageStream, OutboundCall, RpcClient, UnaryResponse};
use crate::rpc::codec::{self, JsonCodec};
use crate::rpc::status::RpcStatus;

/// Headers that must never be copied from metadata onto an HTTP/2 request.
const RESERVED: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "te",
    "content-type",
    "content-length",
    "host",
    "grpc-timeout",
    "grpc-status",
    "grpc-message",
];

type Transport = MapRequest<Channel, fn(http::Request<BoxBody>) -> http::Request<BoxBody>>;

/// gRPC client speaking `application/grpc+json`.
#[derive(Clone)]
pub struct GrpcClient {
    grpc: Grpc<Transport>,
}

impl GrpcClient {
    /// Open the backend connection, failing if it cannot be established.
    pub async fn connect(backend: &str, connect_timeout: Duration) -> Result<Self, RpcStatus> {
        let channel = endpoint(backend, connect_timeout)?
            .connect()
            .await
            .map_err(|e| RpcStatus::unavailable(format!("backend {backend} unreachable: {e}")))?;
        tracing::info!(backend = %backend, "Backend reachable");
        Ok(Self::from_channel(channel))
    }

    /// Build the client without connecting; the connection opens on first call.
    pub fn lazy(backend: &str, connect_timeout: Duration) -> Result<Self, RpcStatus> {
        Ok(Self::from_channel(endpoint(backend, connect_timeout)?.connect_lazy()))
    }

    fn from_channel(channel: Channel) -> Self {
        let transport: Transport = MapRequest::new(channel, announce_json as fn(_) -> _);
        Self {
            grpc: Grpc::new(transport).max_decoding_message_size(codec::DEFAULT_MAX_MESSAGE_BYTES),
        }
    }

    /// Override the largest accepted response message.
    pub fn with_max_message_bytes(mut self, max: usize) -> Self {
        self.grpc = self.grpc.max_decoding_message_size(max);
        self
    }

    async fn open(&self, call: OutboundCall) -> Result<tonic::Response<tonic::Streaming<Value>>, RpcStatus> {
        let path = PathAndQuery::try_from(call.method.path())
            .map_err(|e| RpcStatus::internal(format!("invalid method path {}: {e}", call.method)))?;
        let method = call.method.clone();
        let request = build_request(call);

        let mut grpc = self.grpc.clone();
        grpc.ready()
            .await
            .map_err(|e| RpcStatus::unavailable(format!("{method}: backend not ready: {e}")))?;
        Ok(grpc.server_streaming(request, path, JsonCodec).await?)
    }
}

fn endpoint(backend: &str, connect_timeout: Duration) -> Result<Endpoint, RpcStatus> {
    Endpoint::from_shared(format!("http://{backend}"))
        .map(|e| e.connect_timeout(connect_timeout).tcp_nodelay(true))
        .map_err(|e| RpcStatus::internal(format!("invalid backend address {backend}: {e}")))
}

/// tonic always writes `application/grpc`; the backend selects its codec
/// from the subtype.
fn announce_json(mut request: http::Request<BoxBody>) -> http::Request<BoxBody> {
    request
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(codec::CONTENT_TYPE));
    request
}

fn build_request(call: OutboundCall) -> tonic::Request<Value> {
    let mut headers = HeaderMap::with_capacity(call.metadata.len());
    for (name, value) in call.metadata.iter() {
        if is_reserved(name) {
            tracing::debug!(header = %name, "Skipping reserved metadata key");
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let mut request = tonic::Request::new(call.message);
    *request.metadata_mut() = MetadataMap::from_headers(headers);
    if let Some(timeout) = call.timeout {
        request.set_timeout(timeout);
    }
    request
}

#[async_trait]
impl RpcClient for GrpcClient {
    async fn unary(&self, call: OutboundCall) -> Result<UnaryResponse, RpcStatus> {
        let (metadata, mut messages, _) = self.open(call).await?.into_parts();

        let message = messages
            .message()
            .await?
            .ok_or_else(|| RpcStatus::internal("backend sent no response message"))?;
        if messages.message().await?.is_some() {
            return Err(RpcStatus::internal("backend sent more than one response message"));
        }

        Ok(UnaryResponse {
            message,
            metadata: response_metadata(&metadata.into_headers()),
        })
    }

    async fn server_streaming(&self, call: OutboundCall) -> Result<MessageStream, RpcStatus> {
        let messages = self.open(call).await?.into_inner();
        Ok(messages.map(|item| item.map_err(RpcStatus::from)).boxed())
    }
}

/// Application metadata from response headers (transport headers removed).
fn response_metadata(headers: &HeaderMap) -> HeaderMap {
    let mut metadata = HeaderMap::new();
    for (name, value) in headers.iter() {
        let key = name.as_str();
        if key.starts_with("grpc-") || is_reserved(name) || key == "date" || key == "server" {
            continue;
        }
        metadata.append(name.clone(), value.clone());
    }
    metadata
}

fn is_reserved(name: &HeaderName) -> bool {
    RESERVED.contains(&name.as_str())
}
