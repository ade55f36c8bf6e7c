//! Inbound request capture.
//!
//! # Responsibilities
//! - Assign a unique request ID (UUID v4) as early as possible
//! - Buffer the body under the configured size limit
//! - Hand the transcoder an owned, framework-independent request
//!
//! # Design Decisions
//! - Request ID is set by `tower-http` before the handler runs and echoed on
//!   the response
//! - Body size enforced while buffering, see [`crate::security::limits`]

use std::net::SocketAddr;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderName, Method, Request};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::http::response::GatewayError;
use crate::security::limits;

pub const X_REQUEST_ID: &str = "x-request-id";

/// One HTTP request, fully buffered. Discarded once the response is sent.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub path: String,
    /// Raw query string, without the `?`.
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub remote_addr: Option<SocketAddr>,
}

impl InboundRequest {
    /// Buffer an axum request, rejecting bodies over `max_body_bytes`.
    pub async fn from_request(
        request: Request<Body>,
        remote_addr: Option<SocketAddr>,
        max_body_bytes: usize,
    ) -> Result<Self, GatewayError> {
        let (parts, body) = request.into_parts();
        let body = limits::read_body(body, max_body_bytes).await?;

        Ok(Self {
            method: parts.method,
            path: parts.uri.path().to_string(),
            query: parts.uri.query().map(str::to_string),
            headers: parts.headers,
            body,
            remote_addr,
        })
    }

    pub fn request_id(&self) -> &str {
        request_id(&self.headers)
    }
}

/// Request ID assigned by [`set_request_id_layer`], or `"unknown"`.
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Sets `x-request-id` on requests that don't carry one.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID), MakeRequestUuid)
}

/// Copies `x-request-id` onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_parts_and_body() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/v1/widgets?view=full&tag=a")
            .header(X_REQUEST_ID, "req-1")
            .body(Body::from(r#"{"name":"bolt"}"#))
            .unwrap();

        let inbound = InboundRequest::from_request(request, None, 1024).await.unwrap();
        assert_eq!(inbound.method, Method::POST);
        assert_eq!(inbound.path, "/v1/widgets");
        assert_eq!(inbound.query.as_deref(), Some("view=full&tag=a"));
        assert_eq!(inbound.request_id(), "req-1");
        assert_eq!(&inbound.body[..], br#"{"name":"bolt"}"#);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let request = Request::builder()
            .uri("/v1/widgets")
            .body(Body::from(vec![b'a'; 100]))
            .unwrap();
        let err = InboundRequest::from_request(request, None, 10).await.unwrap_err();
        assert!(matches!(err, GatewayError::RequestTooLarge { limit: 10 }));
    }
}
