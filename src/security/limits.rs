//! Request size limits.
//!
//! # Design Decisions
//! - Body size enforced while buffering, before any JSON decoding
//! - Oversized bodies are answered with 413, never forwarded

use axum::body::{Body, Bytes};

use crate::http::response::GatewayError;

/// Buffer a request body, rejecting it once it exceeds `limit` bytes.
pub async fn read_body(body: Body, limit: usize) -> Result<Bytes, GatewayError> {
    axum::body::to_bytes(body, limit).await.map_err(|e| {
        if is_length_limit(&e) {
            GatewayError::RequestTooLarge { limit }
        } else {
            GatewayError::BadRequest(format!("failed to read request body: {e}"))
        }
    })
}

fn is_length_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<http_body_util::LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}
