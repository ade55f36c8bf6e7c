//! RPC result → HTTP response.
//!
//! # Responsibilities
//! - Serialize a successful reply as JSON (whole message or `response_body`)
//! - Expose response metadata as `Grpc-Metadata-<key>` headers
//! - Turn a server stream into newline-delimited JSON
//!
//! # Design Decisions
//! - Errors go through [`GatewayError`]'s `IntoResponse`, one code table
//! - A stream line is `{"result": ...}`; a failure ends the stream with one
//!   `{"error": {...}}` line since the status line is already sent
//! - The response body owns the backend stream: when the client goes away
//!   hyper drops the body, which drops and cancels the backend call

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{stream, StreamExt};
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::http::response::GatewayError;
use crate::observability::metrics;
use crate::routing::router::RouteEntry;
use crate::rpc::client::{MessageStream, UnaryResponse};
use crate::rpc::status::RpcStatus;
use crate::security::headers::METADATA_HEADER_PREFIX;
use crate::transcode::value::get_field;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Marshal a unary reply.
pub fn marshal_unary(route: &RouteEntry, reply: UnaryResponse) -> Result<Response, GatewayError> {
    let payload = select_body(route, &reply.message);
    let body = serde_json::to_vec(payload)
        .map_err(|e| GatewayError::Internal(format!("failed to encode response: {e}")))?;

    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        body,
    )
        .into_response();
    copy_metadata(&reply.metadata, response.headers_mut());
    Ok(response)
}

/// Marshal a server stream. The stream is polled only as the client reads.
pub fn marshal_stream(route: &RouteEntry, messages: MessageStream, limit: Duration) -> Response {
    let state = StreamState {
        messages,
        response_body: route.response_body.clone(),
        deadline: Instant::now() + limit,
        guard: CancelGuard {
            route: route.name.clone(),
            completed: false,
        },
    };

    let lines = stream::unfold(state, next_line).map(Ok::<Bytes, Infallible>);

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static(NDJSON_CONTENT_TYPE))],
        Body::from_stream(lines),
    )
        .into_response()
}

struct StreamState {
    messages: MessageStream,
    response_body: Option<Vec<String>>,
    deadline: Instant,
    guard: CancelGuard,
}

async fn next_line(mut state: StreamState) -> Option<(Bytes, StreamState)> {
    if state.guard.completed {
        return None;
    }

    let line = match tokio::time::timeout_at(state.deadline, state.messages.next()).await {
        Ok(Some(Ok(message))) => {
            let payload = match &state.response_body {
                Some(path) => get_field(&message, path).unwrap_or(&Value::Null),
                None => &message,
            };
            json!({ "result": payload })
        }
        Ok(Some(Err(status))) => {
            state.guard.completed = true;
            error_line(&status)
        }
        Ok(None) => {
            state.guard.completed = true;
            return None;
        }
        Err(_) => {
            state.guard.completed = true;
            tracing::warn!(route = %state.guard.route, "Stream deadline exceeded");
            error_line(&RpcStatus::deadline_exceeded("stream deadline exceeded"))
        }
    };

    let mut bytes = serde_json::to_vec(&line).unwrap_or_default();
    bytes.push(b'\n');
    Some((Bytes::from(bytes), state))
}

fn error_line(status: &RpcStatus) -> Value {
    json!({ "error": status.to_body() })
}

/// Counts streams dropped before they finished (client disconnects).
struct CancelGuard {
    route: String,
    completed: bool,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if !self.completed {
            tracing::info!(route = %self.route, "Client disconnected; cancelling backend stream");
            metrics::record_stream_cancelled(&self.route);
        }
    }
}

fn select_body<'a>(route: &RouteEntry, message: &'a Value) -> &'a Value {
    match &route.response_body {
        Some(path) => get_field(message, path).unwrap_or(&Value::Null),
        None => message,
    }
}

fn copy_metadata(metadata: &HeaderMap, headers: &mut HeaderMap) {
    for (key, value) in metadata.iter() {
        let name = format!("{METADATA_HEADER_PREFIX}{}", key.as_str());
        match HeaderName::from_bytes(name.as_bytes()) {
            Ok(name) => {
                headers.append(name, value.clone());
            }
            Err(_) => tracing::debug!(key = %key, "Skipping unrepresentable response metadata"),
        }
    }
}
