//! HTTP request → RPC call.
//!
//! # Binding order
//! ```text
//! body (whole message or one field)
//!     → query parameters (fields not bound by path or body)
//!     → path captures (always win)
//! ```
//!
//! Every failure here is the client's: it surfaces as 400 and the backend
//! is never called.

use http::{HeaderMap, HeaderValue};
use percent_encoding::percent_decode_str;
use serde_json::{Map, Value};

use crate::http::request::InboundRequest;
use crate::http::response::GatewayError;
use crate::routing::router::{BodyBinding, FieldBinding, RouteMatch};
use crate::routing::schema::{FieldKind, Schema};
use crate::rpc::client::OutboundCall;
use crate::transcode::value::{coerce_field, coerce_message, parse_scalar, set_field};

pub const X_FORWARDED_HOST: &str = "x-forwarded-host";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Build the backend call for a matched request.
///
/// `metadata` is what the header policy let through; the call timeout is
/// left to the caller.
pub fn transcode(
    request: &InboundRequest,
    matched: &RouteMatch<'_>,
    schema: &Schema,
    metadata: HeaderMap,
) -> Result<OutboundCall, GatewayError> {
    let route = matched.route;
    let mut message = decode_body(request, &route.body, &route.input, schema)?;

    if !matches!(route.body, BodyBinding::Whole) {
        if let Some(query) = request.query.as_deref() {
            bind_query(&mut message, query, matched, schema)?;
        }
    }

    for (binding, raw) in route.path_bindings.iter().zip(&matched.captures) {
        let decoded = percent_decode_str(raw).decode_utf8().map_err(|_| {
            GatewayError::BadRequest(format!(
                "path parameter '{}' is not valid UTF-8",
                binding.dotted()
            ))
        })?;
        let value = bind_text(binding, &decoded)?;
        set_field(&mut message, &binding.path, value);
    }

    Ok(OutboundCall {
        method: route.rpc.clone(),
        message: Value::Object(message),
        metadata,
        timeout: None,
    })
}

/// Record where the request came from, the way HTTP proxies do.
pub fn annotate_forwarded(metadata: &mut HeaderMap, request: &InboundRequest) {
    let host = request
        .headers
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());
    if let Some(host) = host {
        if let Ok(value) = HeaderValue::from_str(host) {
            metadata.insert(X_FORWARDED_HOST, value);
        }
    }

    let Some(peer) = request.remote_addr.map(|addr| addr.ip().to_string()) else {
        return;
    };
    let chain = match request
        .headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
    {
        Some(existing) if !existing.trim().is_empty() => format!("{existing}, {peer}"),
        _ => peer,
    };
    if let Ok(value) = HeaderValue::from_str(&chain) {
        metadata.insert(X_FORWARDED_FOR, value);
    }
}

fn decode_body(
    request: &InboundRequest,
    binding: &BodyBinding,
    input: &str,
    schema: &Schema,
) -> Result<Map<String, Value>, GatewayError> {
    let bad_request = |e: String| GatewayError::BadRequest(format!("invalid request body: {e}"));

    if matches!(binding, BodyBinding::None) || request.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }

    let value: Value =
        serde_json::from_slice(&request.body).map_err(|e| bad_request(e.to_string()))?;

    match binding {
        BodyBinding::None => Ok(Map::new()),
        BodyBinding::Whole => {
            if value.is_null() {
                return Ok(Map::new());
            }
            coerce_message(schema, input, value).map_err(bad_request)
        }
        BodyBinding::Field(field) => {
            let mut message = Map::new();
            if !value.is_null() {
                let value = coerce_field(schema, &field.field, value).map_err(bad_request)?;
                set_field(&mut message, &field.path, value);
            }
            Ok(message)
        }
    }
}

fn bind_query(
    message: &mut Map<String, Value>,
    query: &str,
    matched: &RouteMatch<'_>,
    schema: &Schema,
) -> Result<(), GatewayError> {
    let route = matched.route;

    // Group repeated keys, keeping first-seen order.
    let mut params: Vec<(String, Vec<String>)> = Vec::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match params.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value.into_owned()),
            None => params.push((key.into_owned(), vec![value.into_owned()])),
        }
    }

    for (key, values) in params {
        let path: Vec<String> = key.split('.').map(str::to_string).collect();

        let bound_by_path = route
            .path_bindings
            .iter()
            .any(|b| path.starts_with(&b.path) || b.path.starts_with(&path));
        let bound_by_body = match &route.body {
            BodyBinding::Field(b) => path.starts_with(&b.path),
            _ => false,
        };
        if bound_by_path || bound_by_body {
            tracing::debug!(param = %key, "Ignoring query parameter bound elsewhere");
            continue;
        }

        let field = match schema.resolve(&route.input, &path) {
            Ok(field) if !matches!(field.kind, FieldKind::Message(_)) => field.clone(),
            _ => {
                tracing::debug!(param = %key, "Ignoring unknown query parameter");
                continue;
            }
        };
        let binding = FieldBinding { path, field };

        let value = if binding.field.repeated {
            values
                .iter()
                .map(|v| bind_text(&binding, v))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)?
        } else {
            match values.as_slice() {
                [single] => bind_text(&binding, single)?,
                _ => {
                    return Err(GatewayError::BadRequest(format!(
                        "query parameter '{key}' given {} times for a non-repeated field",
                        values.len()
                    )))
                }
            }
        };
        set_field(message, &binding.path, value);
    }

    Ok(())
}

fn bind_text(binding: &FieldBinding, text: &str) -> Result<Value, GatewayError> {
    let kind = binding.field.scalar().ok_or_else(|| {
        GatewayError::BadRequest(format!("'{}' cannot be set from text", binding.dotted()))
    })?;
    parse_scalar(kind, text)
        .map_err(|e| GatewayError::BadRequest(format!("parameter '{}': {e}", binding.dotted())))
}
