//! Distributed tracing support.
//!
//! # Responsibilities
//! - Extract W3C trace context from incoming requests
//! - Carry it on the request span so logs correlate with the caller's trace
//!
//! # Design Decisions
//! - Explicit per-request context, no process-wide propagator
//! - Propagation to the backend happens through the header policy, which
//!   forwards `traceparent` / `tracestate` unchanged
//! - Malformed headers are ignored, never rejected

use http::HeaderMap;

use crate::security::headers::{TRACEPARENT, TRACESTATE};

/// Parsed `traceparent` (version 00 layout).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub parent_id: String,
    pub sampled: bool,
    pub tracestate: Option<String>,
}

impl TraceContext {
    /// Read the trace context from request headers, if a valid one is present.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let traceparent = headers.get(TRACEPARENT)?.to_str().ok()?;
        let mut context = Self::parse(traceparent)?;
        context.tracestate = headers
            .get(TRACESTATE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Some(context)
    }

    /// Parse `version-traceid-parentid-flags`.
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let parent_id = parts.next()?;
        let flags = parts.next()?;

        if !is_lower_hex(version, 2) || version == "ff" {
            return None;
        }
        // Version 00 has exactly four fields; later versions may append more.
        if version == "00" && parts.next().is_some() {
            return None;
        }
        if !is_lower_hex(trace_id, 32) || trace_id.bytes().all(|b| b == b'0') {
            return None;
        }
        if !is_lower_hex(parent_id, 16) || parent_id.bytes().all(|b| b == b'0') {
            return None;
        }
        if !is_lower_hex(flags, 2) {
            return None;
        }
        let flags = u8::from_str_radix(flags, 16).ok()?;

        Some(Self {
            trace_id: trace_id.to_string(),
            parent_id: parent_id.to_string(),
            sampled: flags & 0x01 == 0x01,
            tracestate: None,
        })
    }
}

fn is_lower_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
