//! HTTP server setup and request dispatch.
//!
//! # Responsibilities
//! - Create the Axum Router with one catch-all handler
//! - Wire up middleware (request ID, tracing span, panic recovery)
//! - Dispatch each request: Route Table → Header Policy → Transcoder
//! - Serve until shutdown, drain for a bounded grace period, then stop
//! - Observability (metrics, correlation IDs)

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, Request},
    response::{IntoResponse, Response},
    Router,
};
use futures_util::StreamExt;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnectionBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::config::GatewayConfig;
use crate::http::request::{
    propagate_request_id_layer, request_id, set_request_id_layer, InboundRequest,
};
use crate::http::response::GatewayError;
use crate::lifecycle::shutdown;
use crate::net::{InFlightGuard, InFlightTracker};
use crate::observability::{metrics, TraceContext};
use crate::routing::router::{LookupError, RouteTable};
use crate::rpc::client::RpcClient;
use crate::security::headers::HeaderPolicy;
use crate::transcode::{annotate_forwarded, response::NDJSON_CONTENT_TYPE, Transcoder};

/// Application state injected into handlers. Read-only after startup.
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RouteTable>,
    pub policy: Arc<HeaderPolicy>,
    pub transcoder: Transcoder,
    pub inflight: InFlightTracker,
    pub max_body_bytes: usize,
}

/// HTTP front end of the gateway.
pub struct GatewayServer {
    router: Router,
    inflight: InFlightTracker,
    grace: Duration,
}

impl GatewayServer {
    /// Create a server over a built route table and a backend client.
    pub fn new(config: &GatewayConfig, routes: Arc<RouteTable>, client: Arc<dyn RpcClient>) -> Self {
        let policy = HeaderPolicy::new(config.header_policy.variant, config.header_policy.fallback);
        tracing::info!(
            variant = ?policy.variant(),
            fallback = ?policy.fallback(),
            "Header policy selected"
        );

        let inflight = InFlightTracker::new();
        let state = AppState {
            routes,
            policy: Arc::new(policy),
            transcoder: Transcoder::new(client, &config.timeouts),
            inflight: inflight.clone(),
            max_body_bytes: config.limits.max_body_bytes,
        };

        Self {
            router: Self::build_router(state),
            inflight,
            grace: Duration::from_secs(config.timeouts.shutdown_grace_secs),
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        let trace = TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            let trace_id = TraceContext::from_headers(request.headers())
                .map(|ctx| ctx.trace_id)
                .unwrap_or_default();
            tracing::info_span!(
                "request",
                request_id = %request_id(request.headers()),
                method = %request.method(),
                path = %request.uri().path(),
                trace_id = %trace_id,
            )
        });

        Router::new()
            .fallback(gateway_handler)
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(set_request_id_layer())
                    .layer(trace)
                    .layer(propagate_request_id_layer())
                    .layer(CatchPanicLayer::custom(panic_response)),
            )
    }

    /// The router, for serving on a custom transport or in tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Requests currently being served.
    pub fn in_flight(&self) -> InFlightTracker {
        self.inflight.clone()
    }

    /// Serve until `shutdown` fires, then drain for up to the grace period.
    ///
    /// Connections still open when the grace period ends are aborted, which
    /// drops their response bodies and cancels any backend streams.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let Self {
            router,
            inflight,
            grace,
        } = self;

        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Gateway server starting");

        let builder = ConnectionBuilder::new(TokioExecutor::new());
        let graceful = GracefulShutdown::new();
        let mut connections = JoinSet::new();
        let stop = shutdown::wait(shutdown);
        tokio::pin!(stop);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, remote) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };

                    let router = router.clone();
                    let service = service_fn(move |mut request: Request<Incoming>| {
                        request.extensions_mut().insert(ConnectInfo(remote));
                        router.clone().oneshot(request)
                    });
                    let connection = builder
                        .serve_connection(TokioIo::new(stream), service)
                        .into_owned();
                    let connection = graceful.watch(connection);

                    connections.spawn(async move {
                        if let Err(e) = connection.await {
                            tracing::debug!(remote = %remote, error = %e, "Connection ended with error");
                        }
                    });
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = &mut stop => break,
            }
        }

        drop(listener);
        tracing::info!(
            connections = connections.len(),
            in_flight = inflight.active_count(),
            "Stopped accepting connections; draining"
        );

        if tokio::time::timeout(grace, graceful.shutdown()).await.is_err() {
            tracing::warn!(
                connections = connections.len(),
                in_flight = inflight.active_count(),
                grace = ?grace,
                "Grace period elapsed; closing remaining connections"
            );
            connections.shutdown().await;
        }

        tracing::info!("Gateway server stopped");
        Ok(())
    }
}

/// Catch-all handler: every request goes through the route table.
async fn gateway_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let guard = state.inflight.track();
    let method = request.method().clone();

    let (route, result) = dispatch(&state, request).await;
    let response = match result {
        Ok(response) => response,
        Err(err) => {
            let status = err.status_code();
            if status.is_server_error() {
                tracing::warn!(route = %route, status = %status, error = %err, "Request failed");
            } else {
                tracing::debug!(route = %route, status = %status, error = %err, "Request rejected");
            }
            err.into_response()
        }
    };

    metrics::record_request(&route, method.as_str(), response.status().as_u16(), start);
    hold_while_streaming(response, guard)
}

/// Returns the route label alongside the outcome.
async fn dispatch(state: &AppState, request: Request<Body>) -> (String, Result<Response, GatewayError>) {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    // 1. Route Table
    let matched = match state.routes.lookup(request.method(), request.uri().path()) {
        Ok(matched) => matched,
        Err(LookupError::NotFound) => {
            return (metrics::UNMATCHED.to_string(), Err(GatewayError::RouteNotFound))
        }
        Err(LookupError::MethodNotAllowed { allowed }) => {
            return (
                metrics::UNMATCHED.to_string(),
                Err(GatewayError::MethodNotAllowed { allowed }),
            )
        }
    };
    let route = matched.route.name.clone();
    tracing::debug!(route = %route, rpc = %matched.route.rpc, "Route matched");

    let inbound = match InboundRequest::from_request(request, remote_addr, state.max_body_bytes).await {
        Ok(inbound) => inbound,
        Err(err) => return (route, Err(err)),
    };

    // 2. Header Policy
    let mut metadata = state.policy.forward(&inbound.headers);
    annotate_forwarded(&mut metadata, &inbound);

    // 3. Transcoder
    let result = state
        .transcoder
        .handle(&inbound, &matched, state.routes.schema(), metadata)
        .await;
    (route, result)
}

/// Keep a streaming response counted as in flight until its body ends.
fn hold_while_streaming(response: Response, guard: InFlightGuard) -> Response {
    let streaming = response
        .headers()
        .get(header::CONTENT_TYPE)
        .is_some_and(|v| v.as_bytes() == NDJSON_CONTENT_TYPE.as_bytes());
    if !streaming {
        return response;
    }

    let (parts, body) = response.into_parts();
    let body = body.into_data_stream().map(move |chunk| {
        let _held = &guard;
        chunk
    });
    Response::from_parts(parts, Body::from_stream(body))
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    GatewayError::Internal(format!("handler panicked: {detail}")).into_response()
}
