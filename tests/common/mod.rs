//! Shared utilities for integration testing.
//!
//! The mock backend speaks gRPC framing with JSON payloads over cleartext
//! HTTP/2, which is what `GrpcClient` sends.
//!
//! `GetWidget` ids with special replies: 404 (NOT_FOUND), 777 (two
//! messages), 888 (a ~4 KiB message).

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::Response,
    routing::post,
    Router,
};
use futures_util::stream;
use http_body_util::StreamBody;
use hyper::body::Frame;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use rpc_gateway::config::GatewayConfig;
use rpc_gateway::routing::{RouteTable, ServiceDescription};
use rpc_gateway::rpc::GrpcClient;
use rpc_gateway::{GatewayServer, Shutdown};

pub const WIDGETS: &str = r#"
[[services]]
name = "widgets.Widgets"

[[services.methods]]
name = "GetWidget"
input = "widgets.GetWidgetRequest"
output = "widgets.Widget"
[[services.methods.http]]
method = "GET"
path = "/v1/widgets/{id}"

[[services.methods]]
name = "CreateWidget"
input = "widgets.Widget"
output = "widgets.Widget"
[[services.methods.http]]
method = "POST"
path = "/v1/widgets"
body = "*"

[[services.methods]]
name = "WatchWidgets"
input = "widgets.GetWidgetRequest"
output = "widgets.Widget"
server_streaming = true
[[services.methods.http]]
method = "GET"
path = "/v1/widgets/{id}:watch"

[messages."widgets.GetWidgetRequest"]
id = "int64"

[messages."widgets.Widget"]
id = "int64"
name = "string"
"#;

/// One call as the backend saw it.
#[derive(Debug, Clone)]
pub struct SeenCall {
    pub path: String,
    pub headers: HeaderMap,
    pub message: Value,
}

/// Handle on a running mock backend.
#[derive(Clone, Default)]
pub struct MockBackend {
    pub calls: Arc<Mutex<Vec<SeenCall>>>,
    pub stream_cancelled: Arc<AtomicBool>,
}

impl MockBackend {
    pub fn calls(&self) -> Vec<SeenCall> {
        self.calls.lock().unwrap().clone()
    }
}

/// Start the mock backend on an ephemeral port.
pub async fn start_mock_backend() -> (SocketAddr, MockBackend) {
    let backend = MockBackend::default();
    let app = Router::new()
        .route("/widgets.Widgets/GetWidget", post(get_widget))
        .route("/widgets.Widgets/CreateWidget", post(create_widget))
        .route("/widgets.Widgets/WatchWidgets", post(watch_widgets))
        .with_state(backend.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (addr, backend)
}

/// Start a gateway in front of `backend_addr`.
pub async fn start_gateway(backend_addr: SocketAddr) -> (SocketAddr, Shutdown, tokio::task::JoinHandle<()>) {
    let config = GatewayConfig {
        backend: backend_addr.to_string(),
        ..Default::default()
    };
    start_gateway_with(config).await
}

pub async fn start_gateway_with(
    config: GatewayConfig,
) -> (SocketAddr, Shutdown, tokio::task::JoinHandle<()>) {
    let description = ServiceDescription::from_toml_str(WIDGETS).unwrap();
    let routes = Arc::new(RouteTable::build(&description).unwrap());
    let client = GrpcClient::connect(&config.backend, Duration::from_secs(2))
        .await
        .unwrap()
        .with_max_message_bytes(config.limits.max_message_bytes);

    let server = GatewayServer::new(&config, routes, Arc::new(client));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let receiver: broadcast::Receiver<()> = shutdown.subscribe();
    let handle = tokio::spawn(async move {
        server.run(listener, receiver).await.unwrap();
    });

    (addr, shutdown, handle)
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

fn record(backend: &MockBackend, path: &str, headers: &HeaderMap, body: &Bytes) -> Value {
    let message: Value = serde_json::from_slice(&body[5..]).unwrap_or(Value::Null);
    backend.calls.lock().unwrap().push(SeenCall {
        path: path.to_string(),
        headers: headers.clone(),
        message: message.clone(),
    });
    message
}

fn frame(message: &Value) -> Bytes {
    let payload = serde_json::to_vec(message).unwrap();
    let mut out = Vec::with_capacity(5 + payload.len());
    out.push(0);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&payload);
    Bytes::from(out)
}

fn ok_trailers() -> HeaderMap {
    let mut trailers = HeaderMap::new();
    trailers.insert("grpc-status", HeaderValue::from_static("0"));
    trailers
}

fn grpc_response(body: Body) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/grpc+json")
        .header("x-served-by", "mock-backend")
        .body(body)
        .unwrap()
}

/// Trailers-only error response.
fn grpc_error(code: u8, message: &str) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/grpc+json")
        .header("grpc-status", code.to_string())
        .header("grpc-message", message.replace(' ', "%20"))
        .body(Body::empty())
        .unwrap()
}

fn unary_reply(message: &Value) -> Response {
    let frames = vec![
        Ok::<_, Infallible>(Frame::data(frame(message))),
        Ok(Frame::trailers(ok_trailers())),
    ];
    grpc_response(Body::new(StreamBody::new(stream::iter(frames))))
}

async fn get_widget(State(backend): State<MockBackend>, headers: HeaderMap, body: Bytes) -> Response {
    let request = record(&backend, "/widgets.Widgets/GetWidget", &headers, &body);
    match request["id"].as_i64() {
        Some(404) => grpc_error(5, "widget 404 not found"),
        // A unary method answering with two messages.
        Some(777) => {
            let frames = vec![
                Ok::<_, Infallible>(Frame::data(frame(&json!({"name": "first"})))),
                Ok(Frame::data(frame(&json!({"name": "second"})))),
                Ok(Frame::trailers(ok_trailers())),
            ];
            grpc_response(Body::new(StreamBody::new(stream::iter(frames))))
        }
        Some(888) => unary_reply(&json!({"name": "x".repeat(4096)})),
        _ => unary_reply(&json!({"name": "bolt"})),
    }
}

async fn create_widget(State(backend): State<MockBackend>, headers: HeaderMap, body: Bytes) -> Response {
    let request = record(&backend, "/widgets.Widgets/CreateWidget", &headers, &body);
    let mut reply = request.clone();
    reply["id"] = json!(1);
    unary_reply(&reply)
}

/// Sets the flag when the response stream is dropped before it ends.
struct CancelFlag(Arc<AtomicBool>);

impl Drop for CancelFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

async fn watch_widgets(State(backend): State<MockBackend>, headers: HeaderMap, body: Bytes) -> Response {
    record(&backend, "/widgets.Widgets/WatchWidgets", &headers, &body);

    // Emits forever; only a cancel ends it.
    let flag = CancelFlag(backend.stream_cancelled.clone());
    let frames = stream::unfold((0u64, flag), |(n, flag)| async move {
        if n > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let message = json!({"id": n, "name": format!("event-{n}")});
        Some((Ok::<_, Infallible>(Frame::data(frame(&message))), (n + 1, flag)))
    });
    grpc_response(Body::new(StreamBody::new(frames)))
}
