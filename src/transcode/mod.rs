//! Transcoding subsystem.
//!
//! # Data Flow
//! ```text
//! InboundRequest + RouteMatch + metadata
//!     → request.rs (bind body, query, path into the request message)
//!     → RpcClient (unary or server-streaming call, under a deadline)
//!     → response.rs (JSON reply, NDJSON stream, or mapped error)
//! ```
//!
//! # Design Decisions
//! - Malformed input never reaches the backend
//! - No retries: a failed call surfaces immediately as a mapped error
//! - Deadline expiry drops the call future, cancelling the backend call

pub mod request;
pub mod response;
pub mod value;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::response::Response;
use http::HeaderMap;

use crate::config::TimeoutConfig;
use crate::http::request::InboundRequest;
use crate::http::response::GatewayError;
use crate::observability::metrics;
use crate::resilience::timeouts::with_deadline;
use crate::routing::router::RouteMatch;
use crate::routing::schema::Schema;
use crate::rpc::client::RpcClient;
use crate::rpc::status::Code;

pub use request::{annotate_forwarded, transcode};
pub use response::{marshal_stream, marshal_unary};

/// Issues backend calls for matched requests and marshals the results.
#[derive(Clone)]
pub struct Transcoder {
    client: Arc<dyn RpcClient>,
    request_timeout: Duration,
    stream_timeout: Duration,
}

impl Transcoder {
    pub fn new(client: Arc<dyn RpcClient>, timeouts: &TimeoutConfig) -> Self {
        Self {
            client,
            request_timeout: Duration::from_secs(timeouts.request_secs),
            stream_timeout: Duration::from_secs(timeouts.stream_secs),
        }
    }

    /// Transcode, call the backend, and marshal the outcome.
    pub async fn handle(
        &self,
        request: &InboundRequest,
        matched: &RouteMatch<'_>,
        schema: &Schema,
        metadata: HeaderMap,
    ) -> Result<Response, GatewayError> {
        let route = matched.route;
        let mut call = transcode(request, matched, schema, metadata)?;
        let start = Instant::now();

        if route.server_streaming {
            call.timeout = Some(self.stream_timeout);
            // Only stream setup is bounded by the request timeout.
            let opened = with_deadline(self.request_timeout, self.client.server_streaming(call)).await;
            let outcome = opened.as_ref().map(|_| Code::Ok).unwrap_or_else(|s| s.code);
            metrics::record_backend_call(&route.name, outcome, start);

            let messages = opened?;
            return Ok(marshal_stream(route, messages, self.stream_timeout));
        }

        call.timeout = Some(self.request_timeout);
        let reply = with_deadline(self.request_timeout, self.client.unary(call)).await;
        let outcome = reply.as_ref().map(|_| Code::Ok).unwrap_or_else(|s| s.code);
        metrics::record_backend_call(&route.name, outcome, start);

        if let Err(status) = &reply {
            tracing::debug!(route = %route.name, code = %status.code, message = %status.message, "Backend call failed");
        }
        marshal_unary(route, reply?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::description::ServiceDescription;
    use crate::routing::router::RouteTable;
    use crate::rpc::client::{MessageStream, OutboundCall, UnaryResponse};
    use crate::rpc::status::RpcStatus;
    use async_trait::async_trait;
    use axum::http::{Method, StatusCode};
    use futures_util::{stream, StreamExt};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Records calls and answers with a fixed outcome.
    struct MockClient {
        calls: Mutex<Vec<OutboundCall>>,
        reply: Result<Value, RpcStatus>,
        delay: Option<Duration>,
    }

    impl MockClient {
        fn replying(reply: Result<Value, RpcStatus>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                reply,
                delay: None,
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RpcClient for MockClient {
        async fn unary(&self, call: OutboundCall) -> Result<UnaryResponse, RpcStatus> {
            self.calls.lock().unwrap().push(call);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.reply.clone().map(|message| UnaryResponse {
                message,
                metadata: HeaderMap::new(),
            })
        }

        async fn server_streaming(&self, call: OutboundCall) -> Result<MessageStream, RpcStatus> {
            self.calls.lock().unwrap().push(call);
            let reply = self.reply.clone()?;
            Ok(stream::iter(vec![Ok(reply.clone()), Ok(reply)]).boxed())
        }
    }

    const DESCRIPTION: &str = r#"
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

    fn table() -> RouteTable {
        RouteTable::build(&ServiceDescription::from_toml_str(DESCRIPTION).unwrap()).unwrap()
    }

    fn timeouts() -> TimeoutConfig {
        TimeoutConfig {
            request_secs: 1,
            stream_secs: 5,
            ..Default::default()
        }
    }

    fn inbound(method: Method, path: &str, body: &str) -> InboundRequest {
        InboundRequest {
            method,
            path: path.to_string(),
            query: None,
            headers: HeaderMap::new(),
            body: body.as_bytes().to_vec().into(),
            remote_addr: None,
        }
    }

    async fn dispatch(
        client: Arc<MockClient>,
        request: InboundRequest,
    ) -> Result<Response, GatewayError> {
        let table = table();
        let transcoder = Transcoder::new(client, &timeouts());
        let matched = table.lookup(&request.method, &request.path).unwrap();
        transcoder
            .handle(&request, &matched, table.schema(), HeaderMap::new())
            .await
    }

    #[tokio::test]
    async fn unary_success() {
        let client = MockClient::replying(Ok(json!({"name": "bolt"})));
        let response = dispatch(client.clone(), inbound(Method::GET, "/v1/widgets/42", ""))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], br#"{"name":"bolt"}"#);

        let calls = client.calls.lock().unwrap();
        assert_eq!(calls[0].message, json!({"id": 42}));
        assert_eq!(calls[0].timeout, Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn malformed_body_never_reaches_backend() {
        let client = MockClient::replying(Ok(json!({})));
        let err = dispatch(client.clone(), inbound(Method::POST, "/v1/widgets", "{not json"))
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::BadRequest(_)));
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn backend_error_is_surfaced() {
        let client = MockClient::replying(Err(RpcStatus::not_found("no widget 42")));
        let err = dispatch(client, inbound(Method::GET, "/v1/widgets/42", ""))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_hits_deadline() {
        let client = Arc::new(MockClient {
            calls: Mutex::new(Vec::new()),
            reply: Ok(json!({})),
            delay: Some(Duration::from_secs(30)),
        });
        let err = dispatch(client, inbound(Method::GET, "/v1/widgets/42", ""))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn streaming_route_returns_ndjson() {
        let client = MockClient::replying(Ok(json!({"name": "bolt"})));
        let response = dispatch(client, inbound(Method::GET, "/v1/widgets/1:watch", ""))
            .await
            .unwrap();

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().all(|l| l == r#"{"result":{"name":"bolt"}}"#));
    }
}
