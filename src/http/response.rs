//! Client-facing errors.
//!
//! # Responsibilities
//! - One error type for everything that can stop a request before or during
//!   the backend call
//! - Map each failure to an HTTP status and a structured JSON body
//!
//! # Design Decisions
//! - Body shape is the same for gateway and backend failures:
//!   `{"code": <rpc code>, "status": "<NAME>", "message": "..."}`
//! - 405 responses carry an `Allow` header
//! - Internal details are logged, never echoed to the client

use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::rpc::status::http_status;
use crate::rpc::{Code, RpcStatus};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no route matches the request path")]
    RouteNotFound,

    #[error("method not allowed")]
    MethodNotAllowed { allowed: Vec<Method> },

    #[error("{0}")]
    BadRequest(String),

    #[error("request body exceeds {limit} bytes")]
    RequestTooLarge { limit: usize },

    #[error(transparent)]
    Backend(#[from] RpcStatus),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::RouteNotFound => StatusCode::NOT_FOUND,
            GatewayError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::RequestTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::Backend(status) => http_status(status.code),
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Equivalent RPC status for the error body.
    pub fn to_status(&self) -> RpcStatus {
        match self {
            GatewayError::RouteNotFound => RpcStatus::not_found(self.to_string()),
            GatewayError::MethodNotAllowed { .. } => {
                RpcStatus::new(Code::Unimplemented, self.to_string())
            }
            GatewayError::BadRequest(_) => RpcStatus::new(Code::InvalidArgument, self.to_string()),
            GatewayError::RequestTooLarge { .. } => {
                RpcStatus::new(Code::ResourceExhausted, self.to_string())
            }
            GatewayError::Backend(status) => status.clone(),
            GatewayError::Internal(_) => RpcStatus::internal("internal gateway error"),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if let GatewayError::Internal(detail) = &self {
            tracing::error!(error = %detail, "Internal gateway error");
        }

        let status = self.status_code();
        let mut response = (status, Json(self.to_status().to_body())).into_response();

        if let GatewayError::MethodNotAllowed { allowed } = &self {
            let allow = allowed
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            if let Ok(value) = HeaderValue::from_str(&allow) {
                response.headers_mut().insert(header::ALLOW, value);
            }
        }

        response
    }
}
