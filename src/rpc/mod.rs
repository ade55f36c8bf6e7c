//! Backend RPC subsystem.
//!
//! # Data Flow
//! ```text
//! OutboundCall (method, JSON message, metadata)
//!     → client.rs (RpcClient call contract)
//!     → grpc.rs (tonic channel, JSON payloads via codec.rs)
//!     → Backend
//!     → tonic::Status → status.rs (RpcStatus, HTTP mapping)
//!     → UnaryResponse | MessageStream | RpcStatus
//! ```

pub mod client;
pub mod codec;
pub mod grpc;
pub mod status;

pub use client::{MessageStream, OutboundCall, RpcClient, RpcMethod, UnaryResponse};
pub use grpc::GrpcClient;
pub use status::{code_name, http_status, Code, ErrorBody, RpcStatus};
