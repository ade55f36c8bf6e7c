//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, dispatch)
//!     → [routing: RouteTable lookup]
//!     → request.rs (request ID, buffered InboundRequest)
//!     → [security: header policy] → [transcode: backend call]
//!     → response.rs (errors as structured JSON)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{InboundRequest, X_REQUEST_ID};
pub use response::GatewayError;
pub use server::{AppState, GatewayServer};
