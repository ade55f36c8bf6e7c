//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     → listener.rs (bind; failure is fatal)
//!     → Hand off to HTTP layer
//!
//! Per request:
//!     → inflight.rs (guard held until the response body ends)
//! ```

pub mod inflight;
pub mod listener;

pub use inflight::{InFlightGuard, InFlightTracker};
pub use listener::{bind, ListenerError};
