//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → limits.rs (request body size)
//!     → headers.rs (decide which headers cross into call metadata)
//!     → Pass to transcoder
//! ```
//!
//! # Design Decisions
//! - Fail closed: headers no rule allows are dropped
//! - No trust decisions: identity headers are forwarded, never validated

pub mod headers;
pub mod limits;

pub use headers::{Disposition, Fallback, HeaderPolicy, HeaderRule, PolicyVariant};
