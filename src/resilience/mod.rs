//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to backend:
//!     → timeouts.rs (enforce request deadline)
//!     → On expiry: drop the call, answer DEADLINE_EXCEEDED
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every backend call has a deadline
//! - No retries at the gateway; failures surface immediately

pub mod timeouts;
