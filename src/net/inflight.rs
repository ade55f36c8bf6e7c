//! In-flight request tracking for graceful shutdown.
//!
//! # Responsibilities
//! - Count requests between dispatch and the end of their response body
//! - Let shutdown report what is still running when the grace period ends

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared counter of in-flight requests.
#[derive(Debug, Clone, Default)]
pub struct InFlightTracker {
    active: Arc<AtomicU64>,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new request. Returns a guard that decrements on drop.
    pub fn track(&self) -> InFlightGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            active: Arc::clone(&self.active),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }
}

/// Held for a request's lifetime. For streams it lives in the response body.
#[derive(Debug)]
pub struct InFlightGuard {
    active: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
