//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap backend calls with a deadline
//! - Cancel the call cleanly when the deadline passes
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Expiry drops the inner future, which cancels the in-flight call
//! - Timeout errors are distinct from other errors (`DEADLINE_EXCEEDED`, 504)

use std::future::Future;
use std::time::Duration;

use crate::rpc::status::RpcStatus;

/// Run `call` for at most `limit`.
pub async fn with_deadline<T, F>(limit: Duration, call: F) -> Result<T, RpcStatus>
where
    F: Future<Output = Result<T, RpcStatus>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(timeout = ?limit, "Backend call exceeded deadline");
            Err(RpcStatus::deadline_exceeded(format!(
                "backend did not answer within {limit:?}"
            )))
        }
    }
}
