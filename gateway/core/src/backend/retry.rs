//! Status-driven retry for single backend calls
//!
//! A 5xx answer is retried once as-is. A 4xx answer is retried once after
//! re-authenticating, but only for callers that can re-authenticate; for the
//! others it is returned unchanged. Everything else goes straight back to the
//! pool, which decides about failover.

use std::future::Future;

use crate::error::{AskError, FailureKind};

use super::traits::Service;

/// Retry once on a server error
pub(crate) async fn retry_transient<T, F, Fut>(
    service: Service,
    source_id: &str,
    mut op: F,
) -> Result<T, AskError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AskError>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(e) if e.kind() == FailureKind::ServerError => {
            tracing::error!(service = %service, source = %source_id, error = %e, "Server error, retrying once");
            op().await.inspect_err(|e| log_retry_failed(service, source_id, e))
        }
        Err(e) => Err(e),
    }
}

/// Retry once on a server error, re-authenticate and retry once on rejection
pub(crate) async fn retry_with_reauth<T, F, Fut, R, RFut>(
    service: Service,
    source_id: &str,
    mut op: F,
    reauth: R,
) -> Result<T, AskError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AskError>>,
    R: FnOnce() -> RFut,
    RFut: Future<Output = Result<(), AskError>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(e) if e.kind() == FailureKind::Rejected => {
            tracing::warn!(service = %service, source = %source_id, error = %e, "Rejected, re-authenticating");
            reauth().await?;
            op().await.inspect_err(|e| log_retry_failed(service, source_id, e))
        }
        Err(e) if e.kind() == FailureKind::ServerError => {
            tracing::error!(service = %service, source = %source_id, error = %e, "Server error, retrying once");
            op().await.inspect_err(|e| log_retry_failed(service, source_id, e))
        }
        Err(e) => Err(e),
    }
}

fn log_retry_failed(service: Service, source_id: &str, e: &AskError) {
    tracing::error!(service = %service, source = %source_id, error = %e, "RETRY_FAILED");
}
