//! Backend Pool
//!
//! Rotates batches over a fixed list of clients of one backend family and
//! works around clients that fail.
//!
//! # Dispatch policy
//!
//! ```text
//! ask(batch)
//!   for up to N clients (round robin):
//!     ok                          -> return
//!     structural, 1 paragraph     -> pad once, next client (one extra
//!                                    dispatch, so a pool of one retries too)
//!     structural, 2+ paragraphs   -> split at len/2, both halves concurrently
//!     anything else               -> next client
//!   N non-structural failures     -> Fatal
//! ```
//!
//! A half is dispatched the same way, except that a structural failure on it
//! is only split again while the split depth is below `max_split_depth`;
//! otherwise it propagates.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::backend::TranslationBackend;
use crate::error::PoolError;

/// Marker wrapped around a lone paragraph on the padding retry
const PAD: &str = "&nbsp;";

/// Wrap a single paragraph for the padding retry
///
/// Some backends answer a one-line prompt with several lines; framing the
/// paragraph in non-breaking-space entities keeps them on one.
#[must_use]
pub fn pad_single(paragraph: &str) -> String {
    format!("{PAD}{paragraph}{PAD}")
}

/// Strip the padding markers from a translated paragraph, if still present
#[must_use]
pub fn unpad_single(paragraph: &str) -> String {
    let trimmed = paragraph.trim();
    let trimmed = trimmed.strip_prefix(PAD).unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix(PAD).unwrap_or(trimmed);
    trimmed.trim().to_string()
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters for one pool
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Calls made to clients
    pub dispatches: u64,
    /// Client calls that failed for a non-structural reason
    pub failures: u64,
    /// Client calls whose reply had the wrong paragraph count
    pub structural_failures: u64,
    /// Batches split in two
    pub splits: u64,
    /// Padding retries
    pub paddings: u64,
    /// Pool calls that ended in `Fatal`
    pub fatal: u64,
}

#[derive(Default)]
struct PoolStatsAtomic {
    dispatches: AtomicU64,
    failures: AtomicU64,
    structural_failures: AtomicU64,
    splits: AtomicU64,
    paddings: AtomicU64,
    fatal: AtomicU64,
}

impl PoolStatsAtomic {
    fn snapshot(&self) -> PoolStats {
        PoolStats {
            dispatches: self.dispatches.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            structural_failures: self.structural_failures.load(Ordering::Relaxed),
            splits: self.splits.load(Ordering::Relaxed),
            paddings: self.paddings.load(Ordering::Relaxed),
            fatal: self.fatal.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Pool
// ============================================================================

/// Round-robin group of clients of one backend family
pub struct BackendPool {
    name: String,
    clients: Vec<Arc<dyn TranslationBackend>>,
    /// Advanced on every dispatch, mapped modulo the pool size
    cursor: AtomicUsize,
    max_split_depth: usize,
    stats: PoolStatsAtomic,
}

impl std::fmt::Debug for BackendPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendPool")
            .field("name", &self.name)
            .field("clients", &self.clients.len())
            .field("cursor", &self.cursor.load(Ordering::Relaxed))
            .field("max_split_depth", &self.max_split_depth)
            .finish()
    }
}

impl BackendPool {
    /// Create a pool over `clients` in the given order
    pub fn new(
        name: impl Into<String>,
        clients: Vec<Arc<dyn TranslationBackend>>,
        max_split_depth: usize,
    ) -> Self {
        Self {
            name: name.into(),
            clients,
            cursor: AtomicUsize::new(0),
            max_split_depth,
            stats: PoolStatsAtomic::default(),
        }
    }

    /// Pool name used in logs and errors
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of clients
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether the pool has no clients
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }

    /// Advance the cursor and return the client it lands on
    ///
    /// N consecutive calls on a pool of N visit every client once, in order,
    /// whatever happened before. `None` on an empty pool.
    pub fn next(&self) -> Option<Arc<dyn TranslationBackend>> {
        let n = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.clients
            .get(n.checked_rem(self.clients.len())?)
            .map(Arc::clone)
    }

    /// Translate a batch, preserving its length
    ///
    /// # Errors
    ///
    /// - [`PoolError::Empty`] when the pool has no clients
    /// - [`PoolError::UnequalParagraphCount`] when the paragraph count could
    ///   not be preserved
    /// - [`PoolError::Fatal`] when a full rotation failed for other reasons
    pub async fn ask(&self, paragraphs: &[String]) -> Result<Vec<String>, PoolError> {
        if self.clients.is_empty() {
            return Err(PoolError::Empty(self.name.clone()));
        }
        if paragraphs.is_empty() {
            return Ok(Vec::new());
        }

        let size = self.clients.len();
        let mut batch = paragraphs.to_vec();
        let mut padded = false;
        let mut structural = None;

        // A padded batch gets one dispatch beyond the rotation
        let mut attempts = 0;
        while attempts < size + usize::from(padded) {
            attempts += 1;
            let Some(client) = self.next() else { break };
            self.stats.dispatches.fetch_add(1, Ordering::Relaxed);

            match client.ask(&batch).await {
                Ok(out) if padded => {
                    return Ok(out.iter().map(String::as_str).map(unpad_single).collect())
                }
                Ok(out) => return Ok(out),
                Err(e) if e.is_structural() => {
                    self.stats.structural_failures.fetch_add(1, Ordering::Relaxed);
                    if batch.len() == 1 {
                        if !padded {
                            self.stats.paddings.fetch_add(1, Ordering::Relaxed);
                            batch[0] = pad_single(&batch[0]);
                            padded = true;
                        }
                        structural = PoolError::structural(&e);
                        continue;
                    }
                    tracing::warn!(pool = %self.name, source = %e.source_id(), size = batch.len(), "Failed | Retry split paragraphs");
                    return self.split(batch, 0).await;
                }
                Err(e) => {
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(pool = %self.name, source = %e.source_id(), kind = %e.kind(), error = %e, "Client failed, trying next");
                }
            }
        }

        match structural {
            Some(e) => Err(e),
            None => Err(self.fatal(attempts)),
        }
    }

    fn fatal(&self, attempts: usize) -> PoolError {
        self.stats.fatal.fetch_add(1, Ordering::Relaxed);
        let err = PoolError::Fatal {
            pool: self.name.clone(),
            attempts,
        };
        tracing::error!(pool = %self.name, attempts, "{err}");
        err
    }

    /// Halve `batch` and translate both halves concurrently
    async fn split(&self, batch: Vec<String>, depth: usize) -> Result<Vec<String>, PoolError> {
        self.stats.splits.fetch_add(1, Ordering::Relaxed);
        let mut first = batch;
        let second = first.split_off(first.len() / 2);

        let (a, b) = tokio::join!(
            self.ask_half(first, depth + 1),
            self.ask_half(second, depth + 1)
        );
        let mut out = a?;
        out.extend(b?);
        Ok(out)
    }

    /// Dispatch one half to the next client that does not fail outright
    fn ask_half(
        &self,
        half: Vec<String>,
        depth: usize,
    ) -> BoxFuture<'_, Result<Vec<String>, PoolError>> {
        async move {
            let size = self.clients.len();
            for _ in 0..size {
                let Some(client) = self.next() else { break };
                self.stats.dispatches.fetch_add(1, Ordering::Relaxed);

                match client.ask(&half).await {
                    Ok(out) => {
                        tracing::info!(pool = %self.name, source = %client.source_id(), depth, "Translated half");
                        return Ok(out);
                    }
                    Err(e) if e.is_structural() => {
                        self.stats.structural_failures.fetch_add(1, Ordering::Relaxed);
                        if half.len() >= 2 && depth < self.max_split_depth {
                            tracing::warn!(pool = %self.name, source = %e.source_id(), depth, "Failed | Retry split paragraphs");
                            return self.split(half, depth).await;
                        }
                        tracing::error!(pool = %self.name, source = %e.source_id(), depth, error = %e, "Half could not be split further");
                        return Err(PoolError::structural(&e).unwrap_or_else(|| self.fatal(size)));
                    }
                    Err(e) => {
                        self.stats.failures.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(pool = %self.name, source = %e.source_id(), kind = %e.kind(), error = %e, "Client failed on half, trying next");
                    }
                }
            }
            Err(self.fatal(size))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_round_trip() {
        assert_eq!(pad_single("Hello"), "&nbsp;Hello&nbsp;");
        assert_eq!(unpad_single("&nbsp;Hallo&nbsp;"), "Hallo");
        assert_eq!(unpad_single(" &nbsp;Hallo "), "Hallo");
        assert_eq!(unpad_single("Hallo"), "Hallo");
    }

    #[tokio::test]
    async fn test_empty_pool() {
        let pool = BackendPool::new("empty", Vec::new(), 1);
        assert!(pool.is_empty());
        assert!(pool.next().is_none());
        let err = pool.ask(&["x".to_string()]).await.unwrap_err();
        assert!(matches!(err, PoolError::Empty(ref name) if name == "empty"));
    }

    #[tokio::test]
    async fn test_empty_batch_skips_clients() {
        let pool = BackendPool::new("empty", Vec::new(), 1);
        // Emptiness of the pool is checked first
        assert!(pool.ask(&[]).await.is_err());
    }
}
