//! Response merger
//!
//! Cuts the caller's content into units, sends marked units (those carrying
//! many inline `<bN></bN>` markers) to the marked pool and the rest to the
//! text pool concurrently, then stitches the two result lists back together
//! in original order.

use std::sync::Arc;

use regex::Regex;

use crate::config::{ConfigError, TranslationConfig};
use crate::error::PoolError;

use super::pool::BackendPool;

/// A unit paired with its position in the caller's content
pub type Indexed = (usize, String);

/// Classifies, dispatches and reassembles one translation request
#[derive(Debug)]
pub struct ResponseMerger {
    split: Regex,
    marker: Regex,
    threshold: usize,
    join_delimiter: String,
    /// Serves marked units; `None` routes them to `text_pool`
    marked_pool: Option<Arc<BackendPool>>,
    text_pool: Arc<BackendPool>,
}

impl ResponseMerger {
    /// Build a merger from the translation settings
    ///
    /// An empty `marked_pool` is treated like an absent one.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] when a pattern does not compile.
    pub fn new(
        config: &TranslationConfig,
        marked_pool: Option<Arc<BackendPool>>,
        text_pool: Arc<BackendPool>,
    ) -> Result<Self, ConfigError> {
        let split = Regex::new(&config.split_pattern)
            .map_err(|e| ConfigError::ValidationError(format!("split_pattern: {e}")))?;
        let marker = Regex::new(&config.marker_pattern)
            .map_err(|e| ConfigError::ValidationError(format!("marker_pattern: {e}")))?;

        Ok(Self {
            split,
            marker,
            threshold: config.marker_threshold,
            join_delimiter: config.join_delimiter.clone(),
            marked_pool: marked_pool.filter(|p| !p.is_empty()),
            text_pool,
        })
    }

    /// Cut content into trimmed units
    #[must_use]
    pub fn split_units(&self, content: &str) -> Vec<String> {
        self.split
            .split(content)
            .map(|unit| unit.trim().to_string())
            .collect()
    }

    /// Whether a unit holds more than the threshold of inline markers
    #[must_use]
    pub fn is_marked(&self, unit: &str) -> bool {
        self.marker.find_iter(unit).count() > self.threshold
    }

    /// Partition units into (marked, unmarked), keeping original indexes
    #[must_use]
    pub fn classify(&self, units: Vec<String>) -> (Vec<Indexed>, Vec<Indexed>) {
        units
            .into_iter()
            .enumerate()
            .partition(|(_, unit)| self.is_marked(unit))
    }

    /// Translate `content` and return the joined result
    ///
    /// # Errors
    ///
    /// Returns the first [`PoolError`] raised by either pool.
    pub async fn translate(&self, content: &str) -> Result<String, PoolError> {
        let (marked, unmarked) = self.classify(self.split_units(content));
        tracing::info!(
            marked = marked.len(),
            unmarked = unmarked.len(),
            "Dispatching translation"
        );

        let marked_pool = self.marked_pool.as_ref().unwrap_or(&self.text_pool);
        let (marked_out, unmarked_out) = tokio::join!(
            dispatch(marked_pool, &marked),
            dispatch(&self.text_pool, &unmarked)
        );

        let merged = merge(marked_out?, unmarked_out?);
        Ok(merged.join(&self.join_delimiter))
    }
}

async fn dispatch(pool: &BackendPool, units: &[Indexed]) -> Result<Vec<Indexed>, PoolError> {
    if units.is_empty() {
        return Ok(Vec::new());
    }
    let texts: Vec<String> = units.iter().map(|(_, text)| text.clone()).collect();
    let translated = pool.ask(&texts).await?;
    Ok(units
        .iter()
        .map(|(idx, _)| *idx)
        .zip(translated)
        .collect())
}

/// Merge two index-sorted lists by original index
///
/// On equal indexes the marked entry goes first. Whatever remains of either
/// list after the other runs out is appended as is.
#[must_use]
pub fn merge(marked: Vec<Indexed>, unmarked: Vec<Indexed>) -> Vec<String> {
    let mut out = Vec::with_capacity(marked.len() + unmarked.len());
    let mut marked = marked.into_iter().peekable();
    let mut unmarked = unmarked.into_iter().peekable();

    loop {
        let take_marked = match (marked.peek(), unmarked.peek()) {
            (Some((m, _)), Some((u, _))) => m <= u,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_marked {
            marked.next()
        } else {
            unmarked.next()
        };
        if let Some((_, text)) = next {
            out.push(text);
        }
    }

    out
}
