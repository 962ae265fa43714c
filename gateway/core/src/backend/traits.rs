//! Translation Backend Trait
//!
//! Every client the pools rotate over implements [`TranslationBackend`]. A
//! client owns one identity (a chat account, an API key or a DeepL endpoint)
//! and turns a batch of paragraphs into a batch of the same length.

use async_trait::async_trait;

use crate::error::AskError;

/// Backend family a client belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Service {
    /// Chat web session
    ChatWeb,
    /// Hosted completion API
    Completion,
    /// DeepL-compatible endpoint
    DeepL,
}

impl Service {
    /// Short name used in log fields
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChatWeb => "chat",
            Self::Completion => "completion",
            Self::DeepL => "deepl",
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One authenticated connection to a translation backend
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    /// Backend family
    fn service(&self) -> Service;

    /// Account email or endpoint URL, used in logs and errors
    fn source_id(&self) -> &str;

    /// Translate a batch, returning exactly one paragraph per input
    ///
    /// # Errors
    ///
    /// [`AskError::UnequalParagraphCount`] when the reply could not be split
    /// back into `paragraphs.len()` items; any other variant when the
    /// backend could not be reached or answered unusably.
    async fn ask(&self, paragraphs: &[String]) -> Result<Vec<String>, AskError>;
}
