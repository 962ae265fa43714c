//! Failure taxonomy for backend calls and pools
//!
//! Every backend client reports failures as an [`AskError`]. The retry helper
//! and the pool never match on concrete variants to decide what to do next;
//! they look at the [`FailureKind`] tag returned by [`AskError::kind`].
//!
//! ```text
//! AskError ──kind()──> Structural   -> pool pads or splits the batch
//!                      Rejected     -> chat client re-authenticates once
//!                      ServerError  -> client retries once
//!                      Timeout      -> pool fails over
//!                      Unexpected   -> pool fails over
//! ```

use reqwest::StatusCode;
use thiserror::Error;

/// Coarse classification used by retry and failover decisions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Output paragraph count differs from the input count
    Structural,
    /// The backend answered with a 4xx status
    Rejected,
    /// The backend answered with a 5xx status
    ServerError,
    /// No reply arrived within the delivery deadline
    Timeout,
    /// Anything else (connection reset, malformed JSON, missing fields)
    Unexpected,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Structural => write!(f, "structural"),
            Self::Rejected => write!(f, "rejected"),
            Self::ServerError => write!(f, "server-error"),
            Self::Timeout => write!(f, "timeout"),
            Self::Unexpected => write!(f, "unexpected"),
        }
    }
}

/// Failure of a single call against one backend client
#[derive(Debug, Error)]
pub enum AskError {
    /// The decoded reply does not have one paragraph per input paragraph
    #[error("UnequalParagraphCountError! Source: {source_id}, need {expected} but received {actual}")]
    UnequalParagraphCount {
        /// Number of paragraphs sent
        expected: usize,
        /// Number of paragraphs decoded from the reply
        actual: usize,
        /// Account email or endpoint URL that produced the reply
        source_id: String,
    },

    /// HTTP status error returned by the backend
    #[error("HttpError! Source: {source_id} | STATUS_CODE: {status} | {body}")]
    Status {
        /// Returned status code
        status: StatusCode,
        /// Account email or endpoint URL
        source_id: String,
        /// First characters of the response body
        body: String,
    },

    /// The streamed reply did not arrive in time
    #[error("TimeOutError! Source: {source_id} | Job: {job}")]
    Timeout {
        /// Account email or endpoint URL
        source_id: String,
        /// What was being waited for
        job: &'static str,
    },

    /// Connection-level failure before any status was received
    #[error("ConnectionError! Source: {source_id} | {message}")]
    Transport {
        /// Account email or endpoint URL
        source_id: String,
        /// Underlying error text
        message: String,
    },

    /// The backend replied with a body we could not interpret
    #[error("ParseError! Source: {source_id} | {message}")]
    Decode {
        /// Account email or endpoint URL
        source_id: String,
        /// What was wrong with the body
        message: String,
    },

    /// Credentials could not be obtained or refreshed
    #[error("AuthenticationError! Source: {source_id} | {message}")]
    Authentication {
        /// Account email
        source_id: String,
        /// Why authentication failed
        message: String,
    },
}

impl AskError {
    /// Classify this failure for retry and failover decisions
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::UnequalParagraphCount { .. } => FailureKind::Structural,
            Self::Status { status, .. } if status.is_client_error() => FailureKind::Rejected,
            Self::Status { status, .. } if status.is_server_error() => FailureKind::ServerError,
            Self::Timeout { .. } => FailureKind::Timeout,
            _ => FailureKind::Unexpected,
        }
    }

    /// Account email or endpoint URL that produced this failure
    #[must_use]
    pub fn source_id(&self) -> &str {
        match self {
            Self::UnequalParagraphCount { source_id, .. }
            | Self::Status { source_id, .. }
            | Self::Timeout { source_id, .. }
            | Self::Transport { source_id, .. }
            | Self::Decode { source_id, .. }
            | Self::Authentication { source_id, .. } => source_id,
        }
    }

    /// Whether this is a paragraph-count mismatch
    #[must_use]
    pub fn is_structural(&self) -> bool {
        self.kind() == FailureKind::Structural
    }

    /// Map a reqwest error into the taxonomy
    pub(crate) fn from_reqwest(source_id: &str, err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::Status {
                status,
                source_id: source_id.to_string(),
                body: String::new(),
            };
        }
        if err.is_timeout() {
            return Self::Timeout {
                source_id: source_id.to_string(),
                job: "http",
            };
        }
        if err.is_decode() {
            return Self::Decode {
                source_id: source_id.to_string(),
                message: err.to_string(),
            };
        }
        Self::Transport {
            source_id: source_id.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn decode(source_id: &str, message: impl Into<String>) -> Self {
        Self::Decode {
            source_id: source_id.to_string(),
            message: message.into(),
        }
    }
}

/// Terminal failure of a whole pool call
#[derive(Debug, Error)]
pub enum PoolError {
    /// Paragraph count could not be preserved by any client
    #[error("UnequalParagraphCountError! Source: {source_id}, need {expected} but received {actual}")]
    UnequalParagraphCount {
        /// Number of paragraphs sent
        expected: usize,
        /// Number of paragraphs decoded from the last reply
        actual: usize,
        /// Client that produced the last reply
        source_id: String,
    },

    /// Every client in a full rotation failed for non-structural reasons
    #[error("FAILED_FATAL | pool {pool}: {attempts} attempts failed, the remote side may be blocking us")]
    Fatal {
        /// Pool name
        pool: String,
        /// Number of dispatches made before giving up
        attempts: usize,
    },

    /// The pool has no clients at all
    #[error("pool {0} has no active clients")]
    Empty(String),
}

impl PoolError {
    /// Lift a structural client failure into a pool failure
    #[must_use]
    pub fn structural(err: &AskError) -> Option<Self> {
        match err {
            AskError::UnequalParagraphCount {
                expected,
                actual,
                source_id,
            } => Some(Self::UnequalParagraphCount {
                expected: *expected,
                actual: *actual,
                source_id: source_id.clone(),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let structural = AskError::UnequalParagraphCount {
            expected: 3,
            actual: 2,
            source_id: "a@example.com".into(),
        };
        assert_eq!(structural.kind(), FailureKind::Structural);
        assert!(structural.is_structural());

        let rejected = AskError::Status {
            status: StatusCode::UNAUTHORIZED,
            source_id: "a@example.com".into(),
            body: String::new(),
        };
        assert_eq!(rejected.kind(), FailureKind::Rejected);

        let server = AskError::Status {
            status: StatusCode::BAD_GATEWAY,
            source_id: "a@example.com".into(),
            body: String::new(),
        };
        assert_eq!(server.kind(), FailureKind::ServerError);

        let timeout = AskError::Timeout {
            source_id: "a@example.com".into(),
            job: "delivery",
        };
        assert_eq!(timeout.kind(), FailureKind::Timeout);

        let other = AskError::decode("a@example.com", "missing field");
        assert_eq!(other.kind(), FailureKind::Unexpected);
        assert_eq!(other.source_id(), "a@example.com");
    }

    #[test]
    fn test_structural_lift() {
        let err = AskError::UnequalParagraphCount {
            expected: 1,
            actual: 2,
            source_id: "https://api.example.com".into(),
        };
        match PoolError::structural(&err) {
            Some(PoolError::UnequalParagraphCount {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("unexpected: {other:?}"),
        }

        let timeout = AskError::Timeout {
            source_id: "x".into(),
            job: "delivery",
        };
        assert!(PoolError::structural(&timeout).is_none());
    }
}
