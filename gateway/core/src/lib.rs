//! Gateway Core - Paragraph-Preserving Translation Gateway
//!
//! This crate turns one chat-completions style request into translations
//! served by a mix of backends: logged-in chat web sessions, hosted completion
//! APIs and DeepL-compatible endpoints. Whatever the backend does, the caller
//! gets back exactly as many paragraphs as it sent, in the same order.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     HTTP endpoint (daemon)                       │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │ content
//! ┌───────────────────────────────┼──────────────────────────────────┐
//! │                            Gateway                               │
//! │  ┌────────────────────────────┴───────────────────────────────┐  │
//! │  │                      ResponseMerger                        │  │
//! │  │      split on delimiter, classify by inline markers        │  │
//! │  └──────────┬───────────────────────────────────┬─────────────┘  │
//! │      marked │                                   │ unmarked       │
//! │  ┌──────────┴──────────┐             ┌──────────┴─────────────┐  │
//! │  │  BackendPool deepl  │             │ BackendPool chat|compl │  │
//! │  │  round robin, split │             │ round robin, split     │  │
//! │  └──────────┬──────────┘             └──────────┬─────────────┘  │
//! │       DeepLBackend                  ChatAgent | CompletionBackend│
//! │                                        │                         │
//! │                          websocket side channel (one task each)  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: backend clients behind the [`TranslationBackend`] trait
//! - [`codec`]: paragraph encoding, decoding and prompt building
//! - [`config`]: TOML configuration with environment and CLI overrides
//! - [`envelope`]: completion-style request and response shapes
//! - [`error`]: failure taxonomy shared by clients and pools
//! - [`gateway`]: the [`Gateway`] facade owning pools and background tasks
//! - [`routing`]: [`BackendPool`] and [`ResponseMerger`]

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod codec;
pub mod config;
pub mod envelope;
pub mod error;
pub mod gateway;
pub mod routing;

// Re-exports for convenience
pub use backend::chat::{ChatAgent, SessionState};
pub use backend::{CompletionBackend, DeepLBackend, Service, TranslationBackend};
pub use envelope::{CompletionEnvelope, CompletionRequest};
pub use error::{AskError, FailureKind, PoolError};
pub use gateway::Gateway;
pub use routing::{BackendPool, PoolStats, ResponseMerger};

// Config exports
pub use config::{
    default_config_path, load_config_from_path, ConfigError, ConfigOverrides, ConfigSource,
    GatewayConfig, TextBackend, TranslationConfig,
};
