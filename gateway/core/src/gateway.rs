//! Gateway - the object the HTTP endpoint talks to
//!
//! Owns both pools, the merger and the background side-channel tasks of the
//! chat agents. One instance lives for the whole server process and is handed
//! to request handlers explicitly.

use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::chat::credentials::CredentialStore;
use crate::backend::chat::refresher::{CommandRefresher, SessionRefresher, UnavailableRefresher};
use crate::backend::chat::{stream, ChatAgent};
use crate::backend::{CompletionBackend, DeepLBackend, TranslationBackend};
use crate::config::{GatewayConfig, TextBackend, TranslationConfig};
use crate::envelope::{self, CompletionEnvelope, CompletionRequest};
use crate::error::PoolError;
use crate::routing::{BackendPool, ResponseMerger};

/// Translation gateway
pub struct Gateway {
    merger: ResponseMerger,
    text_pool: Arc<BackendPool>,
    deepl_pool: Arc<BackendPool>,
    agents: Vec<Arc<ChatAgent>>,
    cancel: CancellationToken,
    side_channels: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("text_pool", &self.text_pool)
            .field("deepl_pool", &self.deepl_pool)
            .field("agents", &self.agents.len())
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Build every client and pool named by the configuration
    ///
    /// Chat agents are only created when they serve the text pool.
    ///
    /// # Errors
    ///
    /// Fails when a client cannot be built (bad URL or proxy) or a pattern
    /// does not compile.
    pub async fn from_config(config: &GatewayConfig) -> anyhow::Result<Self> {
        let depth = config.translation.max_split_depth;

        let mut agents = Vec::new();
        let text_clients: Vec<Arc<dyn TranslationBackend>> = match config.translation.text_backend {
            TextBackend::Chat => {
                let refresher: Arc<dyn SessionRefresher> = match config
                    .chat
                    .refresher_command
                    .as_deref()
                    .and_then(CommandRefresher::from_argv)
                {
                    Some(command) => Arc::new(command),
                    None => {
                        tracing::warn!("No refresher_command configured, expired sessions cannot be renewed");
                        Arc::new(UnavailableRefresher)
                    }
                };

                for account in config.active_accounts() {
                    let agent = ChatAgent::open(
                        account.clone(),
                        &config.chat,
                        &config.translation,
                        CredentialStore::new(config.chat.auth_dir.clone()),
                        Arc::clone(&refresher),
                    )
                    .await
                    .with_context(|| format!("failed to open chat agent {}", account.email))?;
                    agents.push(Arc::new(agent));
                }
                agents
                    .iter()
                    .map(|a| Arc::clone(a) as Arc<dyn TranslationBackend>)
                    .collect()
            }
            TextBackend::Completion => config
                .active_api_keys()
                .map(|key| {
                    CompletionBackend::new(key, &config.completion, &config.translation)
                        .map(|c| Arc::new(c) as Arc<dyn TranslationBackend>)
                        .with_context(|| format!("failed to build completion client {}", key.url))
                })
                .collect::<anyhow::Result<_>>()?,
        };

        let deepl_clients = config
            .active_deepl_endpoints()
            .map(|endpoint| {
                DeepLBackend::new(endpoint, &config.deepl)
                    .map(|c| Arc::new(c) as Arc<dyn TranslationBackend>)
                    .with_context(|| format!("failed to build DeepL client {}", endpoint.url))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let text_pool = Arc::new(BackendPool::new(
            config.translation.text_backend.to_string(),
            text_clients,
            depth,
        ));
        let deepl_pool = Arc::new(BackendPool::new("deepl", deepl_clients, depth));

        tracing::info!(
            text_backend = %config.translation.text_backend,
            text_clients = text_pool.len(),
            deepl_clients = deepl_pool.len(),
            "Gateway pools ready"
        );

        let mut gateway = Self::with_pools(&config.translation, deepl_pool, text_pool)?;
        gateway.agents = agents;
        Ok(gateway)
    }

    /// Build a gateway over ready-made pools, without chat agents
    ///
    /// # Errors
    ///
    /// Fails when a pattern in `translation` does not compile.
    pub fn with_pools(
        translation: &TranslationConfig,
        deepl_pool: Arc<BackendPool>,
        text_pool: Arc<BackendPool>,
    ) -> anyhow::Result<Self> {
        let merger = ResponseMerger::new(
            translation,
            Some(Arc::clone(&deepl_pool)),
            Arc::clone(&text_pool),
        )?;
        Ok(Self {
            merger,
            text_pool,
            deepl_pool,
            agents: Vec::new(),
            cancel: CancellationToken::new(),
            side_channels: Mutex::new(Vec::new()),
        })
    }

    /// Pool serving unmarked paragraphs
    #[must_use]
    pub fn text_pool(&self) -> &BackendPool {
        &self.text_pool
    }

    /// Pool serving marked paragraphs
    #[must_use]
    pub fn deepl_pool(&self) -> &BackendPool {
        &self.deepl_pool
    }

    /// Chat agents owned by this gateway
    #[must_use]
    pub fn agents(&self) -> &[Arc<ChatAgent>] {
        &self.agents
    }

    /// Register every chat websocket and spawn its side channel
    ///
    /// A failed registration is logged; the side channel keeps retrying it.
    pub async fn start(&self) {
        for agent in &self.agents {
            if let Err(e) = agent.register_websocket().await {
                tracing::error!(service = "chat", source = %agent.email(), error = %e, "Initial websocket registration failed");
            }
        }

        let mut side_channels = self.side_channels.lock();
        for agent in &self.agents {
            side_channels.push(tokio::spawn(stream::run_side_channel(
                Arc::clone(agent),
                self.cancel.child_token(),
            )));
        }
        tracing::info!(side_channels = side_channels.len(), "Gateway started");
    }

    /// Translate a raw completion request body into a response body
    ///
    /// Always returns JSON; failures become sentinel error objects.
    pub async fn handle(&self, body: &[u8]) -> String {
        let request: CompletionRequest = match serde_json::from_slice(body) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "Unreadable request body");
                return envelope::INVALID_REQUEST.to_string();
            }
        };
        match request.text_to_translate() {
            Some(content) => self.translate(content).await,
            None => {
                tracing::warn!("Request carries no messages");
                envelope::INVALID_REQUEST.to_string()
            }
        }
    }

    /// Translate `content` and wrap it in a completion envelope
    pub async fn translate(&self, content: &str) -> String {
        match self.merger.translate(content).await {
            Ok(text) => {
                tracing::debug!(content = %text, "Translated content");
                CompletionEnvelope::new(text).to_json()
            }
            Err(e @ PoolError::UnequalParagraphCount { .. }) => {
                tracing::error!(error = %e, "Returning unequal paragraph count");
                envelope::UNEQUAL_PARAGRAPH_COUNT.to_string()
            }
            Err(e) => {
                tracing::error!(error = %e, "Returning fatal");
                envelope::FATAL.to_string()
            }
        }
    }

    /// Stop the side channels, then close every chat agent
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let side_channels = std::mem::take(&mut *self.side_channels.lock());
        for handle in side_channels {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Side channel task panicked");
            }
        }

        futures::future::join_all(self.agents.iter().map(|agent| agent.close())).await;
        tracing::info!(agents = self.agents.len(), "Gateway shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Service;
    use crate::error::AskError;
    use async_trait::async_trait;

    struct Upper;

    #[async_trait]
    impl TranslationBackend for Upper {
        fn service(&self) -> Service {
            Service::Completion
        }

        fn source_id(&self) -> &str {
            "upper"
        }

        async fn ask(&self, paragraphs: &[String]) -> Result<Vec<String>, AskError> {
            Ok(paragraphs.iter().map(|p| p.to_uppercase()).collect())
        }
    }

    fn gateway(text: Vec<Arc<dyn TranslationBackend>>) -> Gateway {
        Gateway::with_pools(
            &TranslationConfig::default(),
            Arc::new(BackendPool::new("deepl", Vec::new(), 1)),
            Arc::new(BackendPool::new("completion", text, 1)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_translate_wraps_envelope() {
        let gw = gateway(vec![Arc::new(Upper)]);
        let body = gw.translate("one\n\n%%\n\ntwo").await;
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["choices"][0]["message"]["content"], "ONE\n\n%%\n\nTWO");
    }

    #[tokio::test]
    async fn test_empty_pool_is_fatal() {
        let gw = gateway(Vec::new());
        assert_eq!(gw.translate("x").await, envelope::FATAL);
    }

    #[tokio::test]
    async fn test_handle_rejects_bad_body() {
        let gw = gateway(vec![Arc::new(Upper)]);
        assert_eq!(gw.handle(b"not json").await, envelope::INVALID_REQUEST);
        assert_eq!(gw.handle(br#"{"messages":[]}"#).await, envelope::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_start_and_shutdown_without_agents() {
        let gw = gateway(vec![Arc::new(Upper)]);
        gw.start().await;
        gw.shutdown().await;
        assert!(gw.agents().is_empty());
    }
}
