//! Completion API Backend
//!
//! One API key against a chat-completions endpoint. The prompt asks for a
//! line-by-line answer; the reply's first choice is decoded with the paragraph
//! codec.
//!
//! # Request shape
//!
//! ```json
//! {"model": "...", "messages": [{"role": "system", ...}, {"role": "user", ...}], "temperature": 1.0}
//! ```

use std::time::Duration;

use async_trait::async_trait;

use super::retry::retry_transient;
use super::traits::{Service, TranslationBackend};
use super::{build_http_client, read_json, select_proxy};
use crate::codec;
use crate::config::{ApiKeyConfig, CompletionConfig, TranslationConfig};
use crate::error::AskError;

/// Completion API client
#[derive(Clone)]
pub struct CompletionBackend {
    /// Endpoint URL, also the source id
    url: String,
    /// Bearer key
    key: String,
    model: String,
    temperature: f32,
    system_prompt: String,
    user_prompt_add: String,
    target_language: String,
    http_client: reqwest::Client,
}

impl CompletionBackend {
    /// Create a client for one key
    ///
    /// # Errors
    ///
    /// Fails if the proxy URL is invalid or the HTTP client cannot be built.
    pub fn new(
        key: &ApiKeyConfig,
        completion: &CompletionConfig,
        translation: &TranslationConfig,
    ) -> Result<Self, reqwest::Error> {
        let proxy = select_proxy(
            Service::Completion,
            &key.url,
            key.need_proxy,
            completion.proxy.as_deref(),
        );
        let http_client =
            build_http_client(proxy, Some(Duration::from_secs(completion.timeout_secs)))?;

        Ok(Self {
            url: key.url.clone(),
            key: key.key.clone(),
            model: completion.model.clone(),
            temperature: completion.temperature,
            system_prompt: translation.system_prompt.clone(),
            user_prompt_add: translation.user_prompt_add.clone(),
            target_language: translation.target_language.clone(),
            http_client,
        })
    }

    async fn complete(&self, prompt: &str) -> Result<String, AskError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": self.system_prompt},
                {"role": "user", "content": prompt},
            ],
            "temperature": self.temperature,
        });

        let resp = self
            .http_client
            .post(&self.url)
            .bearer_auth(&self.key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AskError::from_reqwest(&self.url, &e))?;

        let json = read_json(Service::Completion, &self.url, resp).await?;
        tracing::debug!(service = "completion", source = %self.url, response = %json, "Response success");

        json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AskError::decode(&self.url, "missing choices[0].message.content"))
    }
}

#[async_trait]
impl TranslationBackend for CompletionBackend {
    fn service(&self) -> Service {
        Service::Completion
    }

    fn source_id(&self) -> &str {
        &self.url
    }

    async fn ask(&self, paragraphs: &[String]) -> Result<Vec<String>, AskError> {
        let prompt = codec::completion_prompt(paragraphs, &self.user_prompt_add, &self.target_language);
        let prompt = prompt.as_str();

        let raw = retry_transient(Service::Completion, &self.url, move || self.complete(prompt)).await?;
        let translated = codec::decode(&raw, paragraphs.len(), &self.url)?;
        tracing::info!(service = "completion", source = %self.url, paragraphs = ?translated, "Translated text");
        Ok(translated)
    }
}
