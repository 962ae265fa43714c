//! DeepL-compatible Backend
//!
//! Posts newline-joined paragraphs to a DeepL-style `/translate` endpoint and
//! splits the `data` field of the reply back on newlines.

use std::time::Duration;

use async_trait::async_trait;

use super::retry::retry_transient;
use super::traits::{Service, TranslationBackend};
use super::{build_http_client, read_json, select_proxy};
use crate::codec;
use crate::config::{DeepLConfig, DeepLEndpointConfig};
use crate::error::AskError;

/// DeepL-compatible endpoint client
#[derive(Clone)]
pub struct DeepLBackend {
    url: String,
    source_lang: String,
    target_lang: String,
    http_client: reqwest::Client,
}

impl DeepLBackend {
    /// Create a client for one endpoint
    ///
    /// # Errors
    ///
    /// Fails if the proxy URL is invalid or the HTTP client cannot be built.
    pub fn new(endpoint: &DeepLEndpointConfig, deepl: &DeepLConfig) -> Result<Self, reqwest::Error> {
        let proxy = select_proxy(
            Service::DeepL,
            &endpoint.url,
            endpoint.need_proxy,
            deepl.proxy.as_deref(),
        );
        Ok(Self {
            url: endpoint.url.clone(),
            source_lang: deepl.source_lang.clone(),
            target_lang: deepl.target_lang.clone(),
            http_client: build_http_client(proxy, Some(Duration::from_secs(deepl.timeout_secs)))?,
        })
    }

    async fn translate(&self, text: &str) -> Result<String, AskError> {
        let resp = self
            .http_client
            .post(&self.url)
            .json(&serde_json::json!({
                "text": text,
                "source_lang": self.source_lang,
                "target_lang": self.target_lang,
            }))
            .send()
            .await
            .map_err(|e| AskError::from_reqwest(&self.url, &e))?;

        let json = read_json(Service::DeepL, &self.url, resp).await?;
        tracing::debug!(service = "deepl", source = %self.url, response = %json, "Response success");

        json["data"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AskError::decode(&self.url, "missing data field"))
    }
}

#[async_trait]
impl TranslationBackend for DeepLBackend {
    fn service(&self) -> Service {
        Service::DeepL
    }

    fn source_id(&self) -> &str {
        &self.url
    }

    async fn ask(&self, paragraphs: &[String]) -> Result<Vec<String>, AskError> {
        let text = paragraphs.join("\n");
        tracing::info!(service = "deepl", source = %self.url, text = %text, "To translate text");

        let text = text.as_str();
        let raw = retry_transient(Service::DeepL, &self.url, move || self.translate(text)).await?;
        codec::decode_lines(&raw, paragraphs.len(), &self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/translate")
    }

    fn client(url: String) -> DeepLBackend {
        let endpoint = DeepLEndpointConfig {
            url,
            need_proxy: false,
            enabled: true,
        };
        DeepLBackend::new(&endpoint, &DeepLConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_translates_and_splits_lines() {
        let router = Router::new().route(
            "/translate",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["source_lang"], "EN");
                assert_eq!(body["target_lang"], "ZH");
                let text = body["text"].as_str().unwrap_or_default().replace("<b1></b1>", "[b1]");
                Json(json!({"code": 200, "data": text}))
            }),
        );
        let backend = client(serve(router).await);

        let out = backend
            .ask(&["a <b1></b1>".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(out, vec!["a [b1]".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_server_error_retried_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/translate",
            post(move |Json(body): Json<Value>| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        return Err(axum::http::StatusCode::SERVICE_UNAVAILABLE);
                    }
                    Ok(Json(json!({"data": body["text"]})))
                }
            }),
        );
        let backend = client(serve(router).await);

        let out = backend.ask(&["same".to_string()]).await.unwrap();
        assert_eq!(out, vec!["same".to_string()]);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_line_count_mismatch_is_structural() {
        let router = Router::new().route(
            "/translate",
            post(|| async { Json(json!({"data": "one line only"})) }),
        );
        let backend = client(serve(router).await);

        let err = backend
            .ask(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(err.is_structural());
    }
}
