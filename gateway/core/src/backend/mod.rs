//! Translation Backend Clients
//!
//! Every backend family is reached through the [`TranslationBackend`] trait so
//! pools can rotate over clients without knowing what they talk to.
//!
//! # Available Backends
//!
//! - **Chat web session** ([`chat::ChatAgent`]): a logged-in chat account whose
//!   replies arrive over a websocket side channel
//! - **Completion API** ([`CompletionBackend`]): bearer-authenticated
//!   chat-completions endpoint
//! - **DeepL** ([`DeepLBackend`]): DeepL-compatible JSON translate endpoint

pub mod chat;
mod completion;
mod deepl;
pub(crate) mod retry;
mod traits;

use std::time::Duration;

pub use completion::CompletionBackend;
pub use deepl::DeepLBackend;
pub use traits::{Service, TranslationBackend};

use crate::error::AskError;

/// Longest response body excerpt kept in status errors
const BODY_EXCERPT: usize = 80;

/// Build an HTTP client, optionally behind a proxy
pub(crate) fn build_http_client(
    proxy: Option<&str>,
    timeout: Option<Duration>,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    if let Some(url) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(url)?);
    }
    builder.build()
}

/// Pick the proxy for one client
///
/// A client asking for a proxy when none is configured runs direct, with a
/// warning.
pub(crate) fn select_proxy<'a>(
    service: Service,
    source_id: &str,
    need_proxy: bool,
    proxy: Option<&'a str>,
) -> Option<&'a str> {
    match (need_proxy, proxy) {
        (true, Some(url)) => Some(url),
        (true, None) => {
            tracing::warn!(service = %service, source = %source_id, "need_proxy set but no proxy configured");
            None
        }
        (false, _) => None,
    }
}

/// Turn a response into JSON, mapping non-2xx statuses into the taxonomy
pub(crate) async fn read_json(
    service: Service,
    source_id: &str,
    resp: reqwest::Response,
) -> Result<serde_json::Value, AskError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        let body: String = body.chars().take(BODY_EXCERPT).collect();
        tracing::error!(service = %service, source = %source_id, status = %status, body = %body, "HttpError");
        return Err(AskError::Status {
            status,
            source_id: source_id.to_string(),
            body,
        });
    }

    let text = resp
        .text()
        .await
        .map_err(|e| AskError::from_reqwest(source_id, &e))?;
    serde_json::from_str(&text).map_err(|e| {
        tracing::error!(service = %service, source = %source_id, error = %e, body = %text, "JSON decode failed");
        AskError::decode(source_id, format!("{e}"))
    })
}
