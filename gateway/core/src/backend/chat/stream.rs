//! Websocket side channel
//!
//! Replies to posted messages do not come back on the HTTP response; they are
//! pushed over a long-lived websocket registered per agent. Frames are JSON
//! envelopes whose `data.body` is a base64 encoded server-sent-event chunk.
//! The chunk carrying a `message_id` is the latest candidate reply; a frame
//! holding the base64 of `data: [DONE]` completes the exchange.
//!
//! [`run_side_channel`] supervises the connection: when it drops, the task
//! sleeps for the reconnect backoff, registers a fresh websocket URL and
//! connects again, until cancelled.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use super::ChatAgent;

/// Base64 of `data: [DONE]\n\n`
pub const DONE_SENTINEL: &str = "ZGF0YTogW0RPTkVdCgo=";

/// A completed reply
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Id of the reply message, the new chain pointer
    pub message_id: String,
    /// Reply text
    pub text: String,
}

/// A candidate frame that could not be decoded
#[derive(Debug, Error)]
pub enum FrameError {
    /// Envelope or event is not JSON
    #[error("frame is not JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A required field is absent
    #[error("frame has no {0}")]
    MissingField(&'static str),
    /// Body is not base64
    #[error("frame body is not base64: {0}")]
    Base64(#[from] base64::DecodeError),
    /// Decoded body is not text
    #[error("frame body is not UTF-8")]
    Utf8,
    /// Decoded body carries no `data: ` line
    #[error("frame body has no data line")]
    NoDataLine,
}

/// Turns the frame sequence of one exchange into a [`Delivery`]
#[derive(Debug, Default)]
pub struct FrameDecoder {
    candidate: Option<String>,
}

impl FrameDecoder {
    /// Feed one text frame
    ///
    /// Returns a delivery when the frame completes an exchange that had a
    /// candidate; the candidate is consumed so it is delivered only once.
    pub fn feed(&mut self, frame: &str) -> Result<Option<Delivery>, FrameError> {
        if frame.contains(DONE_SENTINEL) {
            return match self.candidate.take() {
                Some(candidate) => decode_candidate(&candidate).map(Some),
                None => Ok(None),
            };
        }
        if frame.contains("\"message_id\"") {
            self.candidate = Some(frame.to_string());
        }
        Ok(None)
    }
}

fn decode_candidate(frame: &str) -> Result<Delivery, FrameError> {
    let envelope: Value = serde_json::from_str(frame)?;
    let data = &envelope["data"];
    let message_id = data["message_id"]
        .as_str()
        .ok_or(FrameError::MissingField("data.message_id"))?;
    let body = data["body"]
        .as_str()
        .ok_or(FrameError::MissingField("data.body"))?;

    let chunk = String::from_utf8(STANDARD.decode(body)?).map_err(|_| FrameError::Utf8)?;
    let (_, event) = chunk.split_once("data: ").ok_or(FrameError::NoDataLine)?;
    let event: Value = serde_json::from_str(event.trim())?;
    let text = event["message"]["content"]["parts"][0]
        .as_str()
        .ok_or(FrameError::MissingField("message.content.parts[0]"))?;

    Ok(Delivery {
        message_id: message_id.to_string(),
        text: text.to_string(),
    })
}

/// Keep the agent's side channel connected until `cancel` fires
pub async fn run_side_channel(agent: Arc<ChatAgent>, cancel: CancellationToken) {
    let source = agent.email().to_string();
    let mut needs_registration = agent.wss_url().is_none();

    loop {
        let url = if needs_registration {
            tokio::select! {
                () = cancel.cancelled() => break,
                registered = agent.register_websocket() => match registered {
                    Ok(url) => Some(url),
                    Err(e) => {
                        tracing::error!(service = "chat", source = %source, error = %e, "Websocket registration failed");
                        None
                    }
                },
            }
        } else {
            agent.wss_url()
        };
        needs_registration = true;

        if let Some(url) = url {
            tokio::select! {
                () = cancel.cancelled() => break,
                result = pump(&agent, &url) => match result {
                    Ok(()) => tracing::info!(service = "chat", source = %source, "Side channel closed"),
                    Err(e) => tracing::error!(service = "chat", source = %source, error = %e, "Side channel failed"),
                },
            }
        }

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(agent.reconnect_backoff()) => {}
        }
    }

    tracing::info!(service = "chat", source = %source, "Side channel has been cancelled");
}

/// Read one connection until it ends
async fn pump(agent: &ChatAgent, url: &str) -> Result<(), tungstenite::Error> {
    let mut request = url.into_client_request()?;
    request.headers_mut().extend(agent.websocket_headers());

    let (ws, _) = tokio_tungstenite::connect_async(request).await?;
    tracing::info!(service = "chat", source = %agent.email(), "START side channel");

    let (mut write, mut read) = ws.split();
    let mut decoder = FrameDecoder::default();
    let mut heartbeat = tokio::time::interval(agent.heartbeat());
    heartbeat.tick().await;

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => match decoder.feed(&text) {
                    Ok(Some(delivery)) => agent.deliver(delivery),
                    Ok(None) => {}
                    Err(e) => tracing::warn!(service = "chat", source = %agent.email(), error = %e, "Undecodable reply frame"),
                },
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e),
            },
            _ = heartbeat.tick() => write.send(Message::Ping(Vec::new())).await?,
        }
    }
}
