//! Pending delivery slot
//!
//! Hand-off between the side-channel task and the request waiting for a
//! reply. It is a bounded channel of capacity one with a non-blocking send:
//! a reply that arrives while another one is still buffered is discarded and
//! logged, never queued. The waiting side discards whatever is buffered before
//! posting a new message, so a late reply to an earlier, timed-out message
//! cannot be mistaken for the answer to the next one.

use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;

/// Create a connected sender and inbox
pub fn slot(source_id: &str) -> (DeliverySender, DeliveryInbox) {
    let (tx, rx) = mpsc::channel(1);
    (
        DeliverySender {
            tx,
            source_id: source_id.to_string(),
        },
        DeliveryInbox {
            rx: Mutex::new(rx),
            source_id: source_id.to_string(),
        },
    )
}

/// Side-channel end of the slot
#[derive(Clone, Debug)]
pub struct DeliverySender {
    tx: mpsc::Sender<String>,
    source_id: String,
}

impl DeliverySender {
    /// Offer a reply; returns `false` when it was dropped
    pub fn offer(&self, text: String) -> bool {
        match self.tx.try_send(text) {
            Ok(()) => true,
            Err(TrySendError::Full(text)) => {
                tracing::warn!(source = %self.source_id, dropped = %text, "Delivery slot full, reply dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(source = %self.source_id, "Delivery slot closed");
                false
            }
        }
    }
}

/// Request end of the slot
#[derive(Debug)]
pub struct DeliveryInbox {
    rx: Mutex<mpsc::Receiver<String>>,
    source_id: String,
}

impl DeliveryInbox {
    /// Drop any reply left over from an earlier exchange
    pub async fn discard_stale(&self) {
        let mut rx = self.rx.lock().await;
        while let Ok(stale) = rx.try_recv() {
            tracing::info!(source = %self.source_id, text = %stale, "Discarded stale delivery");
        }
    }

    /// Wait up to `timeout` for the next reply
    pub async fn wait(&self, timeout: Duration) -> Option<String> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(reply) => reply,
            Err(_) => {
                tracing::debug!(source = %self.source_id, "Timed out waiting for delivery");
                None
            }
        }
    }
}
