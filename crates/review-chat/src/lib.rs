//! Chat client (§6, "consumed" contract): an inbound stream of new-message
//! events and an outbound plain-text/HTML sink, out of the specification's
//! core scope but implemented here since the core is unusable without a
//! concrete client.

pub mod error;
pub mod vk;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};

pub use error::{Error, Result};
pub use vk::VkChatClient;

/// A single inbound message (§6: message-id, chat-id, sender-id,
/// sender-first/last, text, timestamp).
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message_id: i64,
    pub chat_id: i64,
    pub sender_id: i64,
    pub sender_first_name: String,
    pub sender_last_name: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Outbound sink, addressed by chat id (§6).
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()>;
    async fn send_html(&self, chat_id: i64, html: &str) -> Result<()>;
}

/// One long-poll round: fetch whatever new messages arrived since the last
/// call. Implementations carry their own polling cursor internally.
#[async_trait]
pub trait LongPoller: Send + Sync {
    async fn poll_once(&self) -> Result<Vec<InboundMessage>>;
}

/// Turns a [`LongPoller`] into an inbound events channel plus one consumer
/// task (§9: "callback-based long polling of the chat API → an inbound
/// events channel plus one consumer; cancellation via a shared cancellation
/// token closes the receiver").
pub fn spawn_receiver(
    poller: std::sync::Arc<dyn LongPoller>,
    mut cancel: watch::Receiver<bool>,
) -> mpsc::Receiver<InboundMessage> {
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(async move {
        loop {
            if *cancel.borrow() {
                break;
            }
            tokio::select! {
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        break;
                    }
                }
                result = poller.poll_once() => {
                    match result {
                        Ok(messages) => {
                            for message in messages {
                                if tx.send(message).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "long-poll round failed, retrying");
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }
        tracing::info!("chat receiver cancelled");
    });
    rx
}
