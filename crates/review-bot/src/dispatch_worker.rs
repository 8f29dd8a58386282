//! Command dispatch worker (§5): drains the inbound chat queue and runs
//! each message through `review_commands`, replying in the same chat.

use std::sync::Arc;

use review_chat::{ChatClient, InboundMessage};
use review_commands::Context;
use review_core::entities::ChatKind;
use review_core::ids::{ChatId, LocalId, UserId};
use review_platform::RemotePlatform;
use review_store::Store;
use tokio::sync::{mpsc, watch};

pub async fn run(
    store: Arc<dyn Store>,
    platform: Arc<dyn RemotePlatform>,
    chat_client: Arc<dyn ChatClient>,
    mut inbound: mpsc::Receiver<InboundMessage>,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    break;
                }
            }
            message = inbound.recv() => {
                let Some(message) = message else { break };
                handle(store.as_ref(), platform.as_ref(), chat_client.as_ref(), message).await;
            }
        }
    }
    tracing::info!("dispatch worker stopped");
}

#[tracing::instrument(skip(store, platform, chat_client))]
async fn handle(store: &dyn Store, platform: &dyn RemotePlatform, chat_client: &dyn ChatClient, message: InboundMessage) {
    let command = match review_commands::parse(&message.text) {
        Ok(command) => command,
        Err(usage) => {
            if let Err(err) = chat_client.send_text(message.chat_id, &usage).await {
                tracing::warn!(error = %err, "failed to send usage error to chat");
            }
            return;
        }
    };

    let chat_id = match resolve_chat(store, message.chat_id).await {
        Ok(id) => id,
        Err(err) => {
            tracing::warn!(error = %err, "failed to upsert chat for inbound message");
            return;
        }
    };
    let user_id = match resolve_user(store, message.sender_id, &message.sender_first_name, &message.sender_last_name).await {
        Ok(id) => id,
        Err(err) => {
            tracing::warn!(error = %err, "failed to resolve sender for inbound message");
            return;
        }
    };

    let ctx = Context { store, platform, chat_id, user_id };
    let reply = review_commands::dispatch(&ctx, command).await;
    if let Err(err) = chat_client.send_text(message.chat_id, &reply).await {
        tracing::warn!(error = %err, "failed to send reply to chat");
    }
}

async fn resolve_chat(store: &dyn Store, external_chat_id: i64) -> review_store::Result<LocalId> {
    let chat = store.upsert_chat(ChatId(external_chat_id), ChatKind::Group, "").await?;
    Ok(chat.id)
}

/// `repository_subscriptions.creator_id` and friends are foreign keys into
/// `users`, so the invoking identity has to be a genuine `User` row, not a
/// `ChatUser` one — a VK sender has no GitLab account to upsert against.
/// Negating the VK sender id before using it as the synthetic `remote_id`
/// keeps chat-only identities out of GitLab's (always-positive) id space,
/// so a real GitLab user synced later can never collide with one.
async fn resolve_user(store: &dyn Store, sender_id: i64, first_name: &str, last_name: &str) -> review_store::Result<LocalId> {
    let synthetic_remote_id = UserId(-sender_id);
    let display_name = format!("{first_name} {last_name}").trim().to_string();
    let user = store.upsert_user(synthetic_remote_id, &format!("vk{sender_id}"), &display_name).await?;
    Ok(user.id)
}
