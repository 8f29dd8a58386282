//! Pass C (§4.4): per-user public-email backfill, soft-capped at one
//! remote call per 10 s independent of the transport rate limiter, plus
//! the chat-user-id join that fills `User.email` without a remote call.

use std::time::Duration;

use chrono::Utc;
use review_platform::{Error as PlatformError, RemotePlatform};
use review_store::Store;

use crate::Result;

/// §4.4: "reset `email_fetched` for users older than 24 h with still-empty
/// email so the loop retries".
pub const STALE_AFTER: chrono::Duration = chrono::Duration::hours(24);

/// One soft-capped round: fetch up to `batch_limit` users needing an email
/// lookup, sleeping 10 s between remote calls.
#[tracing::instrument(skip_all)]
pub async fn run(store: &dyn Store, platform: &dyn RemotePlatform, batch_limit: i64) -> Result<()> {
    let users = store.users_needing_email_fetch(batch_limit).await?;
    let mut first = true;
    for user in users {
        if !first {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
        first = false;

        match platform.get_user(user.remote_id.get()).await {
            Ok(remote_user) => {
                store.set_user_email(user.id, remote_user.public_email.as_deref()).await?;
            }
            Err(PlatformError::NotFound) => {}
            Err(err) => {
                tracing::warn!(error = %err, user_id = user.id.get(), "transient error fetching user email, will retry");
            }
        }
        store.mark_email_fetched(user.id, true).await?;
    }
    Ok(())
}

pub async fn reset_stale(store: &dyn Store) -> Result<u64> {
    let count = store.reset_stale_email_fetched(Utc::now() - STALE_AFTER).await?;
    Ok(count)
}

/// Joins `ChatUser.external_user_id` (of the form `<username>@<domain>`)
/// onto users with a matching username and still-empty email, without
/// re-querying the remote platform.
#[tracing::instrument(skip_all)]
pub async fn backfill_from_chat_users(store: &dyn Store, users_without_email: &[review_core::entities::User]) -> Result<()> {
    for user in users_without_email {
        if user.email.is_some() {
            continue;
        }
        if let Some(chat_user) = store.chat_user_by_username_prefix(&user.username).await? {
            store.set_user_email(user.id, Some(&chat_user.external_user_id)).await?;
        }
    }
    Ok(())
}
