//! Pass C driver (§4.4, §5): runs the user-email backfill on its own
//! interval, independent of the periodic driver — the per-call 10 s soft
//! cap already lives inside `review_reconciler::email_backfill::run`.

use std::sync::Arc;

use review_platform::RemotePlatform;
use review_store::Store;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// One local call per tick; the 10 s soft cap between remote calls is
/// enforced inside `review_reconciler::email_backfill::run` itself.
const TICK_INTERVAL: Duration = Duration::from_secs(60);
const BATCH_LIMIT: i64 = 25;

pub async fn run(store: Arc<dyn Store>, platform: Arc<dyn RemotePlatform>, mut cancel: watch::Receiver<bool>) {
    let mut ticker = interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                tick(store.as_ref(), platform.as_ref()).await;
            }
        }
    }
    tracing::info!("email backfill loop stopped");
}

#[tracing::instrument(skip_all)]
async fn tick(store: &dyn Store, platform: &dyn RemotePlatform) {
    if let Err(err) = review_reconciler::email_backfill::reset_stale(store).await {
        tracing::warn!(error = %err, "failed to reset stale email_fetched flags");
    }

    let candidates = match store.users_needing_email_fetch(BATCH_LIMIT).await {
        Ok(users) => users,
        Err(err) => {
            tracing::warn!(error = %err, "could not load users needing email backfill");
            return;
        }
    };

    if let Err(err) = review_reconciler::email_backfill::run(store, platform, BATCH_LIMIT).await {
        tracing::warn!(error = %err, "email backfill pass failed this tick");
    }

    // The remote fetch above is authoritative; this only tops up whoever
    // the remote still had no public email for, from the chat-user join.
    let mut still_empty = Vec::new();
    for user in candidates {
        match store.user_by_local_id(user.id).await {
            Ok(Some(refreshed)) => still_empty.push(refreshed),
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, user_id = user.id.get(), "could not reload user after email backfill"),
        }
    }
    if let Err(err) = review_reconciler::email_backfill::backfill_from_chat_users(store, &still_empty).await {
        tracing::warn!(error = %err, "chat-user email join failed this tick");
    }
}
