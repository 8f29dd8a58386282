//! Periodic driver (§5): on a fixed interval, runs Reconciler Pass A once
//! globally, then Pass B → Selector → ReleaseOrchestrator → deploy tracking
//! per subscribed repository, sequentially, never in parallel across repos
//! within the same tick.

use std::sync::Arc;

use rand::rngs::StdRng;
use review_chat::ChatClient;
use review_core::ids::LocalId;
use review_platform::types::MergeRequestUpdate;
use review_platform::RemotePlatform;
use review_store::Store;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, Duration, MissedTickBehavior};

pub async fn run(
    store: Arc<dyn Store>,
    platform: Arc<dyn RemotePlatform>,
    chat_client: Arc<dyn ChatClient>,
    rng: Arc<Mutex<StdRng>>,
    poll_interval_secs: u64,
    bot_user_id: LocalId,
    mut cancel: watch::Receiver<bool>,
) {
    let mut ticker = interval(Duration::from_secs(poll_interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                tick(store.as_ref(), platform.as_ref(), chat_client.as_ref(), &rng, bot_user_id).await;
            }
        }
    }
    tracing::info!("periodic driver stopped");
}

#[tracing::instrument(skip_all)]
async fn tick(store: &dyn Store, platform: &dyn RemotePlatform, chat_client: &dyn ChatClient, rng: &Mutex<StdRng>, bot_user_id: LocalId) {
    if let Err(err) = review_reconciler::repository::run(store, platform).await {
        tracing::warn!(error = %err, "Pass A failed this tick");
        return;
    }

    let subscribed = match store.all_subscribed_repo_ids().await {
        Ok(ids) => ids,
        Err(err) => {
            tracing::warn!(error = %err, "could not load subscribed repositories this tick");
            return;
        }
    };

    for repository_id in subscribed {
        if let Err(err) = run_repository(store, platform, chat_client, rng, bot_user_id, repository_id).await {
            tracing::warn!(error = %err, repository_id = repository_id.get(), "reconciliation failed for repository this tick");
        }
    }
}

async fn run_repository(
    store: &dyn Store,
    platform: &dyn RemotePlatform,
    chat_client: &dyn ChatClient,
    rng: &Mutex<StdRng>,
    bot_user_id: LocalId,
    repository_id: LocalId,
) -> review_core::Result<()> {
    let Some(repository) = store.repository_by_local_id(repository_id).await? else {
        return Ok(());
    };
    let policy = store.policy_for_repo(repository_id).await?;
    let sla = store.sla_for_repo(repository_id).await?;

    review_reconciler::mr_sync::pass_b(store, platform, repository_id, repository.remote_id.get(), &policy).await?;

    assign_reviewers(store, platform, rng, repository_id, repository.remote_id.get(), sla.assign_count.max(1) as usize).await?;

    review_release::orchestrator::run(store, platform, &repository, &policy, bot_user_id).await?;

    let notifications = review_release::deploy::run(store, platform, &repository).await?;
    deliver_deploy_notifications(store, chat_client, repository_id, &notifications).await;

    Ok(())
}

/// §4.6 step 5: for every non-draft MR still missing reviewers, pick some
/// and push the decision to the remote. The next `SyncMR` materializes the
/// `ReviewerAssigned` Timeline rows from the fresh reviewer list.
async fn assign_reviewers(
    store: &dyn Store,
    platform: &dyn RemotePlatform,
    rng: &Mutex<StdRng>,
    repository_id: LocalId,
    remote_project_id: i64,
    assign_count: usize,
) -> review_core::Result<()> {
    for mr in store.open_mrs_without_reviewers(repository_id).await? {
        if mr.draft {
            continue;
        }
        let labels: Vec<String> = store.labels_for_mr(mr.id).await?.into_iter().map(|l| l.name).collect();
        let picked = {
            let mut rng = rng.lock().await;
            review_selector::pick_reviewers(store, repository_id, mr.author_id, &labels, assign_count, &mut *rng).await?
        };
        if picked.is_empty() {
            continue;
        }

        let mut remote_ids = Vec::with_capacity(picked.len());
        for local_id in &picked {
            if let Some(user) = store.user_by_local_id(*local_id).await? {
                remote_ids.push(user.remote_id.get());
            }
        }
        if remote_ids.is_empty() {
            continue;
        }

        let update = MergeRequestUpdate { reviewer_ids: Some(remote_ids), target_branch: None, labels: None, description: None };
        if let Err(err) = platform.update_merge_request(remote_project_id, mr.iid, update).await {
            tracing::warn!(error = %err, mr_id = mr.id.get(), "failed to push reviewer assignment to the remote");
        }
    }
    Ok(())
}

/// `DeployNotification` only carries the local chat id it was built from;
/// re-fetch the same release-subscribed-chats set to recover the external
/// id rather than adding a dedicated `Store` lookup for a single caller.
async fn deliver_deploy_notifications(
    store: &dyn Store,
    chat_client: &dyn ChatClient,
    repository_id: LocalId,
    notifications: &[review_release::deploy::DeployNotification],
) {
    if notifications.is_empty() {
        return;
    }
    let chats = match store.release_subscribed_chats_for_repo(repository_id).await {
        Ok(chats) => chats,
        Err(err) => {
            tracing::warn!(error = %err, "could not resolve chats for deploy notifications");
            return;
        }
    };

    for notification in notifications {
        let Some(chat) = chats.iter().find(|c| c.id == notification.chat_local_id) else { continue };
        if let Err(err) = chat_client.send_text(chat.external_chat_id.get(), &notification.message).await {
            tracing::warn!(error = %err, "failed to deliver deploy notification");
        }
    }
}
