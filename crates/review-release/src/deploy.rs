//! Deploy tracking (§4.7): poll a tracked job's status each tick; on a
//! transition, persist it and enqueue a notification to chats subscribed
//! to the repository's releases.

use chrono::Utc;
use review_core::entities::{DeployTrackingRule, Repository, TrackedDeployJob};
use review_core::ids::LocalId;
use review_platform::types::RemoteJobStatus;
use review_platform::RemotePlatform;
use review_store::Store;

use crate::Result;

/// A repository chat that should be told about a deploy status change.
pub struct DeployNotification {
    pub chat_local_id: LocalId,
    pub message: String,
}

fn job_id_from_url(job_url: &str) -> Option<i64> {
    job_url.trim_end_matches('/').rsplit('/').next()?.parse().ok()
}

fn status_label(status: RemoteJobStatus) -> &'static str {
    match status {
        RemoteJobStatus::Pending => "pending",
        RemoteJobStatus::Running => "running",
        RemoteJobStatus::Success => "success",
        RemoteJobStatus::Failed => "failed",
        RemoteJobStatus::Canceled => "canceled",
    }
}

fn to_entity_status(status: RemoteJobStatus) -> review_core::entities::DeployJobStatus {
    use review_core::entities::DeployJobStatus as E;
    match status {
        RemoteJobStatus::Pending => E::Pending,
        RemoteJobStatus::Running => E::Running,
        RemoteJobStatus::Success => E::Success,
        RemoteJobStatus::Failed => E::Failed,
        RemoteJobStatus::Canceled => E::Canceled,
    }
}

#[tracing::instrument(skip_all, fields(repository_id = repository.id.get()))]
pub async fn run(store: &dyn Store, platform: &dyn RemotePlatform, repository: &Repository) -> Result<Vec<DeployNotification>> {
    let mut notifications = Vec::new();
    for rule in store.deploy_rules_for_repo(repository.id).await? {
        let Some(job_id) = job_id_from_url(&rule.job_url) else {
            tracing::warn!(job_url = %rule.job_url, "could not parse job id from tracked job url");
            continue;
        };
        let job = match platform.get_job(repository.remote_id.get(), job_id).await {
            Ok(job) => job,
            Err(err) => {
                tracing::warn!(error = %err, job_id, "transient error polling tracked deploy job");
                continue;
            }
        };

        let new_status = to_entity_status(job.status);
        let previous = store.last_tracked_status(rule.id, job_id).await?;
        if previous == Some(new_status) {
            continue;
        }

        store
            .save_tracked_deploy_job(TrackedDeployJob { id: LocalId(0), rule_id: rule.id, job_id, status: new_status, observed_at: Utc::now() })
            .await?;

        notifications.extend(build_notifications(store, repository, &rule, job.status).await?);
    }
    Ok(notifications)
}

async fn build_notifications(
    store: &dyn Store,
    repository: &Repository,
    rule: &DeployTrackingRule,
    status: RemoteJobStatus,
) -> Result<Vec<DeployNotification>> {
    let message = format!("Deploy job for {} is now {}: {}", repository.name, status_label(status), rule.job_url);
    let chats = store.release_subscribed_chats_for_repo(repository.id).await?;
    Ok(chats.into_iter().map(|chat| DeployNotification { chat_local_id: chat.id, message: message.clone() }).collect())
}
