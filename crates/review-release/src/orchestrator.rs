//! Release branch lifecycle (§4.7): at most one "current" release MR per
//! repository, retargeting, and description refresh.

use std::collections::HashSet;

use chrono::Utc;
use review_core::entities::Repository;
use review_core::ids::{LocalId, RemoteId};
use review_core::policy::PolicyConfig;
use review_platform::types::{MergeRequestUpdate, NewMergeRequest};
use review_platform::RemotePlatform;
use review_store::Store;

use crate::description::{render_entry, splice};
use crate::Result;

#[tracing::instrument(skip_all, fields(repository_id = repository.id.get()))]
pub async fn run(store: &dyn Store, platform: &dyn RemotePlatform, repository: &Repository, policy: &PolicyConfig, bot_user_id: LocalId) -> Result<()> {
    let Some(auto) = &policy.auto_release_branch else { return Ok(()) };
    if policy.release_labels.is_empty() {
        return Ok(());
    }

    let existing = store.current_release_mr(repository.id, &auto.dev_branch, bot_user_id, &policy.release_labels).await?;
    let release_mr = match existing {
        Some(mr) => mr,
        None => create_release_mr(store, platform, repository, policy).await?,
    };

    refresh_description(store, platform, repository, &release_mr).await
}

async fn create_release_mr(
    store: &dyn Store,
    platform: &dyn RemotePlatform,
    repository: &Repository,
    policy: &PolicyConfig,
) -> Result<review_core::entities::MergeRequest> {
    let auto = policy.auto_release_branch.as_ref().expect("checked by caller");
    let remote_project_id = repository.remote_id.get();

    let dev_head = platform.get_branch(remote_project_id, &auto.dev_branch).await?;
    let short_sha = &dev_head.commit_sha[..dev_head.commit_sha.len().min(6)];
    let branch_name = format!("{}_{}_{}", auto.prefix, Utc::now().format("%Y-%m-%d"), short_sha);
    platform.create_branch(remote_project_id, &branch_name, &auto.dev_branch).await?;

    let label = policy.release_labels.iter().min().cloned().unwrap_or_default();
    let new_mr = platform
        .create_merge_request(
            remote_project_id,
            NewMergeRequest {
                source_branch: branch_name.clone(),
                target_branch: auto.dev_branch.clone(),
                title: format!("Release {}", Utc::now().format("%Y-%m-%d")),
                description: crate::description::MARKER.to_string(),
                labels: vec![label],
            },
        )
        .await?;

    retarget_open_mrs(store, platform, repository, policy, &auto.dev_branch, &branch_name, RemoteId(new_mr.id)).await?;

    let synced = store.mr_by_remote_id(repository.id, RemoteId(new_mr.id)).await?;
    synced.ok_or_else(|| review_core::Error::NotFound(format!("release MR {} not yet synced locally", new_mr.id)))
}

/// §4.7 step 4: "Retarget every open MR in the repo whose target branch
/// equals dev-branch, except those carrying a configured BlockLabel or
/// FeatureReleaseLabel, to the new release branch."
async fn retarget_open_mrs(
    store: &dyn Store,
    platform: &dyn RemotePlatform,
    repository: &Repository,
    policy: &PolicyConfig,
    dev_branch: &str,
    release_branch: &str,
    release_mr_remote_id: RemoteId,
) -> Result<()> {
    let remote_project_id = repository.remote_id.get();
    for mr in store.open_mrs_targeting_branch(repository.id, dev_branch).await? {
        if mr.remote_id == release_mr_remote_id {
            continue;
        }
        let labels = store.labels_for_mr(mr.id).await?;
        let names: HashSet<&str> = labels.iter().map(|l| l.name.as_str()).collect();
        if names.iter().any(|n| policy.block_labels.contains(*n) || policy.feature_release_labels.contains(*n)) {
            continue;
        }
        platform
            .update_merge_request(
                remote_project_id,
                mr.iid,
                MergeRequestUpdate { target_branch: Some(release_branch.to_string()), ..Default::default() },
            )
            .await?;
    }
    Ok(())
}

/// §4.7 "Description refresh": re-render and splice the included-MR block
/// on every tick, updating the remote only if it actually changed.
pub async fn refresh_description(
    store: &dyn Store,
    platform: &dyn RemotePlatform,
    repository: &Repository,
    release_mr: &review_core::entities::MergeRequest,
) -> Result<()> {
    let mut targeting = store.open_mrs_targeting_branch(repository.id, &release_mr.source_branch).await?;
    targeting.retain(|mr| mr.id != release_mr.id);
    targeting.sort_by_key(|mr| mr.iid);

    let mut lines = Vec::with_capacity(targeting.len());
    for mr in &targeting {
        let Some(author) = store.user_by_local_id(mr.author_id).await? else { continue };
        lines.push(render_entry(mr, &author));
    }
    let block = lines.join("\n");
    let new_description = splice(&release_mr.description, &block);

    if new_description != release_mr.description {
        platform
            .update_merge_request(
                repository.remote_id.get(),
                release_mr.iid,
                MergeRequestUpdate { description: Some(new_description), ..Default::default() },
            )
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use review_core::entities::{MergeRequest, RawState, User};
    use review_core::ids::RepoId;
    use review_platform::MockRemotePlatform;
    use review_store::MockStore;

    fn repo() -> Repository {
        Repository { id: LocalId(1), remote_id: RemoteId(99), name: "widgets".into(), path_with_namespace: "org/widgets".into(), url: String::new() }
    }

    fn mr(id: i64, iid: i64, author_id: LocalId, title: &str, description: &str) -> MergeRequest {
        let now = Utc::now();
        MergeRequest {
            id: LocalId(id),
            remote_id: RemoteId(100 + id),
            iid,
            repository_id: LocalId(1),
            title: title.into(),
            description: description.into(),
            source_branch: "release_2024-01-01_abc123".to_string(),
            target_branch: "develop".into(),
            raw_state: RawState::Opened,
            draft: false,
            author_id,
            assignee_id: None,
            created_at: now,
            updated_at: now,
            merged_at: None,
            closed_at: None,
            source_sha: "abc123def".into(),
            target_sha: None,
            source_project_id: RepoId(99),
            target_project_id: RepoId(99),
            task_id: None,
            url: format!("https://example.com/mr/{iid}"),
            last_update: now,
        }
    }

    #[tokio::test]
    async fn refresh_description_updates_remote_when_block_changed() {
        let repository = repo();
        let release_mr = mr(1, 50, LocalId(10), "Release 2024-01-01", description::MARKER);
        let included = mr(2, 101, LocalId(20), "A", "");

        let mut store = MockStore::new();
        let included_clone = included.clone();
        store.expect_open_mrs_targeting_branch().returning(move |_, _| Ok(vec![included_clone.clone()]));
        store.expect_user_by_local_id().returning(|id| {
            Ok(Some(User {
                id,
                remote_id: review_core::ids::UserId(1),
                username: "alice".into(),
                display_name: "Alice".into(),
                email: None,
                on_vacation: false,
                locked: false,
                email_fetched: false,
                email_fetched_at: None,
            }))
        });

        let mut platform = MockRemotePlatform::new();
        platform
            .expect_update_merge_request()
            .withf(move |_, iid, update| *iid == 50 && update.description.as_deref() == Some(&format!("{}- [!{} A]({}) by @alice", description::MARKER, included.iid, included.url)))
            .returning(move |_, _, _| Ok(release_mr.clone()));

        refresh_description(&store, &platform, &repository, &mr(1, 50, LocalId(10), "Release 2024-01-01", description::MARKER))
            .await
            .expect("refresh succeeds");
    }
}
