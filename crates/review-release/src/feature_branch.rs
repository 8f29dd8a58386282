//! Feature release branches (§4.7): `/spawn_branch` creates a
//! `feature_release_{date}_{sha[:6]}` branch with a FeatureReleaseLabel MR,
//! excluded from regular retargeting and from digests.

use chrono::Utc;
use review_core::entities::{FeatureReleaseBranch, Repository};
use review_core::ids::{LocalId, RemoteId};
use review_core::policy::PolicyConfig;
use review_platform::types::NewMergeRequest;
use review_platform::RemotePlatform;
use review_store::Store;

use crate::Result;

#[tracing::instrument(skip_all, fields(repository_id = repository.id.get()))]
pub async fn spawn(
    store: &dyn Store,
    platform: &dyn RemotePlatform,
    repository: &Repository,
    policy: &PolicyConfig,
    dev_branch: &str,
    title: Option<&str>,
) -> Result<FeatureReleaseBranch> {
    let remote_project_id = repository.remote_id.get();
    let dev_head = platform.get_branch(remote_project_id, dev_branch).await?;
    let short_sha = &dev_head.commit_sha[..dev_head.commit_sha.len().min(6)];
    let branch_name = format!("feature_release_{}_{}", Utc::now().format("%Y-%m-%d"), short_sha);
    platform.create_branch(remote_project_id, &branch_name, dev_branch).await?;

    let label = policy.feature_release_labels.iter().min().cloned().unwrap_or_default();
    let mr_title = title.map_or_else(|| branch_name.clone(), str::to_string);
    let new_mr = platform
        .create_merge_request(
            remote_project_id,
            NewMergeRequest {
                source_branch: branch_name.clone(),
                target_branch: dev_branch.to_string(),
                title: mr_title,
                description: crate::description::MARKER.to_string(),
                labels: vec![label],
            },
        )
        .await?;

    let synced = store
        .mr_by_remote_id(repository.id, RemoteId(new_mr.id))
        .await?
        .ok_or_else(|| review_core::Error::NotFound(format!("feature release MR {} not yet synced locally", new_mr.id)))?;

    store
        .save_feature_release_branch(FeatureReleaseBranch {
            id: LocalId(0),
            repository_id: repository.id,
            mr_id: synced.id,
            branch_name,
            created_at: Utc::now(),
        })
        .await
        .map_err(Into::into)
}

/// Refreshes the commit-list description for every tracked feature release
/// branch whose MR is still open — "the same refresh mechanism" (splice
/// below the marker) as the main release MR, but rendering the branch's
/// own commit list rather than other MRs retargeted onto it.
pub async fn refresh_all(store: &dyn Store, platform: &dyn RemotePlatform, repository: &Repository) -> Result<()> {
    for branch in store.feature_release_branches(repository.id).await? {
        let Some(mr) = store.mr_by_local_id(branch.mr_id).await? else { continue };
        if mr.raw_state != review_core::entities::RawState::Opened {
            continue;
        }
        let commits = platform.get_merge_request_commits(repository.remote_id.get(), mr.iid).await?;
        let block = commits.iter().map(|sha| format!("- {sha}")).collect::<Vec<_>>().join("\n");
        let new_description = crate::description::splice(&mr.description, &block);
        if new_description != mr.description {
            platform
                .update_merge_request(
                    repository.remote_id.get(),
                    mr.iid,
                    review_platform::types::MergeRequestUpdate { description: Some(new_description), ..Default::default() },
                )
                .await?;
        }
    }
    Ok(())
}
