//! `SyncMR` (§4.4) and Pass B (MR listing + stale-MR cleanup).

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use review_core::action::ActionKind;
use review_core::entities::{MergeRequest, RawState};
use review_core::ids::{LocalId, RemoteId, RepoId, UserId};
use review_core::policy::PolicyConfig;
use review_platform::types::RemoteMergeRequest;
use review_platform::{Error as PlatformError, RemotePlatform};
use review_store::types::{RemoteMrFields, SetDiff};
use review_store::Store;

use crate::discussions;
use crate::task_id::extract_task_id;
use crate::Result;

/// Caches remote-user-id → local-user-id within one reconciler pass so the
/// same author/reviewer/approver isn't re-upserted per MR.
pub type UserCache = HashMap<i64, LocalId>;

pub(crate) async fn resolve_user(store: &dyn Store, platform: &dyn RemotePlatform, cache: &mut UserCache, remote_user_id: i64) -> Result<LocalId> {
    if let Some(id) = cache.get(&remote_user_id) {
        return Ok(*id);
    }
    let remote_user = platform.get_user(remote_user_id).await?;
    let user = store.upsert_user(UserId(remote_user.id), &remote_user.username, &remote_user.name).await?;
    cache.insert(remote_user_id, user.id);
    Ok(user.id)
}

/// Pass B: page through open MRs, `SyncMR` each, then re-fetch any
/// previously-opened local MR absent from the fresh listing.
#[tracing::instrument(skip_all, fields(repository_id = repository_id.get()))]
pub async fn pass_b(
    store: &dyn Store,
    platform: &dyn RemotePlatform,
    repository_id: LocalId,
    remote_project_id: i64,
    policy: &PolicyConfig,
) -> Result<()> {
    let mut user_cache = UserCache::new();
    let mut seen = HashSet::new();

    for remote_mr in platform.list_project_merge_requests(remote_project_id, "opened").await? {
        seen.insert(RemoteId(remote_mr.id));
        if let Err(err) = sync_mr(store, platform, repository_id, policy, remote_mr, &mut user_cache).await {
            tracing::warn!(error = %err, "SyncMR failed, skipping this MR for this tick");
        }
    }

    let stale = store.stale_opened_mr_remote_ids(repository_id, &seen).await?;
    for remote_id in stale {
        let Some(local_mr) = store.mr_by_remote_id(repository_id, remote_id).await? else { continue };
        match platform.get_merge_request(remote_project_id, local_mr.iid).await {
            Ok(refetched) => {
                if let Err(err) = sync_mr(store, platform, repository_id, policy, refetched, &mut user_cache).await {
                    tracing::warn!(error = %err, "re-sync of stale MR failed");
                }
            }
            Err(PlatformError::NotFound) => {
                store.force_close_mr(repository_id, remote_id).await?;
            }
            Err(err) => {
                tracing::warn!(error = %err, "transient error re-fetching stale MR, will retry next tick");
            }
        }
    }
    Ok(())
}

#[tracing::instrument(skip_all, fields(remote_mr_id = remote_mr.id, iid = remote_mr.iid))]
pub async fn sync_mr(
    store: &dyn Store,
    platform: &dyn RemotePlatform,
    repository_id: LocalId,
    policy: &PolicyConfig,
    remote_mr: RemoteMergeRequest,
    user_cache: &mut UserCache,
) -> Result<MergeRequest> {
    let author_id = resolve_user(store, platform, user_cache, remote_mr.author_id).await?;
    let assignee_id = match remote_mr.assignee_id {
        Some(id) => Some(resolve_user(store, platform, user_cache, id).await?),
        None => None,
    };
    let mut reviewer_ids = Vec::with_capacity(remote_mr.reviewer_ids.len());
    for remote_id in &remote_mr.reviewer_ids {
        reviewer_ids.push(resolve_user(store, platform, user_cache, *remote_id).await?);
    }

    let task_id = extract_task_id(&policy.issue_prefixes, &remote_mr.source_branch, &remote_mr.title);
    let raw_state = RawState::from_remote_str(&remote_mr.state);

    let fields = RemoteMrFields {
        remote_id: RemoteId(remote_mr.id),
        iid: remote_mr.iid,
        repository_id,
        title: remote_mr.title.clone(),
        description: remote_mr.description.clone(),
        source_branch: remote_mr.source_branch.clone(),
        target_branch: remote_mr.target_branch.clone(),
        raw_state,
        draft: remote_mr.draft,
        author_id,
        assignee_id,
        created_at: remote_mr.created_at,
        updated_at: remote_mr.updated_at,
        merged_at: remote_mr.merged_at,
        closed_at: remote_mr.closed_at,
        source_sha: remote_mr.sha.clone(),
        target_sha: None,
        source_project_id: RepoId(remote_mr.source_project_id),
        target_project_id: RepoId(remote_mr.target_project_id),
        task_id,
        url: remote_mr.web_url.clone(),
    };

    let result = store.upsert_mr(fields, &remote_mr.labels, &reviewer_ids).await?;
    let mr = result.mr.clone();
    let now = Utc::now();

    if let Some(previous) = &result.previous {
        if previous.draft != mr.draft {
            let metadata = serde_json::json!({ "draft": mr.draft }).to_string();
            review_timeline::record(store, mr.id, ActionKind::DraftToggled, Some(author_id), None, None, now, metadata).await?;
        }
        if previous.raw_state != RawState::Merged && mr.raw_state == RawState::Merged {
            review_timeline::record(store, mr.id, ActionKind::Merged, None, None, None, mr.merged_at.unwrap_or(now), String::new()).await?;
        }
        if previous.raw_state != RawState::Closed && mr.raw_state == RawState::Closed {
            review_timeline::record(store, mr.id, ActionKind::Closed, None, None, None, mr.closed_at.unwrap_or(now), String::new()).await?;
        }
    }

    for label in &result.label_diff.added {
        if policy.block_labels.contains(label) {
            review_timeline::record(store, mr.id, ActionKind::BlockLabelAdded, None, None, None, now, label.clone()).await?;
        }
        if policy.release_ready_labels.contains(label) {
            review_timeline::record(store, mr.id, ActionKind::ReleaseReadyLabelAdded, None, None, None, now, label.clone()).await?;
        }
    }
    for label in &result.label_diff.removed {
        if policy.block_labels.contains(label) {
            review_timeline::record(store, mr.id, ActionKind::BlockLabelRemoved, None, None, None, now, label.clone()).await?;
        }
    }

    for reviewer_id in &result.reviewer_diff.added {
        review_timeline::record(store, mr.id, ActionKind::ReviewerAssigned, None, Some(*reviewer_id), None, now, String::new()).await?;
    }
    for reviewer_id in &result.reviewer_diff.removed {
        review_timeline::record(store, mr.id, ActionKind::ReviewerRemoved, None, Some(*reviewer_id), None, now, String::new()).await?;
    }

    if matches!(mr.raw_state, RawState::Opened | RawState::Locked) {
        let remote_project_id = mr.source_project_id.get();
        let previous_approvers = store.approvers_for_mr(mr.id).await?;
        let remote_approvals = platform.get_merge_request_approvals(remote_project_id, mr.iid).await?;
        let mut approver_ids = Vec::with_capacity(remote_approvals.len());
        for approval in remote_approvals {
            approver_ids.push(resolve_user(store, platform, user_cache, approval.user_id).await?);
        }
        let approver_diff = SetDiff::compute(&previous_approvers, &approver_ids);
        store.replace_approvers(mr.id, &approver_ids).await?;

        for approver_id in &approver_diff.added {
            review_timeline::record(store, mr.id, ActionKind::Approved, Some(*approver_id), None, None, now, String::new()).await?;
        }
        for approver_id in &approver_diff.removed {
            review_timeline::record(store, mr.id, ActionKind::Unapproved, Some(*approver_id), None, None, now, String::new()).await?;
        }

        check_fully_approved(store, mr.id).await?;
        discussions::sync(store, platform, &mr, user_cache).await?;
    } else {
        store.clear_approvers(mr.id).await?;
    }

    Ok(mr)
}

/// §4.4: "if the MR has at least one reviewer and every reviewer id
/// appears in the approver set and no FullyApproved row exists for the
/// MR, emit FullyApproved."
async fn check_fully_approved(store: &dyn Store, mr_id: LocalId) -> Result<()> {
    let reviewers = store.reviewers_for_mr(mr_id).await?;
    if reviewers.is_empty() {
        return Ok(());
    }
    let approvers: HashSet<LocalId> = store.approvers_for_mr(mr_id).await?.into_iter().collect();
    if !reviewers.iter().all(|r| approvers.contains(r)) {
        return Ok(());
    }
    if store.has_action(mr_id, ActionKind::FullyApproved).await? {
        return Ok(());
    }
    review_timeline::record(store, mr_id, ActionKind::FullyApproved, None, None, None, Utc::now(), String::new()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use review_core::entities::User;
    use review_platform::types::{RemoteApproval, RemoteDiscussion, RemoteUser};
    use review_platform::MockRemotePlatform;
    use review_store::types::MrUpsertResult;
    use review_store::MockStore;

    fn sample_mr() -> RemoteMergeRequest {
        let now = Utc::now();
        RemoteMergeRequest {
            id: 900,
            iid: 7,
            project_id: 42,
            title: "Add widget".into(),
            description: String::new(),
            source_branch: "feature/widget".into(),
            target_branch: "develop".into(),
            state: "opened".into(),
            draft: false,
            author_id: 1,
            assignee_id: None,
            reviewer_ids: vec![],
            labels: vec![],
            created_at: now,
            updated_at: now,
            merged_at: None,
            closed_at: None,
            sha: "abc123".into(),
            source_project_id: 42,
            target_project_id: 42,
            web_url: "https://example.com/mr/7".into(),
        }
    }

    fn local_mr(repository_id: LocalId, remote: &RemoteMergeRequest, author_id: LocalId) -> MergeRequest {
        MergeRequest {
            id: LocalId(55),
            remote_id: RemoteId(remote.id),
            iid: remote.iid,
            repository_id,
            title: remote.title.clone(),
            description: remote.description.clone(),
            source_branch: remote.source_branch.clone(),
            target_branch: remote.target_branch.clone(),
            raw_state: RawState::Opened,
            draft: remote.draft,
            author_id,
            assignee_id: None,
            created_at: remote.created_at,
            updated_at: remote.updated_at,
            merged_at: None,
            closed_at: None,
            source_sha: remote.sha.clone(),
            target_sha: None,
            source_project_id: RepoId(remote.source_project_id),
            target_project_id: RepoId(remote.target_project_id),
            task_id: None,
            url: remote.web_url.clone(),
            last_update: remote.updated_at,
        }
    }

    #[tokio::test]
    async fn sync_mr_happy_path_with_no_associations_emits_no_extra_events() {
        let remote_mr = sample_mr();
        let repository_id = LocalId(3);
        let author_local_id = LocalId(10);

        let mut platform = MockRemotePlatform::new();
        platform
            .expect_get_user()
            .withf(|id| *id == 1)
            .returning(|_| Ok(RemoteUser { id: 1, username: "alice".into(), name: "Alice".into(), public_email: None }));
        platform.expect_get_merge_request_approvals().returning(|_, _| Ok(Vec::<RemoteApproval>::new()));
        platform.expect_list_merge_request_discussions().returning(|_, _| Ok(Vec::<RemoteDiscussion>::new()));

        let mut store = MockStore::new();
        store.expect_upsert_user().returning(move |remote_id, username, display_name| {
            Ok(User {
                id: author_local_id,
                remote_id,
                username: username.to_string(),
                display_name: display_name.to_string(),
                email: None,
                on_vacation: false,
                locked: false,
                email_fetched: false,
                email_fetched_at: None,
            })
        });
        store.expect_upsert_mr().returning(move |fields, _labels, _reviewers| {
            let remote = sample_mr();
            let mut mr = local_mr(repository_id, &remote, author_local_id);
            mr.title = fields.title.clone();
            Ok(MrUpsertResult { mr, previous: None, label_diff: SetDiff::default(), reviewer_diff: SetDiff::default() })
        });
        store.expect_approvers_for_mr().returning(|_| Ok(Vec::new()));
        store.expect_replace_approvers().returning(|_, _| Ok(SetDiff::default()));
        store.expect_reviewers_for_mr().returning(|_| Ok(Vec::new()));

        let policy = PolicyConfig::default();
        let mut cache = UserCache::new();
        let result = sync_mr(&store, &platform, repository_id, &policy, remote_mr, &mut cache).await.expect("sync succeeds");
        assert_eq!(result.title, "Add widget");
    }
}
