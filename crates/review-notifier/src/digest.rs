//! Digest builders (§4.8): the "review digest" (repo-wide, three sections)
//! and the "user actions digest" (per-user, five sections).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use review_core::action::{Action, ActionKind};
use review_core::entities::{MergeRequest, Repository};
use review_core::ids::LocalId;
use review_state::{active_reviewers, mr_state, reviewer_needs_action, MrDataCache, MrStateKind};
use review_store::Store;

use crate::{mention, sla, Result};

/// One rendered row, common to every digest section.
#[derive(Debug, Clone)]
pub struct DigestEntry {
    pub repo_name: String,
    pub title: String,
    pub url: String,
    pub author_mention: String,
    pub active_reviewers: Vec<String>,
    pub time_in_state_hours: f64,
    pub sla_label: String,
    sla_percent: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct ReviewDigest {
    pub pending_review: Vec<DigestEntry>,
    pub pending_fixes: Vec<DigestEntry>,
    pub blocked: Vec<DigestEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct UserActionsDigest {
    pub pending_review: Vec<DigestEntry>,
    pub pending_fixes: Vec<DigestEntry>,
    pub my_mrs_in_review: Vec<DigestEntry>,
    pub ready_for_release: Vec<DigestEntry>,
    pub blocked: Vec<DigestEntry>,
}

fn sort_by_sla_desc(entries: &mut [DigestEntry]) {
    entries.sort_by(|a, b| sla::sort_key(b.sla_percent).partial_cmp(&sla::sort_key(a.sla_percent)).unwrap_or(std::cmp::Ordering::Equal));
}

/// Collapses any run of whitespace (including newlines) to a single space.
#[must_use]
pub fn sanitize_title(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Replays the `BlockLabelAdded`/`BlockLabelRemoved` counter to `true` iff
/// the MR is blocked right now.
#[must_use]
fn is_currently_blocked(actions: &[Action]) -> bool {
    let mut relevant: Vec<&Action> = actions.iter().filter(|a| matches!(a.kind, ActionKind::BlockLabelAdded | ActionKind::BlockLabelRemoved)).collect();
    relevant.sort_by_key(|a| a.timestamp);
    let mut counter: i64 = 0;
    for a in relevant {
        match a.kind {
            ActionKind::BlockLabelAdded => counter += 1,
            ActionKind::BlockLabelRemoved => counter = (counter - 1).max(0),
            _ => {}
        }
    }
    counter > 0
}

struct EntryContext<'a> {
    repo_name: &'a str,
    allowed_hours: i64,
    blocked: bool,
}

async fn build_entry(store: &dyn Store, mr: &MergeRequest, cache: &MrDataCache, ctx: EntryContext<'_>, now: DateTime<Utc>) -> Result<DigestEntry> {
    let comments = cache.comments_for(mr.id);
    let actions = cache.actions_for(mr.id);
    let policy = cache.policy_for(mr.repository_id);
    let state = mr_state(mr, comments, actions);

    let elapsed_hours = review_clock::working_time(state.since, now, &policy.holidays).num_minutes() as f64 / 60.0;
    let percent = sla::percent(elapsed_hours, ctx.allowed_hours);

    let author = store.user_by_local_id(mr.author_id).await?;
    let author_mention = match &author {
        Some(u) => mention::resolve(store, u).await?,
        None => "unknown".to_string(),
    };

    let reviewer_ids = store.reviewers_for_mr(mr.id).await?;
    let approver_ids = store.approvers_for_mr(mr.id).await?;
    let active = active_reviewers(&reviewer_ids, &approver_ids, comments, mr.author_id);
    let mut active_names = Vec::with_capacity(active.len());
    for reviewer_id in active {
        if let Some(u) = store.user_by_local_id(reviewer_id).await? {
            active_names.push(mention::resolve(store, &u).await?);
        }
    }

    Ok(DigestEntry {
        repo_name: ctx.repo_name.to_string(),
        title: sanitize_title(&mr.title),
        url: mr.url.clone(),
        author_mention,
        active_reviewers: active_names,
        time_in_state_hours: elapsed_hours,
        sla_label: sla::label(percent, ctx.blocked),
        sla_percent: percent,
    })
}

/// §4.8 review digest: PENDING REVIEW / PENDING FIXES / BLOCKED, each
/// sorted by SLA percentage descending.
#[tracing::instrument(skip(store))]
pub async fn build_review_digest(store: &dyn Store, repository_ids: &[LocalId], now: DateTime<Utc>) -> Result<ReviewDigest> {
    let mut repos: HashMap<LocalId, Repository> = HashMap::new();
    let mut mrs = Vec::new();
    for &repo_id in repository_ids {
        let Some(repo) = store.repository_by_local_id(repo_id).await? else { continue };
        mrs.extend(store.open_mrs_for_repo(repo_id).await?);
        repos.insert(repo_id, repo);
    }

    let mr_ids: Vec<LocalId> = mrs.iter().map(|m| m.id).collect();
    let cache = MrDataCache::load(store, repository_ids, &mr_ids).await?;

    let mut digest = ReviewDigest::default();
    for mr in &mrs {
        let actions = cache.actions_for(mr.id);
        let comments = cache.comments_for(mr.id);
        let state = mr_state(mr, comments, actions);
        if matches!(state.kind, MrStateKind::Merged | MrStateKind::Closed | MrStateKind::Draft) {
            continue;
        }

        let sla = cache.sla_for(mr.repository_id);
        let allowed_hours = match state.kind {
            MrStateKind::OnReview => sla.review_duration_hours,
            MrStateKind::OnFixes => sla.fixes_duration_hours,
            _ => 0,
        };
        let blocked = is_currently_blocked(actions);
        let Some(repo) = repos.get(&mr.repository_id) else { continue };
        let entry = build_entry(store, mr, &cache, EntryContext { repo_name: &repo.name, allowed_hours, blocked }, now).await?;

        if blocked {
            digest.blocked.push(entry);
        } else if state.kind == MrStateKind::OnReview {
            digest.pending_review.push(entry);
        } else {
            digest.pending_fixes.push(entry);
        }
    }

    sort_by_sla_desc(&mut digest.pending_review);
    sort_by_sla_desc(&mut digest.pending_fixes);
    sort_by_sla_desc(&mut digest.blocked);
    Ok(digest)
}

/// §4.8 user actions digest: PENDING REVIEW / PENDING FIXES / MY MRS IN
/// REVIEW / READY FOR RELEASE (release managers only) / BLOCKED.
#[tracing::instrument(skip(store))]
pub async fn build_user_actions_digest(store: &dyn Store, user_id: LocalId, repository_ids: &[LocalId], now: DateTime<Utc>) -> Result<UserActionsDigest> {
    let mut repos: HashMap<LocalId, Repository> = HashMap::new();
    let mut mrs = Vec::new();
    for &repo_id in repository_ids {
        let Some(repo) = store.repository_by_local_id(repo_id).await? else { continue };
        mrs.extend(store.open_mrs_for_repo(repo_id).await?);
        repos.insert(repo_id, repo);
    }

    let mr_ids: Vec<LocalId> = mrs.iter().map(|m| m.id).collect();
    let cache = MrDataCache::load(store, repository_ids, &mr_ids).await?;

    let mut digest = UserActionsDigest::default();
    for mr in &mrs {
        let is_author = mr.author_id == user_id;
        let reviewer_ids = store.reviewers_for_mr(mr.id).await?;
        let is_reviewer = reviewer_ids.contains(&user_id);
        if !is_author && !is_reviewer {
            continue;
        }

        let actions = cache.actions_for(mr.id);
        let comments = cache.comments_for(mr.id);
        let state = mr_state(mr, comments, actions);
        if matches!(state.kind, MrStateKind::Merged | MrStateKind::Closed | MrStateKind::Draft) {
            continue;
        }

        let sla = cache.sla_for(mr.repository_id);
        let allowed_hours = match state.kind {
            MrStateKind::OnReview => sla.review_duration_hours,
            MrStateKind::OnFixes => sla.fixes_duration_hours,
            _ => 0,
        };
        let blocked = is_currently_blocked(actions);
        let Some(repo) = repos.get(&mr.repository_id) else { continue };
        let entry = build_entry(store, mr, &cache, EntryContext { repo_name: &repo.name, allowed_hours, blocked }, now).await?;

        if blocked {
            digest.blocked.push(entry);
            continue;
        }

        if is_reviewer && state.kind == MrStateKind::OnReview {
            let approver_ids = store.approvers_for_mr(mr.id).await?;
            if reviewer_needs_action(comments, mr.author_id, user_id, &approver_ids) {
                digest.pending_review.push(entry.clone());
            }
        }
        if is_author {
            match state.kind {
                MrStateKind::OnFixes => digest.pending_fixes.push(entry),
                MrStateKind::OnReview => digest.my_mrs_in_review.push(entry),
                MrStateKind::Merged | MrStateKind::Closed | MrStateKind::Draft => {}
            }
        }
    }

    for &repo_id in repository_ids {
        let Some(repo) = repos.get(&repo_id) else { continue };
        let managers = store.release_managers(repo_id).await?;
        if !managers.contains(&user_id) {
            continue;
        }
        let policy = cache.policy_for(repo_id);
        if policy.release_ready_labels.is_empty() {
            continue;
        }
        for mr in mrs.iter().filter(|m| m.repository_id == repo_id) {
            let labels = store.labels_for_mr(mr.id).await?;
            if !labels.iter().any(|l| policy.release_ready_labels.contains(&l.name)) {
                continue;
            }
            let actions = cache.actions_for(mr.id);
            let comments = cache.comments_for(mr.id);
            let state = mr_state(mr, comments, actions);
            let sla = cache.sla_for(repo_id);
            let allowed_hours = match state.kind {
                MrStateKind::OnReview => sla.review_duration_hours,
                MrStateKind::OnFixes => sla.fixes_duration_hours,
                _ => 0,
            };
            let blocked = is_currently_blocked(actions);
            let entry = build_entry(store, mr, &cache, EntryContext { repo_name: &repo.name, allowed_hours, blocked }, now).await?;
            digest.ready_for_release.push(entry);
        }
    }

    sort_by_sla_desc(&mut digest.pending_review);
    sort_by_sla_desc(&mut digest.pending_fixes);
    sort_by_sla_desc(&mut digest.my_mrs_in_review);
    sort_by_sla_desc(&mut digest.ready_for_release);
    sort_by_sla_desc(&mut digest.blocked);
    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use review_core::entities::{RawState, User};
    use review_core::ids::{RemoteId, RepoId};
    use review_store::MockStore;

    fn repo() -> Repository {
        Repository { id: LocalId(1), remote_id: RepoId(9), name: "widgets".into(), path_with_namespace: "org/widgets".into(), url: String::new() }
    }

    fn mr() -> MergeRequest {
        let now = Utc::now();
        MergeRequest {
            id: LocalId(5),
            remote_id: RemoteId(50),
            iid: 7,
            repository_id: LocalId(1),
            title: "Fix\nthe\nthing".into(),
            description: String::new(),
            source_branch: "feature".into(),
            target_branch: "main".into(),
            raw_state: RawState::Opened,
            draft: false,
            author_id: LocalId(10),
            assignee_id: None,
            created_at: now - chrono::Duration::hours(5),
            updated_at: now,
            merged_at: None,
            closed_at: None,
            source_sha: "abc".into(),
            target_sha: None,
            source_project_id: RepoId(9),
            target_project_id: RepoId(9),
            task_id: None,
            url: "https://example.com/mr/7".into(),
            last_update: now,
        }
    }

    fn user(id: LocalId, username: &str) -> User {
        User { id, remote_id: review_core::ids::UserId(1), username: username.into(), display_name: username.into(), email: None, on_vacation: false, locked: false, email_fetched: false, email_fetched_at: None }
    }

    #[test]
    fn sanitize_title_collapses_whitespace() {
        assert_eq!(sanitize_title("Fix\nthe\n  thing"), "Fix the thing");
    }

    #[tokio::test]
    async fn review_digest_places_open_mr_with_no_sla_in_pending_review() {
        let repo_row = repo();
        let mr_row = mr();

        let mut store = MockStore::new();
        store.expect_repository_by_local_id().returning(move |_| Ok(Some(repo_row.clone())));
        store.expect_open_mrs_for_repo().returning(move |_| Ok(vec![mr_row.clone()]));
        store.expect_policies_for_repos().returning(|_| Ok(HashMap::new()));
        store.expect_slas_for_repos().returning(|_| Ok(HashMap::new()));
        store.expect_comments_for_mrs().returning(|_| Ok(HashMap::new()));
        store.expect_actions_for_mrs().returning(|_| Ok(HashMap::new()));
        store.expect_user_by_local_id().returning(|id| Ok(Some(user(id, "alice"))));
        store.expect_reviewers_for_mr().returning(|_| Ok(vec![]));
        store.expect_approvers_for_mr().returning(|_| Ok(vec![]));
        store.expect_chat_user_by_username_prefix().returning(|_| Ok(None));

        let digest = build_review_digest(&store, &[LocalId(1)], Utc::now()).await.unwrap();
        assert_eq!(digest.pending_review.len(), 1);
        assert_eq!(digest.pending_review[0].title, "Fix the thing");
        assert_eq!(digest.pending_review[0].sla_label, "N/A");
    }
}
