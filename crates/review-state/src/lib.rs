//! Derives MR-wide and per-user states from Store + Timeline (§4.5).
//!
//! Nothing here is ever persisted: every function is a pure read over a
//! [`MrDataCache`] snapshot, re-derived on every call the way the
//! specification requires ("derived on read; never stored").

pub mod cache;
pub mod thread;

use chrono::{DateTime, Utc};
use review_core::action::ActionKind;
use review_core::entities::{Comment, MergeRequest, RawState};
use review_core::ids::LocalId;

pub use cache::MrDataCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MrStateKind {
    Merged,
    Closed,
    Draft,
    OnFixes,
    OnReview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MrState {
    pub kind: MrStateKind,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserMrState {
    pub needs_action: bool,
    pub since: DateTime<Utc>,
}

fn last_draft_toggle(actions: &[review_core::action::Action], draft: bool) -> Option<DateTime<Utc>> {
    use review_core::action::DraftToggleMetadata;
    actions
        .iter()
        .filter(|a| a.kind == ActionKind::DraftToggled)
        .filter(|a| serde_json::from_str::<DraftToggleMetadata>(&a.metadata).is_ok_and(|m| m.draft == draft))
        .map(|a| a.timestamp)
        .max()
}

fn earliest_reviewer_assigned(actions: &[review_core::action::Action]) -> Option<DateTime<Utc>> {
    actions.iter().filter(|a| a.kind == ActionKind::ReviewerAssigned).map(|a| a.timestamp).min()
}

fn last_comment_resolved(actions: &[review_core::action::Action]) -> Option<DateTime<Utc>> {
    actions.iter().filter(|a| a.kind == ActionKind::CommentResolved).map(|a| a.timestamp).max()
}

/// §4.5 global MR state, in priority order merged/closed/draft/on_fixes/on_review.
#[must_use]
pub fn mr_state(mr: &MergeRequest, comments: &[Comment], actions: &[review_core::action::Action]) -> MrState {
    match mr.raw_state {
        RawState::Merged => {
            return MrState { kind: MrStateKind::Merged, since: mr.merged_at.unwrap_or(mr.last_update) };
        }
        RawState::Closed => {
            return MrState { kind: MrStateKind::Closed, since: mr.closed_at.unwrap_or(mr.last_update) };
        }
        RawState::Opened | RawState::Locked => {}
    }

    if mr.draft {
        let since = last_draft_toggle(actions, true).unwrap_or(mr.created_at);
        return MrState { kind: MrStateKind::Draft, since };
    }

    let events = thread::awaiting_author_events(comments, mr.author_id);
    if let Some(since) = thread::open_since(&events) {
        return MrState { kind: MrStateKind::OnFixes, since };
    }

    let since = [
        last_comment_resolved(actions),
        last_draft_toggle(actions, false),
        earliest_reviewer_assigned(actions),
        Some(mr.created_at),
    ]
    .into_iter()
    .flatten()
    .max()
    .unwrap_or(mr.created_at);

    MrState { kind: MrStateKind::OnReview, since }
}

/// Author needs action when the MR is a draft or any thread awaits them (§4.5).
#[must_use]
pub fn author_needs_action(mr: &MergeRequest, comments: &[Comment]) -> bool {
    mr.draft || thread::has_awaiting_author_thread(comments, mr.author_id)
}

/// Whether `reviewer_id` currently owns a thread "waiting for author" — i.e.
/// they were the last to comment in an unresolved resolvable thread and the
/// MR author has not yet replied.
#[must_use]
pub fn owns_waiting_thread(comments: &[Comment], mr_author_id: LocalId, reviewer_id: LocalId) -> bool {
    thread::awaiting_author_owners(comments, mr_author_id).contains(&reviewer_id)
}

/// Reviewer needs action when assigned, not yet approved, and not currently
/// the owner of a thread awaiting the author's reply (§4.5).
#[must_use]
pub fn reviewer_needs_action(
    comments: &[Comment],
    mr_author_id: LocalId,
    reviewer_id: LocalId,
    approver_ids: &[LocalId],
) -> bool {
    if approver_ids.contains(&reviewer_id) {
        return false;
    }
    !owns_waiting_thread(comments, mr_author_id, reviewer_id)
}

/// §4.5 `ActiveReviewers`: reviewers who are neither approvers nor thread
/// owners currently waiting on the author.
#[must_use]
pub fn active_reviewers(
    reviewer_ids: &[LocalId],
    approver_ids: &[LocalId],
    comments: &[Comment],
    mr_author_id: LocalId,
) -> Vec<LocalId> {
    let waiting_owners = thread::awaiting_author_owners(comments, mr_author_id);
    reviewer_ids
        .iter()
        .copied()
        .filter(|r| !approver_ids.contains(r) && !waiting_owners.contains(r))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use review_core::ids::{RemoteId, RepoId};

    fn mr(raw_state: RawState, draft: bool, created_at: DateTime<Utc>) -> MergeRequest {
        MergeRequest {
            id: LocalId(1),
            remote_id: RemoteId(1),
            iid: 1,
            repository_id: LocalId(1),
            title: "t".into(),
            description: String::new(),
            source_branch: "feature".into(),
            target_branch: "main".into(),
            raw_state,
            draft,
            author_id: LocalId(10),
            assignee_id: None,
            created_at,
            updated_at: created_at,
            merged_at: None,
            closed_at: None,
            source_sha: "abc".into(),
            target_sha: None,
            source_project_id: RepoId(1),
            target_project_id: RepoId(1),
            task_id: None,
            url: "https://example.com/1".into(),
            last_update: created_at,
        }
    }

    #[test]
    fn draft_mr_reports_draft_state() {
        let created = Utc::now();
        let m = mr(RawState::Opened, true, created);
        let state = mr_state(&m, &[], &[]);
        assert_eq!(state.kind, MrStateKind::Draft);
    }

    #[test]
    fn merged_takes_priority_over_everything() {
        let created = Utc::now();
        let mut m = mr(RawState::Merged, true, created);
        m.merged_at = Some(created + chrono::Duration::hours(2));
        let state = mr_state(&m, &[], &[]);
        assert_eq!(state.kind, MrStateKind::Merged);
    }

    #[test]
    fn non_draft_no_threads_is_on_review() {
        let created = Utc::now();
        let m = mr(RawState::Opened, false, created);
        let state = mr_state(&m, &[], &[]);
        assert_eq!(state.kind, MrStateKind::OnReview);
    }

    fn comment(
        discussion_id: &str,
        author_id: LocalId,
        created_at: DateTime<Utc>,
        resolvable: bool,
        resolved: bool,
        resolved_at: Option<DateTime<Utc>>,
    ) -> Comment {
        Comment {
            id: LocalId(created_at.timestamp_millis()),
            remote_note_id: RemoteId(created_at.timestamp_millis()),
            discussion_id: discussion_id.to_string(),
            mr_id: LocalId(1),
            author_id,
            body: String::new(),
            resolvable,
            resolved,
            resolved_by: None,
            resolved_at,
            created_at,
            updated_at: created_at,
            thread_starter_id: None,
            is_last_in_thread: false,
        }
    }

    /// S2 (§8): reviewer opens a resolvable thread at 10:00Z, the author
    /// replies at 10:30Z without resolving it, and the thread resolves at
    /// 11:00Z. The MR must report on_fixes since 10:00Z for the whole window
    /// up to resolution, then on_review since the 11:00Z resolution.
    #[test]
    fn on_fixes_holds_through_an_intermediate_author_reply_then_falls_back_to_on_review() {
        use chrono::TimeZone;
        let author = LocalId(10);
        let reviewer = LocalId(20);
        let opened_at = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let reply_at = Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 0).unwrap();
        let resolved_at = Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap();

        let mut m = mr(RawState::Opened, false, opened_at - chrono::Duration::hours(1));
        m.author_id = author;

        let comments = vec![comment("d1", reviewer, opened_at, true, false, None), comment("d1", author, reply_at, false, false, None)];

        let state = mr_state(&m, &comments, &[]);
        assert_eq!(state.kind, MrStateKind::OnFixes);
        assert_eq!(state.since, opened_at);

        let mut resolved_comments = comments;
        resolved_comments[0].resolved = true;
        resolved_comments[0].resolved_at = Some(resolved_at);

        let actions = vec![review_core::action::Action {
            id: LocalId(1),
            mr_id: m.id,
            kind: ActionKind::CommentResolved,
            actor_id: Some(author),
            target_user_id: None,
            comment_id: Some(resolved_comments[0].id),
            timestamp: resolved_at,
            metadata: String::new(),
        }];

        let state = mr_state(&m, &resolved_comments, &actions);
        assert_eq!(state.kind, MrStateKind::OnReview);
        assert_eq!(state.since, resolved_at);
    }
}
