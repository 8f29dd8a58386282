//! Request/response shapes for `Store` operations that don't map 1:1 onto a
//! bare entity row — upserts that need to report a diff against the
//! previous snapshot so `review-reconciler` can turn that diff into
//! Timeline events without re-deriving it itself.

use chrono::{DateTime, Utc};
use review_core::action::ActionKind;
use review_core::entities::{MrSnapshot, RawState};
use review_core::ids::{LocalId, RemoteId, RepoId};

/// A before/after set comparison, compare-by-identity (§4.1: "Association-
/// replace uses compare-by-identity so no spurious deletes are emitted.").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetDiff<T> {
    pub added: Vec<T>,
    pub removed: Vec<T>,
}

impl<T: Eq + std::hash::Hash + Clone> SetDiff<T> {
    #[must_use]
    pub fn compute(old: &[T], new: &[T]) -> Self {
        let old_set: std::collections::HashSet<&T> = old.iter().collect();
        let new_set: std::collections::HashSet<&T> = new.iter().collect();
        Self {
            added: new.iter().filter(|v| !old_set.contains(v)).cloned().collect(),
            removed: old.iter().filter(|v| !new_set.contains(v)).cloned().collect(),
        }
    }
}

/// Raw fields copied verbatim from the remote platform's MR representation,
/// handed to `Store::upsert_mr` which composes the local row (§4.4 step 2).
#[derive(Debug, Clone)]
pub struct RemoteMrFields {
    pub remote_id: RemoteId,
    pub iid: i64,
    pub repository_id: LocalId,
    pub title: String,
    pub description: String,
    pub source_branch: String,
    pub target_branch: String,
    pub raw_state: RawState,
    pub draft: bool,
    pub author_id: LocalId,
    pub assignee_id: Option<LocalId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub source_sha: String,
    pub target_sha: Option<String>,
    pub source_project_id: RepoId,
    pub target_project_id: RepoId,
    pub task_id: Option<String>,
    pub url: String,
}

/// Result of `Store::upsert_mr`: the composed row, the pre-upsert snapshot
/// (`None` on first sighting), and the label/reviewer set diffs, all
/// computed inside the same transaction that wrote them.
#[derive(Debug, Clone)]
pub struct MrUpsertResult {
    pub mr: review_core::entities::MergeRequest,
    pub previous: Option<MrSnapshot>,
    pub label_diff: SetDiff<String>,
    pub reviewer_diff: SetDiff<LocalId>,
}

#[derive(Debug, Clone)]
pub struct CommentInput {
    pub remote_note_id: RemoteId,
    pub discussion_id: String,
    pub mr_id: LocalId,
    pub author_id: LocalId,
    pub body: String,
    pub resolvable: bool,
    pub resolved: bool,
    pub resolved_by: Option<LocalId>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub thread_starter_id: Option<LocalId>,
    pub is_last_in_thread: bool,
}

/// Whether the upsert created the row and whether the resolution
/// transitioned from `(resolvable, false)` to `(resolvable, true)` in this
/// call — the two facts `review-reconciler` needs to decide which Timeline
/// events to emit (§4.4, discussion sync).
#[derive(Debug, Clone)]
pub struct CommentUpsertResult {
    pub comment: review_core::entities::Comment,
    pub is_new: bool,
    pub resolution_transitioned: bool,
}

#[derive(Debug, Clone)]
pub struct NewAction {
    pub mr_id: LocalId,
    pub kind: ActionKind,
    pub actor_id: Option<LocalId>,
    pub target_user_id: Option<LocalId>,
    pub comment_id: Option<LocalId>,
    pub timestamp: DateTime<Utc>,
    pub metadata: String,
}
