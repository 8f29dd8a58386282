//! Entity shapes from §3 (DATA MODEL) of the specification.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChatId, LabelId, LocalId, RepoId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: LocalId,
    pub remote_id: RepoId,
    pub name: String,
    pub path_with_namespace: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: LocalId,
    pub remote_id: UserId,
    pub username: String,
    pub display_name: String,
    /// Indexed; may be empty until Pass C backfills it.
    pub email: Option<String>,
    pub on_vacation: bool,
    pub locked: bool,
    /// Set once an attempt has been made to resolve the public email via
    /// the per-user endpoint, independent of whether one was found.
    pub email_fetched: bool,
    pub email_fetched_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawState {
    Opened,
    Closed,
    Merged,
    Locked,
}

impl RawState {
    #[must_use]
    pub fn from_remote_str(s: &str) -> Self {
        match s {
            "merged" => Self::Merged,
            "closed" => Self::Closed,
            "locked" => Self::Locked,
            _ => Self::Opened,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub id: LocalId,
    pub remote_id: RemoteId,
    /// Project-scoped internal id; unique together with `remote_id`.
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
    /// Local bookkeeping column, bumped whenever this row is touched by
    /// the reconciler (including forced-closed stale transitions).
    pub last_update: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub id: LabelId,
    pub name: String,
    pub color: String,
    pub text_color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: LocalId,
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
    /// Author of the first resolvable note in the discussion, if any.
    pub thread_starter_id: Option<LocalId>,
    /// True only for the last non-system note currently known in the
    /// discussion; exactly one row per discussion id holds this.
    pub is_last_in_thread: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatKind {
    Private,
    Group,
    Channel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: LocalId,
    pub external_chat_id: ChatId,
    pub kind: ChatKind,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatUser {
    pub id: LocalId,
    /// The chat platform's user identifier, which is an email address.
    pub external_user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositorySubscription {
    pub id: LocalId,
    pub chat_id: LocalId,
    pub repository_id: LocalId,
    pub creator_id: LocalId,
    pub subscribed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseSubscription {
    pub id: LocalId,
    pub chat_id: LocalId,
    pub repository_id: LocalId,
    pub creator_id: LocalId,
    pub subscribed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PossibleReviewer {
    pub repository_id: LocalId,
    pub user_id: LocalId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelReviewer {
    pub repository_id: LocalId,
    pub label_name: String,
    pub user_id: LocalId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseManager {
    pub repository_id: LocalId,
    pub user_id: LocalId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureReleaseBranch {
    pub id: LocalId,
    pub repository_id: LocalId,
    pub mr_id: LocalId,
    pub branch_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeployJobStatus {
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployTrackingRule {
    pub id: LocalId,
    pub repository_id: LocalId,
    pub chat_id: LocalId,
    pub job_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedDeployJob {
    pub id: LocalId,
    pub rule_id: LocalId,
    pub job_id: i64,
    pub status: DeployJobStatus,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationState {
    pub mr_id: LocalId,
    pub recipient_id: LocalId,
    pub kind: String,
    pub description_snapshot: String,
    pub last_notified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyDigestPreference {
    pub user_id: LocalId,
    pub timezone_offset_minutes: i32,
}

/// Snapshot of the mutable fields the reconciler diffs old-vs-new against
/// when deciding which Timeline events to emit for a `SyncMR` call.
#[derive(Debug, Clone, PartialEq)]
pub struct MrSnapshot {
    pub draft: bool,
    pub raw_state: RawState,
    pub label_names: Vec<String>,
    pub reviewer_ids: Vec<LocalId>,
    pub approver_ids: Vec<LocalId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holiday(pub NaiveDate);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sla {
    pub repository_id: LocalId,
    pub review_duration_hours: i64,
    pub fixes_duration_hours: i64,
    pub assign_count: i32,
}

impl Default for Sla {
    fn default() -> Self {
        Self {
            repository_id: LocalId(0),
            review_duration_hours: 0,
            fixes_duration_hours: 0,
            assign_count: 1,
        }
    }
}
