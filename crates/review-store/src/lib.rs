//! The `Store` port (§4.1) and a `sqlx`/Postgres adapter.
//!
//! Consumers (the reconciler, the state engine, the selector, the release
//! orchestrator, the notifier, and command handlers) depend on the `Store`
//! trait rather than on `PostgresStore` directly, in the manner of
//! `beads-storage::traits` — so that tests can substitute an in-memory
//! fake without touching a real database.

pub mod error;
pub mod postgres;
pub mod types;

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use review_core::action::{Action, ActionKind, ActionKey};
use review_core::entities::{
    Chat, ChatKind, ChatUser, Comment, DailyDigestPreference, DeployJobStatus,
    DeployTrackingRule, FeatureReleaseBranch, Label, MergeRequest, RepositorySubscription,
    ReleaseSubscription, Repository, Sla, TrackedDeployJob, User,
};
use review_core::ids::{ChatId, LocalId, RemoteId, RepoId, UserId};
use review_core::policy::PolicyConfig;

pub use error::{Error, Result};
pub use postgres::PostgresStore;
use types::{CommentInput, CommentUpsertResult, MrUpsertResult, NewAction, RemoteMrFields, SetDiff};

/// Transactional upserts, association-replace operations, and preloaded
/// batch reads over the entities of §3.
#[cfg_attr(feature = "test-util", mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync {
    // -- Repository ---------------------------------------------------
    async fn upsert_repository(
        &self,
        remote_id: RepoId,
        name: &str,
        path_with_namespace: &str,
        url: &str,
    ) -> Result<Repository>;

    async fn all_repositories(&self) -> Result<Vec<Repository>>;
    async fn repository_by_local_id(&self, id: LocalId) -> Result<Option<Repository>>;
    async fn repository_by_path(&self, path_with_namespace: &str) -> Result<Option<Repository>>;

    // -- User -----------------------------------------------------------
    async fn upsert_user(&self, remote_id: UserId, username: &str, display_name: &str) -> Result<User>;
    async fn user_by_local_id(&self, id: LocalId) -> Result<Option<User>>;
    async fn user_by_username(&self, username: &str) -> Result<Option<User>>;
    async fn users_needing_email_fetch(&self, limit: i64) -> Result<Vec<User>>;
    async fn set_user_email(&self, user_id: LocalId, email: Option<&str>) -> Result<()>;
    async fn mark_email_fetched(&self, user_id: LocalId, fetched: bool) -> Result<()>;
    async fn reset_stale_email_fetched(&self, older_than: DateTime<Utc>) -> Result<u64>;
    async fn set_user_vacation(&self, user_id: LocalId, on_vacation: bool) -> Result<()>;

    // -- Chat / ChatUser --------------------------------------------------
    async fn upsert_chat(&self, external_chat_id: ChatId, kind: ChatKind, title: &str) -> Result<Chat>;
    async fn upsert_chat_user(&self, external_user_id: &str) -> Result<ChatUser>;
    async fn chat_user_by_username_prefix(&self, username: &str) -> Result<Option<ChatUser>>;

    // -- Subscriptions ---------------------------------------------------
    async fn subscribe_repo(&self, chat_id: LocalId, repo_id: LocalId, creator_id: LocalId) -> Result<RepositorySubscription>;
    async fn unsubscribe_repo(&self, chat_id: LocalId, repo_id: LocalId) -> Result<()>;
    async fn subscribed_repo_ids_for_chat(&self, chat_id: LocalId) -> Result<Vec<LocalId>>;
    async fn subscribed_chats_for_repo(&self, repo_id: LocalId) -> Result<Vec<Chat>>;
    async fn all_subscribed_repo_ids(&self) -> Result<Vec<LocalId>>;

    async fn release_subscribe(&self, chat_id: LocalId, repo_id: LocalId, creator_id: LocalId) -> Result<ReleaseSubscription>;
    async fn release_unsubscribe(&self, chat_id: LocalId, repo_id: LocalId) -> Result<()>;
    async fn release_subscribed_chats_for_repo(&self, repo_id: LocalId) -> Result<Vec<Chat>>;

    // -- MergeRequest -----------------------------------------------------
    /// Composes and upserts one MR plus its label/reviewer associations in
    /// a single transaction, returning enough of a before/after diff for
    /// the caller to emit Timeline events (§4.4 step 2-5).
    async fn upsert_mr(
        &self,
        fields: RemoteMrFields,
        label_names: &[String],
        reviewer_ids: &[LocalId],
    ) -> Result<MrUpsertResult>;

    async fn mr_by_remote_id(&self, repository_id: LocalId, remote_id: RemoteId) -> Result<Option<MergeRequest>>;
    async fn mr_by_local_id(&self, id: LocalId) -> Result<Option<MergeRequest>>;
    async fn mr_by_path_and_iid(&self, path_with_namespace: &str, iid: i64) -> Result<Option<MergeRequest>>;

    /// Remote ids of locally-opened MRs for `repository_id` not present in
    /// `seen_remote_ids` (§4.4 Pass B).
    async fn stale_opened_mr_remote_ids(&self, repository_id: LocalId, seen_remote_ids: &HashSet<RemoteId>) -> Result<Vec<RemoteId>>;

    /// Force-transitions a locally-opened MR to `closed` on a remote 404,
    /// bumping `last_update`. Returns `None` if the MR no longer exists
    /// locally either.
    async fn force_close_mr(&self, repository_id: LocalId, remote_id: RemoteId) -> Result<Option<MergeRequest>>;

    async fn replace_approvers(&self, mr_id: LocalId, approver_ids: &[LocalId]) -> Result<SetDiff<LocalId>>;
    async fn clear_approvers(&self, mr_id: LocalId) -> Result<()>;

    async fn labels_for_mr(&self, mr_id: LocalId) -> Result<Vec<Label>>;
    async fn reviewers_for_mr(&self, mr_id: LocalId) -> Result<Vec<LocalId>>;
    async fn approvers_for_mr(&self, mr_id: LocalId) -> Result<Vec<LocalId>>;

    async fn open_mrs_for_repo(&self, repository_id: LocalId) -> Result<Vec<MergeRequest>>;
    async fn open_mrs_targeting_branch(&self, repository_id: LocalId, branch: &str) -> Result<Vec<MergeRequest>>;
    async fn open_mrs_without_reviewers(&self, repository_id: LocalId) -> Result<Vec<MergeRequest>>;

    /// Count of currently-open MRs in `repository_id` listing `user_id` as
    /// a reviewer but not as an approver — the §4.6 workload figure.
    async fn reviewer_workload(&self, repository_id: LocalId, user_id: LocalId) -> Result<i64>;

    async fn ensure_label(&self, name: &str, color: &str, text_color: &str) -> Result<Label>;

    // -- Comments / discussions -------------------------------------------
    async fn upsert_comment(&self, input: CommentInput) -> Result<CommentUpsertResult>;
    async fn clear_is_last_in_thread_except(&self, discussion_id: &str, keep: &HashSet<RemoteId>) -> Result<()>;
    async fn comments_for_mrs(&self, mr_ids: &[LocalId]) -> Result<HashMap<LocalId, Vec<Comment>>>;

    // -- Timeline ----------------------------------------------------------
    /// §4.3: find a row with identical `(mr, kind, actor, target, comment)`
    /// whose timestamp is within `window` of `near`.
    async fn find_recent_action(&self, key: ActionKey, near: DateTime<Utc>, window: Duration) -> Result<Option<Action>>;
    async fn insert_action(&self, new: NewAction) -> Result<Action>;
    async fn actions_for_mrs(&self, mr_ids: &[LocalId]) -> Result<HashMap<LocalId, Vec<Action>>>;
    async fn has_action(&self, mr_id: LocalId, kind: ActionKind) -> Result<bool>;

    // -- Policy / SLA / holidays -------------------------------------------
    async fn policy_for_repo(&self, repository_id: LocalId) -> Result<PolicyConfig>;
    async fn policies_for_repos(&self, repository_ids: &[LocalId]) -> Result<HashMap<LocalId, PolicyConfig>>;
    async fn save_policy(&self, policy: &PolicyConfig) -> Result<()>;

    async fn sla_for_repo(&self, repository_id: LocalId) -> Result<Sla>;
    async fn slas_for_repos(&self, repository_ids: &[LocalId]) -> Result<HashMap<LocalId, Sla>>;
    async fn save_sla(&self, sla: &Sla) -> Result<()>;

    // -- Reviewer pools ------------------------------------------------------
    async fn possible_reviewers(&self, repository_id: LocalId) -> Result<Vec<LocalId>>;
    async fn set_possible_reviewers(&self, repository_id: LocalId, user_ids: &[LocalId]) -> Result<()>;
    async fn label_reviewers(&self, repository_id: LocalId) -> Result<HashMap<String, Vec<LocalId>>>;
    async fn set_label_reviewers(&self, repository_id: LocalId, label: &str, user_ids: &[LocalId]) -> Result<()>;
    async fn release_managers(&self, repository_id: LocalId) -> Result<Vec<LocalId>>;
    async fn set_release_managers(&self, repository_id: LocalId, user_ids: &[LocalId]) -> Result<()>;
    async fn vacationing_users(&self, user_ids: &[LocalId]) -> Result<HashSet<LocalId>>;

    // -- Release orchestration -----------------------------------------------
    async fn current_release_mr(&self, repository_id: LocalId, dev_branch: &str, bot_user_id: LocalId, release_labels: &HashSet<String>) -> Result<Option<MergeRequest>>;
    async fn save_feature_release_branch(&self, branch: FeatureReleaseBranch) -> Result<FeatureReleaseBranch>;
    async fn feature_release_branches(&self, repository_id: LocalId) -> Result<Vec<FeatureReleaseBranch>>;

    // -- Deploy tracking ------------------------------------------------------
    async fn deploy_rules_for_repo(&self, repository_id: LocalId) -> Result<Vec<DeployTrackingRule>>;
    async fn save_deploy_rule(&self, rule: DeployTrackingRule) -> Result<DeployTrackingRule>;
    async fn delete_deploy_rule(&self, repository_id: LocalId, chat_id: LocalId) -> Result<()>;
    async fn last_tracked_status(&self, rule_id: LocalId, job_id: i64) -> Result<Option<DeployJobStatus>>;
    async fn save_tracked_deploy_job(&self, job: TrackedDeployJob) -> Result<()>;

    // -- Notification dedup ---------------------------------------------------
    async fn notification_snapshot(&self, mr_id: LocalId, recipient_id: LocalId, kind: &str) -> Result<Option<String>>;
    async fn save_notification_snapshot(&self, mr_id: LocalId, recipient_id: LocalId, kind: &str, snapshot: &str, at: DateTime<Utc>) -> Result<()>;

    // -- Daily digest preferences ----------------------------------------------
    async fn daily_digest_preference(&self, user_id: LocalId) -> Result<Option<DailyDigestPreference>>;
    async fn set_daily_digest_preference(&self, user_id: LocalId, offset_minutes: i32) -> Result<()>;
    async fn all_daily_digest_subscribers(&self) -> Result<Vec<(User, DailyDigestPreference)>>;

    async fn run_migrations(&self) -> Result<()>;
}
