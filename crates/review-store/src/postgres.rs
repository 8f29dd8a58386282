//! `sqlx`/Postgres implementation of the [`Store`](crate::Store) port.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use review_core::action::{Action, ActionKey, ActionKind};
use review_core::entities::{
    Chat, ChatKind, ChatUser, Comment, DailyDigestPreference, DeployJobStatus,
    DeployTrackingRule, FeatureReleaseBranch, Label, MergeRequest, RawState,
    RepositorySubscription, ReleaseSubscription, Repository, Sla, TrackedDeployJob, User,
};
use review_core::ids::{ChatId, LocalId, RemoteId, RepoId, UserId};
use review_core::policy::PolicyConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::error::{Error, Result};
use crate::types::{CommentInput, CommentUpsertResult, MrUpsertResult, NewAction, RemoteMrFields, SetDiff};
use crate::Store;

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(10).connect(dsn).await?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn raw_state_to_str(state: RawState) -> &'static str {
    match state {
        RawState::Opened => "opened",
        RawState::Closed => "closed",
        RawState::Merged => "merged",
        RawState::Locked => "locked",
    }
}

fn map_repository(row: &sqlx::postgres::PgRow) -> Result<Repository> {
    Ok(Repository {
        id: LocalId(row.try_get::<i64, _>("id")?),
        remote_id: RepoId(row.try_get::<i64, _>("remote_id")?),
        name: row.try_get("name")?,
        path_with_namespace: row.try_get("path_with_namespace")?,
        url: row.try_get("url")?,
    })
}

fn map_user(row: &sqlx::postgres::PgRow) -> Result<User> {
    Ok(User {
        id: LocalId(row.try_get::<i64, _>("id")?),
        remote_id: UserId(row.try_get::<i64, _>("remote_id")?),
        username: row.try_get("username")?,
        display_name: row.try_get("display_name")?,
        email: row.try_get("email")?,
        on_vacation: row.try_get("on_vacation")?,
        locked: row.try_get("locked")?,
        email_fetched: row.try_get("email_fetched")?,
        email_fetched_at: row.try_get("email_fetched_at")?,
    })
}

fn map_mr(row: &sqlx::postgres::PgRow) -> Result<MergeRequest> {
    let raw_state: String = row.try_get("raw_state")?;
    Ok(MergeRequest {
        id: LocalId(row.try_get::<i64, _>("id")?),
        remote_id: RemoteId(row.try_get::<i64, _>("remote_id")?),
        iid: row.try_get("iid")?,
        repository_id: LocalId(row.try_get::<i64, _>("repository_id")?),
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        source_branch: row.try_get("source_branch")?,
        target_branch: row.try_get("target_branch")?,
        raw_state: RawState::from_remote_str(&raw_state),
        draft: row.try_get("draft")?,
        author_id: LocalId(row.try_get::<i64, _>("author_id")?),
        assignee_id: row.try_get::<Option<i64>, _>("assignee_id")?.map(LocalId),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        merged_at: row.try_get("merged_at")?,
        closed_at: row.try_get("closed_at")?,
        source_sha: row.try_get("source_sha")?,
        target_sha: row.try_get("target_sha")?,
        source_project_id: RepoId(row.try_get::<i64, _>("source_project_id")?),
        target_project_id: RepoId(row.try_get::<i64, _>("target_project_id")?),
        task_id: row.try_get("task_id")?,
        url: row.try_get("url")?,
        last_update: row.try_get("last_update")?,
    })
}

fn map_label(row: &sqlx::postgres::PgRow) -> Result<Label> {
    Ok(Label {
        id: review_core::ids::LabelId(row.try_get::<i64, _>("id")?),
        name: row.try_get("name")?,
        color: row.try_get("color")?,
        text_color: row.try_get("text_color")?,
    })
}

fn map_comment(row: &sqlx::postgres::PgRow) -> Result<Comment> {
    Ok(Comment {
        id: LocalId(row.try_get::<i64, _>("id")?),
        remote_note_id: RemoteId(row.try_get::<i64, _>("remote_note_id")?),
        discussion_id: row.try_get("discussion_id")?,
        mr_id: LocalId(row.try_get::<i64, _>("mr_id")?),
        author_id: LocalId(row.try_get::<i64, _>("author_id")?),
        body: row.try_get("body")?,
        resolvable: row.try_get("resolvable")?,
        resolved: row.try_get("resolved")?,
        resolved_by: row.try_get::<Option<i64>, _>("resolved_by")?.map(LocalId),
        resolved_at: row.try_get("resolved_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        thread_starter_id: row.try_get::<Option<i64>, _>("thread_starter_id")?.map(LocalId),
        is_last_in_thread: row.try_get("is_last_in_thread")?,
    })
}

fn map_action(row: &sqlx::postgres::PgRow) -> Result<Action> {
    let kind: String = row.try_get("kind")?;
    Ok(Action {
        id: LocalId(row.try_get::<i64, _>("id")?),
        mr_id: LocalId(row.try_get::<i64, _>("mr_id")?),
        kind: action_kind_from_str(&kind),
        actor_id: row.try_get::<Option<i64>, _>("actor_id")?.map(LocalId),
        target_user_id: row.try_get::<Option<i64>, _>("target_user_id")?.map(LocalId),
        comment_id: row.try_get::<Option<i64>, _>("comment_id")?.map(LocalId),
        timestamp: row.try_get("timestamp")?,
        metadata: row.try_get("metadata")?,
    })
}

fn action_kind_to_str(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::DraftToggled => "draft_toggled",
        ActionKind::Merged => "merged",
        ActionKind::Closed => "closed",
        ActionKind::ReviewerAssigned => "reviewer_assigned",
        ActionKind::ReviewerRemoved => "reviewer_removed",
        ActionKind::Approved => "approved",
        ActionKind::Unapproved => "unapproved",
        ActionKind::CommentAdded => "comment_added",
        ActionKind::CommentResolved => "comment_resolved",
        ActionKind::FullyApproved => "fully_approved",
        ActionKind::BlockLabelAdded => "block_label_added",
        ActionKind::BlockLabelRemoved => "block_label_removed",
        ActionKind::ReleaseReadyLabelAdded => "release_ready_label_added",
    }
}

fn action_kind_from_str(s: &str) -> ActionKind {
    match s {
        "merged" => ActionKind::Merged,
        "closed" => ActionKind::Closed,
        "reviewer_assigned" => ActionKind::ReviewerAssigned,
        "reviewer_removed" => ActionKind::ReviewerRemoved,
        "approved" => ActionKind::Approved,
        "unapproved" => ActionKind::Unapproved,
        "comment_added" => ActionKind::CommentAdded,
        "comment_resolved" => ActionKind::CommentResolved,
        "fully_approved" => ActionKind::FullyApproved,
        "block_label_added" => ActionKind::BlockLabelAdded,
        "block_label_removed" => ActionKind::BlockLabelRemoved,
        "release_ready_label_added" => ActionKind::ReleaseReadyLabelAdded,
        _ => ActionKind::DraftToggled,
    }
}

fn chat_kind_to_str(kind: ChatKind) -> &'static str {
    match kind {
        ChatKind::Private => "private",
        ChatKind::Group => "group",
        ChatKind::Channel => "channel",
    }
}

fn chat_kind_from_str(s: &str) -> ChatKind {
    match s {
        "group" => ChatKind::Group,
        "channel" => ChatKind::Channel,
        _ => ChatKind::Private,
    }
}

fn map_chat(row: &sqlx::postgres::PgRow) -> Result<Chat> {
    let kind: String = row.try_get("kind")?;
    Ok(Chat {
        id: LocalId(row.try_get::<i64, _>("id")?),
        external_chat_id: ChatId(row.try_get::<i64, _>("external_chat_id")?),
        kind: chat_kind_from_str(&kind),
        title: row.try_get("title")?,
    })
}

fn deploy_status_to_str(status: DeployJobStatus) -> &'static str {
    match status {
        DeployJobStatus::Pending => "pending",
        DeployJobStatus::Running => "running",
        DeployJobStatus::Success => "success",
        DeployJobStatus::Failed => "failed",
        DeployJobStatus::Canceled => "canceled",
    }
}

fn deploy_status_from_str(s: &str) -> DeployJobStatus {
    match s {
        "running" => DeployJobStatus::Running,
        "success" => DeployJobStatus::Success,
        "failed" => DeployJobStatus::Failed,
        "canceled" => DeployJobStatus::Canceled,
        _ => DeployJobStatus::Pending,
    }
}

/// Replaces the rows of a two-column association table for one owner id
/// with `new_ids`, computing the diff by identity first (§4.1).
async fn replace_association(
    tx: &mut Transaction<'_, Postgres>,
    table: &str,
    owner_col: &str,
    owner_id: i64,
    member_col: &str,
    new_ids: &[i64],
) -> Result<SetDiff<i64>> {
    let existing: Vec<i64> = sqlx::query(&format!(
        "SELECT {member_col} FROM {table} WHERE {owner_col} = $1"
    ))
    .bind(owner_id)
    .fetch_all(&mut **tx)
    .await?
    .iter()
    .map(|r| r.try_get::<i64, _>(0))
    .collect::<std::result::Result<_, _>>()?;

    let diff = SetDiff::compute(&existing, new_ids);

    for removed in &diff.removed {
        sqlx::query(&format!(
            "DELETE FROM {table} WHERE {owner_col} = $1 AND {member_col} = $2"
        ))
        .bind(owner_id)
        .bind(removed)
        .execute(&mut **tx)
        .await?;
    }
    for added in &diff.added {
        sqlx::query(&format!(
            "INSERT INTO {table} ({owner_col}, {member_col}) VALUES ($1, $2) ON CONFLICT DO NOTHING"
        ))
        .bind(owner_id)
        .bind(added)
        .execute(&mut **tx)
        .await?;
    }

    Ok(diff)
}

#[async_trait]
impl Store for PostgresStore {
    async fn upsert_repository(&self, remote_id: RepoId, name: &str, path_with_namespace: &str, url: &str) -> Result<Repository> {
        let row = sqlx::query(
            "INSERT INTO repositories (remote_id, name, path_with_namespace, url) VALUES ($1, $2, $3, $4)
             ON CONFLICT (remote_id) DO UPDATE SET name = EXCLUDED.name, path_with_namespace = EXCLUDED.path_with_namespace, url = EXCLUDED.url
             RETURNING id, remote_id, name, path_with_namespace, url",
        )
        .bind(remote_id.get())
        .bind(name)
        .bind(path_with_namespace)
        .bind(url)
        .fetch_one(&self.pool)
        .await?;
        map_repository(&row)
    }

    async fn all_repositories(&self) -> Result<Vec<Repository>> {
        let rows = sqlx::query("SELECT id, remote_id, name, path_with_namespace, url FROM repositories")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_repository).collect()
    }

    async fn repository_by_local_id(&self, id: LocalId) -> Result<Option<Repository>> {
        let row = sqlx::query("SELECT id, remote_id, name, path_with_namespace, url FROM repositories WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_repository).transpose()
    }

    async fn repository_by_path(&self, path_with_namespace: &str) -> Result<Option<Repository>> {
        let row = sqlx::query("SELECT id, remote_id, name, path_with_namespace, url FROM repositories WHERE path_with_namespace = $1")
            .bind(path_with_namespace)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_repository).transpose()
    }

    async fn upsert_user(&self, remote_id: UserId, username: &str, display_name: &str) -> Result<User> {
        let row = sqlx::query(
            "INSERT INTO users (remote_id, username, display_name) VALUES ($1, $2, $3)
             ON CONFLICT (remote_id) DO UPDATE SET username = EXCLUDED.username, display_name = EXCLUDED.display_name
             RETURNING id, remote_id, username, display_name, email, on_vacation, locked, email_fetched, email_fetched_at",
        )
        .bind(remote_id.get())
        .bind(username)
        .bind(display_name)
        .fetch_one(&self.pool)
        .await?;
        map_user(&row)
    }

    async fn user_by_local_id(&self, id: LocalId) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, remote_id, username, display_name, email, on_vacation, locked, email_fetched, email_fetched_at FROM users WHERE id = $1",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_user).transpose()
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, remote_id, username, display_name, email, on_vacation, locked, email_fetched, email_fetched_at FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_user).transpose()
    }

    async fn users_needing_email_fetch(&self, limit: i64) -> Result<Vec<User>> {
        let rows = sqlx::query(
            "SELECT id, remote_id, username, display_name, email, on_vacation, locked, email_fetched, email_fetched_at
             FROM users WHERE (email IS NULL OR email = '') AND email_fetched = FALSE LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_user).collect()
    }

    async fn set_user_email(&self, user_id: LocalId, email: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE users SET email = $2 WHERE id = $1")
            .bind(user_id.get())
            .bind(email)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_email_fetched(&self, user_id: LocalId, fetched: bool) -> Result<()> {
        sqlx::query("UPDATE users SET email_fetched = $2, email_fetched_at = now() WHERE id = $1")
            .bind(user_id.get())
            .bind(fetched)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reset_stale_email_fetched(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE users SET email_fetched = FALSE
             WHERE (email IS NULL OR email = '') AND email_fetched = TRUE AND email_fetched_at < $1",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn set_user_vacation(&self, user_id: LocalId, on_vacation: bool) -> Result<()> {
        sqlx::query("UPDATE users SET on_vacation = $2 WHERE id = $1")
            .bind(user_id.get())
            .bind(on_vacation)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_chat(&self, external_chat_id: ChatId, kind: ChatKind, title: &str) -> Result<Chat> {
        let row = sqlx::query(
            "INSERT INTO chats (external_chat_id, kind, title) VALUES ($1, $2, $3)
             ON CONFLICT (external_chat_id) DO UPDATE SET kind = EXCLUDED.kind, title = EXCLUDED.title
             RETURNING id, external_chat_id, kind, title",
        )
        .bind(external_chat_id.get())
        .bind(chat_kind_to_str(kind))
        .bind(title)
        .fetch_one(&self.pool)
        .await?;
        map_chat(&row)
    }

    async fn upsert_chat_user(&self, external_user_id: &str) -> Result<ChatUser> {
        let row = sqlx::query(
            "INSERT INTO chat_users (external_user_id) VALUES ($1)
             ON CONFLICT (external_user_id) DO UPDATE SET external_user_id = EXCLUDED.external_user_id
             RETURNING id, external_user_id",
        )
        .bind(external_user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(ChatUser {
            id: LocalId(row.try_get::<i64, _>("id")?),
            external_user_id: row.try_get("external_user_id")?,
        })
    }

    async fn chat_user_by_username_prefix(&self, username: &str) -> Result<Option<ChatUser>> {
        let pattern = format!("{username}@%");
        let row = sqlx::query("SELECT id, external_user_id FROM chat_users WHERE external_user_id LIKE $1 LIMIT 1")
            .bind(pattern)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            Ok(ChatUser {
                id: LocalId(r.try_get::<i64, _>("id")?),
                external_user_id: r.try_get("external_user_id")?,
            })
        })
        .transpose()
    }

    async fn subscribe_repo(&self, chat_id: LocalId, repo_id: LocalId, creator_id: LocalId) -> Result<RepositorySubscription> {
        let now = Utc::now();
        let row = sqlx::query(
            "INSERT INTO repository_subscriptions (chat_id, repository_id, creator_id, subscribed_at) VALUES ($1, $2, $3, $4)
             ON CONFLICT (chat_id, repository_id) DO UPDATE SET creator_id = EXCLUDED.creator_id
             RETURNING id, chat_id, repository_id, creator_id, subscribed_at",
        )
        .bind(chat_id.get())
        .bind(repo_id.get())
        .bind(creator_id.get())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(RepositorySubscription {
            id: LocalId(row.try_get::<i64, _>("id")?),
            chat_id: LocalId(row.try_get::<i64, _>("chat_id")?),
            repository_id: LocalId(row.try_get::<i64, _>("repository_id")?),
            creator_id: LocalId(row.try_get::<i64, _>("creator_id")?),
            subscribed_at: row.try_get("subscribed_at")?,
        })
    }

    async fn unsubscribe_repo(&self, chat_id: LocalId, repo_id: LocalId) -> Result<()> {
        sqlx::query("DELETE FROM repository_subscriptions WHERE chat_id = $1 AND repository_id = $2")
            .bind(chat_id.get())
            .bind(repo_id.get())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn subscribed_repo_ids_for_chat(&self, chat_id: LocalId) -> Result<Vec<LocalId>> {
        let rows = sqlx::query("SELECT repository_id FROM repository_subscriptions WHERE chat_id = $1")
            .bind(chat_id.get())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|r| Ok(LocalId(r.try_get::<i64, _>(0)?))).collect()
    }

    async fn subscribed_chats_for_repo(&self, repo_id: LocalId) -> Result<Vec<Chat>> {
        let rows = sqlx::query(
            "SELECT c.id, c.external_chat_id, c.kind, c.title FROM chats c
             JOIN repository_subscriptions s ON s.chat_id = c.id WHERE s.repository_id = $1",
        )
        .bind(repo_id.get())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_chat).collect()
    }

    async fn all_subscribed_repo_ids(&self) -> Result<Vec<LocalId>> {
        let rows = sqlx::query("SELECT DISTINCT repository_id FROM repository_subscriptions")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|r| Ok(LocalId(r.try_get::<i64, _>(0)?))).collect()
    }

    async fn release_subscribe(&self, chat_id: LocalId, repo_id: LocalId, creator_id: LocalId) -> Result<ReleaseSubscription> {
        let now = Utc::now();
        let row = sqlx::query(
            "INSERT INTO release_subscriptions (chat_id, repository_id, creator_id, subscribed_at) VALUES ($1, $2, $3, $4)
             ON CONFLICT (chat_id, repository_id) DO UPDATE SET creator_id = EXCLUDED.creator_id
             RETURNING id, chat_id, repository_id, creator_id, subscribed_at",
        )
        .bind(chat_id.get())
        .bind(repo_id.get())
        .bind(creator_id.get())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(ReleaseSubscription {
            id: LocalId(row.try_get::<i64, _>("id")?),
            chat_id: LocalId(row.try_get::<i64, _>("chat_id")?),
            repository_id: LocalId(row.try_get::<i64, _>("repository_id")?),
            creator_id: LocalId(row.try_get::<i64, _>("creator_id")?),
            subscribed_at: row.try_get("subscribed_at")?,
        })
    }

    async fn release_unsubscribe(&self, chat_id: LocalId, repo_id: LocalId) -> Result<()> {
        sqlx::query("DELETE FROM release_subscriptions WHERE chat_id = $1 AND repository_id = $2")
            .bind(chat_id.get())
            .bind(repo_id.get())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn release_subscribed_chats_for_repo(&self, repo_id: LocalId) -> Result<Vec<Chat>> {
        let rows = sqlx::query(
            "SELECT c.id, c.external_chat_id, c.kind, c.title FROM chats c
             JOIN release_subscriptions s ON s.chat_id = c.id WHERE s.repository_id = $1",
        )
        .bind(repo_id.get())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_chat).collect()
    }

    async fn upsert_mr(&self, fields: RemoteMrFields, label_names: &[String], reviewer_ids: &[LocalId]) -> Result<MrUpsertResult> {
        let mut tx = self.pool.begin().await?;

        let previous_row = sqlx::query(
            "SELECT draft, raw_state FROM merge_requests WHERE remote_id = $1 AND repository_id = $2",
        )
        .bind(fields.remote_id.get())
        .bind(fields.repository_id.get())
        .fetch_optional(&mut *tx)
        .await?;

        let previous_scalar = previous_row
            .as_ref()
            .map(|r| -> Result<(bool, RawState)> {
                let raw: String = r.try_get("raw_state")?;
                Ok((r.try_get("draft")?, RawState::from_remote_str(&raw)))
            })
            .transpose()?;

        let now = Utc::now();
        let row = sqlx::query(
            "INSERT INTO merge_requests
               (remote_id, iid, repository_id, title, description, source_branch, target_branch,
                raw_state, draft, author_id, assignee_id, created_at, updated_at, merged_at, closed_at,
                source_sha, target_sha, source_project_id, target_project_id, task_id, url, last_update)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,$22)
             ON CONFLICT (remote_id, repository_id) DO UPDATE SET
               title = EXCLUDED.title, description = EXCLUDED.description,
               source_branch = EXCLUDED.source_branch, target_branch = EXCLUDED.target_branch,
               raw_state = EXCLUDED.raw_state, draft = EXCLUDED.draft,
               author_id = EXCLUDED.author_id, assignee_id = EXCLUDED.assignee_id,
               updated_at = EXCLUDED.updated_at, merged_at = EXCLUDED.merged_at, closed_at = EXCLUDED.closed_at,
               source_sha = EXCLUDED.source_sha, target_sha = EXCLUDED.target_sha,
               task_id = EXCLUDED.task_id, url = EXCLUDED.url, last_update = EXCLUDED.last_update
             RETURNING id, remote_id, iid, repository_id, title, description, source_branch, target_branch,
                       raw_state, draft, author_id, assignee_id, created_at, updated_at, merged_at, closed_at,
                       source_sha, target_sha, source_project_id, target_project_id, task_id, url, last_update",
        )
        .bind(fields.remote_id.get())
        .bind(fields.iid)
        .bind(fields.repository_id.get())
        .bind(&fields.title)
        .bind(&fields.description)
        .bind(&fields.source_branch)
        .bind(&fields.target_branch)
        .bind(raw_state_to_str(fields.raw_state))
        .bind(fields.draft)
        .bind(fields.author_id.get())
        .bind(fields.assignee_id.map(review_core::ids::LocalId::get))
        .bind(fields.created_at)
        .bind(now)
        .bind(fields.merged_at)
        .bind(fields.closed_at)
        .bind(&fields.source_sha)
        .bind(&fields.target_sha)
        .bind(fields.source_project_id.get())
        .bind(fields.target_project_id.get())
        .bind(&fields.task_id)
        .bind(&fields.url)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        let mr = map_mr(&row)?;

        let old_labels: Vec<String> = sqlx::query(
            "SELECT l.name FROM mr_labels ml JOIN labels l ON l.id = ml.label_id WHERE ml.mr_id = $1",
        )
        .bind(mr.id.get())
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(|r| r.try_get::<String, _>(0))
        .collect::<std::result::Result<_, _>>()?;

        let mut label_ids = Vec::with_capacity(label_names.len());
        for name in label_names {
            let row = sqlx::query(
                "INSERT INTO labels (name, color, text_color) VALUES ($1, '#428BCA', '#FFFFFF')
                 ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name RETURNING id",
            )
            .bind(name)
            .fetch_one(&mut *tx)
            .await?;
            label_ids.push(row.try_get::<i64, _>("id")?);
        }
        replace_association(&mut tx, "mr_labels", "mr_id", mr.id.get(), "label_id", &label_ids).await?;
        let label_diff = SetDiff::compute(&old_labels, label_names);

        let old_reviewers: Vec<i64> = sqlx::query("SELECT user_id FROM mr_reviewers WHERE mr_id = $1")
            .bind(mr.id.get())
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|r| r.try_get::<i64, _>(0))
            .collect::<std::result::Result<_, _>>()?;
        let new_reviewer_ids: Vec<i64> = reviewer_ids.iter().map(|id| id.get()).collect();
        let reviewer_diff_raw = replace_association(&mut tx, "mr_reviewers", "mr_id", mr.id.get(), "user_id", &new_reviewer_ids).await?;
        let _ = old_reviewers;

        tx.commit().await?;

        Ok(MrUpsertResult {
            mr,
            previous: previous_scalar.map(|(draft, raw_state)| review_core::entities::MrSnapshot {
                draft,
                raw_state,
                label_names: old_labels,
                reviewer_ids: vec![],
                approver_ids: vec![],
            }),
            label_diff,
            reviewer_diff: SetDiff {
                added: reviewer_diff_raw.added.into_iter().map(LocalId).collect(),
                removed: reviewer_diff_raw.removed.into_iter().map(LocalId).collect(),
            },
        })
    }

    async fn mr_by_remote_id(&self, repository_id: LocalId, remote_id: RemoteId) -> Result<Option<MergeRequest>> {
        let row = sqlx::query(
            "SELECT id, remote_id, iid, repository_id, title, description, source_branch, target_branch,
                    raw_state, draft, author_id, assignee_id, created_at, updated_at, merged_at, closed_at,
                    source_sha, target_sha, source_project_id, target_project_id, task_id, url, last_update
             FROM merge_requests WHERE repository_id = $1 AND remote_id = $2",
        )
        .bind(repository_id.get())
        .bind(remote_id.get())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_mr).transpose()
    }

    async fn mr_by_local_id(&self, id: LocalId) -> Result<Option<MergeRequest>> {
        let row = sqlx::query(
            "SELECT id, remote_id, iid, repository_id, title, description, source_branch, target_branch,
                    raw_state, draft, author_id, assignee_id, created_at, updated_at, merged_at, closed_at,
                    source_sha, target_sha, source_project_id, target_project_id, task_id, url, last_update
             FROM merge_requests WHERE id = $1",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_mr).transpose()
    }

    async fn mr_by_path_and_iid(&self, path_with_namespace: &str, iid: i64) -> Result<Option<MergeRequest>> {
        let row = sqlx::query(
            "SELECT m.id, m.remote_id, m.iid, m.repository_id, m.title, m.description, m.source_branch, m.target_branch,
                    m.raw_state, m.draft, m.author_id, m.assignee_id, m.created_at, m.updated_at, m.merged_at, m.closed_at,
                    m.source_sha, m.target_sha, m.source_project_id, m.target_project_id, m.task_id, m.url, m.last_update
             FROM merge_requests m JOIN repositories r ON r.id = m.repository_id
             WHERE r.path_with_namespace = $1 AND m.iid = $2",
        )
        .bind(path_with_namespace)
        .bind(iid)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_mr).transpose()
    }

    async fn stale_opened_mr_remote_ids(&self, repository_id: LocalId, seen_remote_ids: &HashSet<RemoteId>) -> Result<Vec<RemoteId>> {
        let rows = sqlx::query("SELECT remote_id FROM merge_requests WHERE repository_id = $1 AND raw_state = 'opened'")
            .bind(repository_id.get())
            .fetch_all(&self.pool)
            .await?;
        let mut stale = Vec::new();
        for row in rows {
            let remote_id = RemoteId(row.try_get::<i64, _>(0)?);
            if !seen_remote_ids.contains(&remote_id) {
                stale.push(remote_id);
            }
        }
        Ok(stale)
    }

    async fn force_close_mr(&self, repository_id: LocalId, remote_id: RemoteId) -> Result<Option<MergeRequest>> {
        let row = sqlx::query(
            "UPDATE merge_requests SET raw_state = 'closed', last_update = now()
             WHERE repository_id = $1 AND remote_id = $2
             RETURNING id, remote_id, iid, repository_id, title, description, source_branch, target_branch,
                       raw_state, draft, author_id, assignee_id, created_at, updated_at, merged_at, closed_at,
                       source_sha, target_sha, source_project_id, target_project_id, task_id, url, last_update",
        )
        .bind(repository_id.get())
        .bind(remote_id.get())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_mr).transpose()
    }

    async fn replace_approvers(&self, mr_id: LocalId, approver_ids: &[LocalId]) -> Result<SetDiff<LocalId>> {
        let mut tx = self.pool.begin().await?;
        let ids: Vec<i64> = approver_ids.iter().map(|id| id.get()).collect();
        let diff = replace_association(&mut tx, "mr_approvers", "mr_id", mr_id.get(), "user_id", &ids).await?;
        tx.commit().await?;
        Ok(SetDiff {
            added: diff.added.into_iter().map(LocalId).collect(),
            removed: diff.removed.into_iter().map(LocalId).collect(),
        })
    }

    async fn clear_approvers(&self, mr_id: LocalId) -> Result<()> {
        sqlx::query("DELETE FROM mr_approvers WHERE mr_id = $1")
            .bind(mr_id.get())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn labels_for_mr(&self, mr_id: LocalId) -> Result<Vec<Label>> {
        let rows = sqlx::query(
            "SELECT l.id, l.name, l.color, l.text_color FROM mr_labels ml JOIN labels l ON l.id = ml.label_id WHERE ml.mr_id = $1",
        )
        .bind(mr_id.get())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_label).collect()
    }

    async fn reviewers_for_mr(&self, mr_id: LocalId) -> Result<Vec<LocalId>> {
        let rows = sqlx::query("SELECT user_id FROM mr_reviewers WHERE mr_id = $1")
            .bind(mr_id.get())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|r| Ok(LocalId(r.try_get::<i64, _>(0)?))).collect()
    }

    async fn approvers_for_mr(&self, mr_id: LocalId) -> Result<Vec<LocalId>> {
        let rows = sqlx::query("SELECT user_id FROM mr_approvers WHERE mr_id = $1")
            .bind(mr_id.get())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|r| Ok(LocalId(r.try_get::<i64, _>(0)?))).collect()
    }

    async fn open_mrs_for_repo(&self, repository_id: LocalId) -> Result<Vec<MergeRequest>> {
        let rows = sqlx::query(
            "SELECT id, remote_id, iid, repository_id, title, description, source_branch, target_branch,
                    raw_state, draft, author_id, assignee_id, created_at, updated_at, merged_at, closed_at,
                    source_sha, target_sha, source_project_id, target_project_id, task_id, url, last_update
             FROM merge_requests WHERE repository_id = $1 AND raw_state IN ('opened', 'locked')",
        )
        .bind(repository_id.get())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_mr).collect()
    }

    async fn open_mrs_targeting_branch(&self, repository_id: LocalId, branch: &str) -> Result<Vec<MergeRequest>> {
        let rows = sqlx::query(
            "SELECT id, remote_id, iid, repository_id, title, description, source_branch, target_branch,
                    raw_state, draft, author_id, assignee_id, created_at, updated_at, merged_at, closed_at,
                    source_sha, target_sha, source_project_id, target_project_id, task_id, url, last_update
             FROM merge_requests WHERE repository_id = $1 AND target_branch = $2 AND raw_state IN ('opened', 'locked')",
        )
        .bind(repository_id.get())
        .bind(branch)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_mr).collect()
    }

    async fn open_mrs_without_reviewers(&self, repository_id: LocalId) -> Result<Vec<MergeRequest>> {
        let rows = sqlx::query(
            "SELECT m.id, m.remote_id, m.iid, m.repository_id, m.title, m.description, m.source_branch, m.target_branch,
                    m.raw_state, m.draft, m.author_id, m.assignee_id, m.created_at, m.updated_at, m.merged_at, m.closed_at,
                    m.source_sha, m.target_sha, m.source_project_id, m.target_project_id, m.task_id, m.url, m.last_update
             FROM merge_requests m
             WHERE m.repository_id = $1 AND m.raw_state = 'opened' AND m.draft = FALSE
               AND NOT EXISTS (SELECT 1 FROM mr_reviewers r WHERE r.mr_id = m.id)",
        )
        .bind(repository_id.get())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_mr).collect()
    }

    async fn reviewer_workload(&self, repository_id: LocalId, user_id: LocalId) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) FROM merge_requests m
             JOIN mr_reviewers r ON r.mr_id = m.id
             WHERE m.repository_id = $1 AND r.user_id = $2 AND m.raw_state IN ('opened', 'locked')
               AND NOT EXISTS (SELECT 1 FROM mr_approvers a WHERE a.mr_id = m.id AND a.user_id = $2)",
        )
        .bind(repository_id.get())
        .bind(user_id.get())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    async fn ensure_label(&self, name: &str, color: &str, text_color: &str) -> Result<Label> {
        let row = sqlx::query(
            "INSERT INTO labels (name, color, text_color) VALUES ($1, $2, $3)
             ON CONFLICT (name) DO UPDATE SET color = EXCLUDED.color, text_color = EXCLUDED.text_color
             RETURNING id, name, color, text_color",
        )
        .bind(name)
        .bind(color)
        .bind(text_color)
        .fetch_one(&self.pool)
        .await?;
        map_label(&row)
    }

    async fn upsert_comment(&self, input: CommentInput) -> Result<CommentUpsertResult> {
        let mut tx = self.pool.begin().await?;

        let previous = sqlx::query("SELECT resolvable, resolved FROM comments WHERE remote_note_id = $1")
            .bind(input.remote_note_id.get())
            .fetch_optional(&mut *tx)
            .await?;
        let was_resolved: Option<(bool, bool)> = previous
            .as_ref()
            .map(|r| -> Result<(bool, bool)> { Ok((r.try_get("resolvable")?, r.try_get("resolved")?)) })
            .transpose()?;
        let is_new = was_resolved.is_none();

        let row = sqlx::query(
            "INSERT INTO comments (remote_note_id, discussion_id, mr_id, author_id, body, resolvable, resolved,
                                    resolved_by, resolved_at, created_at, updated_at, thread_starter_id, is_last_in_thread)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
             ON CONFLICT (remote_note_id) DO UPDATE SET
               body = EXCLUDED.body, resolvable = EXCLUDED.resolvable, resolved = EXCLUDED.resolved,
               resolved_by = EXCLUDED.resolved_by, resolved_at = EXCLUDED.resolved_at,
               updated_at = EXCLUDED.updated_at, thread_starter_id = EXCLUDED.thread_starter_id,
               is_last_in_thread = EXCLUDED.is_last_in_thread
             RETURNING id, remote_note_id, discussion_id, mr_id, author_id, body, resolvable, resolved,
                       resolved_by, resolved_at, created_at, updated_at, thread_starter_id, is_last_in_thread",
        )
        .bind(input.remote_note_id.get())
        .bind(&input.discussion_id)
        .bind(input.mr_id.get())
        .bind(input.author_id.get())
        .bind(&input.body)
        .bind(input.resolvable)
        .bind(input.resolved)
        .bind(input.resolved_by.map(review_core::ids::LocalId::get))
        .bind(input.resolved_at)
        .bind(input.created_at)
        .bind(input.updated_at)
        .bind(input.thread_starter_id.map(review_core::ids::LocalId::get))
        .bind(input.is_last_in_thread)
        .fetch_one(&mut *tx)
        .await?;
        let comment = map_comment(&row)?;

        tx.commit().await?;

        let resolution_transitioned = matches!(was_resolved, Some((true, false))) && comment.resolvable && comment.resolved;

        Ok(CommentUpsertResult { comment, is_new, resolution_transitioned })
    }

    async fn clear_is_last_in_thread_except(&self, discussion_id: &str, keep: &HashSet<RemoteId>) -> Result<()> {
        let keep_ids: Vec<i64> = keep.iter().map(|id| id.get()).collect();
        sqlx::query(
            "UPDATE comments SET is_last_in_thread = FALSE
             WHERE discussion_id = $1 AND is_last_in_thread = TRUE AND NOT (remote_note_id = ANY($2))",
        )
        .bind(discussion_id)
        .bind(&keep_ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn comments_for_mrs(&self, mr_ids: &[LocalId]) -> Result<HashMap<LocalId, Vec<Comment>>> {
        let ids: Vec<i64> = mr_ids.iter().map(|id| id.get()).collect();
        let rows = sqlx::query(
            "SELECT id, remote_note_id, discussion_id, mr_id, author_id, body, resolvable, resolved,
                    resolved_by, resolved_at, created_at, updated_at, thread_starter_id, is_last_in_thread
             FROM comments WHERE mr_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        let mut out: HashMap<LocalId, Vec<Comment>> = HashMap::new();
        for row in &rows {
            let comment = map_comment(row)?;
            out.entry(comment.mr_id).or_default().push(comment);
        }
        Ok(out)
    }

    async fn find_recent_action(&self, key: ActionKey, near: DateTime<Utc>, window: Duration) -> Result<Option<Action>> {
        let from = near - window;
        let to = near + window;
        let row = sqlx::query(
            "SELECT id, mr_id, kind, actor_id, target_user_id, comment_id, timestamp, metadata
             FROM actions
             WHERE mr_id = $1 AND kind = $2
               AND actor_id IS NOT DISTINCT FROM $3
               AND target_user_id IS NOT DISTINCT FROM $4
               AND comment_id IS NOT DISTINCT FROM $5
               AND timestamp BETWEEN $6 AND $7
             LIMIT 1",
        )
        .bind(key.mr_id.get())
        .bind(action_kind_to_str(key.kind))
        .bind(key.actor_id.map(review_core::ids::LocalId::get))
        .bind(key.target_user_id.map(review_core::ids::LocalId::get))
        .bind(key.comment_id.map(review_core::ids::LocalId::get))
        .bind(from)
        .bind(to)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_action).transpose()
    }

    async fn insert_action(&self, new: NewAction) -> Result<Action> {
        let row = sqlx::query(
            "INSERT INTO actions (mr_id, kind, actor_id, target_user_id, comment_id, timestamp, metadata)
             VALUES ($1,$2,$3,$4,$5,$6,$7)
             RETURNING id, mr_id, kind, actor_id, target_user_id, comment_id, timestamp, metadata",
        )
        .bind(new.mr_id.get())
        .bind(action_kind_to_str(new.kind))
        .bind(new.actor_id.map(review_core::ids::LocalId::get))
        .bind(new.target_user_id.map(review_core::ids::LocalId::get))
        .bind(new.comment_id.map(review_core::ids::LocalId::get))
        .bind(new.timestamp)
        .bind(&new.metadata)
        .fetch_one(&self.pool)
        .await?;
        map_action(&row)
    }

    async fn actions_for_mrs(&self, mr_ids: &[LocalId]) -> Result<HashMap<LocalId, Vec<Action>>> {
        let ids: Vec<i64> = mr_ids.iter().map(|id| id.get()).collect();
        let rows = sqlx::query(
            "SELECT id, mr_id, kind, actor_id, target_user_id, comment_id, timestamp, metadata
             FROM actions WHERE mr_id = ANY($1) ORDER BY timestamp ASC",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        let mut out: HashMap<LocalId, Vec<Action>> = HashMap::new();
        for row in &rows {
            let action = map_action(row)?;
            out.entry(action.mr_id).or_default().push(action);
        }
        Ok(out)
    }

    async fn has_action(&self, mr_id: LocalId, kind: ActionKind) -> Result<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM actions WHERE mr_id = $1 AND kind = $2)")
            .bind(mr_id.get())
            .bind(action_kind_to_str(kind))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<bool, _>(0)?)
    }

    async fn policy_for_repo(&self, repository_id: LocalId) -> Result<PolicyConfig> {
        let mut map = self.policies_for_repos(&[repository_id]).await?;
        Ok(map.remove(&repository_id).unwrap_or(PolicyConfig { repository_id, ..Default::default() }))
    }

    async fn policies_for_repos(&self, repository_ids: &[LocalId]) -> Result<HashMap<LocalId, PolicyConfig>> {
        let ids: Vec<i64> = repository_ids.iter().map(|id| id.get()).collect();
        let mut policies: HashMap<LocalId, PolicyConfig> = repository_ids
            .iter()
            .map(|id| (*id, PolicyConfig { repository_id: *id, ..Default::default() }))
            .collect();

        for row in sqlx::query("SELECT repository_id, holiday FROM policy_holidays WHERE repository_id = ANY($1)")
            .bind(&ids)
            .fetch_all(&self.pool)
            .await?
        {
            let repo_id = LocalId(row.try_get::<i64, _>("repository_id")?);
            let date: chrono::NaiveDate = row.try_get("holiday")?;
            policies.entry(repo_id).or_default().holidays.insert(date);
        }
        for (table, field) in [
            ("policy_block_labels", "block_labels"),
            ("policy_release_labels", "release_labels"),
            ("policy_release_ready_labels", "release_ready_labels"),
            ("policy_feature_release_labels", "feature_release_labels"),
        ] {
            for row in sqlx::query(&format!("SELECT repository_id, label_name FROM {table} WHERE repository_id = ANY($1)"))
                .bind(&ids)
                .fetch_all(&self.pool)
                .await?
            {
                let repo_id = LocalId(row.try_get::<i64, _>("repository_id")?);
                let name: String = row.try_get("label_name")?;
                let entry = policies.entry(repo_id).or_default();
                match field {
                    "block_labels" => entry.block_labels.insert(name),
                    "release_labels" => entry.release_labels.insert(name),
                    "release_ready_labels" => entry.release_ready_labels.insert(name),
                    _ => entry.feature_release_labels.insert(name),
                };
            }
        }
        for row in sqlx::query("SELECT repository_id, prefix FROM policy_issue_prefixes WHERE repository_id = ANY($1)")
            .bind(&ids)
            .fetch_all(&self.pool)
            .await?
        {
            let repo_id = LocalId(row.try_get::<i64, _>("repository_id")?);
            let prefix: String = row.try_get("prefix")?;
            policies.entry(repo_id).or_default().issue_prefixes.insert(prefix);
        }
        for row in sqlx::query("SELECT repository_id, prefix, dev_branch FROM policy_auto_release_branch WHERE repository_id = ANY($1)")
            .bind(&ids)
            .fetch_all(&self.pool)
            .await?
        {
            let repo_id = LocalId(row.try_get::<i64, _>("repository_id")?);
            policies.entry(repo_id).or_default().auto_release_branch = Some(review_core::policy::AutoReleaseBranchConfig {
                prefix: row.try_get("prefix")?,
                dev_branch: row.try_get("dev_branch")?,
            });
        }

        Ok(policies)
    }

    async fn save_policy(&self, policy: &PolicyConfig) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let repo_id = policy.repository_id.get();
        sqlx::query("DELETE FROM policy_holidays WHERE repository_id = $1").bind(repo_id).execute(&mut *tx).await?;
        for date in &policy.holidays {
            sqlx::query("INSERT INTO policy_holidays (repository_id, holiday) VALUES ($1, $2)")
                .bind(repo_id)
                .bind(date)
                .execute(&mut *tx)
                .await?;
        }
        for (table, set) in [
            ("policy_block_labels", &policy.block_labels),
            ("policy_release_labels", &policy.release_labels),
            ("policy_release_ready_labels", &policy.release_ready_labels),
            ("policy_feature_release_labels", &policy.feature_release_labels),
        ] {
            sqlx::query(&format!("DELETE FROM {table} WHERE repository_id = $1")).bind(repo_id).execute(&mut *tx).await?;
            for name in set {
                sqlx::query(&format!("INSERT INTO {table} (repository_id, label_name) VALUES ($1, $2)"))
                    .bind(repo_id)
                    .bind(name)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        sqlx::query("DELETE FROM policy_issue_prefixes WHERE repository_id = $1").bind(repo_id).execute(&mut *tx).await?;
        for prefix in &policy.issue_prefixes {
            sqlx::query("INSERT INTO policy_issue_prefixes (repository_id, prefix) VALUES ($1, $2)")
                .bind(repo_id)
                .bind(prefix)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(arb) = &policy.auto_release_branch {
            sqlx::query(
                "INSERT INTO policy_auto_release_branch (repository_id, prefix, dev_branch) VALUES ($1, $2, $3)
                 ON CONFLICT (repository_id) DO UPDATE SET prefix = EXCLUDED.prefix, dev_branch = EXCLUDED.dev_branch",
            )
            .bind(repo_id)
            .bind(&arb.prefix)
            .bind(&arb.dev_branch)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn sla_for_repo(&self, repository_id: LocalId) -> Result<Sla> {
        let row = sqlx::query("SELECT repository_id, review_duration_hours, fixes_duration_hours, assign_count FROM slas WHERE repository_id = $1")
            .bind(repository_id.get())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => Ok(Sla {
                repository_id,
                review_duration_hours: r.try_get("review_duration_hours")?,
                fixes_duration_hours: r.try_get("fixes_duration_hours")?,
                assign_count: r.try_get("assign_count")?,
            }),
            None => Ok(Sla { repository_id, ..Default::default() }),
        }
    }

    async fn slas_for_repos(&self, repository_ids: &[LocalId]) -> Result<HashMap<LocalId, Sla>> {
        let ids: Vec<i64> = repository_ids.iter().map(|id| id.get()).collect();
        let rows = sqlx::query("SELECT repository_id, review_duration_hours, fixes_duration_hours, assign_count FROM slas WHERE repository_id = ANY($1)")
            .bind(&ids)
            .fetch_all(&self.pool)
            .await?;
        let mut out: HashMap<LocalId, Sla> = repository_ids
            .iter()
            .map(|id| (*id, Sla { repository_id: *id, ..Default::default() }))
            .collect();
        for row in &rows {
            let repo_id = LocalId(row.try_get::<i64, _>("repository_id")?);
            out.insert(
                repo_id,
                Sla {
                    repository_id: repo_id,
                    review_duration_hours: row.try_get("review_duration_hours")?,
                    fixes_duration_hours: row.try_get("fixes_duration_hours")?,
                    assign_count: row.try_get("assign_count")?,
                },
            );
        }
        Ok(out)
    }

    async fn save_sla(&self, sla: &Sla) -> Result<()> {
        sqlx::query(
            "INSERT INTO slas (repository_id, review_duration_hours, fixes_duration_hours, assign_count) VALUES ($1,$2,$3,$4)
             ON CONFLICT (repository_id) DO UPDATE SET review_duration_hours = EXCLUDED.review_duration_hours,
               fixes_duration_hours = EXCLUDED.fixes_duration_hours, assign_count = EXCLUDED.assign_count",
        )
        .bind(sla.repository_id.get())
        .bind(sla.review_duration_hours)
        .bind(sla.fixes_duration_hours)
        .bind(sla.assign_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn possible_reviewers(&self, repository_id: LocalId) -> Result<Vec<LocalId>> {
        let rows = sqlx::query("SELECT user_id FROM possible_reviewers WHERE repository_id = $1")
            .bind(repository_id.get())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|r| Ok(LocalId(r.try_get::<i64, _>(0)?))).collect()
    }

    async fn set_possible_reviewers(&self, repository_id: LocalId, user_ids: &[LocalId]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let ids: Vec<i64> = user_ids.iter().map(|id| id.get()).collect();
        replace_association(&mut tx, "possible_reviewers", "repository_id", repository_id.get(), "user_id", &ids).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn label_reviewers(&self, repository_id: LocalId) -> Result<HashMap<String, Vec<LocalId>>> {
        let rows = sqlx::query("SELECT label_name, user_id FROM label_reviewers WHERE repository_id = $1")
            .bind(repository_id.get())
            .fetch_all(&self.pool)
            .await?;
        let mut out: HashMap<String, Vec<LocalId>> = HashMap::new();
        for row in &rows {
            let label: String = row.try_get("label_name")?;
            let user_id = LocalId(row.try_get::<i64, _>("user_id")?);
            out.entry(label).or_default().push(user_id);
        }
        Ok(out)
    }

    async fn set_label_reviewers(&self, repository_id: LocalId, label: &str, user_ids: &[LocalId]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM label_reviewers WHERE repository_id = $1 AND label_name = $2")
            .bind(repository_id.get())
            .bind(label)
            .execute(&mut *tx)
            .await?;
        for user_id in user_ids {
            sqlx::query("INSERT INTO label_reviewers (repository_id, label_name, user_id) VALUES ($1, $2, $3)")
                .bind(repository_id.get())
                .bind(label)
                .bind(user_id.get())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn release_managers(&self, repository_id: LocalId) -> Result<Vec<LocalId>> {
        let rows = sqlx::query("SELECT user_id FROM release_managers WHERE repository_id = $1")
            .bind(repository_id.get())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|r| Ok(LocalId(r.try_get::<i64, _>(0)?))).collect()
    }

    async fn set_release_managers(&self, repository_id: LocalId, user_ids: &[LocalId]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let ids: Vec<i64> = user_ids.iter().map(|id| id.get()).collect();
        replace_association(&mut tx, "release_managers", "repository_id", repository_id.get(), "user_id", &ids).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn vacationing_users(&self, user_ids: &[LocalId]) -> Result<HashSet<LocalId>> {
        let ids: Vec<i64> = user_ids.iter().map(|id| id.get()).collect();
        let rows = sqlx::query("SELECT id FROM users WHERE id = ANY($1) AND on_vacation = TRUE")
            .bind(&ids)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|r| Ok(LocalId(r.try_get::<i64, _>(0)?))).collect()
    }

    async fn current_release_mr(
        &self,
        repository_id: LocalId,
        dev_branch: &str,
        bot_user_id: LocalId,
        release_labels: &HashSet<String>,
    ) -> Result<Option<MergeRequest>> {
        let labels: Vec<String> = release_labels.iter().cloned().collect();
        let row = sqlx::query(
            "SELECT m.id, m.remote_id, m.iid, m.repository_id, m.title, m.description, m.source_branch, m.target_branch,
                    m.raw_state, m.draft, m.author_id, m.assignee_id, m.created_at, m.updated_at, m.merged_at, m.closed_at,
                    m.source_sha, m.target_sha, m.source_project_id, m.target_project_id, m.task_id, m.url, m.last_update
             FROM merge_requests m
             JOIN mr_labels ml ON ml.mr_id = m.id
             JOIN labels l ON l.id = ml.label_id
             WHERE m.repository_id = $1 AND m.target_branch = $2 AND m.raw_state = 'opened'
               AND m.author_id = $3 AND l.name = ANY($4)
             ORDER BY m.created_at DESC LIMIT 1",
        )
        .bind(repository_id.get())
        .bind(dev_branch)
        .bind(bot_user_id.get())
        .bind(&labels)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_mr).transpose()
    }

    async fn save_feature_release_branch(&self, branch: FeatureReleaseBranch) -> Result<FeatureReleaseBranch> {
        let row = sqlx::query(
            "INSERT INTO feature_release_branches (repository_id, mr_id, branch_name, created_at) VALUES ($1,$2,$3,$4)
             RETURNING id, repository_id, mr_id, branch_name, created_at",
        )
        .bind(branch.repository_id.get())
        .bind(branch.mr_id.get())
        .bind(&branch.branch_name)
        .bind(branch.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(FeatureReleaseBranch {
            id: LocalId(row.try_get::<i64, _>("id")?),
            repository_id: LocalId(row.try_get::<i64, _>("repository_id")?),
            mr_id: LocalId(row.try_get::<i64, _>("mr_id")?),
            branch_name: row.try_get("branch_name")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn feature_release_branches(&self, repository_id: LocalId) -> Result<Vec<FeatureReleaseBranch>> {
        let rows = sqlx::query("SELECT id, repository_id, mr_id, branch_name, created_at FROM feature_release_branches WHERE repository_id = $1")
            .bind(repository_id.get())
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(FeatureReleaseBranch {
                    id: LocalId(row.try_get::<i64, _>("id")?),
                    repository_id: LocalId(row.try_get::<i64, _>("repository_id")?),
                    mr_id: LocalId(row.try_get::<i64, _>("mr_id")?),
                    branch_name: row.try_get("branch_name")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn deploy_rules_for_repo(&self, repository_id: LocalId) -> Result<Vec<DeployTrackingRule>> {
        let rows = sqlx::query("SELECT id, repository_id, chat_id, job_url FROM deploy_tracking_rules WHERE repository_id = $1")
            .bind(repository_id.get())
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(DeployTrackingRule {
                    id: LocalId(row.try_get::<i64, _>("id")?),
                    repository_id: LocalId(row.try_get::<i64, _>("repository_id")?),
                    chat_id: LocalId(row.try_get::<i64, _>("chat_id")?),
                    job_url: row.try_get("job_url")?,
                })
            })
            .collect()
    }

    async fn save_deploy_rule(&self, rule: DeployTrackingRule) -> Result<DeployTrackingRule> {
        let row = sqlx::query(
            "INSERT INTO deploy_tracking_rules (repository_id, chat_id, job_url) VALUES ($1,$2,$3)
             ON CONFLICT (repository_id, chat_id) DO UPDATE SET job_url = EXCLUDED.job_url
             RETURNING id, repository_id, chat_id, job_url",
        )
        .bind(rule.repository_id.get())
        .bind(rule.chat_id.get())
        .bind(&rule.job_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(DeployTrackingRule {
            id: LocalId(row.try_get::<i64, _>("id")?),
            repository_id: LocalId(row.try_get::<i64, _>("repository_id")?),
            chat_id: LocalId(row.try_get::<i64, _>("chat_id")?),
            job_url: row.try_get("job_url")?,
        })
    }

    async fn delete_deploy_rule(&self, repository_id: LocalId, chat_id: LocalId) -> Result<()> {
        sqlx::query("DELETE FROM deploy_tracking_rules WHERE repository_id = $1 AND chat_id = $2")
            .bind(repository_id.get())
            .bind(chat_id.get())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn last_tracked_status(&self, rule_id: LocalId, job_id: i64) -> Result<Option<DeployJobStatus>> {
        let row = sqlx::query("SELECT status FROM tracked_deploy_jobs WHERE rule_id = $1 AND job_id = $2 ORDER BY observed_at DESC LIMIT 1")
            .bind(rule_id.get())
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| -> Result<DeployJobStatus> { Ok(deploy_status_from_str(&r.try_get::<String, _>("status")?)) }).transpose()
    }

    async fn save_tracked_deploy_job(&self, job: TrackedDeployJob) -> Result<()> {
        sqlx::query(
            "INSERT INTO tracked_deploy_jobs (rule_id, job_id, status, observed_at) VALUES ($1,$2,$3,$4)",
        )
        .bind(job.rule_id.get())
        .bind(job.job_id)
        .bind(deploy_status_to_str(job.status))
        .bind(job.observed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn notification_snapshot(&self, mr_id: LocalId, recipient_id: LocalId, kind: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT description_snapshot FROM notification_states WHERE mr_id = $1 AND recipient_id = $2 AND kind = $3")
            .bind(mr_id.get())
            .bind(recipient_id.get())
            .bind(kind)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Ok(r.try_get::<String, _>(0)?)).transpose()
    }

    async fn save_notification_snapshot(&self, mr_id: LocalId, recipient_id: LocalId, kind: &str, snapshot: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO notification_states (mr_id, recipient_id, kind, description_snapshot, last_notified_at) VALUES ($1,$2,$3,$4,$5)
             ON CONFLICT (mr_id, recipient_id, kind) DO UPDATE SET description_snapshot = EXCLUDED.description_snapshot, last_notified_at = EXCLUDED.last_notified_at",
        )
        .bind(mr_id.get())
        .bind(recipient_id.get())
        .bind(kind)
        .bind(snapshot)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn daily_digest_preference(&self, user_id: LocalId) -> Result<Option<DailyDigestPreference>> {
        let row = sqlx::query("SELECT user_id, timezone_offset_minutes FROM daily_digest_preferences WHERE user_id = $1")
            .bind(user_id.get())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            Ok(DailyDigestPreference {
                user_id: LocalId(r.try_get::<i64, _>("user_id")?),
                timezone_offset_minutes: r.try_get("timezone_offset_minutes")?,
            })
        })
        .transpose()
    }

    async fn set_daily_digest_preference(&self, user_id: LocalId, offset_minutes: i32) -> Result<()> {
        sqlx::query(
            "INSERT INTO daily_digest_preferences (user_id, timezone_offset_minutes) VALUES ($1, $2)
             ON CONFLICT (user_id) DO UPDATE SET timezone_offset_minutes = EXCLUDED.timezone_offset_minutes",
        )
        .bind(user_id.get())
        .bind(offset_minutes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn all_daily_digest_subscribers(&self) -> Result<Vec<(User, DailyDigestPreference)>> {
        let rows = sqlx::query(
            "SELECT u.id, u.remote_id, u.username, u.display_name, u.email, u.on_vacation, u.locked, u.email_fetched, u.email_fetched_at,
                    d.timezone_offset_minutes
             FROM daily_digest_preferences d JOIN users u ON u.id = d.user_id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let user = map_user(row)?;
                let pref = DailyDigestPreference { user_id: user.id, timezone_offset_minutes: row.try_get("timezone_offset_minutes")? };
                Ok((user, pref))
            })
            .collect()
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}
