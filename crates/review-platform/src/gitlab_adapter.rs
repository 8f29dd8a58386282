//! `gitlab`-crate-backed [`RemotePlatform`] adapter (§6).
//!
//! Grounded on `dashflow-gitlab`'s use of `GitlabBuilder`/`Gitlab` and the
//! `gitlab::api::{..., Query}` endpoint-builder pattern. That crate's query
//! methods are synchronous, so each call here is dispatched through
//! `spawn_blocking` rather than awaited directly — `dashflow-gitlab` calls
//! them from inside an `async fn` without doing so, which is fine for a
//! one-shot CLI tool but would stall this process's single-threaded
//! periodic driver (§5).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gitlab::api::{projects, users, Query};
use gitlab::{Gitlab, GitlabBuilder};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::rate_limiter::RateLimiter;
use crate::types::{
    MergeRequestUpdate, NewMergeRequest, RemoteApproval, RemoteBranch, RemoteDiscussion, RemoteJob,
    RemoteJobStatus, RemoteLabel, RemoteMergeRequest, RemoteNote, RemoteProject, RemoteUser,
};
use crate::RemotePlatform;

/// Default per-call timeout (§5: "Timeouts on individual remote calls
/// default to 30 s").
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct GitlabPlatform {
    client: Gitlab,
    limiter: RateLimiter,
}

impl GitlabPlatform {
    pub fn connect(base_url: &str, token: &str, limiter: RateLimiter) -> Result<Self> {
        let client = GitlabBuilder::new(base_url.trim_end_matches('/'), token)
            .build()
            .map_err(|e| Error::Transient(e.to_string()))?;
        Ok(Self { client, limiter })
    }

    /// Rate-limits, then runs a blocking `gitlab` query on a blocking-pool
    /// thread so it never parks the async periodic driver.
    async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Gitlab) -> gitlab::api::ApiResult<T, gitlab::RestError> + Send + 'static,
        T: Send + 'static,
    {
        self.limiter.acquire(CALL_TIMEOUT).await?;
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || f(&client))
            .await
            .map_err(|e| Error::Transient(e.to_string()))?
            .map_err(map_api_error)
    }
}

fn map_api_error(err: gitlab::api::ApiError<gitlab::RestError>) -> Error {
    let msg = err.to_string();
    if msg.contains("404") {
        Error::NotFound
    } else {
        Error::Transient(msg)
    }
}

#[derive(Debug, Deserialize)]
struct GlIdRef {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct GlProject {
    id: i64,
    name: String,
    path_with_namespace: String,
    web_url: String,
}

impl From<GlProject> for RemoteProject {
    fn from(p: GlProject) -> Self {
        Self { id: p.id, name: p.name, path_with_namespace: p.path_with_namespace, web_url: p.web_url }
    }
}

#[derive(Debug, Deserialize)]
struct GlUser {
    id: i64,
    username: String,
    name: String,
    public_email: Option<String>,
}

impl From<GlUser> for RemoteUser {
    fn from(u: GlUser) -> Self {
        Self { id: u.id, username: u.username, name: u.name, public_email: u.public_email.filter(|e| !e.is_empty()) }
    }
}

#[derive(Debug, Deserialize)]
struct GlLabel {
    name: String,
    color: String,
    text_color: String,
}

impl From<GlLabel> for RemoteLabel {
    fn from(l: GlLabel) -> Self {
        Self { name: l.name, color: l.color, text_color: l.text_color }
    }
}

#[derive(Debug, Deserialize)]
struct GlMergeRequest {
    id: i64,
    iid: i64,
    project_id: i64,
    title: String,
    #[serde(default)]
    description: String,
    source_branch: String,
    target_branch: String,
    state: String,
    #[serde(default)]
    draft: bool,
    author: GlIdRef,
    assignee: Option<GlIdRef>,
    #[serde(default)]
    reviewers: Vec<GlIdRef>,
    #[serde(default)]
    labels: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    merged_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    sha: Option<String>,
    source_project_id: i64,
    target_project_id: i64,
    web_url: String,
}

impl From<GlMergeRequest> for RemoteMergeRequest {
    fn from(m: GlMergeRequest) -> Self {
        Self {
            id: m.id,
            iid: m.iid,
            project_id: m.project_id,
            title: m.title,
            description: m.description,
            source_branch: m.source_branch,
            target_branch: m.target_branch,
            state: m.state,
            draft: m.draft,
            author_id: m.author.id,
            assignee_id: m.assignee.map(|a| a.id),
            reviewer_ids: m.reviewers.into_iter().map(|r| r.id).collect(),
            labels: m.labels,
            created_at: m.created_at,
            updated_at: m.updated_at,
            merged_at: m.merged_at,
            closed_at: m.closed_at,
            sha: m.sha.unwrap_or_default(),
            source_project_id: m.source_project_id,
            target_project_id: m.target_project_id,
            web_url: m.web_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GlApproval {
    user: GlIdRef,
}

#[derive(Debug, Deserialize)]
struct GlNote {
    id: i64,
    author: GlIdRef,
    body: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    system: bool,
    #[serde(default)]
    resolvable: bool,
    #[serde(default)]
    resolved: bool,
    resolved_by: Option<GlIdRef>,
    resolved_at: Option<DateTime<Utc>>,
}

impl From<GlNote> for RemoteNote {
    fn from(n: GlNote) -> Self {
        Self {
            id: n.id,
            author_id: n.author.id,
            body: n.body,
            created_at: n.created_at,
            updated_at: n.updated_at,
            system: n.system,
            resolvable: n.resolvable,
            resolved: n.resolved,
            resolved_by: n.resolved_by.map(|u| u.id),
            resolved_at: n.resolved_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GlDiscussion {
    id: String,
    #[serde(default)]
    notes: Vec<GlNote>,
}

#[derive(Debug, Deserialize)]
struct GlBranch {
    name: String,
    commit: GlCommit,
}

#[derive(Debug, Deserialize)]
struct GlCommit {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GlJob {
    id: i64,
    status: String,
}

fn job_status_from_str(s: &str) -> RemoteJobStatus {
    match s {
        "running" => RemoteJobStatus::Running,
        "success" => RemoteJobStatus::Success,
        "failed" => RemoteJobStatus::Failed,
        "canceled" => RemoteJobStatus::Canceled,
        _ => RemoteJobStatus::Pending,
    }
}

#[async_trait]
impl RemotePlatform for GitlabPlatform {
    async fn list_projects(&self) -> Result<Vec<RemoteProject>> {
        self.call(|client| {
            let endpoint = projects::Projects::builder().membership(true).build().expect("valid endpoint");
            gitlab::api::paged(endpoint, gitlab::api::Pagination::All).query(client)
        })
        .await
        .map(|v: Vec<GlProject>| v.into_iter().map(Into::into).collect())
    }

    async fn list_project_merge_requests(&self, project_id: i64, state: &str) -> Result<Vec<RemoteMergeRequest>> {
        let state = state.to_string();
        self.call(move |client| {
            let mut builder = projects::merge_requests::MergeRequests::builder();
            builder.project(project_id);
            if state != "all" {
                builder.state(match state.as_str() {
                    "closed" => projects::merge_requests::MergeRequestState::Closed,
                    "merged" => projects::merge_requests::MergeRequestState::Merged,
                    _ => projects::merge_requests::MergeRequestState::Opened,
                });
            }
            let endpoint = builder.build().expect("valid endpoint");
            gitlab::api::paged(endpoint, gitlab::api::Pagination::All).query(client)
        })
        .await
        .map(|v: Vec<GlMergeRequest>| v.into_iter().map(Into::into).collect())
    }

    async fn get_merge_request(&self, project_id: i64, iid: i64) -> Result<RemoteMergeRequest> {
        self.call(move |client| {
            let endpoint = projects::merge_requests::MergeRequest::builder()
                .project(project_id)
                .merge_request(iid as u64)
                .build()
                .expect("valid endpoint");
            endpoint.query(client)
        })
        .await
        .map(|m: GlMergeRequest| m.into())
    }

    async fn update_merge_request(&self, project_id: i64, iid: i64, update: MergeRequestUpdate) -> Result<RemoteMergeRequest> {
        self.call(move |client| {
            let mut builder = projects::merge_requests::EditMergeRequest::builder();
            builder.project(project_id).merge_request(iid as u64);
            if let Some(ids) = &update.reviewer_ids {
                builder.reviewer_ids(ids.iter().map(|id| *id as u64));
            }
            if let Some(branch) = &update.target_branch {
                builder.target_branch(branch.as_str());
            }
            if let Some(labels) = &update.labels {
                builder.labels(labels.iter().cloned());
            }
            if let Some(description) = &update.description {
                builder.description(description.as_str());
            }
            let endpoint = builder.build().expect("valid endpoint");
            endpoint.query(client)
        })
        .await
        .map(|m: GlMergeRequest| m.into())
    }

    async fn create_merge_request(&self, project_id: i64, new_mr: NewMergeRequest) -> Result<RemoteMergeRequest> {
        self.call(move |client| {
            let endpoint = projects::merge_requests::CreateMergeRequest::builder()
                .project(project_id)
                .source_branch(new_mr.source_branch)
                .target_branch(new_mr.target_branch)
                .title(new_mr.title)
                .description(new_mr.description)
                .labels(new_mr.labels)
                .build()
                .expect("valid endpoint");
            endpoint.query(client)
        })
        .await
        .map(|m: GlMergeRequest| m.into())
    }

    async fn get_merge_request_commits(&self, project_id: i64, iid: i64) -> Result<Vec<String>> {
        #[derive(Debug, Deserialize)]
        struct GlCommitRef {
            id: String,
        }
        self.call(move |client| {
            let endpoint = projects::merge_requests::MergeRequestCommits::builder()
                .project(project_id)
                .merge_request(iid as u64)
                .build()
                .expect("valid endpoint");
            gitlab::api::paged(endpoint, gitlab::api::Pagination::All).query(client)
        })
        .await
        .map(|v: Vec<GlCommitRef>| v.into_iter().map(|c| c.id).collect())
    }

    async fn get_merge_request_approvals(&self, project_id: i64, iid: i64) -> Result<Vec<RemoteApproval>> {
        #[derive(Debug, Deserialize)]
        struct GlApprovalState {
            #[serde(default)]
            approved_by: Vec<GlApprovalWrapper>,
        }
        #[derive(Debug, Deserialize)]
        struct GlApprovalWrapper {
            user: GlIdRef,
        }

        self.call(move |client| {
            let endpoint = projects::merge_requests::approvals::MergeRequestApprovalState::builder()
                .project(project_id)
                .merge_request(iid as u64)
                .build()
                .expect("valid endpoint");
            endpoint.query(client)
        })
        .await
        .map(|s: GlApprovalState| s.approved_by.into_iter().map(|w| RemoteApproval { user_id: w.user.id }).collect())
    }

    async fn list_merge_request_discussions(&self, project_id: i64, iid: i64) -> Result<Vec<RemoteDiscussion>> {
        self.call(move |client| {
            let endpoint = projects::merge_requests::discussions::MergeRequestDiscussions::builder()
                .project(project_id)
                .merge_request(iid as u64)
                .build()
                .expect("valid endpoint");
            gitlab::api::paged(endpoint, gitlab::api::Pagination::All).query(client)
        })
        .await
        .map(|v: Vec<GlDiscussion>| {
            v.into_iter()
                .map(|d| RemoteDiscussion { id: d.id, notes: d.notes.into_iter().map(Into::into).collect() })
                .collect()
        })
    }

    async fn list_labels(&self, project_id: i64) -> Result<Vec<RemoteLabel>> {
        self.call(move |client| {
            let endpoint = projects::labels::Labels::builder().project(project_id).build().expect("valid endpoint");
            gitlab::api::paged(endpoint, gitlab::api::Pagination::All).query(client)
        })
        .await
        .map(|v: Vec<GlLabel>| v.into_iter().map(Into::into).collect())
    }

    async fn create_label(&self, project_id: i64, label: RemoteLabel) -> Result<RemoteLabel> {
        self.call(move |client| {
            let endpoint = projects::labels::CreateLabel::builder()
                .project(project_id)
                .name(label.name)
                .color(label.color)
                .build()
                .expect("valid endpoint");
            endpoint.query(client)
        })
        .await
        .map(|l: GlLabel| l.into())
    }

    async fn get_branch(&self, project_id: i64, name: &str) -> Result<RemoteBranch> {
        let name = name.to_string();
        self.call(move |client| {
            let endpoint = projects::repository::branches::Branch::builder()
                .project(project_id)
                .branch(name)
                .build()
                .expect("valid endpoint");
            endpoint.query(client)
        })
        .await
        .map(|b: GlBranch| RemoteBranch { name: b.name, commit_sha: b.commit.id })
    }

    async fn create_branch(&self, project_id: i64, name: &str, from_ref: &str) -> Result<RemoteBranch> {
        let name = name.to_string();
        let from_ref = from_ref.to_string();
        self.call(move |client| {
            let endpoint = projects::repository::branches::CreateBranch::builder()
                .project(project_id)
                .branch(name)
                .ref_(from_ref)
                .build()
                .expect("valid endpoint");
            endpoint.query(client)
        })
        .await
        .map(|b: GlBranch| RemoteBranch { name: b.name, commit_sha: b.commit.id })
    }

    async fn list_users(&self, project_id: i64) -> Result<Vec<RemoteUser>> {
        self.call(move |client| {
            let endpoint = projects::members::ProjectMembers::builder().project(project_id).build().expect("valid endpoint");
            gitlab::api::paged(endpoint, gitlab::api::Pagination::All).query(client)
        })
        .await
        .map(|v: Vec<GlUser>| v.into_iter().map(Into::into).collect())
    }

    async fn get_user(&self, user_id: i64) -> Result<RemoteUser> {
        self.call(move |client| {
            let endpoint = users::User::builder().user(user_id as u64).build().expect("valid endpoint");
            endpoint.query(client)
        })
        .await
        .map(|u: GlUser| u.into())
    }

    async fn get_job(&self, project_id: i64, job_id: i64) -> Result<RemoteJob> {
        self.call(move |client| {
            let endpoint = projects::jobs::Job::builder().project(project_id).job(job_id as u64).build().expect("valid endpoint");
            endpoint.query(client)
        })
        .await
        .map(|j: GlJob| RemoteJob { id: j.id, status: job_status_from_str(&j.status) })
    }

    async fn list_project_jobs(&self, project_id: i64) -> Result<Vec<RemoteJob>> {
        self.call(move |client| {
            let endpoint = projects::jobs::Jobs::builder().project(project_id).build().expect("valid endpoint");
            gitlab::api::paged(endpoint, gitlab::api::Pagination::All).query(client)
        })
        .await
        .map(|v: Vec<GlJob>| v.into_iter().map(|j| RemoteJob { id: j.id, status: job_status_from_str(&j.status) }).collect())
    }
}
