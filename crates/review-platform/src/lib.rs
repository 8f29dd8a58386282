//! Remote code-hosting platform client (§6, "consumed" contract) and a
//! GitLab-backed adapter, out of the specification's core scope but
//! implemented here since the core is unusable without a concrete client.

pub mod error;
pub mod gitlab_adapter;
pub mod rate_limiter;
pub mod types;

use async_trait::async_trait;

pub use error::{Error, Result};
pub use gitlab_adapter::GitlabPlatform;
pub use rate_limiter::RateLimiter;
use types::{
    MergeRequestUpdate, NewMergeRequest, RemoteApproval, RemoteBranch, RemoteDiscussion,
    RemoteJob, RemoteLabel, RemoteMergeRequest, RemoteProject, RemoteUser,
};

/// Operations the core consumes from the remote platform (§6). All paged
/// listing methods return every page: an adapter drains the `next-page`
/// token internally so the core never deals with pagination directly.
#[cfg_attr(feature = "test-util", mockall::automock)]
#[async_trait]
pub trait RemotePlatform: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<RemoteProject>>;
    async fn list_project_merge_requests(&self, project_id: i64, state: &str) -> Result<Vec<RemoteMergeRequest>>;
    async fn get_merge_request(&self, project_id: i64, iid: i64) -> Result<RemoteMergeRequest>;
    async fn update_merge_request(&self, project_id: i64, iid: i64, update: MergeRequestUpdate) -> Result<RemoteMergeRequest>;
    async fn create_merge_request(&self, project_id: i64, new_mr: NewMergeRequest) -> Result<RemoteMergeRequest>;
    async fn get_merge_request_commits(&self, project_id: i64, iid: i64) -> Result<Vec<String>>;
    async fn get_merge_request_approvals(&self, project_id: i64, iid: i64) -> Result<Vec<RemoteApproval>>;
    async fn list_merge_request_discussions(&self, project_id: i64, iid: i64) -> Result<Vec<RemoteDiscussion>>;
    async fn list_labels(&self, project_id: i64) -> Result<Vec<RemoteLabel>>;
    async fn create_label(&self, project_id: i64, label: RemoteLabel) -> Result<RemoteLabel>;
    async fn get_branch(&self, project_id: i64, name: &str) -> Result<RemoteBranch>;
    async fn create_branch(&self, project_id: i64, name: &str, from_ref: &str) -> Result<RemoteBranch>;
    async fn list_users(&self, project_id: i64) -> Result<Vec<RemoteUser>>;
    async fn get_user(&self, user_id: i64) -> Result<RemoteUser>;
    async fn get_job(&self, project_id: i64, job_id: i64) -> Result<RemoteJob>;
    async fn list_project_jobs(&self, project_id: i64) -> Result<Vec<RemoteJob>>;
}
