//! Wire-shape DTOs returned by [`crate::RemotePlatform`], kept deliberately
//! separate from `review_core::entities` — the reconciler maps these onto
//! local rows, field by field, per §4.4 step 2.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteProject {
    pub id: i64,
    pub name: String,
    pub path_with_namespace: String,
    pub web_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteUser {
    pub id: i64,
    pub username: String,
    pub name: String,
    pub public_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLabel {
    pub name: String,
    pub color: String,
    pub text_color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteMergeRequest {
    pub id: i64,
    pub iid: i64,
    pub project_id: i64,
    pub title: String,
    pub description: String,
    pub source_branch: String,
    pub target_branch: String,
    pub state: String,
    pub draft: bool,
    pub author_id: i64,
    pub assignee_id: Option<i64>,
    pub reviewer_ids: Vec<i64>,
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub sha: String,
    pub source_project_id: i64,
    pub target_project_id: i64,
    pub web_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteApproval {
    pub user_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteNote {
    pub id: i64,
    pub author_id: i64,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub system: bool,
    pub resolvable: bool,
    pub resolved: bool,
    pub resolved_by: Option<i64>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteDiscussion {
    pub id: String,
    pub notes: Vec<RemoteNote>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteBranch {
    pub name: String,
    pub commit_sha: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum RemoteJobStatus {
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteJob {
    pub id: i64,
    pub status: RemoteJobStatus,
}

/// Fields needed to update an MR's reviewer set (§6: `UpdateMergeRequest`).
#[derive(Debug, Clone, Default)]
pub struct MergeRequestUpdate {
    pub reviewer_ids: Option<Vec<i64>>,
    pub target_branch: Option<String>,
    pub labels: Option<Vec<String>>,
    pub description: Option<String>,
}

/// Fields needed to open a new MR (§6: `CreateMergeRequest`).
#[derive(Debug, Clone)]
pub struct NewMergeRequest {
    pub source_branch: String,
    pub target_branch: String,
    pub title: String,
    pub description: String,
    pub labels: Vec<String>,
}
