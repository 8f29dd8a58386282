//! Per-repository policy configuration (§3: PolicyConfig).

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::ids::LocalId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoReleaseBranchConfig {
    pub prefix: String,
    pub dev_branch: String,
}

/// The full policy bundle for one repository. `review-state`'s
/// `MRDataCache` loads these by repo-id set in a single batch per the
/// cache contract in §4.5.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub repository_id: LocalId,
    pub holidays: HashSet<NaiveDate>,
    pub block_labels: HashSet<String>,
    pub release_labels: HashSet<String>,
    pub release_ready_labels: HashSet<String>,
    pub feature_release_labels: HashSet<String>,
    pub issue_prefixes: HashSet<String>,
    pub auto_release_branch: Option<AutoReleaseBranchConfig>,
}
