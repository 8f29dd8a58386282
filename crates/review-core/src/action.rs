//! The closed `ActionKind` set and the `Action` (timeline row) shape.
//!
//! This type is shared by `review-timeline` (which persists it),
//! `review-reconciler` (which emits it), and `review-state`/`review-clock`
//! (which replay it). Keeping it in `review-core` avoids a dependency
//! cycle between those three.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::LocalId;

/// §3: "Action kinds (closed set)".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    DraftToggled,
    Merged,
    Closed,
    ReviewerAssigned,
    ReviewerRemoved,
    Approved,
    Unapproved,
    CommentAdded,
    CommentResolved,
    FullyApproved,
    BlockLabelAdded,
    BlockLabelRemoved,
    ReleaseReadyLabelAdded,
}

/// A single append-only Timeline row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: LocalId,
    pub mr_id: LocalId,
    pub kind: ActionKind,
    pub actor_id: Option<LocalId>,
    pub target_user_id: Option<LocalId>,
    pub comment_id: Option<LocalId>,
    pub timestamp: DateTime<Utc>,
    pub metadata: String,
}

/// The fields that identify a `Record` call for dedup purposes (§4.3):
/// `(mr, kind, actor, target, comment)`. Metadata and timestamp are
/// deliberately excluded — §9 notes this is accepted behavior, not a bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionKey {
    pub mr_id: LocalId,
    pub kind: ActionKind,
    pub actor_id: Option<LocalId>,
    pub target_user_id: Option<LocalId>,
    pub comment_id: Option<LocalId>,
}

impl Action {
    #[must_use]
    pub fn key(&self) -> ActionKey {
        ActionKey {
            mr_id: self.mr_id,
            kind: self.kind,
            actor_id: self.actor_id,
            target_user_id: self.target_user_id,
            comment_id: self.comment_id,
        }
    }
}

/// Draft-toggle metadata payload, e.g. `{"draft": true}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DraftToggleMetadata {
    pub draft: bool,
}
