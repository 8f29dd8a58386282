//! Newtype identifiers.
//!
//! Remote ids (from the code-hosting platform) and local ids (primary keys
//! assigned by the store) are kept as distinct types so that a reconciler
//! bug that accidentally mixes the two fails to compile rather than
//! silently upserting against the wrong row.

use serde::{Deserialize, Serialize};

macro_rules! newtype_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            Default,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Serialize,
            Deserialize,
        )]
        pub struct $name(pub i64);

        impl $name {
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

/// Local auto-increment primary key, scoped to whichever table is in
/// context; not unique across tables.
newtype_id!(LocalId);

/// Opaque remote identifier from the code-hosting platform.
newtype_id!(RemoteId);

/// Remote id of a Repository.
newtype_id!(RepoId);

/// Remote id of a User.
newtype_id!(UserId);

/// `Label.name` stands in for an id (labels are unique by name); this
/// wraps the local row id of the `Label` table.
newtype_id!(LabelId);

/// Local row id of a Comment (the remote note id is stored separately
/// since it, not this id, is what dedup and upsert key off of).
newtype_id!(CommentId);

/// External chat id (VK-style: a conversation id on the chat platform).
newtype_id!(ChatId);
