//! Shared domain types for the review-bot workspace.
//!
//! Every other crate in the workspace depends on this one for the entity
//! shapes of §3 of the specification, the closed `ActionKind` set, and the
//! workspace-wide `Error`/`Result` type. Nothing in here talks to a network
//! or a database; those live in `review-store`, `review-platform`, and
//! `review-chat`.

pub mod action;
pub mod entities;
pub mod error;
pub mod ids;
pub mod policy;

pub use action::{Action, ActionKind};
pub use error::{Error, Result};
pub use ids::{ChatId, CommentId, LabelId, LocalId, RemoteId, RepoId, UserId};
