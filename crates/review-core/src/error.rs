//! Workspace-wide error type.
//!
//! Lower-level crates (`review-store`, `review-platform`, `review-chat`)
//! define their own `Error` and convert into this one at the boundary where
//! a caller no longer needs to distinguish "store" from "transport"
//! failures — mirroring how `dashflow-remote-node::Error` wraps
//! `dashflow::error::Error` with `#[from]` rather than re-stringifying it.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("remote platform error: {0}")]
    Platform(String),

    #[error("chat transport error: {0}")]
    Chat(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    #[must_use]
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    #[must_use]
    pub fn platform(msg: impl Into<String>) -> Self {
        Self::Platform(msg.into())
    }
}
