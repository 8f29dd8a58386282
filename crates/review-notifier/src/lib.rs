//! Notifier (§4.8): digest builders, SLA labels, mention resolution, and
//! idempotent per-event DM notifications.

pub mod dedup;
pub mod digest;
pub mod mention;
pub mod schedule;
pub mod sla;

pub use digest::{build_review_digest, build_user_actions_digest, DigestEntry, ReviewDigest, UserActionsDigest};
pub use review_core::Result;
