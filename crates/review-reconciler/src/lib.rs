//! The Reconciler (§4.4): three periodic passes per tick per subscribed
//! repository, plus the single-MR `SyncMR` upsert and discussion sync it
//! drives.

pub mod discussions;
pub mod email_backfill;
pub mod mr_sync;
pub mod repository;
pub mod task_id;

pub use review_core::Result;
