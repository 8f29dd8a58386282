//! The ReleaseOrchestrator (§4.7): release-branch lifecycle, retargeting,
//! release MR description maintenance, feature release branches, and
//! deploy tracking.

pub mod deploy;
pub mod description;
pub mod feature_branch;
pub mod orchestrator;

pub use review_core::Result;
