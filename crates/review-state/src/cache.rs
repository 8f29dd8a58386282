//! `MRDataCache` (§4.5): a per-call batch cache shared by the StateEngine,
//! Selector, and digest builders, seeded by a fixed number of SELECTs keyed
//! on repo-id and MR-id sets rather than one query per entity.

use std::collections::HashMap;

use review_core::action::Action;
use review_core::entities::Comment;
use review_core::ids::LocalId;
use review_core::policy::PolicyConfig;
use review_core::entities::Sla;
use review_store::{Result, Store};

/// Never shared across concurrent derivations (§5: "never shared across
/// goroutines; each derivation operation constructs its own").
#[derive(Debug, Default, Clone)]
pub struct MrDataCache {
    pub policies: HashMap<LocalId, PolicyConfig>,
    pub slas: HashMap<LocalId, Sla>,
    pub comments: HashMap<LocalId, Vec<Comment>>,
    pub actions: HashMap<LocalId, Vec<Action>>,
}

impl MrDataCache {
    /// Loads policy/SLA rows for `repository_ids` and comment/action rows for
    /// `mr_ids` in one batch each, rather than per-entity lookups.
    #[tracing::instrument(skip(store))]
    pub async fn load(store: &dyn Store, repository_ids: &[LocalId], mr_ids: &[LocalId]) -> Result<Self> {
        let policies = store.policies_for_repos(repository_ids).await?;
        let slas = store.slas_for_repos(repository_ids).await?;
        let comments = store.comments_for_mrs(mr_ids).await?;
        let actions = store.actions_for_mrs(mr_ids).await?;
        Ok(Self { policies, slas, comments, actions })
    }

    #[must_use]
    pub fn comments_for(&self, mr_id: LocalId) -> &[Comment] {
        self.comments.get(&mr_id).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn actions_for(&self, mr_id: LocalId) -> &[Action] {
        self.actions.get(&mr_id).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn policy_for(&self, repository_id: LocalId) -> PolicyConfig {
        self.policies.get(&repository_id).cloned().unwrap_or(PolicyConfig { repository_id, ..Default::default() })
    }

    #[must_use]
    pub fn sla_for(&self, repository_id: LocalId) -> Sla {
        self.slas.get(&repository_id).cloned().unwrap_or(Sla { repository_id, ..Default::default() })
    }
}
