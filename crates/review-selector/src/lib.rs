//! Reviewer selection: label-priority cascade with inverse-workload weighted
//! sampling (§4.6).

use std::collections::{HashMap, HashSet};

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use review_core::ids::LocalId;
use review_store::{Result, Store};

/// Draws one candidate from `candidates` (minus `exclude` and `picked`)
/// with probability proportional to `1/(1+workload)`.
fn weighted_pick(
    candidates: &[LocalId],
    workload: &HashMap<LocalId, i64>,
    picked: &HashSet<LocalId>,
    rng: &mut impl Rng,
) -> Option<LocalId> {
    let pool: Vec<LocalId> = candidates.iter().copied().filter(|c| !picked.contains(c)).collect();
    if pool.is_empty() {
        return None;
    }
    let weights: Vec<f64> = pool.iter().map(|c| 1.0 / (1.0 + *workload.get(c).unwrap_or(&0) as f64)).collect();
    let dist = WeightedIndex::new(weights).ok()?;
    Some(pool[dist.sample(rng)])
}

/// Pure cascade over already-loaded inputs (§4.6 steps 1-4); `exclude`
/// should already contain the MR author and on-vacation users.
#[must_use]
pub fn select_reviewers(
    mr_labels: &[String],
    possible_reviewers: &[LocalId],
    label_reviewers: &HashMap<String, Vec<LocalId>>,
    exclude: &HashSet<LocalId>,
    workload: &HashMap<LocalId, i64>,
    assign_count: usize,
    rng: &mut impl Rng,
) -> Vec<LocalId> {
    let mut picked = Vec::new();
    let mut picked_set = HashSet::new();
    let mut used_label_cascade = false;

    for label in mr_labels {
        let Some(pool) = label_reviewers.get(label) else { continue };
        let pool: Vec<LocalId> = pool.iter().copied().filter(|c| !exclude.contains(c)).collect();
        if pool.is_empty() {
            continue;
        }
        used_label_cascade = true;
        if let Some(pick) = weighted_pick(&pool, workload, &picked_set, rng) {
            picked.push(pick);
            picked_set.insert(pick);
        }
    }

    if used_label_cascade {
        if picked.len() < assign_count {
            let mut union: Vec<LocalId> = label_reviewers
                .values()
                .flatten()
                .copied()
                .filter(|c| !exclude.contains(c))
                .collect();
            union.extend(possible_reviewers.iter().copied().filter(|c| !exclude.contains(c)));
            union.sort_by_key(LocalId::get);
            union.dedup();

            while picked.len() < assign_count {
                match weighted_pick(&union, workload, &picked_set, rng) {
                    Some(p) => {
                        picked.push(p);
                        picked_set.insert(p);
                    }
                    None => break,
                }
            }
        }
    } else {
        let pool: Vec<LocalId> = possible_reviewers.iter().copied().filter(|c| !exclude.contains(c)).collect();
        while picked.len() < assign_count {
            match weighted_pick(&pool, workload, &picked_set, rng) {
                Some(p) => {
                    picked.push(p);
                    picked_set.insert(p);
                }
                None => break,
            }
        }
    }

    picked
}

/// Loads candidate pools, workload, and vacation flags from `store` and runs
/// [`select_reviewers`]. The caller is responsible for pushing the result to
/// the remote platform and letting the next `SyncMR` materialize
/// `ReviewerAssigned` rows (§4.6 step 5).
#[tracing::instrument(skip(store, rng))]
pub async fn pick_reviewers(
    store: &dyn Store,
    repository_id: LocalId,
    author_id: LocalId,
    mr_labels: &[String],
    assign_count: usize,
    rng: &mut impl Rng,
) -> Result<Vec<LocalId>> {
    let possible_reviewers = store.possible_reviewers(repository_id).await?;
    let label_reviewers = store.label_reviewers(repository_id).await?;

    let mut candidate_ids: Vec<LocalId> = possible_reviewers.clone();
    candidate_ids.extend(label_reviewers.values().flatten().copied());
    candidate_ids.sort_by_key(LocalId::get);
    candidate_ids.dedup();

    let on_vacation = store.vacationing_users(&candidate_ids).await?;
    let mut exclude = on_vacation;
    exclude.insert(author_id);

    let mut workload = HashMap::new();
    for candidate in &candidate_ids {
        if exclude.contains(candidate) {
            continue;
        }
        let w = store.reviewer_workload(repository_id, *candidate).await?;
        workload.insert(*candidate, w);
    }

    Ok(select_reviewers(mr_labels, &possible_reviewers, &label_reviewers, &exclude, &workload, assign_count, rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn never_picks_excluded_author_or_vacationer() {
        let possible = vec![LocalId(1), LocalId(2), LocalId(3)];
        let mut exclude = HashSet::new();
        exclude.insert(LocalId(1)); // author
        exclude.insert(LocalId(2)); // on vacation
        let workload = HashMap::new();
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..20 {
            let picks = select_reviewers(&[], &possible, &HashMap::new(), &exclude, &workload, 1, &mut rng);
            assert_eq!(picks, vec![LocalId(3)]);
        }
    }

    #[test]
    fn label_cascade_draws_one_per_matching_label() {
        let possible = vec![LocalId(1)];
        let mut label_reviewers = HashMap::new();
        label_reviewers.insert("backend".to_string(), vec![LocalId(10)]);
        label_reviewers.insert("frontend".to_string(), vec![LocalId(20)]);
        let exclude = HashSet::new();
        let workload = HashMap::new();
        let mut rng = StdRng::seed_from_u64(7);

        let picks = select_reviewers(
            &["backend".to_string(), "frontend".to_string()],
            &possible,
            &label_reviewers,
            &exclude,
            &workload,
            1,
            &mut rng,
        );

        assert_eq!(picks.len(), 2);
        assert!(picks.contains(&LocalId(10)));
        assert!(picks.contains(&LocalId(20)));
    }

    #[test]
    fn falls_back_to_possible_reviewers_when_no_label_pools_match() {
        let possible = vec![LocalId(1), LocalId(2)];
        let exclude = HashSet::new();
        let workload = HashMap::new();
        let mut rng = StdRng::seed_from_u64(1);

        let picks = select_reviewers(&["untracked".to_string()], &possible, &HashMap::new(), &exclude, &workload, 1, &mut rng);
        assert_eq!(picks.len(), 1);
        assert!(possible.contains(&picks[0]));
    }

    #[test]
    fn stops_early_when_candidate_pool_exhausted() {
        let possible = vec![LocalId(1)];
        let exclude = HashSet::new();
        let workload = HashMap::new();
        let mut rng = StdRng::seed_from_u64(3);

        let picks = select_reviewers(&[], &possible, &HashMap::new(), &exclude, &workload, 5, &mut rng);
        assert_eq!(picks, vec![LocalId(1)]);
    }
}
