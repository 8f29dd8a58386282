//! Append-only Timeline: the single `Record` operation (§4.3).
//!
//! Every module that derives state or sends notifications treats the
//! Timeline as the source of truth for "what happened, and when" — the
//! reconciler is the only writer, via [`record`].

use chrono::{DateTime, Duration, Utc};
use review_core::action::{Action, ActionKind, ActionKey};
use review_core::ids::LocalId;
use review_store::types::NewAction;
use review_store::{Result, Store};

/// Same-key rows within this window of each other are treated as the same
/// event (§4.3: "within the last 60 s of the inserted timestamp").
pub const DEDUP_WINDOW: Duration = Duration::seconds(60);

/// Records one Timeline event, doing nothing if a row with the same
/// `(mr, kind, actor, target, comment)` already exists within
/// [`DEDUP_WINDOW`] of `timestamp`. Returns the existing row on a dedup hit,
/// or the newly-inserted row otherwise.
#[tracing::instrument(skip(store, metadata), fields(mr_id = mr_id.get(), kind = ?kind))]
#[allow(clippy::too_many_arguments)]
pub async fn record(
    store: &dyn Store,
    mr_id: LocalId,
    kind: ActionKind,
    actor_id: Option<LocalId>,
    target_user_id: Option<LocalId>,
    comment_id: Option<LocalId>,
    timestamp: DateTime<Utc>,
    metadata: String,
) -> Result<Action> {
    let key = ActionKey { mr_id, kind, actor_id, target_user_id, comment_id };

    if let Some(existing) = store.find_recent_action(key, timestamp, DEDUP_WINDOW).await? {
        tracing::debug!("dedup hit, skipping insert");
        return Ok(existing);
    }

    store
        .insert_action(NewAction { mr_id, kind, actor_id, target_user_id, comment_id, timestamp, metadata })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use review_store::MockStore;

    fn sample_action(id: i64, mr_id: LocalId, kind: ActionKind, timestamp: DateTime<Utc>) -> Action {
        Action { id: LocalId(id), mr_id, kind, actor_id: None, target_user_id: None, comment_id: None, timestamp, metadata: String::new() }
    }

    #[tokio::test]
    async fn record_inserts_when_no_recent_match() {
        let mr_id = LocalId(1);
        let now = Utc::now();
        let mut mock = MockStore::new();
        mock.expect_find_recent_action().times(1).returning(|_, _, _| Ok(None));
        mock.expect_insert_action()
            .times(1)
            .returning(move |new| Ok(sample_action(7, new.mr_id, new.kind, new.timestamp)));

        let action = record(&mock, mr_id, ActionKind::Merged, None, None, None, now, String::new())
            .await
            .expect("record should succeed");

        assert_eq!(action.id, LocalId(7));
        assert_eq!(action.kind, ActionKind::Merged);
    }

    #[tokio::test]
    async fn record_dedups_within_window() {
        let mr_id = LocalId(1);
        let now = Utc::now();
        let existing = sample_action(3, mr_id, ActionKind::Merged, now - Duration::seconds(10));
        let mut mock = MockStore::new();
        mock.expect_find_recent_action().times(1).returning(move |_, _, _| Ok(Some(existing.clone())));
        mock.expect_insert_action().times(0);

        let action = record(&mock, mr_id, ActionKind::Merged, None, None, None, now, String::new())
            .await
            .expect("record should succeed");

        assert_eq!(action.id, LocalId(3));
    }
}
