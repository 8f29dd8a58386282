//! `NotificationState`-backed idempotence for per-event DMs (§4.8, §8
//! testable property #9): at most one message per distinct content for a
//! fixed `(MR, recipient, kind)`.

use chrono::{DateTime, Utc};
use review_core::ids::LocalId;
use review_store::Store;

use crate::Result;

/// Returns `true` (and records `content` as the new snapshot) iff this is
/// the first time `content` has been seen for `(mr_id, recipient_id, kind)`.
/// Repeated derivations of the same content are no-ops.
pub async fn should_send(
    store: &dyn Store,
    mr_id: LocalId,
    recipient_id: LocalId,
    kind: &str,
    content: &str,
    at: DateTime<Utc>,
) -> Result<bool> {
    let previous = store.notification_snapshot(mr_id, recipient_id, kind).await?;
    if previous.as_deref() == Some(content) {
        return Ok(false);
    }
    store.save_notification_snapshot(mr_id, recipient_id, kind, content, at).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use review_store::MockStore;

    #[tokio::test]
    async fn resends_on_changed_content_but_not_on_repeat() {
        let mut store = MockStore::new();
        store.expect_notification_snapshot().returning(|_, _, _| Ok(Some("old".to_string())));
        store.expect_save_notification_snapshot().returning(|_, _, _, _, _| Ok(()));

        let now = Utc::now();
        assert!(should_send(&store, LocalId(1), LocalId(2), "fully_approved", "new", now).await.unwrap());
    }

    #[tokio::test]
    async fn does_not_resend_identical_content() {
        let mut store = MockStore::new();
        store.expect_notification_snapshot().returning(|_, _, _| Ok(Some("same".to_string())));

        let now = Utc::now();
        assert!(!should_send(&store, LocalId(1), LocalId(2), "fully_approved", "same", now).await.unwrap());
    }
}
