//! Personal digest scheduler (§4.8, §5): minute-by-minute poll, `is_due`
//! per subscriber, in-memory "already sent today" bookkeeping (there is no
//! persisted last-sent-date column on `DailyDigestPreference`, so this
//! resets on restart — a subscriber misses at most one day's digest across
//! a redeploy).
//!
//! Nothing in the data model maps a `User` to a personal DM chat id (a VK
//! sender only ever appears as `InboundMessage.sender_id`, never recorded
//! against their `User` row). Lacking that mapping, the digest is instead
//! broadcast into every group chat already subscribed to a repository the
//! user participates in as a possible reviewer, a label reviewer, a release
//! manager, or an open MR's author — the same chats that would see that
//! user's activity in `/send_digest` output anyway.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use review_chat::ChatClient;
use review_core::entities::Chat;
use review_core::ids::LocalId;
use review_notifier::{schedule, DigestEntry, UserActionsDigest};
use review_store::Store;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

const TICK_INTERVAL: Duration = Duration::from_secs(60);

pub async fn run(store: Arc<dyn Store>, chat_client: Arc<dyn ChatClient>, mut cancel: watch::Receiver<bool>) {
    let mut ticker = interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_sent: HashMap<LocalId, NaiveDate> = HashMap::new();

    loop {
        tokio::select! {
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                tick(store.as_ref(), chat_client.as_ref(), &mut last_sent).await;
            }
        }
    }
    tracing::info!("digest scheduler stopped");
}

#[tracing::instrument(skip_all)]
async fn tick(store: &dyn Store, chat_client: &dyn ChatClient, last_sent: &mut HashMap<LocalId, NaiveDate>) {
    let now = Utc::now();
    let subscribers = match store.all_daily_digest_subscribers().await {
        Ok(subscribers) => subscribers,
        Err(err) => {
            tracing::warn!(error = %err, "could not load daily digest subscribers");
            return;
        }
    };

    for (user, preference) in subscribers {
        let local_now = schedule::local_time(now, preference.timezone_offset_minutes);

        let repo_ids = match user_repo_ids(store, user.id).await {
            Ok(ids) => ids,
            Err(err) => {
                tracing::warn!(error = %err, user_id = user.id.get(), "could not resolve repositories for digest subscriber");
                continue;
            }
        };
        if repo_ids.is_empty() {
            continue;
        }

        let working_day_in_any_repo = match any_working_day(store, &repo_ids, local_now.date_naive()).await {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(error = %err, user_id = user.id.get(), "could not evaluate working-day status for digest subscriber");
                continue;
            }
        };

        if !schedule::is_due(local_now, last_sent.get(&user.id).copied(), working_day_in_any_repo) {
            continue;
        }

        if let Err(err) = send_digest(store, chat_client, user.id, &repo_ids, now).await {
            tracing::warn!(error = %err, user_id = user.id.get(), "failed to send daily digest");
            continue;
        }
        last_sent.insert(user.id, local_now.date_naive());
    }
}

async fn any_working_day(store: &dyn Store, repo_ids: &[LocalId], local_date: NaiveDate) -> review_core::Result<bool> {
    for &repo_id in repo_ids {
        let policy = store.policy_for_repo(repo_id).await?;
        if review_clock::is_working_day(local_date, &policy.holidays) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Repositories `user_id` participates in: a possible reviewer, a label
/// reviewer, a release manager, or the author of a currently-open MR.
async fn user_repo_ids(store: &dyn Store, user_id: LocalId) -> review_core::Result<Vec<LocalId>> {
    let mut relevant = Vec::new();
    for repo_id in store.all_subscribed_repo_ids().await? {
        if is_relevant(store, repo_id, user_id).await? {
            relevant.push(repo_id);
        }
    }
    Ok(relevant)
}

async fn is_relevant(store: &dyn Store, repo_id: LocalId, user_id: LocalId) -> review_core::Result<bool> {
    if store.possible_reviewers(repo_id).await?.contains(&user_id) {
        return Ok(true);
    }
    if store.label_reviewers(repo_id).await?.values().any(|ids| ids.contains(&user_id)) {
        return Ok(true);
    }
    if store.release_managers(repo_id).await?.contains(&user_id) {
        return Ok(true);
    }
    if store.open_mrs_for_repo(repo_id).await?.iter().any(|mr| mr.author_id == user_id) {
        return Ok(true);
    }
    Ok(false)
}

async fn delivery_chats(store: &dyn Store, repo_ids: &[LocalId]) -> review_core::Result<Vec<Chat>> {
    let mut seen = HashSet::new();
    let mut chats = Vec::new();
    for &repo_id in repo_ids {
        for chat in store.subscribed_chats_for_repo(repo_id).await? {
            if seen.insert(chat.id) {
                chats.push(chat);
            }
        }
    }
    Ok(chats)
}

async fn send_digest(store: &dyn Store, chat_client: &dyn ChatClient, user_id: LocalId, repo_ids: &[LocalId], now: chrono::DateTime<Utc>) -> review_core::Result<()> {
    let digest = review_notifier::build_user_actions_digest(store, user_id, repo_ids, now).await?;
    let text = render(&digest);
    for chat in delivery_chats(store, repo_ids).await? {
        if let Err(err) = chat_client.send_text(chat.external_chat_id.get(), &text).await {
            tracing::warn!(error = %err, chat_id = chat.id.get(), "failed to deliver daily digest to chat");
        }
    }
    Ok(())
}

fn render(digest: &UserActionsDigest) -> String {
    let mut out = String::new();
    render_section(&mut out, "PENDING REVIEW", &digest.pending_review);
    render_section(&mut out, "PENDING FIXES", &digest.pending_fixes);
    render_section(&mut out, "MY MRS IN REVIEW", &digest.my_mrs_in_review);
    render_section(&mut out, "READY FOR RELEASE", &digest.ready_for_release);
    render_section(&mut out, "BLOCKED", &digest.blocked);
    if out.is_empty() {
        "nothing pending".to_string()
    } else {
        out
    }
}

fn render_section(out: &mut String, title: &str, entries: &[DigestEntry]) {
    if entries.is_empty() {
        return;
    }
    out.push_str(title);
    out.push('\n');
    for e in entries {
        out.push_str(&format!(
            "- [{}] {} ({}) — reviewers: {} — {:.1}h — {}\n",
            e.repo_name,
            e.title,
            e.url,
            if e.active_reviewers.is_empty() { "none".to_string() } else { e.active_reviewers.join(", ") },
            e.time_in_state_hours,
            e.sla_label,
        ));
    }
    out.push('\n');
}
