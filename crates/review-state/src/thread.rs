//! Comment-thread shape: "awaiting author" derivation (§4.5).
//!
//! A thread (grouped by discussion id) is resolvable when its starter note
//! is resolvable; "unresolved resolvable" means `resolvable=true,
//! resolved=false`. For the MR-wide on_fixes interval, a resolvable thread
//! counts as open from its creation until its resolution — an intermediate
//! reply from the MR author does not close it early; only the starter
//! note's own `resolved`/`resolved_at` does. We replay each discussion's
//! creation/resolution instants and reuse the same 0/1-counter idea
//! `review-clock` uses for blocked intervals to find the most recent
//! open-ended span.
//!
//! A separate, narrower notion — who currently *owns* an open thread, i.e.
//! whose reply the author hasn't answered yet — does key off the most
//! recent non-system note; see [`awaiting_author_owners`].

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use review_core::entities::Comment;
use review_core::ids::LocalId;
use review_clock::BlockEvent;

/// One (discussion-scoped) open/close event in the "awaiting author" stream.
#[derive(Debug, Clone, Copy)]
pub struct ThreadEvent {
    pub event: BlockEvent,
    pub owner: Option<LocalId>,
}

fn group_by_discussion(comments: &[Comment]) -> HashMap<&str, Vec<&Comment>> {
    let mut groups: HashMap<&str, Vec<&Comment>> = HashMap::new();
    for c in comments {
        groups.entry(c.discussion_id.as_str()).or_default().push(c);
    }
    for notes in groups.values_mut() {
        notes.sort_by_key(|c| c.created_at);
    }
    groups
}

/// Builds the open/close event stream across every resolvable thread on an
/// MR. Each discussion contributes an "open" event at the thread's creation
/// time and, if resolved, a "close" event at its resolution time — the
/// period-start counter uses thread creation and resolution times only, an
/// intermediate author reply does not close the interval.
#[must_use]
pub fn awaiting_author_events(comments: &[Comment], _mr_author_id: LocalId) -> Vec<ThreadEvent> {
    let mut events = Vec::new();

    for (_, notes) in group_by_discussion(comments) {
        let Some(starter) = notes.first() else { continue };
        if !starter.resolvable {
            continue;
        }

        events.push(ThreadEvent {
            event: BlockEvent { timestamp: starter.created_at, added: true },
            owner: Some(starter.author_id),
        });

        if starter.resolved {
            if let Some(resolved_at) = starter.resolved_at {
                events.push(ThreadEvent { event: BlockEvent { timestamp: resolved_at, added: false }, owner: Some(starter.author_id) });
            }
        }
    }

    events.sort_by_key(|e| e.event.timestamp);
    events
}

/// Replays the 0/1 counter across `events` (ignoring thread identity) and
/// returns the timestamp of the most recent 0→1 transition, provided the
/// counter is still above zero — the §4.5 on-fixes `period-start` rule.
#[must_use]
pub fn open_since(events: &[ThreadEvent]) -> Option<DateTime<Utc>> {
    let mut counter: i64 = 0;
    let mut last_open_at = None;
    for e in events {
        if e.event.added {
            counter += 1;
            if counter == 1 {
                last_open_at = Some(e.event.timestamp);
            }
        } else {
            counter -= 1;
            if counter < 0 {
                counter = 0;
            }
        }
    }
    if counter > 0 {
        last_open_at
    } else {
        None
    }
}

/// Whether at least one thread on the MR is currently awaiting the author.
#[must_use]
pub fn has_awaiting_author_thread(comments: &[Comment], mr_author_id: LocalId) -> bool {
    open_since(&awaiting_author_events(comments, mr_author_id)).is_some()
}

/// The set of users who currently "own" a thread awaiting the author — the
/// authors of the most recent non-system note in each currently-open thread.
#[must_use]
pub fn awaiting_author_owners(comments: &[Comment], mr_author_id: LocalId) -> HashSet<LocalId> {
    let mut owners = HashSet::new();
    for (_, notes) in group_by_discussion(comments) {
        let Some(starter) = notes.first() else { continue };
        if !starter.resolvable || starter.resolved {
            continue;
        }
        let Some(last) = notes.last() else { continue };
        if last.author_id != mr_author_id {
            owners.insert(last.author_id);
        }
    }
    owners
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use review_core::ids::RemoteId;

    fn dt(h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, min, 0).unwrap()
    }

    fn note(
        discussion_id: &str,
        author_id: LocalId,
        created_at: DateTime<Utc>,
        resolvable: bool,
        resolved: bool,
        resolved_at: Option<DateTime<Utc>>,
    ) -> Comment {
        Comment {
            id: LocalId(created_at.timestamp_millis()),
            remote_note_id: RemoteId(created_at.timestamp_millis()),
            discussion_id: discussion_id.to_string(),
            mr_id: LocalId(1),
            author_id,
            body: String::new(),
            resolvable,
            resolved,
            resolved_by: None,
            resolved_at,
            created_at,
            updated_at: created_at,
            thread_starter_id: None,
            is_last_in_thread: false,
        }
    }

    /// S2: thread opened by a reviewer at 10:00Z, the MR author replies at
    /// 10:30Z without resolving it, and the thread is resolved at 11:00Z. The
    /// MR must read on_fixes since 10:00Z for the whole window, not fall back
    /// to on_review the moment the author replies.
    #[test]
    fn s2_awaiting_author_interval_survives_an_intermediate_author_reply() {
        let author = LocalId(10);
        let reviewer = LocalId(20);
        let opened_at = dt(10, 0);
        let reply_at = dt(10, 30);
        let resolved_at = dt(11, 0);

        let comments = vec![note("d1", reviewer, opened_at, true, false, None), note("d1", author, reply_at, false, false, None)];

        // Before resolution, including after the 10:30Z reply: still on_fixes since 10:00Z.
        let events = awaiting_author_events(&comments, author);
        assert_eq!(open_since(&events), Some(opened_at));
        assert!(has_awaiting_author_thread(&comments, author));

        // After resolution at 11:00Z the interval closes and the MR falls through to on_review.
        let mut resolved_comments = comments;
        resolved_comments[0].resolved = true;
        resolved_comments[0].resolved_at = Some(resolved_at);

        let events = awaiting_author_events(&resolved_comments, author);
        assert_eq!(open_since(&events), None);
        assert!(!has_awaiting_author_thread(&resolved_comments, author));
    }

    #[test]
    fn resolution_is_read_from_the_starter_note_not_the_last_note_in_the_discussion() {
        let author = LocalId(10);
        let reviewer = LocalId(20);
        let opened_at = dt(10, 0);
        let resolved_at = dt(10, 15);
        let reply_at = dt(10, 30);

        // Starter note carries resolved/resolved_at; the chronologically last
        // note is a later, non-resolvable author reply that carries neither.
        let comments = vec![
            note("d1", reviewer, opened_at, true, true, Some(resolved_at)),
            note("d1", author, reply_at, false, false, None),
        ];

        let events = awaiting_author_events(&comments, author);
        assert_eq!(open_since(&events), None);
        assert!(!has_awaiting_author_thread(&comments, author));
    }
}
