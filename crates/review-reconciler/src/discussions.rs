//! Discussion sync (§4.4): per-MR comment/thread shape maintenance.

use std::collections::HashSet;

use chrono::Utc;
use review_core::action::ActionKind;
use review_core::entities::MergeRequest;
use review_core::ids::RemoteId;
use review_platform::RemotePlatform;
use review_store::types::CommentInput;
use review_store::Store;

use crate::mr_sync::{resolve_user, UserCache};
use crate::Result;

#[tracing::instrument(skip_all, fields(mr_id = mr.id.get()))]
pub async fn sync(store: &dyn Store, platform: &dyn RemotePlatform, mr: &MergeRequest, user_cache: &mut UserCache) -> Result<()> {
    for discussion in platform.list_merge_request_discussions(mr.source_project_id.get(), mr.iid).await? {
        let mut notes: Vec<_> = discussion.notes.into_iter().filter(|n| !n.system).collect();
        notes.sort_by_key(|n| n.created_at);
        if notes.is_empty() {
            continue;
        }

        let thread_starter_remote = notes.iter().find(|n| n.resolvable).map(|n| n.author_id);
        let last_index = notes.len() - 1;
        let mut kept_remote_ids = HashSet::with_capacity(notes.len());

        for (index, note) in notes.iter().enumerate() {
            let author_id = resolve_user(store, platform, user_cache, note.author_id).await?;
            let thread_starter_id = match thread_starter_remote {
                Some(remote_id) => Some(resolve_user(store, platform, user_cache, remote_id).await?),
                None => None,
            };
            let resolved_by = match note.resolved_by {
                Some(remote_id) => Some(resolve_user(store, platform, user_cache, remote_id).await?),
                None => None,
            };

            let input = CommentInput {
                remote_note_id: RemoteId(note.id),
                discussion_id: discussion.id.clone(),
                mr_id: mr.id,
                author_id,
                body: note.body.clone(),
                resolvable: note.resolvable,
                resolved: note.resolved,
                resolved_by,
                resolved_at: note.resolved_at,
                created_at: note.created_at,
                updated_at: note.updated_at,
                thread_starter_id,
                is_last_in_thread: index == last_index,
            };

            kept_remote_ids.insert(RemoteId(note.id));
            let upserted = store.upsert_comment(input).await?;

            if upserted.is_new {
                review_timeline::record(
                    store,
                    mr.id,
                    ActionKind::CommentAdded,
                    Some(author_id),
                    None,
                    Some(upserted.comment.id),
                    upserted.comment.created_at,
                    String::new(),
                )
                .await?;
            }

            if upserted.resolution_transitioned {
                let resolver = upserted.comment.resolved_by;
                review_timeline::record(
                    store,
                    mr.id,
                    ActionKind::CommentResolved,
                    resolver,
                    Some(author_id),
                    Some(upserted.comment.id),
                    upserted.comment.resolved_at.unwrap_or_else(Utc::now),
                    String::new(),
                )
                .await?;
            }
        }

        store.clear_is_last_in_thread_except(&discussion.id, &kept_remote_ids).await?;
    }
    Ok(())
}
