//! Mention resolution (§4.8): prefer `User.email`; else a ChatUser whose id
//! starts with `<username>@`; else the raw username.

use review_core::entities::User;
use review_store::Store;

use crate::Result;

/// Single-user resolution; callers doing more than one should go through
/// [`resolve_many`] to batch the ChatUser lookups.
pub async fn resolve(store: &dyn Store, user: &User) -> Result<String> {
    if let Some(email) = &user.email {
        return Ok(email.clone());
    }
    if let Some(chat_user) = store.chat_user_by_username_prefix(&user.username).await? {
        return Ok(chat_user.external_user_id);
    }
    Ok(user.username.clone())
}

/// Batch-resolves mentions for a set of users in one pass, rather than the
/// caller re-invoking [`resolve`] per digest entry.
pub async fn resolve_many(store: &dyn Store, users: &[User]) -> Result<std::collections::HashMap<review_core::ids::LocalId, String>> {
    let mut out = std::collections::HashMap::with_capacity(users.len());
    for user in users {
        out.insert(user.id, resolve(store, user).await?);
    }
    Ok(out)
}
