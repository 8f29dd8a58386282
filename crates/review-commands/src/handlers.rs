//! Thin per-command dispatch (§6, §7): each handler talks to `Store` (and,
//! for a handful of commands, `RemotePlatform`) and returns either a
//! success reply or a single-line user-visible error — it never mutates
//! state on the error path (§7: "Validation errors on command input —
//! reply to the chat with a user-visible message; do not mutate state").

use review_core::entities::{DeployTrackingRule, Repository};
use review_core::ids::LocalId;
use review_core::policy::AutoReleaseBranchConfig;
use review_platform::types::RemoteLabel;
use review_platform::RemotePlatform;
use review_store::Store;

use crate::command::{Command, SlaKind};

/// Everything a handler needs: the invoking chat and user, plus the two
/// ports. Handlers never see the raw chat transport (§6: out of scope).
pub struct Context<'a> {
    pub store: &'a dyn Store,
    pub platform: &'a dyn RemotePlatform,
    pub chat_id: LocalId,
    pub user_id: LocalId,
}

/// Dispatches a parsed command and renders the outcome to a single reply
/// string, folding any handler error into the same user-visible text.
pub async fn dispatch(ctx: &Context<'_>, command: Command) -> String {
    let result = run(ctx, command).await;
    match result {
        Ok(reply) => reply,
        Err(reply) => reply,
    }
}

async fn resolve_named_repo(store: &dyn Store, path: &str) -> Result<Repository, String> {
    store.repository_by_path(path).await.map_err(|e| e.to_string())?.ok_or_else(|| format!("unknown repository: {path}"))
}

/// Repo-scoped config commands (`/reviewers`, `/sla`, `/holidays`, …) act
/// on whichever single repository this chat is subscribed to — the
/// command grammar has no `<repo>` argument for them, so the chat's
/// subscription set stands in for it.
async fn resolve_chat_repo(store: &dyn Store, chat_id: LocalId) -> Result<Repository, String> {
    let ids = store.subscribed_repo_ids_for_chat(chat_id).await.map_err(|e| e.to_string())?;
    match ids.as_slice() {
        [] => Err("this chat isn't subscribed to any repository yet".to_string()),
        [single] => store.repository_by_local_id(*single).await.map_err(|e| e.to_string())?.ok_or_else(|| "subscribed repository no longer exists".to_string()),
        _ => Err("this chat is subscribed to more than one repository; this command needs exactly one".to_string()),
    }
}

async fn resolve_users(store: &dyn Store, usernames: &[String]) -> Result<Vec<LocalId>, String> {
    let mut ids = Vec::with_capacity(usernames.len());
    for username in usernames {
        let user = store.user_by_username(username).await.map_err(|e| e.to_string())?.ok_or_else(|| format!("unknown user: {username}"))?;
        ids.push(user.id);
    }
    Ok(ids)
}

async fn run(ctx: &Context<'_>, command: Command) -> Result<String, String> {
    match command {
        Command::Subscribe { repo, force } => subscribe(ctx, &repo, force).await,
        Command::Unsubscribe { repo } => unsubscribe(ctx, &repo).await,
        Command::Reviewers { users } => reviewers(ctx, users).await,
        Command::LabelReviewers { label, users } => label_reviewers(ctx, label, users).await,
        Command::AssignCount { n } => assign_count(ctx, n).await,
        Command::Vacation { user } => vacation(ctx, &user).await,
        Command::Actions { user } => actions(ctx, user).await,
        Command::SendDigest => send_digest(ctx).await,
        Command::DailyDigest { offset_hours } => daily_digest(ctx, offset_hours).await,
        Command::GetMrInfo { path, iid } => get_mr_info(ctx, &path, iid).await,
        Command::Sla { set } => sla(ctx, set).await,
        Command::Holidays { remove, dates } => holidays(ctx, remove, dates).await,
        Command::AddBlockLabel { label, color } => add_repo_label(ctx, &label, color, |p| &mut p.block_labels).await,
        Command::AddReleaseLabel { label, color } => add_repo_label(ctx, &label, color, |p| &mut p.release_labels).await,
        Command::AddReleaseReadyLabel { label } => add_policy_set(ctx, &label, |p| &mut p.release_ready_labels).await,
        Command::AddFeatureReleaseTag { label } => add_policy_set(ctx, &label, |p| &mut p.feature_release_labels).await,
        Command::AddJiraPrefix { prefix } => add_policy_set(ctx, &prefix, |p| &mut p.issue_prefixes).await,
        Command::EnsureLabel { label, color } => ensure_label(ctx, &label, &color).await,
        Command::AutoReleaseBranch { config } => auto_release_branch(ctx, config).await,
        Command::ReleaseManagers { users } => release_managers(ctx, users).await,
        Command::ReleaseSubscribe { repo } => release_subscribe(ctx, &repo).await,
        Command::ReleaseUnsubscribe { repo } => release_unsubscribe(ctx, &repo).await,
        Command::SpawnBranch { repo, title } => spawn_branch(ctx, &repo, title).await,
        Command::TrackDeploy { job_url, repo } => track_deploy(ctx, &job_url, &repo).await,
        Command::UntrackDeploy { repo } => untrack_deploy(ctx, &repo).await,
    }
}

async fn subscribe(ctx: &Context<'_>, repo: &str, force: bool) -> Result<String, String> {
    let repository = resolve_named_repo(ctx.store, repo).await?;
    if !force {
        let existing = ctx.store.subscribed_repo_ids_for_chat(ctx.chat_id).await.map_err(|e| e.to_string())?;
        if existing.contains(&repository.id) {
            return Err(format!("already subscribed to {repo}; pass --force to re-subscribe"));
        }
    }
    ctx.store.subscribe_repo(ctx.chat_id, repository.id, ctx.user_id).await.map_err(|e| e.to_string())?;
    Ok(format!("subscribed to {}", repository.path_with_namespace))
}

async fn unsubscribe(ctx: &Context<'_>, repo: &str) -> Result<String, String> {
    let repository = resolve_named_repo(ctx.store, repo).await?;
    ctx.store.unsubscribe_repo(ctx.chat_id, repository.id).await.map_err(|e| e.to_string())?;
    Ok(format!("unsubscribed from {}", repository.path_with_namespace))
}

async fn reviewers(ctx: &Context<'_>, users: Option<Vec<String>>) -> Result<String, String> {
    let repository = resolve_chat_repo(ctx.store, ctx.chat_id).await?;
    match users {
        None => {
            let ids = ctx.store.possible_reviewers(repository.id).await.map_err(|e| e.to_string())?;
            Ok(render_user_list("possible reviewers", ctx.store, &ids).await)
        }
        Some(usernames) => {
            let ids = resolve_users(ctx.store, &usernames).await?;
            ctx.store.set_possible_reviewers(repository.id, &ids).await.map_err(|e| e.to_string())?;
            Ok(format!("possible reviewers set: {}", usernames.join(", ")))
        }
    }
}

async fn label_reviewers(ctx: &Context<'_>, label: Option<String>, users: Vec<String>) -> Result<String, String> {
    let repository = resolve_chat_repo(ctx.store, ctx.chat_id).await?;
    let Some(label) = label else {
        let pools = ctx.store.label_reviewers(repository.id).await.map_err(|e| e.to_string())?;
        if pools.is_empty() {
            return Ok("no label-specific reviewer pools configured".to_string());
        }
        let mut lines = pools.keys().cloned().collect::<Vec<_>>();
        lines.sort();
        return Ok(format!("labels with reviewer pools: {}", lines.join(", ")));
    };
    let ids = resolve_users(ctx.store, &users).await?;
    ctx.store.set_label_reviewers(repository.id, &label, &ids).await.map_err(|e| e.to_string())?;
    Ok(format!("reviewer pool for label {label} set: {}", users.join(", ")))
}

async fn assign_count(ctx: &Context<'_>, n: i32) -> Result<String, String> {
    if n < 1 {
        return Err("assign-count must be at least 1".to_string());
    }
    let repository = resolve_chat_repo(ctx.store, ctx.chat_id).await?;
    let mut sla = ctx.store.sla_for_repo(repository.id).await.map_err(|e| e.to_string())?;
    sla.assign_count = n;
    ctx.store.save_sla(&sla).await.map_err(|e| e.to_string())?;
    Ok(format!("assign-count set to {n}"))
}

async fn vacation(ctx: &Context<'_>, username: &str) -> Result<String, String> {
    let user = ctx.store.user_by_username(username).await.map_err(|e| e.to_string())?.ok_or_else(|| format!("unknown user: {username}"))?;
    let new_state = !user.on_vacation;
    ctx.store.set_user_vacation(user.id, new_state).await.map_err(|e| e.to_string())?;
    Ok(format!("{username} is {} on vacation", if new_state { "now" } else { "no longer" }))
}

async fn actions(ctx: &Context<'_>, username: Option<String>) -> Result<String, String> {
    let target = match username {
        Some(u) => ctx.store.user_by_username(&u).await.map_err(|e| e.to_string())?.ok_or_else(|| format!("unknown user: {u}"))?,
        None => ctx.store.user_by_local_id(ctx.user_id).await.map_err(|e| e.to_string())?.ok_or_else(|| "invoking user not found".to_string())?,
    };
    let repo_ids = ctx.store.subscribed_repo_ids_for_chat(ctx.chat_id).await.map_err(|e| e.to_string())?;
    let digest = review_notifier::build_user_actions_digest(ctx.store, target.id, &repo_ids, chrono::Utc::now()).await.map_err(|e| e.to_string())?;
    Ok(format!(
        "actions for {}: {} pending review, {} pending fixes, {} of their MRs in review, {} ready for release, {} blocked",
        target.username,
        digest.pending_review.len(),
        digest.pending_fixes.len(),
        digest.my_mrs_in_review.len(),
        digest.ready_for_release.len(),
        digest.blocked.len(),
    ))
}

async fn send_digest(ctx: &Context<'_>) -> Result<String, String> {
    let repo_ids = ctx.store.subscribed_repo_ids_for_chat(ctx.chat_id).await.map_err(|e| e.to_string())?;
    if repo_ids.is_empty() {
        return Ok("this chat isn't subscribed to any repository".to_string());
    }
    let digest = review_notifier::build_review_digest(ctx.store, &repo_ids, chrono::Utc::now()).await.map_err(|e| e.to_string())?;
    Ok(render_review_digest(&digest))
}

fn render_review_digest(digest: &review_notifier::ReviewDigest) -> String {
    let mut out = String::new();
    render_section(&mut out, "PENDING REVIEW", &digest.pending_review);
    render_section(&mut out, "PENDING FIXES", &digest.pending_fixes);
    render_section(&mut out, "BLOCKED", &digest.blocked);
    if out.is_empty() {
        "nothing pending".to_string()
    } else {
        out
    }
}

fn render_section(out: &mut String, title: &str, entries: &[review_notifier::DigestEntry]) {
    if entries.is_empty() {
        return;
    }
    out.push_str(title);
    out.push('\n');
    for e in entries {
        out.push_str(&format!(
            "- [{}] {} ({}) by {} — reviewers: {} — {:.1}h — {}\n",
            e.repo_name,
            e.title,
            e.url,
            e.author_mention,
            if e.active_reviewers.is_empty() { "none".to_string() } else { e.active_reviewers.join(", ") },
            e.time_in_state_hours,
            e.sla_label,
        ));
    }
}

async fn daily_digest(ctx: &Context<'_>, offset_hours: Option<i32>) -> Result<String, String> {
    match offset_hours {
        None => {
            let pref = ctx.store.daily_digest_preference(ctx.user_id).await.map_err(|e| e.to_string())?;
            Ok(match pref {
                Some(p) => format!("daily digest at 10:00 local time, offset UTC{:+}", p.timezone_offset_minutes / 60),
                None => "no daily digest offset configured".to_string(),
            })
        }
        Some(hours) => {
            ctx.store.set_daily_digest_preference(ctx.user_id, hours * 60).await.map_err(|e| e.to_string())?;
            Ok(format!("daily digest offset set to UTC{hours:+}"))
        }
    }
}

async fn get_mr_info(ctx: &Context<'_>, path: &str, iid: i64) -> Result<String, String> {
    let mr = ctx.store.mr_by_path_and_iid(path, iid).await.map_err(|e| e.to_string())?.ok_or_else(|| format!("no such MR: {path}!{iid}"))?;
    Ok(format!("!{} {} [{:?}{}] {}", mr.iid, mr.title, mr.raw_state, if mr.draft { ", draft" } else { "" }, mr.url))
}

async fn sla(ctx: &Context<'_>, set: Option<(SlaKind, chrono::Duration)>) -> Result<String, String> {
    let repository = resolve_chat_repo(ctx.store, ctx.chat_id).await?;
    let mut current = ctx.store.sla_for_repo(repository.id).await.map_err(|e| e.to_string())?;
    match set {
        None => Ok(format!("review SLA: {}h, fixes SLA: {}h", current.review_duration_hours, current.fixes_duration_hours)),
        Some((kind, duration)) => {
            let hours = duration.num_hours();
            match kind {
                SlaKind::Review => current.review_duration_hours = hours,
                SlaKind::Fixes => current.fixes_duration_hours = hours,
            }
            ctx.store.save_sla(&current).await.map_err(|e| e.to_string())?;
            Ok(format!("{kind:?} SLA set to {hours}h"))
        }
    }
}

async fn holidays(ctx: &Context<'_>, remove: bool, dates: Vec<chrono::NaiveDate>) -> Result<String, String> {
    let repository = resolve_chat_repo(ctx.store, ctx.chat_id).await?;
    let mut policy = ctx.store.policy_for_repo(repository.id).await.map_err(|e| e.to_string())?;
    if dates.is_empty() {
        let mut list: Vec<_> = policy.holidays.iter().map(|d| d.format("%d.%m.%Y").to_string()).collect();
        list.sort();
        return Ok(if list.is_empty() { "no holidays configured".to_string() } else { list.join(", ") });
    }
    if remove {
        for d in &dates {
            policy.holidays.remove(d);
        }
    } else {
        policy.holidays.extend(dates);
    }
    ctx.store.save_policy(&policy).await.map_err(|e| e.to_string())?;
    Ok("holidays updated".to_string())
}

async fn add_repo_label(ctx: &Context<'_>, label: &str, color: Option<String>, set: impl FnOnce(&mut review_core::policy::PolicyConfig) -> &mut std::collections::HashSet<String>) -> Result<String, String> {
    let repository = resolve_chat_repo(ctx.store, ctx.chat_id).await?;
    let mut policy = ctx.store.policy_for_repo(repository.id).await.map_err(|e| e.to_string())?;
    set(&mut policy).insert(label.to_string());
    ctx.store.save_policy(&policy).await.map_err(|e| e.to_string())?;

    if let Some(color) = color {
        if let Err(err) = ctx.platform.create_label(repository.remote_id.get(), RemoteLabel { name: label.to_string(), color: color.clone(), text_color: "#FFFFFF".to_string() }).await {
            tracing::warn!(%err, label, "remote label creation failed; label may already exist");
        }
        ctx.store.ensure_label(label, &color, "#FFFFFF").await.map_err(|e| e.to_string())?;
    }
    Ok(format!("label {label} added"))
}

async fn add_policy_set(ctx: &Context<'_>, value: &str, set: impl FnOnce(&mut review_core::policy::PolicyConfig) -> &mut std::collections::HashSet<String>) -> Result<String, String> {
    let repository = resolve_chat_repo(ctx.store, ctx.chat_id).await?;
    let mut policy = ctx.store.policy_for_repo(repository.id).await.map_err(|e| e.to_string())?;
    set(&mut policy).insert(value.to_string());
    ctx.store.save_policy(&policy).await.map_err(|e| e.to_string())?;
    Ok(format!("{value} added"))
}

async fn ensure_label(ctx: &Context<'_>, label: &str, color: &str) -> Result<String, String> {
    let repository = resolve_chat_repo(ctx.store, ctx.chat_id).await?;
    if let Err(err) = ctx.platform.create_label(repository.remote_id.get(), RemoteLabel { name: label.to_string(), color: color.to_string(), text_color: "#FFFFFF".to_string() }).await {
        tracing::warn!(%err, label, "remote label creation failed; label may already exist");
    }
    ctx.store.ensure_label(label, color, "#FFFFFF").await.map_err(|e| e.to_string())?;
    Ok(format!("label {label} ensured"))
}

async fn auto_release_branch(ctx: &Context<'_>, config: Option<(String, String)>) -> Result<String, String> {
    let repository = resolve_chat_repo(ctx.store, ctx.chat_id).await?;
    let mut policy = ctx.store.policy_for_repo(repository.id).await.map_err(|e| e.to_string())?;
    match config {
        None => Ok(match &policy.auto_release_branch {
            Some(c) => format!("auto-release branch: {} : {}", c.prefix, c.dev_branch),
            None => "auto-release branches not configured".to_string(),
        }),
        Some((prefix, dev_branch)) => {
            policy.auto_release_branch = Some(AutoReleaseBranchConfig { prefix: prefix.clone(), dev_branch: dev_branch.clone() });
            ctx.store.save_policy(&policy).await.map_err(|e| e.to_string())?;
            Ok(format!("auto-release branch set: {prefix} : {dev_branch}"))
        }
    }
}

async fn release_managers(ctx: &Context<'_>, users: Option<Vec<String>>) -> Result<String, String> {
    let repository = resolve_chat_repo(ctx.store, ctx.chat_id).await?;
    match users {
        None => {
            let ids = ctx.store.release_managers(repository.id).await.map_err(|e| e.to_string())?;
            Ok(render_user_list("release managers", ctx.store, &ids).await)
        }
        Some(usernames) => {
            let ids = resolve_users(ctx.store, &usernames).await?;
            ctx.store.set_release_managers(repository.id, &ids).await.map_err(|e| e.to_string())?;
            Ok(format!("release managers set: {}", usernames.join(", ")))
        }
    }
}

async fn release_subscribe(ctx: &Context<'_>, repo: &str) -> Result<String, String> {
    let repository = resolve_named_repo(ctx.store, repo).await?;
    ctx.store.release_subscribe(ctx.chat_id, repository.id, ctx.user_id).await.map_err(|e| e.to_string())?;
    Ok(format!("subscribed to release notifications for {}", repository.path_with_namespace))
}

async fn release_unsubscribe(ctx: &Context<'_>, repo: &str) -> Result<String, String> {
    let repository = resolve_named_repo(ctx.store, repo).await?;
    ctx.store.release_unsubscribe(ctx.chat_id, repository.id).await.map_err(|e| e.to_string())?;
    Ok(format!("unsubscribed from release notifications for {}", repository.path_with_namespace))
}

async fn spawn_branch(ctx: &Context<'_>, repo: &str, title: Option<String>) -> Result<String, String> {
    let repository = resolve_named_repo(ctx.store, repo).await?;
    let policy = ctx.store.policy_for_repo(repository.id).await.map_err(|e| e.to_string())?;
    let Some(auto) = policy.auto_release_branch.clone() else {
        return Err("configure /auto_release_branch for this repository first".to_string());
    };
    let branch = review_release::feature_branch::spawn(ctx.store, ctx.platform, &repository, &policy, &auto.dev_branch, title.as_deref())
        .await
        .map_err(|e| e.to_string())?;
    Ok(format!("spawned feature release branch {}", branch.branch_name))
}

async fn track_deploy(ctx: &Context<'_>, job_url: &str, repo: &str) -> Result<String, String> {
    let repository = resolve_named_repo(ctx.store, repo).await?;
    ctx.store
        .save_deploy_rule(DeployTrackingRule { id: LocalId(0), repository_id: repository.id, chat_id: ctx.chat_id, job_url: job_url.to_string() })
        .await
        .map_err(|e| e.to_string())?;
    Ok(format!("tracking deploy job {job_url} for {}", repository.path_with_namespace))
}

async fn untrack_deploy(ctx: &Context<'_>, repo: &str) -> Result<String, String> {
    let repository = resolve_named_repo(ctx.store, repo).await?;
    ctx.store.delete_deploy_rule(repository.id, ctx.chat_id).await.map_err(|e| e.to_string())?;
    Ok(format!("no longer tracking deploys for {}", repository.path_with_namespace))
}

async fn render_user_list(title: &str, store: &dyn Store, ids: &[LocalId]) -> String {
    if ids.is_empty() {
        return format!("{title}: none configured");
    }
    let mut names = Vec::with_capacity(ids.len());
    for id in ids {
        if let Ok(Some(user)) = store.user_by_local_id(*id).await {
            names.push(user.username);
        }
    }
    format!("{title}: {}", names.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use review_core::entities::RepositorySubscription;
    use review_core::ids::RepoId;
    use review_platform::MockRemotePlatform;
    use review_store::MockStore;

    fn repo() -> Repository {
        Repository { id: LocalId(1), remote_id: RepoId(9), name: "widgets".into(), path_with_namespace: "org/widgets".into(), url: String::new() }
    }

    #[tokio::test]
    async fn subscribe_rejects_double_subscribe_without_force() {
        let mut store = MockStore::new();
        let repo_row = repo();
        store.expect_repository_by_path().returning(move |_| Ok(Some(repo_row.clone())));
        store.expect_subscribed_repo_ids_for_chat().returning(|_| Ok(vec![LocalId(1)]));

        let platform = MockRemotePlatform::new();
        let ctx = Context { store: &store, platform: &platform, chat_id: LocalId(100), user_id: LocalId(7) };

        let reply = dispatch(&ctx, Command::Subscribe { repo: "org/widgets".into(), force: false }).await;
        assert!(reply.contains("already subscribed"), "{reply}");
    }

    #[tokio::test]
    async fn subscribe_succeeds_for_new_repo() {
        let mut store = MockStore::new();
        let repo_row = repo();
        store.expect_repository_by_path().returning(move |_| Ok(Some(repo_row.clone())));
        store.expect_subscribed_repo_ids_for_chat().returning(|_| Ok(vec![]));
        store.expect_subscribe_repo().returning(|chat_id, repo_id, creator_id| {
            Ok(RepositorySubscription { id: LocalId(1), chat_id, repository_id: repo_id, creator_id, subscribed_at: chrono::Utc::now() })
        });

        let platform = MockRemotePlatform::new();
        let ctx = Context { store: &store, platform: &platform, chat_id: LocalId(100), user_id: LocalId(7) };

        let reply = dispatch(&ctx, Command::Subscribe { repo: "org/widgets".into(), force: false }).await;
        assert_eq!(reply, "subscribed to org/widgets");
    }

    #[tokio::test]
    async fn get_mr_info_reports_unknown_mr() {
        let store = {
            let mut s = MockStore::new();
            s.expect_mr_by_path_and_iid().returning(|_, _| Ok(None));
            s
        };
        let platform = MockRemotePlatform::new();
        let ctx = Context { store: &store, platform: &platform, chat_id: LocalId(1), user_id: LocalId(1) };

        let reply = dispatch(&ctx, Command::GetMrInfo { path: "org/widgets".into(), iid: 42 }).await;
        assert!(reply.contains("no such MR"), "{reply}");
    }
}
