//! Process supervisor (§5): wires the concrete `Store`/`RemotePlatform`/
//! `ChatClient` adapters together and runs the five concurrent workers
//! the concurrency model names, under one shared cancellation signal.

mod cancellation;
mod dispatch_worker;
mod digest_scheduler;
mod email_backfill_loop;
mod periodic_driver;

use std::sync::Arc;

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use review_chat::{ChatClient, LongPoller, VkChatClient};
use review_config::{Config, SecretOverrides};
use review_core::ids::UserId;
use review_platform::{GitlabPlatform, RateLimiter, RemotePlatform};
use review_store::{PostgresStore, Store};
use tokio::sync::Mutex;

/// Token bucket shared by every remote call (§5: "5 req/s, burst 10").
const RATE_PER_SEC: f64 = 5.0;
const BURST: u32 = 10;

fn init_tracing() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let overrides = SecretOverrides::parse();
    let config = Config::load(&overrides.config_path, &overrides).map_err(|err| {
        tracing::error!(error = %err, "fatal: could not load configuration");
        anyhow::anyhow!(err)
    })?;

    let store = PostgresStore::connect(&config.database.dsn).await.map_err(|err| {
        tracing::error!(error = %err, "fatal: could not connect to the store");
        anyhow::anyhow!(err)
    })?;
    store.run_migrations().await.map_err(|err| {
        tracing::error!(error = %err, "fatal: migrations failed");
        anyhow::anyhow!(err)
    })?;
    let store: Arc<dyn Store> = Arc::new(store);

    let gitlab_token = config.gitlab.token.clone().expect("checked non-empty by review-config");
    let limiter = RateLimiter::new(RATE_PER_SEC, BURST);
    let platform = GitlabPlatform::connect(&config.gitlab.base_url, &gitlab_token, limiter).map_err(|err| {
        tracing::error!(error = %err, "fatal: could not build the gitlab client");
        anyhow::anyhow!(err)
    })?;
    let platform: Arc<dyn RemotePlatform> = Arc::new(platform);

    let bot_remote_user = platform.get_user(config.gitlab.bot_user_id).await.map_err(|err| {
        tracing::error!(error = %err, "fatal: could not resolve the bot's own gitlab user");
        anyhow::anyhow!(err)
    })?;
    let bot_user = store
        .upsert_user(UserId(bot_remote_user.id), &bot_remote_user.username, &bot_remote_user.name)
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "fatal: could not record the bot's own user row");
            anyhow::anyhow!(err)
        })?;
    let bot_user_id = bot_user.id;

    let vk_token = config.vk.token.clone().expect("checked non-empty by review-config");
    let vk_client = Arc::new(VkChatClient::new(config.vk.base_url.clone(), vk_token));
    let poller: Arc<dyn LongPoller> = vk_client.clone();
    let chat_client: Arc<dyn ChatClient> = vk_client;

    let (cancel_tx, cancel_rx) = cancellation::channel();
    tokio::spawn(cancellation::wait_for_signal(cancel_tx));

    let inbound = review_chat::spawn_receiver(poller, cancel_rx.clone());

    let rng = Arc::new(Mutex::new(StdRng::from_entropy()));

    let dispatch_handle = tokio::spawn(dispatch_worker::run(store.clone(), platform.clone(), chat_client.clone(), inbound, cancel_rx.clone()));
    let driver_handle = tokio::spawn(periodic_driver::run(
        store.clone(),
        platform.clone(),
        chat_client.clone(),
        rng,
        config.gitlab.poll_interval_secs,
        bot_user_id,
        cancel_rx.clone(),
    ));
    let backfill_handle = tokio::spawn(email_backfill_loop::run(store.clone(), platform.clone(), cancel_rx.clone()));
    let digest_handle = tokio::spawn(digest_scheduler::run(store.clone(), chat_client.clone(), cancel_rx.clone()));

    let _ = tokio::join!(dispatch_handle, driver_handle, backfill_handle, digest_handle);
    tracing::info!("all workers stopped, exiting");
    Ok(())
}
