use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use response_backend::{
    config::Config,
    db::connection::create_pool,
    repositories::ExternalUserRepository,
    services::{identity_cache::IdentityCacheService, slack_directory::SlackDirectoryClient},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "response_backend=info,refresh_user_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    let exclude_bots =
        config.user_cache_exclude_bots || std::env::args().any(|arg| arg == "--exclude-bots");

    let pool = create_pool(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&*pool).await?;

    let service = IdentityCacheService::new(
        Arc::new(ExternalUserRepository::new((*pool).clone())),
        Arc::new(SlackDirectoryClient::from_config(&config)?),
        config.directory_page_size,
    );

    let summary = service
        .refresh_all_with_timeout(
            exclude_bots,
            Duration::from_secs(config.user_cache_refresh_timeout_seconds),
        )
        .await?;

    tracing::info!(
        pages = summary.pages,
        upserted = summary.upserted,
        skipped_bots = summary.skipped_bots,
        completed = summary.completed,
        exclude_bots,
        "Refreshed user cache"
    );

    Ok(())
}
