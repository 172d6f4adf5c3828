//! Entry point: load config, wire dependencies, warm the presence store and run the server.

use chatrelay::auth::JwtSecret;
use chatrelay::config::Config;
use chatrelay::db::{self, PgChatStore};
use chatrelay::repositories::RedisRepository;
use chatrelay::services::{HttpPushTransport, LogPushTransport, PushTransport};
use chatrelay::{create_app, AppState, StateOptions};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db_pool = db::create_pool(&config.database_url).await?;
    let store = Arc::new(RedisRepository::connect(&config.redis_url).await?);
    let chat = Arc::new(PgChatStore::new(db_pool));

    let push: Arc<dyn PushTransport> = match &config.push_gateway_url {
        Some(url) => Arc::new(HttpPushTransport::new(url.clone(), config.vapid_subject.clone())?),
        None => {
            tracing::warn!("PUSH_GATEWAY_URL not set; push notifications will only be logged");
            Arc::new(LogPushTransport)
        }
    };

    let state = AppState::new(
        store,
        chat,
        push,
        JwtSecret::new(config.jwt_secret.clone()),
        StateOptions::from(&config),
    );

    if config.presence_reset_on_start {
        state.presence_service().reset().await?;
    }
    let mirrored = state.subscription_service.mirror_all().await?;
    tracing::info!(mirrored, "push subscriptions mirrored");

    let app = create_app(state);

    tracing::info!(addr = %config.server_addr, "listening");
    let listener = tokio::net::TcpListener::bind(config.server_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
