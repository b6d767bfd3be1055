use anyhow::Result;
use axum::{http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};

use gatekeeper_server::config::Config;
use gatekeeper_server::events::events_router;
use gatekeeper_server::gateway::{DiscordClient, DiscordGateway, ReplyBroker};
use gatekeeper_server::questionnaire::reddit::RedditClient;
use gatekeeper_server::reconciliation::reconcile_interrupted_tickets;
use gatekeeper_server::state_machine::repository::SqliteRepository;
use gatekeeper_server::status::status_handler;
use gatekeeper_server::verification::FlowSettings;
use gatekeeper_server::AppState;

async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "gatekeeper",
        "version": gatekeeper_server::get_bot_version(),
    })))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting verification bot");

    let config =
        Config::from_env().expect("Failed to load configuration from environment variables");

    let discord = DiscordClient::new(
        config.discord_bot_token.clone(),
        config.discord_api_base.clone(),
    )
    .expect("Failed to build Discord client");
    let replies = Arc::new(ReplyBroker::new());
    let gateway = Arc::new(DiscordGateway::new(discord, replies.clone()));
    let reddit = RedditClient::new().expect("Failed to build reddit client");

    let db_path = config.state_dir.join("gatekeeper-state.db");
    info!("Using state database: {}", db_path.display());
    let sqlite_repo =
        SqliteRepository::new(&db_path).expect("Failed to initialize SQLite database");

    let app_state = Arc::new(AppState::new(
        gateway,
        replies,
        Arc::new(sqlite_repo),
        Arc::new(reddit),
        FlowSettings {
            reply_timeout: config.reply_timeout,
            subreddit: config.verification_subreddit.clone(),
        },
        config.gateway_event_secret.clone(),
        config.status_auth_token.clone(),
    ));

    // Close questionnaires orphaned by the previous run before accepting events
    reconcile_interrupted_tickets(&app_state.store, app_state.gateway.as_ref()).await;

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status_handler))
        .merge(events_router(app_state.clone()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state.clone());

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
