//! Toybox HTTP 入口
//!
//! 启动: cargo run --bin toybox-http --features http
//! `POST /api/messages` 接收一个活动 JSON，跑完一轮后返回本轮发出的活动数组；`GET /health` 健康检查。

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tower::limit::GlobalConcurrencyLimitLayer;

use toybox::bot::Bot;
use toybox::config::{load_config, AppConfig};
use toybox::framework::{Activity, CollectingSink};
use toybox::ToyboxError;

struct AppState {
    bot: Bot,
}

async fn api_messages(
    State(state): State<Arc<AppState>>,
    Json(activity): Json<Activity>,
) -> Result<Json<Vec<Activity>>, (StatusCode, String)> {
    let sink = Arc::new(CollectingSink::new());
    match state.bot.process(activity, sink).await {
        Ok(responses) => Ok(Json(responses)),
        Err(e @ ToyboxError::MissingIdentity(_)) => Err((StatusCode::BAD_REQUEST, e.to_string())),
        Err(e) => {
            tracing::error!(error = %e, "Turn failed");
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

fn router(config: &AppConfig, bot: Bot) -> Router {
    let state = Arc::new(AppState { bot });
    let limit = config.http.max_concurrent_turns.max(1);
    Router::new()
        .route(
            "/api/messages",
            post(api_messages).layer(GlobalConcurrencyLimitLayer::new(limit)),
        )
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    toybox::observability::init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let config = load_config(config_path).context("Failed to load config")?;
    let bot = Bot::build(&config).context("Failed to assemble bot")?;
    let app = router(&config, bot);

    tracing::info!("Toybox HTTP: http://{}", config.http.bind);
    let listener = tokio::net::TcpListener::bind(&config.http.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.http.bind))?;
    axum::serve(listener, app).await?;

    Ok(())
}
