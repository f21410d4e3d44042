use axum::http::HeaderValue;
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use agent_panel::handlers::{
    cancel_stream_handler, chat_stream_handler, clear_messages_handler, get_messages_handler,
    health_check, multi_agent_stream_handler,
};
use agent_panel::init::app_init;
use agent_panel::AppState;

fn create_app_router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("⚠️  Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    Router::new()
        .route("/api/multi-agent-stream", post(multi_agent_stream_handler))
        .route(
            "/api/multi-agent-stream/{request_id}",
            delete(cancel_stream_handler),
        )
        .route("/api/stream", post(chat_stream_handler))
        .route("/api/messages", get(get_messages_handler))
        .route("/api/messages/clear", post(clear_messages_handler))
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("🚀 Starting multi-agent panel server...");
    dotenv::dotenv().ok();
    let (config, state) = app_init().await?;
    log::info!("✅ Application state initialized");
    let ai_config = state.ai_config.clone();
    let app = create_app_router(state, &config.cors_origins);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    log::info!("");
    log::info!("🎉 Server started!");
    log::info!("📍 http://{}", addr);
    log::info!("🔀 Multi-agent: http://{}/api/multi-agent-stream", addr);
    log::info!("💬 Chat: http://{}/api/stream", addr);
    log::info!("❤️  Health: http://{}/health", addr);
    log::info!("");
    match &ai_config.url {
        Some(url) => log::info!("🤖 {} backend at {}", ai_config.backend, url),
        None => log::info!("🤖 No model backend configured"),
    }
    log::info!(
        "🧠 Models: critical={} positive={} synthesis={} chat={}",
        ai_config.models.critical,
        ai_config.models.positive,
        ai_config.models.synthesis,
        ai_config.models.chat
    );
    log::info!("⏱️  Agent timeout: {:?}", ai_config.timeout);
    log::info!("🌍 CORS: {}", config.cors_origins.join(", "));
    log::info!("");

    axum::serve(listener, app).await?;

    Ok(())
}
