use crate::error::AppError;
use axum::{routing::get, Router};
use std::time::Duration;
use tracing::{info, warn};

pub const LIVENESS_TEXT: &str = "Hanime Telegram Bot is running!";

async fn live_handler() -> &'static str {
    LIVENESS_TEXT
}

pub fn create_health_router() -> Router {
    Router::new()
        .route("/", get(live_handler))
        .route("/health", get(live_handler))
}

pub async fn start_health_server(port: u16) -> Result<(), AppError> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Health check server listening on {}", addr);
    axum::serve(listener, create_health_router()).await?;
    Ok(())
}

pub async fn keep_alive(client: reqwest::Client, url: String, interval: Duration) {
    loop {
        match client.get(&url).send().await {
            Ok(response) => info!(event = "self_ping", url = %url, status = %response.status()),
            Err(err) => warn!(event = "self_ping_failed", url = %url, error = %err),
        }
        tokio::time::sleep(interval).await;
    }
}
