mod browser;
mod config;
mod delivery;
mod downloader;
mod error;
mod handlers;
mod health;
mod locator;
mod lock;
mod media;
mod rate_limit;
mod scrape;
mod yt_dlp;

use crate::{config::Config, error::AppError, lock::InstanceLock};
use handlers::{build_handler, AppServices};
use std::time::Duration;
use teloxide::{net::default_reqwest_settings, prelude::*};
#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, instrument, warn, Instrument};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    if let Err(err) = run().await {
        eprintln!("fatal error: {err}");
        error!(error = %err, "Application terminated with fatal error");
        return Err(err);
    }
    info!("Application shutdown complete");
    Ok(())
}

#[instrument]
async fn run() -> Result<(), AppError> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "random_video_bot=info,info".into()),
        )
        .init();

    info!("Initializing random video bot");
    let config = Config::from_env()?;
    info!(owner = config.owner_chat.0, port = config.port, browser = config.browser_enabled, "Configuration loaded");

    let lock = InstanceLock::acquire(config::lock_file_path())?;
    info!(path = %lock.path().display(), "Instance lock held");

    let client = default_reqwest_settings()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(120))
        .build()
        .map_err(|e| {
            error!(error = %e, "Failed to build HTTP client");
            e
        })?;
    info!("HTTP client configured successfully");

    let bot = Bot::with_client(config.bot_token.clone(), client);
    let me = bot.get_me().await?;
    info!(username = %me.username(), "Bot authenticated");

    let port = config.port;
    tokio::spawn(
        async move {
            if let Err(err) = health::start_health_server(port).await {
                error!(error = %err, "Health check server stopped");
            }
        }
        .in_current_span(),
    );

    if let Some(url) = config.external_url.clone() {
        info!(url = %url, "Self-ping enabled");
        let ping_client = reqwest::Client::builder()
            .timeout(config::REQUEST_TIMEOUT)
            .build()?;
        tokio::spawn(health::keep_alive(ping_client, url, config::KEEP_ALIVE_INTERVAL).in_current_span());
    }

    let services = AppServices::new(&config)?;
    info!("Application services initialized");

    let mut dispatcher = Dispatcher::builder(bot, build_handler())
        .dependencies(dptree::deps![services])
        .build();
    info!("Dispatcher built successfully");

    let shutdown_token = dispatcher.shutdown_token();
    tokio::spawn(
        async move {
            shutdown_signal().await;
            info!("Shutdown signal received, initiating graceful shutdown");
            if let Ok(wait) = shutdown_token.shutdown() {
                wait.await;
                info!("Graceful shutdown completed");
            } else {
                warn!("Failed to initiate graceful shutdown");
            }
        }
        .in_current_span(),
    );

    info!("Starting dispatcher event loop");
    dispatcher.dispatch().await;
    info!("Dispatcher stopped");
    Ok(())
}

#[cfg(unix)]
#[instrument]
async fn shutdown_signal() {
    let term = signal(SignalKind::terminate());
    let interrupt = signal(SignalKind::interrupt());
    match (term, interrupt) {
        (Ok(mut term), Ok(mut interrupt)) => {
            tokio::select! {
                _ = term.recv() => info!("Received SIGTERM signal"),
                _ = interrupt.recv() => info!("Received SIGINT signal"),
            }
        }
        (Ok(mut term), Err(err)) => {
            warn!(error = %err, "Failed to register SIGINT handler, falling back to SIGTERM only");
            let _ = term.recv().await;
        }
        (Err(err), Ok(mut interrupt)) => {
            warn!(error = %err, "Failed to register SIGTERM handler, falling back to SIGINT only");
            let _ = interrupt.recv().await;
        }
        (Err(term_err), Err(int_err)) => {
            error!(sigterm_error = %term_err, sigint_error = %int_err, "Failed to register signal handlers, falling back to Ctrl+C");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
#[instrument]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl+C signal");
}
