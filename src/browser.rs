use crate::{config::USER_AGENT, error::AppError, media::is_manifest_url, scrape};
use async_trait::async_trait;
use chromiumoxide::{
    cdp::browser_protocol::network::EventResponseReceived, error::CdpError, Browser, BrowserConfig,
    Page,
};
use futures::StreamExt;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::{debug, info, instrument, warn};

#[async_trait]
pub trait BrowserProbe: Send + Sync {
    async fn observe(&self, page_url: &str) -> Result<Vec<String>, AppError>;
}

pub struct ChromeProbe {
    nav_timeout: Duration,
}

impl ChromeProbe {
    pub fn new(nav_timeout: Duration) -> Self {
        Self { nav_timeout }
    }

    fn browser_config() -> Result<BrowserConfig, AppError> {
        BrowserConfig::builder()
            .no_sandbox()
            .args([
                "--disable-gpu",
                "--disable-dev-shm-usage",
                "--disable-extensions",
                "--mute-audio",
                "--no-first-run",
                "--disable-blink-features=AutomationControlled",
            ])
            .arg(format!("--user-agent={USER_AGENT}"))
            .build()
            .map_err(AppError::Browser)
    }

    async fn render(&self, browser: &Browser, page_url: &str) -> Result<Vec<String>, AppError> {
        let page = browser.new_page("about:blank").await.map_err(cdp_err)?;
        let mut responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(cdp_err)?;

        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink = observed.clone();
        let collector = tokio::spawn(async move {
            while let Some(event) = responses.next().await {
                let url = &event.response.url;
                if is_manifest_url(url) {
                    debug!(event = "browser_manifest_response", url = %url);
                    if let Ok(mut urls) = sink.lock() {
                        urls.push(url.clone());
                    }
                }
            }
        });

        match tokio::time::timeout(self.nav_timeout, navigate(&page, page_url)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(event = "browser_navigation_failed", url = %page_url, error = %err),
            Err(_) => warn!(event = "browser_navigation_timeout", url = %page_url, timeout = ?self.nav_timeout),
        }

        let html = match page.content().await {
            Ok(html) => html,
            Err(err) => {
                warn!(event = "browser_content_failed", error = %err);
                String::new()
            }
        };
        collector.abort();
        let _ = page.close().await;

        let network = observed.lock().map(|urls| urls.clone()).unwrap_or_default();
        Ok(collect_manifest_urls(network, &html, page_url))
    }
}

async fn navigate(page: &Page, url: &str) -> Result<(), CdpError> {
    page.goto(url).await?;
    page.wait_for_navigation().await?;
    Ok(())
}

fn cdp_err(err: CdpError) -> AppError {
    AppError::Browser(err.to_string())
}

fn collect_manifest_urls(network: Vec<String>, html: &str, base: &str) -> Vec<String> {
    let from_dom = scrape::embedded_candidates(html, base)
        .into_iter()
        .map(|c| c.url)
        .filter(|url| is_manifest_url(url));
    let mut seen = HashSet::new();
    network
        .into_iter()
        .chain(from_dom)
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

#[async_trait]
impl BrowserProbe for ChromeProbe {
    #[instrument(skip(self))]
    async fn observe(&self, page_url: &str) -> Result<Vec<String>, AppError> {
        info!(event = "browser_probe_start", url = %page_url);
        let (mut browser, mut handler) = Browser::launch(Self::browser_config()?)
            .await
            .map_err(cdp_err)?;
        let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });

        let result = self.render(&browser, page_url).await;

        if let Err(err) = browser.close().await {
            warn!(event = "browser_close_failed", error = %err);
        }
        let _ = browser.wait().await;
        handler_task.abort();

        if let Ok(urls) = &result {
            info!(event = "browser_probe_done", manifests = urls.len());
        }
        result
    }
}
