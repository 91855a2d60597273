use crate::{
    browser::{BrowserProbe, ChromeProbe},
    config::{self, Config, BROWSER_NAV_TIMEOUT, VIDEO_PAGE_PATTERN},
    delivery::{failure_text, DeliveryDispatcher, DeliveryOutcome, Messenger, TelegramMessenger},
    downloader::Downloader,
    error::AppError,
    locator::{HttpPageFetcher, MediaLocator},
    media::{DownloadResult, TempMedia, VideoMetadata},
    rate_limit::RateLimiter,
    yt_dlp::YtDlpClient,
};
use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
};
use teloxide::{
    dispatching::DpHandlerDescription,
    prelude::*,
    types::MessageId,
    utils::command::BotCommands,
};
use tracing::{error, info, instrument, warn};

const START_DENIED: &str = "Sorry, this bot is private and only for the owner.";
const COMMAND_DENIED: &str = "Sorry, this command is only for the owner.";
const RATE_LIMITED: &str = "🚫 Rate limit exceeded. Please wait a minute before trying again.";
const NO_VIDEO_LINK: &str = "No video links found on the random page. Try again.";
const FALLBACK_SENT: &str = "⚠️ Sent fallback information due to download error.";
const COMPLETE_FAILURE: &str = "❌ Complete failure. Please try again later.";

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "show usage")]
    Start,
    #[command(description = "show bot status")]
    Status,
    #[command(description = "fetch and send a random video")]
    Random,
}

#[derive(Clone)]
pub struct AppServices {
    owner: ChatId,
    random_url: String,
    max_file_size: u64,
    temp_dir: PathBuf,
    limiter: Arc<Mutex<RateLimiter>>,
    locator: MediaLocator,
    downloader: Downloader,
}

impl AppServices {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let yt_dlp = Arc::new(YtDlpClient::from_environment());
        let browser: Option<Arc<dyn BrowserProbe>> = config
            .browser_enabled
            .then(|| Arc::new(ChromeProbe::new(BROWSER_NAV_TIMEOUT)) as Arc<dyn BrowserProbe>);
        let locator = MediaLocator::new(
            Arc::new(HttpPageFetcher::new()?),
            yt_dlp.clone(),
            browser,
            VIDEO_PAGE_PATTERN,
        );
        Ok(Self::from_parts(
            config,
            std::env::temp_dir(),
            locator,
            Downloader::new(yt_dlp),
        ))
    }

    pub fn from_parts(config: &Config, temp_dir: PathBuf, locator: MediaLocator, downloader: Downloader) -> Self {
        Self {
            owner: config.owner_chat,
            random_url: config.random_url.clone(),
            max_file_size: config.max_file_size,
            temp_dir,
            limiter: Arc::new(Mutex::new(RateLimiter::new(config.rate_limit_per_minute))),
            locator,
            downloader,
        }
    }

    fn admit(&self) -> bool {
        self.limiter
            .lock()
            .map(|mut limiter| limiter.is_allowed())
            .unwrap_or(false)
    }

    fn limiter_status(&self) -> (usize, usize) {
        self.limiter
            .lock()
            .map(|mut limiter| (limiter.calls_per_window(), limiter.remaining()))
            .unwrap_or((0, 0))
    }
}

pub fn build_handler() -> Handler<'static, DependencyMap, Result<(), AppError>, DpHandlerDescription> {
    dptree::entry().branch(
        Update::filter_message()
            .filter_command::<Command>()
            .endpoint(answer),
    )
}

async fn answer(bot: Bot, services: AppServices, msg: Message, cmd: Command) -> Result<(), AppError> {
    let messenger: Arc<dyn Messenger> = Arc::new(TelegramMessenger::new(bot));
    handle_command(&services, messenger, msg.chat.id, cmd).await
}

#[instrument(skip(services, messenger))]
pub async fn handle_command(
    services: &AppServices,
    messenger: Arc<dyn Messenger>,
    chat: ChatId,
    cmd: Command,
) -> Result<(), AppError> {
    if chat != services.owner {
        warn!(event = "owner_gate_denied", chat = chat.0, command = ?cmd);
        let denial = if cmd == Command::Start { START_DENIED } else { COMMAND_DENIED };
        messenger.send_text(chat, denial).await?;
        return Ok(());
    }

    match cmd {
        Command::Start => {
            messenger.send_text(chat, &start_text()).await?;
        }
        Command::Status => {
            messenger.send_text(chat, &status_text(services)).await?;
        }
        Command::Random => {
            if !services.admit() {
                info!(event = "rate_limited", chat = chat.0);
                messenger.send_text(chat, RATE_LIMITED).await?;
                return Ok(());
            }
            run_random(services, messenger, chat).await?;
        }
    }
    Ok(())
}

fn start_text() -> String {
    format!(
        "🎉 Welcome to the Hanime Random Video Bot! 🎉\n\
         Use /random to get a random video from hanime.tv.\n\
         Videos are sent directly (up to 2GB); otherwise, a thumbnail and link are provided.\n\
         Use /status to check bot status.\n\
         Optional: place {} next to the bot for authenticated videos.\n\
         Comply with hanime.tv's terms and local laws.",
        config::COOKIE_FILE
    )
}

fn status_text(services: &AppServices) -> String {
    let (ceiling, remaining) = services.limiter_status();
    let cookies = if config::cookie_file().is_some() {
        "✅ Loaded"
    } else {
        "❌ Not found"
    };
    format!(
        "🤖 Bot Status:\n\
         ✅ Online and functioning\n\
         📊 Temp directory: {}\n\
         🍪 Cookies: {cookies}\n\
         🚦 Rate limit: {ceiling} calls per minute ({remaining} left)\n\
         💾 Max file size: {:.1} GB",
        services.temp_dir.display(),
        services.max_file_size as f64 / (1024.0 * 1024.0 * 1024.0)
    )
}

async fn run_random(services: &AppServices, messenger: Arc<dyn Messenger>, chat: ChatId) -> Result<(), AppError> {
    let status = messenger
        .send_text(chat, "🔄 Processing your random video...")
        .await?;
    let media = TempMedia::in_dir(&services.temp_dir)?;
    let dispatcher = DeliveryDispatcher::new(messenger.clone(), services.owner, services.max_file_size);

    let located = match services.locator.locate(&services.random_url).await {
        Ok(located) => located,
        Err(AppError::NoVideoLink(url)) => {
            warn!(event = "random_no_video_link", url = %url);
            edit_status(messenger.as_ref(), chat, status, NO_VIDEO_LINK).await;
            return Ok(());
        }
        Err(err) => {
            error!(event = "random_locate_failed", error = %err);
            let metadata = VideoMetadata::default();
            let text = failure_text(&err.to_string(), metadata.link());
            let outcome = dispatcher
                .deliver(&DownloadResult::failed(None, 0), &metadata, &text)
                .await;
            report_outcome(messenger.as_ref(), chat, status, outcome).await;
            return Ok(());
        }
    };
    info!(
        event = "random_located",
        url = %located.page_url,
        candidates = located.candidates.len(),
        strategy = located.resolved_by.map(|s| s.name()).unwrap_or("none")
    );

    edit_status(messenger.as_ref(), chat, status, "📥 Downloading video...").await;
    let result = services
        .downloader
        .download(&located.candidates, media.path())
        .await;

    let fallback_text = if result.success {
        info!(
            event = "random_downloaded",
            bytes = result.size,
            provenance = result.source.as_ref().map(|c| c.provenance.as_str()).unwrap_or("unknown")
        );
        edit_status(messenger.as_ref(), chat, status, "📤 Sending video...").await;
        located.metadata.caption()
    } else {
        let reason = AppError::DownloadExhausted(located.candidates.len()).to_string();
        failure_text(&reason, located.metadata.link())
    };

    let outcome = dispatcher
        .deliver(&result, &located.metadata, &fallback_text)
        .await;
    report_outcome(messenger.as_ref(), chat, status, outcome).await;
    drop(media);
    Ok(())
}

async fn report_outcome(messenger: &dyn Messenger, chat: ChatId, status: MessageId, outcome: DeliveryOutcome) {
    info!(event = "random_outcome", outcome = ?outcome);
    match outcome {
        DeliveryOutcome::VideoSent => {
            edit_status(messenger, chat, status, "✅ Video sent successfully! 🎥").await;
        }
        DeliveryOutcome::TooLarge { .. } => {
            edit_status(messenger, chat, status, "📦 Video too large; link sent instead! 🔗").await;
        }
        DeliveryOutcome::Fallback { .. } => {
            if let Err(err) = messenger.send_text(chat, FALLBACK_SENT).await {
                warn!(event = "fallback_notice_failed", error = %err);
            }
        }
        DeliveryOutcome::Failed => {
            if let Err(err) = messenger.send_text(chat, COMPLETE_FAILURE).await {
                error!(event = "complete_failure_notice_failed", error = %err);
            }
        }
    }
}

async fn edit_status(messenger: &dyn Messenger, chat: ChatId, status: MessageId, text: &str) {
    if let Err(err) = messenger.edit_text(chat, status, text).await {
        warn!(event = "status_edit_failed", error = %err);
    }
}
