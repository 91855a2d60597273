use crate::{
    config::CAPTION_LIMIT,
    error::AppError,
    media::{DownloadResult, VideoMetadata},
};
use async_trait::async_trait;
use rand::Rng;
use std::{path::Path, sync::Arc, time::Duration};
use teloxide::{
    prelude::*,
    types::{InputFile, MessageId},
    RequestError,
};
use tokio::time;
use tracing::{info, instrument, warn};
use url::Url;

const TEXT_LIMIT: usize = 4096;
const REASON_LIMIT: usize = 100;
const UPLOAD_MAX_RETRIES: usize = 3;
const UPLOAD_RETRY_BASE_DELAY: Duration = Duration::from_secs(2);
const UPLOAD_RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<MessageId, AppError>;
    async fn edit_text(&self, chat: ChatId, message: MessageId, text: &str) -> Result<(), AppError>;
    async fn send_video(&self, chat: ChatId, path: &Path, caption: &str) -> Result<(), AppError>;
    async fn send_photo(&self, chat: ChatId, photo_url: &str, caption: &str) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<MessageId, AppError> {
        let message = self.bot.send_message(chat, text).await?;
        Ok(message.id)
    }

    async fn edit_text(&self, chat: ChatId, message: MessageId, text: &str) -> Result<(), AppError> {
        self.bot.edit_message_text(chat, message, text).await?;
        Ok(())
    }

    async fn send_video(&self, chat: ChatId, path: &Path, caption: &str) -> Result<(), AppError> {
        for attempt in 1..=UPLOAD_MAX_RETRIES {
            let request = self
                .bot
                .send_video(chat, InputFile::file(path.to_path_buf()))
                .caption(caption)
                .supports_streaming(true);
            match request.await {
                Ok(_) => return Ok(()),
                Err(err) => {
                    let Some(delay) = retry_delay_for_upload(&err, attempt) else {
                        return Err(err.into());
                    };
                    if attempt == UPLOAD_MAX_RETRIES {
                        return Err(err.into());
                    }
                    warn!("Upload attempt {attempt} failed; retrying in {delay:?}: {err}");
                    time::sleep(delay).await;
                }
            }
        }
        Ok(())
    }

    async fn send_photo(&self, chat: ChatId, photo_url: &str, caption: &str) -> Result<(), AppError> {
        let url = Url::parse(photo_url)?;
        self.bot
            .send_photo(chat, InputFile::url(url))
            .caption(caption)
            .await?;
        Ok(())
    }
}

fn retry_delay_for_upload(err: &RequestError, attempt: usize) -> Option<Duration> {
    match err {
        RequestError::RetryAfter(delay) => Some(delay.duration()),
        RequestError::Network(net) if net.is_timeout() || net.is_connect() => {
            let jitter_ms = rand::thread_rng().gen_range(0..=500);
            Some(upload_backoff(attempt) + Duration::from_millis(jitter_ms))
        }
        _ => None,
    }
}

fn upload_backoff(attempt: usize) -> Duration {
    let base_ms = UPLOAD_RETRY_BASE_DELAY.as_millis() as u64;
    let factor = 1u64 << attempt.saturating_sub(1).min(16);
    let max_ms = UPLOAD_RETRY_MAX_DELAY.as_millis() as u64;
    Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
}

pub fn failure_text(reason: &str, link: &str) -> String {
    format!(
        "❌ Failed to download video: {}\n🔗 Here's the link: {link}",
        truncate_chars(reason, REASON_LIMIT)
    )
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeliveryOutcome {
    VideoSent,
    TooLarge { thumbnail: bool },
    Fallback { thumbnail: bool },
    Failed,
}

#[derive(Clone)]
pub struct DeliveryDispatcher {
    messenger: Arc<dyn Messenger>,
    chat: ChatId,
    max_file_size: u64,
}

impl DeliveryDispatcher {
    pub fn new(messenger: Arc<dyn Messenger>, chat: ChatId, max_file_size: u64) -> Self {
        Self {
            messenger,
            chat,
            max_file_size,
        }
    }

    /// `fallback_text` accompanies the thumbnail or stands alone when the file
    /// cannot be sent. A failed upload replaces it with the upload error.
    #[instrument(skip(self, metadata, fallback_text))]
    pub async fn deliver(
        &self,
        result: &DownloadResult,
        metadata: &VideoMetadata,
        fallback_text: &str,
    ) -> DeliveryOutcome {
        let sendable = result
            .path
            .as_deref()
            .filter(|_| result.success && result.size > 0);

        let Some(path) = sendable else {
            info!(event = "delivery_download_missing");
            return match self.send_link(metadata, fallback_text).await {
                Some(thumbnail) => DeliveryOutcome::Fallback { thumbnail },
                None => DeliveryOutcome::Failed,
            };
        };

        if result.size >= self.max_file_size {
            info!(event = "delivery_too_large", bytes = result.size, limit = self.max_file_size);
            return match self.send_link(metadata, fallback_text).await {
                Some(thumbnail) => DeliveryOutcome::TooLarge { thumbnail },
                None => DeliveryOutcome::Failed,
            };
        }

        let caption = truncate_chars(&metadata.caption(), CAPTION_LIMIT);
        match self.messenger.send_video(self.chat, path, &caption).await {
            Ok(()) => {
                info!(event = "delivery_video_sent", bytes = result.size);
                DeliveryOutcome::VideoSent
            }
            Err(err) => {
                warn!(event = "delivery_video_failed", error = %err);
                let text = failure_text(&err.to_string(), metadata.link());
                match self.send_link(metadata, &text).await {
                    Some(thumbnail) => DeliveryOutcome::Fallback { thumbnail },
                    None => DeliveryOutcome::Failed,
                }
            }
        }
    }

    async fn send_link(&self, metadata: &VideoMetadata, text: &str) -> Option<bool> {
        if let Some(thumbnail) = metadata.thumbnail.as_deref() {
            let caption = truncate_chars(text, CAPTION_LIMIT);
            match self.messenger.send_photo(self.chat, thumbnail, &caption).await {
                Ok(()) => return Some(true),
                Err(err) => warn!(event = "delivery_thumbnail_failed", error = %err),
            }
        }
        match self
            .messenger
            .send_text(self.chat, &truncate_chars(text, TEXT_LIMIT))
            .await
        {
            Ok(_) => Some(false),
            Err(err) => {
                warn!(event = "delivery_text_failed", error = %err);
                None
            }
        }
    }
}

pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
