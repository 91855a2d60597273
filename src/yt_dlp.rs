use crate::{
    config::{self, SITE_ORIGIN, USER_AGENT},
    error::AppError,
    media::VideoMetadata,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::{
    env,
    future::Future,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::process::Command;
use tracing::{debug, error, info, instrument, warn};

const EXTRACT_ATTEMPTS: usize = 3;
const EXTRACT_BACKOFF: Duration = Duration::from_secs(2);
const FORMAT: &str = "best[ext=mp4]/best";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Extraction {
    pub metadata: VideoMetadata,
    pub direct_url: Option<String>,
}

#[async_trait]
pub trait MediaExtractor: Send + Sync {
    async fn extract(&self, page_url: &str) -> Result<Extraction, AppError>;
}

#[async_trait]
pub trait MediaDownloader: Send + Sync {
    /// Writes `url` to `dest`. The return value is advisory only.
    async fn download(&self, url: &str, dest: &Path) -> Result<(), AppError>;

    async fn download_stream(&self, url: &str, dest: &Path) -> Result<(), AppError>;
}

#[derive(Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    thumbnail: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    view_count: Option<u64>,
    like_count: Option<u64>,
    description: Option<String>,
    webpage_url: Option<String>,
    url: Option<String>,
}

impl From<YtDlpInfo> for Extraction {
    fn from(info: YtDlpInfo) -> Self {
        Self {
            metadata: VideoMetadata {
                title: info.title,
                thumbnail: info.thumbnail,
                duration: info.duration,
                uploader: info.uploader,
                view_count: info.view_count,
                like_count: info.like_count,
                description: info.description,
                webpage_url: info.webpage_url,
            },
            direct_url: info.url.filter(|u| !u.is_empty()),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct YtDlpClient {
    cookies: Option<PathBuf>,
}

impl YtDlpClient {
    pub fn new(cookies: Option<PathBuf>) -> Self {
        if let Some(path) = &cookies {
            info!(event = "yt_dlp_cookies_loaded", path = %path.display());
        }
        Self { cookies }
    }

    pub fn from_environment() -> Self {
        Self::new(config::cookie_file())
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new("yt-dlp");
        cmd.args(base_args(self.cookies.as_deref()));
        if matches!(
            env::var("YTDLP_FORCE_IPV4").ok().as_deref(),
            Some("1") | Some("true") | Some("TRUE")
        ) {
            info!(event = "yt_dlp_force_ipv4");
            cmd.arg("--force-ipv4");
        }
        debug!(event = "yt_dlp_command_ready");
        cmd
    }

    #[instrument(skip(self))]
    async fn extract_once(&self, page_url: &str) -> Result<Extraction, AppError> {
        let mut cmd = self.base_command();
        cmd.arg("-J").arg(page_url);
        let output = cmd.output().await.map_err(AppError::Io)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(
                event = "extract_failed",
                status = %output.status,
                stderr = %stderr.trim()
            );
            return Err(AppError::YtDlp(stderr.trim().to_string()));
        }

        let info: YtDlpInfo = serde_json::from_slice(&output.stdout).map_err(AppError::Json)?;
        Ok(info.into())
    }
}

fn base_args(cookies: Option<&Path>) -> Vec<String> {
    let mut args: Vec<String> = [
        "--quiet",
        "--no-warnings",
        "--no-playlist",
        "-f",
        FORMAT,
        "--merge-output-format",
        "mp4",
        "--retries",
        "3",
        "--fragment-retries",
        "3",
        "--skip-unavailable-fragments",
        "--user-agent",
        USER_AGENT,
    ]
    .into_iter()
    .map(String::from)
    .collect();

    for header in request_headers() {
        args.push("--add-header".into());
        args.push(header);
    }
    if let Some(path) = cookies {
        args.push("--cookies".into());
        args.push(path.display().to_string());
    }
    args
}

fn request_headers() -> Vec<String> {
    vec![
        format!("Referer:{SITE_ORIGIN}/"),
        format!("Origin:{SITE_ORIGIN}"),
        "Accept:video/webm,video/ogg,video/*;q=0.9,application/ogg;q=0.7,audio/*;q=0.6,*/*;q=0.5".into(),
        "Accept-Language:en-US,en;q=0.9".into(),
        "Sec-Fetch-Dest:video".into(),
        "Sec-Fetch-Mode:no-cors".into(),
        "Sec-Fetch-Site:cross-site".into(),
        "DNT:1".into(),
    ]
}

#[async_trait]
impl MediaExtractor for YtDlpClient {
    #[instrument(skip(self))]
    async fn extract(&self, page_url: &str) -> Result<Extraction, AppError> {
        info!(event = "extract_start", url = %page_url);
        let extraction =
            with_retries(EXTRACT_ATTEMPTS, EXTRACT_BACKOFF, |_| self.extract_once(page_url)).await?;
        info!(
            event = "extract_success",
            has_direct_url = extraction.direct_url.is_some()
        );
        Ok(extraction)
    }
}

async fn with_retries<T, F, Fut>(attempts: usize, backoff: Duration, mut op: F) -> Result<T, AppError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut last_err = None;
    for attempt in 1..=attempts {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!(event = "extract_attempt_failed", attempt, error = %err);
                last_err = Some(err);
                if attempt < attempts {
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| AppError::YtDlp("extraction not attempted".into())))
}

#[async_trait]
impl MediaDownloader for YtDlpClient {
    #[instrument(skip(self))]
    async fn download(&self, url: &str, dest: &Path) -> Result<(), AppError> {
        info!(event = "yt_dlp_download_start", url = %url, dest = %dest.display());
        let mut cmd = self.base_command();
        cmd.arg("--force-overwrites").arg("-o").arg(dest).arg(url);
        let output = cmd.output().await.map_err(AppError::Io)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(event = "yt_dlp_download_failed", status = %output.status, stderr = %stderr.trim());
            return Err(AppError::DownloadFailed(output.status));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn download_stream(&self, url: &str, dest: &Path) -> Result<(), AppError> {
        info!(event = "ffmpeg_download_start", url = %url, dest = %dest.display());
        let headers: String = request_headers()
            .iter()
            .map(|h| format!("{}\r\n", h.replacen(':', ": ", 1)))
            .collect();
        let output = Command::new("ffmpeg")
            .arg("-y")
            .arg("-loglevel")
            .arg("error")
            .arg("-user_agent")
            .arg(USER_AGENT)
            .arg("-headers")
            .arg(headers)
            .arg("-i")
            .arg(url)
            .arg("-c")
            .arg("copy")
            .arg("-bsf:a")
            .arg("aac_adtstoasc")
            .arg("-f")
            .arg("mp4")
            .arg(dest)
            .output()
            .await
            .map_err(AppError::Io)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(event = "ffmpeg_download_failed", status = %output.status, stderr = %stderr.trim());
            return Err(AppError::DownloadFailed(output.status));
        }
        Ok(())
    }
}
