use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Teloxide request error: {0}")]
    Teloxide(#[from] teloxide::RequestError),

    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yt-dlp execution failed: {0}")]
    YtDlp(String),

    #[error("Download failed with exit code: {0}")]
    DownloadFailed(std::process::ExitStatus),

    #[error("No video links found on {0}")]
    NoVideoLink(String),

    #[error("Headless browser error: {0}")]
    Browser(String),

    #[error("Another bot instance is running (lock file {})", .0.display())]
    InstanceRunning(PathBuf),

    #[error("All {0} download attempts failed")]
    DownloadExhausted(usize),
}
