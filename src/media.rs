use crate::error::AppError;
use rand::{distributions::Alphanumeric, Rng};
use std::{
    fmt,
    path::{Path, PathBuf},
};
use tempfile::TempDir;
use tracing::{error, info};

pub const DEFAULT_TITLE: &str = "Random Hentai Video";
pub const UNKNOWN_DURATION: &str = "Unknown";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Provenance {
    Page,
    Extractor,
    Iframe,
    VideoTag,
    SourceTag,
    Anchor,
    ScriptRegex,
    BrowserObserved,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Extractor => "extractor",
            Self::Iframe => "iframe",
            Self::VideoTag => "video-tag",
            Self::SourceTag => "source-tag",
            Self::Anchor => "anchor",
            Self::ScriptRegex => "script-regex",
            Self::BrowserObserved => "browser-observed",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Candidate {
    pub url: String,
    pub provenance: Provenance,
}

impl Candidate {
    pub fn new(url: impl Into<String>, provenance: Provenance) -> Self {
        Self {
            url: url.into(),
            provenance,
        }
    }

    pub fn is_manifest(&self) -> bool {
        is_manifest_url(&self.url)
    }
}

pub fn is_manifest_url(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.to_ascii_lowercase().ends_with(".m3u8")
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResolutionCandidates {
    items: Vec<Candidate>,
}

impl ResolutionCandidates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: Candidate) -> bool {
        if candidate.url.trim().is_empty() || self.contains(&candidate.url) {
            return false;
        }
        self.items.push(candidate);
        true
    }

    pub fn extend(&mut self, candidates: impl IntoIterator<Item = Candidate>) {
        for candidate in candidates {
            self.push(candidate);
        }
    }

    pub fn contains(&self, url: &str) -> bool {
        self.items.iter().any(|c| c.url == url)
    }

    pub fn first_manifest(&self) -> Option<&Candidate> {
        self.items.iter().find(|c| c.is_manifest())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl FromIterator<Candidate> for ResolutionCandidates {
    fn from_iter<I: IntoIterator<Item = Candidate>>(iter: I) -> Self {
        let mut candidates = Self::new();
        candidates.extend(iter);
        candidates
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VideoMetadata {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
    pub uploader: Option<String>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    pub description: Option<String>,
    pub webpage_url: Option<String>,
}

impl VideoMetadata {
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TITLE)
    }

    pub fn duration_label(&self) -> String {
        match self.duration {
            Some(secs) if secs.is_finite() && secs > 0.0 => {
                let total = secs as u64;
                format!("{}:{:02}", total / 60, total % 60)
            }
            _ => UNKNOWN_DURATION.to_string(),
        }
    }

    pub fn link(&self) -> &str {
        self.webpage_url.as_deref().unwrap_or("Not available")
    }

    pub fn caption(&self) -> String {
        format!(
            "🎲 {}\n⏱ Duration: {}\n🔗 {}",
            self.display_title(),
            self.duration_label(),
            self.link()
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DownloadResult {
    pub path: Option<PathBuf>,
    pub size: u64,
    pub success: bool,
    pub source: Option<Candidate>,
}

impl DownloadResult {
    pub fn failed(path: Option<PathBuf>, size: u64) -> Self {
        Self {
            path,
            size,
            success: false,
            source: None,
        }
    }
}

/// Per-invocation scratch directory holding the destination file. Side files
/// the downloader leaves next to it (`.part`, `.ytdl`, fragments) go with it.
#[derive(Debug)]
pub struct TempMedia {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl TempMedia {
    pub fn in_dir(parent: impl AsRef<Path>) -> Result<Self, AppError> {
        let dir = tempfile::Builder::new()
            .prefix("random-video-")
            .tempdir_in(parent)?;
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(char::from)
            .collect();
        let path = dir.path().join(format!("video-{suffix}.mp4"));
        Ok(Self { dir: Some(dir), path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempMedia {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let dir_path = dir.path().to_path_buf();
        match dir.close() {
            Ok(()) => info!(event = "temp_media_removed", path = %dir_path.display()),
            Err(err) => error!(event = "temp_media_remove_failed", path = %dir_path.display(), error = %err),
        }
    }
}
