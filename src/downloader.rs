use crate::{
    media::{Candidate, DownloadResult, ResolutionCandidates},
    yt_dlp::MediaDownloader,
};
use std::{path::Path, sync::Arc};
use tracing::{info, instrument, warn};

/// Tries candidates in order against one destination path. The backend's own
/// status is ignored; an attempt only counts when the destination exists and
/// is non-empty afterwards.
#[derive(Clone)]
pub struct Downloader {
    backend: Arc<dyn MediaDownloader>,
}

impl Downloader {
    pub fn new(backend: Arc<dyn MediaDownloader>) -> Self {
        Self { backend }
    }

    #[instrument(skip(self, candidates), fields(candidates = candidates.len()))]
    pub async fn download(&self, candidates: &ResolutionCandidates, dest: &Path) -> DownloadResult {
        if candidates.is_empty() {
            warn!(event = "download_no_candidates");
            return DownloadResult::failed(None, 0);
        }
        for candidate in candidates.iter() {
            info!(event = "download_attempt", url = %candidate.url, provenance = %candidate.provenance);
            if let Err(err) = self.backend.download(&candidate.url, dest).await {
                warn!(event = "download_attempt_failed", url = %candidate.url, error = %err);
            }
            if let Some(result) = check_destination(dest, candidate).await {
                return result;
            }
        }

        if let Some(manifest) = candidates.first_manifest() {
            info!(event = "download_stream_retry", url = %manifest.url);
            if let Err(err) = self.backend.download_stream(&manifest.url, dest).await {
                warn!(event = "download_stream_failed", url = %manifest.url, error = %err);
            }
            if let Some(result) = check_destination(dest, manifest).await {
                return result;
            }
        }

        let size = file_size(dest).await.unwrap_or(0);
        warn!(event = "download_exhausted", attempts = candidates.len());
        DownloadResult::failed(dest.exists().then(|| dest.to_path_buf()), size)
    }
}

async fn check_destination(dest: &Path, candidate: &Candidate) -> Option<DownloadResult> {
    match file_size(dest).await {
        Some(size) if size > 0 => {
            info!(event = "download_success", url = %candidate.url, bytes = size);
            Some(DownloadResult {
                path: Some(dest.to_path_buf()),
                size,
                success: true,
                source: Some(candidate.clone()),
            })
        }
        Some(_) => {
            warn!(event = "download_empty_file", url = %candidate.url);
            None
        }
        None => None,
    }
}

pub async fn file_size(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::AppError, media::Provenance};
    use async_trait::async_trait;
    use std::{collections::HashMap, sync::Mutex};

    /// Per-URL behaviour: bytes to write (possibly empty) and whether to
    /// report success.
    #[derive(Default)]
    struct FakeBackend {
        writes: HashMap<String, (Vec<u8>, bool)>,
        stream_writes: HashMap<String, Vec<u8>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeBackend {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MediaDownloader for FakeBackend {
        async fn download(&self, url: &str, dest: &Path) -> Result<(), AppError> {
            self.calls.lock().unwrap().push(url.to_string());
            match self.writes.get(url) {
                Some((bytes, ok)) => {
                    std::fs::write(dest, bytes)?;
                    if *ok {
                        Ok(())
                    } else {
                        Err(AppError::YtDlp("reported failure".into()))
                    }
                }
                None => Err(AppError::YtDlp("unsupported url".into())),
            }
        }

        async fn download_stream(&self, url: &str, dest: &Path) -> Result<(), AppError> {
            self.calls.lock().unwrap().push(format!("stream:{url}"));
            match self.stream_writes.get(url) {
                Some(bytes) => {
                    std::fs::write(dest, bytes)?;
                    Ok(())
                }
                None => Err(AppError::YtDlp("stream failed".into())),
            }
        }
    }

    fn candidates(urls: &[(&str, Provenance)]) -> ResolutionCandidates {
        urls.iter().map(|(u, p)| Candidate::new(*u, *p)).collect()
    }

    #[tokio::test]
    async fn reported_success_with_empty_file_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.mp4");
        let mut backend = FakeBackend::default();
        backend.writes.insert("https://a/page".into(), (Vec::new(), true));
        backend.writes.insert("https://b/video.mp4".into(), (b"video".to_vec(), true));
        let backend = Arc::new(backend);

        let result = Downloader::new(backend.clone())
            .download(
                &candidates(&[("https://a/page", Provenance::Page), ("https://b/video.mp4", Provenance::Iframe)]),
                &dest,
            )
            .await;

        assert!(result.success);
        assert_eq!(result.size, 5);
        assert_eq!(result.source.map(|c| c.provenance), Some(Provenance::Iframe));
        assert_eq!(backend.calls(), ["https://a/page", "https://b/video.mp4"]);
    }

    #[tokio::test]
    async fn reported_failure_with_bytes_on_disk_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.mp4");
        let mut backend = FakeBackend::default();
        backend.writes.insert("https://a/page".into(), (b"partial but usable".to_vec(), false));
        backend.writes.insert("https://never".into(), (b"x".to_vec(), true));
        let backend = Arc::new(backend);

        let result = Downloader::new(backend.clone())
            .download(
                &candidates(&[("https://a/page", Provenance::Page), ("https://never", Provenance::Iframe)]),
                &dest,
            )
            .await;

        assert!(result.success);
        assert_eq!(backend.calls(), ["https://a/page"]);
    }

    #[tokio::test]
    async fn manifest_gets_one_streaming_retry() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.mp4");
        let mut backend = FakeBackend::default();
        backend
            .stream_writes
            .insert("https://cdn/master.m3u8".into(), b"ts".to_vec());
        let backend = Arc::new(backend);

        let result = Downloader::new(backend.clone())
            .download(
                &candidates(&[
                    ("https://a/page", Provenance::Page),
                    ("https://cdn/master.m3u8", Provenance::ScriptRegex),
                ]),
                &dest,
            )
            .await;

        assert!(result.success);
        assert_eq!(
            backend.calls(),
            ["https://a/page", "https://cdn/master.m3u8", "stream:https://cdn/master.m3u8"]
        );
    }

    #[tokio::test]
    async fn exhaustion_without_manifest_skips_stream_retry() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.mp4");
        let backend = Arc::new(FakeBackend::default());

        let result = Downloader::new(backend.clone())
            .download(&candidates(&[("https://a/page", Provenance::Page)]), &dest)
            .await;

        assert!(!result.success);
        assert_eq!(result.size, 0);
        assert!(result.path.is_none());
        assert_eq!(backend.calls(), ["https://a/page"]);
    }
}
