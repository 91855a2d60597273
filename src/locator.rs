use crate::{
    browser::BrowserProbe,
    config::{REQUEST_TIMEOUT, USER_AGENT},
    error::AppError,
    media::{Candidate, Provenance, ResolutionCandidates, VideoMetadata},
    scrape,
    yt_dlp::MediaExtractor,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Clone, Debug, PartialEq)]
pub struct FetchedPage {
    pub url: String,
    pub body: String,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, AppError>;
}

pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new() -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .cookie_store(true)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<FetchedPage, AppError> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let final_url = response.url().to_string();
        let body = response.text().await?;
        info!(event = "page_fetched", url = %final_url, bytes = body.len());
        Ok(FetchedPage {
            url: final_url,
            body,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Strategy {
    Extractor,
    HeadlessBrowser,
    StaticScrape,
}

impl Strategy {
    pub const ORDER: [Strategy; 3] = [
        Strategy::Extractor,
        Strategy::HeadlessBrowser,
        Strategy::StaticScrape,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Extractor => "extractor",
            Self::HeadlessBrowser => "headless-browser",
            Self::StaticScrape => "static-scrape",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Located {
    pub page_url: String,
    pub candidates: ResolutionCandidates,
    pub metadata: VideoMetadata,
    pub resolved_by: Option<Strategy>,
}

#[derive(Clone)]
pub struct MediaLocator {
    fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<dyn MediaExtractor>,
    browser: Option<Arc<dyn BrowserProbe>>,
    video_pattern: String,
}

impl MediaLocator {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        extractor: Arc<dyn MediaExtractor>,
        browser: Option<Arc<dyn BrowserProbe>>,
        video_pattern: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            browser,
            video_pattern: video_pattern.into(),
        }
    }

    #[instrument(skip(self))]
    pub async fn resolve_page(&self, start_url: &str) -> Result<FetchedPage, AppError> {
        let landing = self.fetcher.fetch(start_url).await?;
        if landing.url.contains(&self.video_pattern) {
            return Ok(landing);
        }

        let links = scrape::matching_links(&landing.body, &landing.url, &self.video_pattern);
        let Some(link) = links.into_iter().next() else {
            warn!(event = "no_video_link", url = %landing.url);
            return Err(AppError::NoVideoLink(landing.url));
        };
        info!(event = "video_link_scraped", url = %link);
        self.fetcher.fetch(&link).await
    }

    #[instrument(skip(self))]
    pub async fn locate(&self, start_url: &str) -> Result<Located, AppError> {
        let page = self.resolve_page(start_url).await?;
        info!(event = "video_page_resolved", url = %page.url);

        let mut metadata = VideoMetadata {
            title: scrape::page_title(&page.body),
            webpage_url: Some(page.url.clone()),
            ..Default::default()
        };
        let mut candidates = ResolutionCandidates::new();
        candidates.push(Candidate::new(page.url.clone(), Provenance::Page));

        let mut resolved_by = None;
        for strategy in Strategy::ORDER {
            let found = self.run(strategy, &page, &mut metadata).await;
            let distinct: Vec<Candidate> = found.into_iter().filter(|c| c.url != page.url).collect();
            if distinct.is_empty() {
                info!(event = "strategy_miss", strategy = strategy.name());
                continue;
            }
            info!(event = "strategy_hit", strategy = strategy.name(), count = distinct.len());
            candidates.extend(distinct);
            resolved_by = Some(strategy);
            break;
        }

        Ok(Located {
            page_url: page.url,
            candidates,
            metadata,
            resolved_by,
        })
    }

    async fn run(&self, strategy: Strategy, page: &FetchedPage, metadata: &mut VideoMetadata) -> Vec<Candidate> {
        match strategy {
            Strategy::Extractor => match self.extractor.extract(&page.url).await {
                Ok(extraction) => {
                    merge_metadata(metadata, extraction.metadata);
                    extraction
                        .direct_url
                        .map(|url| vec![Candidate::new(url, Provenance::Extractor)])
                        .unwrap_or_default()
                }
                Err(err) => {
                    warn!(event = "extractor_soft_miss", url = %page.url, error = %err);
                    Vec::new()
                }
            },
            Strategy::HeadlessBrowser => {
                let Some(browser) = &self.browser else {
                    return Vec::new();
                };
                match browser.observe(&page.url).await {
                    Ok(urls) => urls
                        .into_iter()
                        .map(|url| Candidate::new(url, Provenance::BrowserObserved))
                        .collect(),
                    Err(err) => {
                        warn!(event = "browser_soft_miss", url = %page.url, error = %err);
                        Vec::new()
                    }
                }
            }
            Strategy::StaticScrape => scrape::embedded_candidates(&page.body, &page.url),
        }
    }
}

/// Extractor values win; the page-derived title survives when the extractor
/// has none. The link always stays the resolved page URL.
fn merge_metadata(into: &mut VideoMetadata, from: VideoMetadata) {
    let VideoMetadata {
        title,
        thumbnail,
        duration,
        uploader,
        view_count,
        like_count,
        description,
        webpage_url: _,
    } = from;
    if title.as_deref().is_some_and(|t| !t.trim().is_empty()) {
        into.title = title;
    }
    into.thumbnail = thumbnail.or(into.thumbnail.take());
    into.duration = duration.or(into.duration);
    into.uploader = uploader.or(into.uploader.take());
    into.view_count = view_count.or(into.view_count);
    into.like_count = like_count.or(into.like_count);
    into.description = description.or(into.description.take());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::yt_dlp::Extraction;
    use std::{collections::HashMap, sync::Mutex};

    const RANDOM: &str = "https://hanime.tv/browse/random";
    const PATTERN: &str = "/videos/hentai/";

    #[derive(Default)]
    struct FakeFetcher {
        /// request URL -> (final URL, body)
        pages: HashMap<String, (String, String)>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        fn with(mut self, url: &str, final_url: &str, body: &str) -> Self {
            self.pages
                .insert(url.to_string(), (final_url.to_string(), body.to_string()));
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedPage, AppError> {
            self.calls.lock().unwrap().push(url.to_string());
            let (final_url, body) = self
                .pages
                .get(url)
                .cloned()
                .ok_or_else(|| AppError::NoVideoLink(url.to_string()))?;
            Ok(FetchedPage { url: final_url, body })
        }
    }

    struct FakeExtractor(Option<Extraction>);

    #[async_trait]
    impl MediaExtractor for FakeExtractor {
        async fn extract(&self, _page_url: &str) -> Result<Extraction, AppError> {
            self.0
                .clone()
                .ok_or_else(|| AppError::YtDlp("unsupported".into()))
        }
    }

    #[derive(Default)]
    struct FakeBrowser {
        urls: Vec<String>,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl BrowserProbe for FakeBrowser {
        async fn observe(&self, _page_url: &str) -> Result<Vec<String>, AppError> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.urls.clone())
        }
    }

    fn locator(
        fetcher: Arc<FakeFetcher>,
        extraction: Option<Extraction>,
        browser: Option<Arc<FakeBrowser>>,
    ) -> MediaLocator {
        MediaLocator::new(
            fetcher,
            Arc::new(FakeExtractor(extraction)),
            browser.map(|b| b as Arc<dyn BrowserProbe>),
            PATTERN,
        )
    }

    #[tokio::test]
    async fn matching_redirect_needs_one_fetch() {
        let fetcher = Arc::new(FakeFetcher::default().with(
            RANDOM,
            "https://hanime.tv/videos/hentai/ep-1",
            "<html><a href='/videos/hentai/other'>x</a></html>",
        ));
        let page = locator(fetcher.clone(), None, None)
            .resolve_page(RANDOM)
            .await
            .unwrap();
        assert_eq!(page.url, "https://hanime.tv/videos/hentai/ep-1");
        assert_eq!(fetcher.calls(), [RANDOM]);
    }

    #[tokio::test]
    async fn non_matching_redirect_fetches_first_anchor_once() {
        let fetcher = Arc::new(
            FakeFetcher::default()
                .with(
                    RANDOM,
                    "https://hanime.tv/browse",
                    "<a href='/videos/hentai/ep-2'>a</a><a href='/videos/hentai/ep-3'>b</a>",
                )
                .with(
                    "https://hanime.tv/videos/hentai/ep-2",
                    "https://hanime.tv/videos/hentai/ep-2",
                    "<title>Ep 2</title>",
                ),
        );
        let page = locator(fetcher.clone(), None, None)
            .resolve_page(RANDOM)
            .await
            .unwrap();
        assert_eq!(page.url, "https://hanime.tv/videos/hentai/ep-2");
        assert_eq!(fetcher.calls(), [RANDOM, "https://hanime.tv/videos/hentai/ep-2"]);
    }

    #[tokio::test]
    async fn no_anchor_is_terminal() {
        let fetcher = Arc::new(FakeFetcher::default().with(RANDOM, "https://hanime.tv/", "<a href='/x'>x</a>"));
        let err = locator(fetcher.clone(), None, None)
            .locate(RANDOM)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NoVideoLink(_)));
        assert_eq!(fetcher.calls().len(), 1);
    }

    #[tokio::test]
    async fn extractor_hit_skips_later_strategies() {
        let page_url = "https://hanime.tv/videos/hentai/ep-1";
        let fetcher = Arc::new(FakeFetcher::default().with(
            RANDOM,
            page_url,
            "<title>Page Title</title><iframe src='https://player.example/1'></iframe>",
        ));
        let browser = Arc::new(FakeBrowser {
            urls: vec!["https://cdn.example/a.m3u8".into()],
            ..Default::default()
        });
        let extraction = Extraction {
            metadata: VideoMetadata {
                thumbnail: Some("https://img.example/t.jpg".into()),
                duration: Some(90.0),
                ..Default::default()
            },
            direct_url: Some("https://cdn.example/direct.mp4".into()),
        };
        let located = locator(fetcher, Some(extraction), Some(browser.clone()))
            .locate(RANDOM)
            .await
            .unwrap();

        let urls: Vec<_> = located.candidates.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, [page_url, "https://cdn.example/direct.mp4"]);
        assert_eq!(located.resolved_by, Some(Strategy::Extractor));
        assert_eq!(*browser.calls.lock().unwrap(), 0);
        assert_eq!(located.metadata.display_title(), "Page Title");
        assert_eq!(located.metadata.duration_label(), "1:30");
        assert_eq!(located.metadata.link(), page_url);
    }

    #[tokio::test]
    async fn extractor_echoing_page_url_falls_through_to_browser() {
        let page_url = "https://hanime.tv/videos/hentai/ep-1";
        let fetcher = Arc::new(FakeFetcher::default().with(RANDOM, page_url, "<iframe src='https://p.example/1'></iframe>"));
        let browser = Arc::new(FakeBrowser {
            urls: vec!["https://cdn.example/a.m3u8".into()],
            ..Default::default()
        });
        let extraction = Extraction {
            metadata: VideoMetadata::default(),
            direct_url: Some(page_url.into()),
        };
        let located = locator(fetcher, Some(extraction), Some(browser))
            .locate(RANDOM)
            .await
            .unwrap();
        assert_eq!(located.resolved_by, Some(Strategy::HeadlessBrowser));
        let provenances: Vec<_> = located.candidates.iter().map(|c| c.provenance).collect();
        assert_eq!(provenances, [Provenance::Page, Provenance::BrowserObserved]);
    }

    #[tokio::test]
    async fn static_scrape_used_when_browser_disabled() {
        let page_url = "https://hanime.tv/videos/hentai/ep-1";
        let fetcher = Arc::new(FakeFetcher::default().with(
            RANDOM,
            page_url,
            "<iframe src='https://p.example/1'></iframe><script>x='https://cdn.example/s.m3u8'</script>",
        ));
        let located = locator(fetcher.clone(), None, None).locate(RANDOM).await.unwrap();
        assert_eq!(located.resolved_by, Some(Strategy::StaticScrape));
        let urls: Vec<_> = located.candidates.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, [page_url, "https://p.example/1", "https://cdn.example/s.m3u8"]);
        assert_eq!(fetcher.calls().len(), 1);
    }

    #[tokio::test]
    async fn page_url_is_sole_candidate_when_everything_misses() {
        let page_url = "https://hanime.tv/videos/hentai/ep-1";
        let fetcher = Arc::new(FakeFetcher::default().with(RANDOM, page_url, "<p>nothing</p>"));
        let located = locator(fetcher, None, Some(Arc::new(FakeBrowser::default())))
            .locate(RANDOM)
            .await
            .unwrap();
        assert_eq!(located.resolved_by, None);
        assert_eq!(located.candidates.len(), 1);
        assert_eq!(located.candidates.iter().next().unwrap().provenance, Provenance::Page);
        assert_eq!(located.metadata.display_title(), crate::media::DEFAULT_TITLE);
    }
}
