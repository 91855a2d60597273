use crate::media::{Candidate, Provenance};
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use url::Url;

static MANIFEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s"'<>\\]+?\.m3u8(?:\?[^\s"'<>\\]*)?"#).expect("valid manifest regex")
});

static ANCHOR: LazyLock<Selector> = LazyLock::new(|| selector("a[href]"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("title"));
static IFRAME: LazyLock<Selector> = LazyLock::new(|| selector("iframe[src]"));
static VIDEO: LazyLock<Selector> = LazyLock::new(|| selector("video"));
static SOURCE: LazyLock<Selector> = LazyLock::new(|| selector("source[src]"));
static SCRIPT: LazyLock<Selector> = LazyLock::new(|| selector("script"));
static EMBED: LazyLock<Selector> = LazyLock::new(|| selector("embed[src]"));

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

pub fn absolutize(base: &str, href: &str) -> String {
    let href = href.trim();
    Url::parse(base)
        .and_then(|base| base.join(href))
        .map(String::from)
        .unwrap_or_else(|_| href.to_string())
}

pub fn matching_links(html: &str, base: &str, pattern: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .select(&ANCHOR)
        .filter_map(|a| a.value().attr("href"))
        .filter(|href| href.contains(pattern))
        .map(|href| absolutize(base, href))
        .collect()
}

pub fn page_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    document
        .select(&TITLE)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

pub fn manifest_urls(text: &str) -> Vec<String> {
    let text = text.replace("\\/", "/");
    MANIFEST_RE
        .find_iter(&text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Candidates visible in the static markup: iframe, video and source tags,
/// manifest anchors, then manifest URLs found in script bodies.
pub fn embedded_candidates(html: &str, base: &str) -> Vec<Candidate> {
    let document = Html::parse_document(html);
    let mut found = Vec::new();

    for iframe in document.select(&IFRAME) {
        if let Some(src) = iframe.value().attr("src") {
            found.push(Candidate::new(absolutize(base, src), Provenance::Iframe));
        }
    }
    for embed in document.select(&EMBED) {
        if let Some(src) = embed.value().attr("src") {
            found.push(Candidate::new(absolutize(base, src), Provenance::Iframe));
        }
    }
    for video in document.select(&VIDEO) {
        if let Some(src) = video.value().attr("src") {
            found.push(Candidate::new(absolutize(base, src), Provenance::VideoTag));
        }
        for source in video.select(&SOURCE) {
            if let Some(src) = source.value().attr("src") {
                found.push(Candidate::new(absolutize(base, src), Provenance::VideoTag));
            }
        }
    }
    for source in document.select(&SOURCE) {
        if let Some(src) = source.value().attr("src") {
            found.push(Candidate::new(absolutize(base, src), Provenance::SourceTag));
        }
    }
    for anchor in document.select(&ANCHOR) {
        if let Some(href) = anchor.value().attr("href") {
            if crate::media::is_manifest_url(href.trim()) {
                found.push(Candidate::new(absolutize(base, href), Provenance::Anchor));
            }
        }
    }
    for script in document.select(&SCRIPT) {
        let body: String = script.text().collect();
        for url in manifest_urls(&body) {
            found.push(Candidate::new(url, Provenance::ScriptRegex));
        }
    }

    found.retain(|c| c.url.starts_with("http://") || c.url.starts_with("https://"));
    found
}
