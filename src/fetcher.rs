//! Article fetching and plain-text extraction.
//!
//! [`HttpFetcher`] downloads a page with `reqwest`, pulls page metadata and
//! the main article body out of the HTML with `scraper`, and strips common
//! site boilerplate. Any failure is reported as a [`FetchError`]; for the
//! pipeline that is fatal to the run, so no stage is dispatched.
//!
//! # Content Selection
//!
//! The body is the text of the first element matching one of
//! `article`, `.article-content`, `.post-content`, `.entry-content`,
//! `.content`, `main` or `.main-content`, falling back to `body`. Text under
//! scripts, styles and page chrome (`nav`, `header`, `footer`, `aside`,
//! `form`, `button`) is ignored.

use crate::models::{ArticleMetadata, Document};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::StatusCode;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

const SUPPORTED_CONTENT_TYPES: [&str; 3] = ["text/html", "application/xhtml+xml", "text/plain"];
const HIDDEN_ELEMENTS: [&str; 8] = ["script", "style", "nav", "footer", "header", "aside", "form", "button"];
const CONTENT_SELECTORS: [&str; 7] = [
    "article",
    ".article-content",
    ".post-content",
    ".entry-content",
    ".content",
    "main",
    ".main-content",
];
const AUTHOR_SELECTORS: [&str; 5] = [
    r#"meta[name="author"]"#,
    r#"meta[property="article:author"]"#,
    ".author",
    ".byline",
    r#"[rel="author"]"#,
];
const DATE_SELECTORS: [&str; 5] = [
    r#"meta[property="article:published_time"]"#,
    r#"meta[name="publishdate"]"#,
    "time[datetime]",
    ".publish-date",
    ".date",
];

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static BOILERPLATE: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)subscribe to.*?newsletter",
        r"(?i)follow us on.*?social media",
        r"(?i)advertisement",
        r"(?i)share this article",
        r"(?i)comments? \(\d+\)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});
/// Link and tag lists closing the article. Only a final run without sentence
/// punctuation is removed, so prose such as "a price tag: $2 billion." stays.
static TRAILING_LISTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:related articles?|tags?)\s*:[^.!?]*$").expect("valid regex"));

/// Why a document could not be obtained.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("fetch timed out: {0}")]
    Timeout(String),
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
    #[error("network error: {0}")]
    Network(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

/// Resolves a URL to a [`Document`].
pub trait DocumentFetcher {
    async fn fetch(&self, url: &Url) -> Result<Document, FetchError>;
}

/// [`DocumentFetcher`] over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(FETCH_TIMEOUT)
    }

    /// A fetcher whose requests give up after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl DocumentFetcher for HttpFetcher {
    #[instrument(level = "info", skip_all, fields(%url))]
    async fn fetch(&self, url: &Url) -> Result<Document, FetchError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if matches!(status, StatusCode::NOT_FOUND | StatusCode::GONE) {
            warn!(%status, "Article not found");
            return Err(FetchError::NotFound(format!("{url} returned {status}")));
        }
        if !status.is_success() {
            warn!(%status, "Article fetch failed");
            return Err(FetchError::Network(format!("{url} returned {status}")));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_string();
        if !is_supported_content_type(&content_type) {
            return Err(FetchError::UnsupportedContentType(content_type));
        }

        let body = response.text().await?;
        let domain = url.host_str().unwrap_or_default().to_string();
        let (metadata, raw_text) = if content_type.starts_with("text/plain") {
            let metadata = ArticleMetadata {
                domain,
                ..ArticleMetadata::default()
            };
            (metadata, clean_content(&body))
        } else {
            extract_article(&body, &domain)
        };

        info!(
            html_bytes = body.len(),
            text_bytes = raw_text.len(),
            title = %metadata.title,
            "Parsed article"
        );
        Ok(Document {
            source_url: url.to_string(),
            raw_text,
            fetched_at: Utc::now(),
            metadata,
        })
    }
}

/// Whether a `Content-Type` header value is something we can extract text from.
pub fn is_supported_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    SUPPORTED_CONTENT_TYPES.contains(&mime.as_str())
}

/// Pull metadata and cleaned body text out of an HTML page.
pub fn extract_article(html: &str, domain: &str) -> (ArticleMetadata, String) {
    let document = Html::parse_document(html);
    let metadata = ArticleMetadata {
        title: extract_title(&document),
        author: first_value(&document, &AUTHOR_SELECTORS, &["content"]),
        publish_date: first_value(&document, &DATE_SELECTORS, &["datetime", "content"]),
        domain: domain.to_string(),
    };

    let mut content = String::new();
    for css in CONTENT_SELECTORS {
        let Ok(selector) = Selector::parse(css) else { continue };
        if let Some(element) = document.select(&selector).next() {
            content = visible_text(element);
            if !content.trim().is_empty() {
                debug!(selector = css, "Matched content selector");
                break;
            }
        }
    }
    if content.trim().is_empty() {
        if let Ok(body) = Selector::parse("body") {
            if let Some(element) = document.select(&body).next() {
                content = visible_text(element);
            }
        }
    }

    (metadata, clean_content(&content))
}

/// Collapse whitespace and strip newsletter prompts, share buttons and
/// similar page furniture.
pub fn clean_content(content: &str) -> String {
    let mut text = WHITESPACE.replace_all(content, " ").into_owned();
    for pattern in BOILERPLATE.iter() {
        text = pattern.replace_all(&text, "").into_owned();
    }
    text = TRAILING_LISTS.replace(text.trim_end(), "").into_owned();
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

fn extract_title(document: &Html) -> String {
    for css in ["h1", "title"] {
        if let Ok(selector) = Selector::parse(css) {
            if let Some(element) = document.select(&selector).next() {
                let text = normalize(&element.text().collect::<String>());
                if !text.is_empty() {
                    return text;
                }
            }
        }
    }
    first_value(document, &[r#"meta[property="og:title"]"#], &["content"])
}

/// Value of the first matching element, preferring the given attributes over
/// the element's text.
fn first_value(document: &Html, selectors: &[&str], attrs: &[&str]) -> String {
    for css in selectors {
        let Ok(selector) = Selector::parse(css) else { continue };
        if let Some(element) = document.select(&selector).next() {
            let from_attr = attrs.iter().find_map(|a| element.value().attr(a));
            let value = match from_attr {
                Some(v) => normalize(v),
                None => normalize(&element.text().collect::<String>()),
            };
            if !value.is_empty() {
                return value;
            }
        }
    }
    String::new()
}

fn visible_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in element.descendants() {
        let Some(text) = node.value().as_text() else { continue };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| HIDDEN_ELEMENTS.contains(&e.name()))
        });
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    out
}

fn normalize(s: &str) -> String {
    WHITESPACE.replace_all(s, " ").trim().to_string()
}
