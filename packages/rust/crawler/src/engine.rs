//! Single-page scraper with pacing, retries, and content cleaning.
//!
//! [`Scraper::fetch`] never lets a failure escape as a panic: every outcome
//! is either a successful [`SourceContent`] or a typed [`FeatureLensError`]
//! the caller can record against the URL.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, StatusCode, header};
use scraper::{ElementRef, Html, Selector};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use url::Url;

use featurelens_shared::{
    DiscoveredLink, FeatureLensError, PageStructure, Result, ScrapingConfig, SourceContent,
    SourceKind, SourceStatus,
};

use crate::adapters::AdapterRegistry;
use crate::rate_limiter::RateLimiter;
use crate::validator::{SeenSet, SourceValidator};

/// Redirect hops followed per attempt. Each target is validated first.
const MAX_REDIRECTS: usize = 5;

/// Longest context snippet kept per discovered link.
const MAX_CONTEXT_CHARS: usize = 300;

/// Ancestors whose text counts as a link's surrounding context.
const CONTEXT_TAGS: [&str; 11] = [
    "p", "li", "td", "dd", "dt", "blockquote", "h1", "h2", "h3", "h4", "figcaption",
];

// ---------------------------------------------------------------------------
// Scraper
// ---------------------------------------------------------------------------

/// Fetches and cleans one page at a time.
///
/// Cheap to share: all state is behind `Arc`s or immutable.
pub struct Scraper {
    config: Arc<ScrapingConfig>,
    client: Client,
    registry: AdapterRegistry,
    limiter: Arc<RateLimiter>,
    validator: SourceValidator,
}

impl Scraper {
    /// Build a scraper over the shared rate limiter.
    ///
    /// Fails on an unbuildable HTTP client or invalid origin selectors.
    pub fn new(config: Arc<ScrapingConfig>, limiter: Arc<RateLimiter>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| FeatureLensError::Network(format!("failed to build HTTP client: {e}")))?;

        let registry = AdapterRegistry::with_origins(&config.origins)?;

        Ok(Self {
            validator: SourceValidator::new(&config),
            config,
            client,
            registry,
            limiter,
        })
    }

    /// Fetch `url` with pacing, bounded retries, and a stage deadline.
    ///
    /// The stage deadline covers every attempt and backoff sleep.
    #[instrument(skip_all, fields(url = %url, kind = ?kind))]
    pub async fn fetch(&self, url: &Url, kind: SourceKind) -> Result<SourceContent> {
        let stage_timeout = Duration::from_secs(self.config.stage_timeout_secs.max(1));
        let started = tokio::time::Instant::now();

        let result = match tokio::time::timeout(stage_timeout, self.fetch_with_retries(url, kind))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(FeatureLensError::ScrapingTimeout {
                url: url.to_string(),
                attempts: self.config.max_attempts,
            }),
        };

        match &result {
            Ok(page) => info!(
                words = page.word_count,
                links = page.links.len(),
                adapter = page.adapter.as_deref().unwrap_or_default(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "page scraped"
            ),
            Err(e) if e.is_permanent() => warn!(error = %e, permanent = true, "scrape refused"),
            Err(e) => warn!(error = %e, "scrape failed"),
        }

        result
    }

    /// Bounded retry loop. Only retryable failures are attempted again.
    async fn fetch_with_retries(&self, url: &Url, kind: SourceKind) -> Result<SourceContent> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            self.limiter.wait_for(url).await;

            match self.fetch_once(url, kind, attempt).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = backoff_delay(self.config.backoff_base_ms, attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, url: &Url, kind: SourceKind, attempt: u32) -> Result<SourceContent> {
        debug!(attempt, "fetching page");

        let (response, final_url) = self.follow_redirects(url, attempt).await?;

        let status = response.status();
        if matches!(
            status,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS
        ) {
            return Err(FeatureLensError::AccessDenied {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(FeatureLensError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify_transport(url, attempt, &e))?;

        if body.trim().is_empty() {
            return Err(FeatureLensError::EmptyBody {
                url: url.to_string(),
            });
        }

        // Links resolve against where the body came from; the source keeps its requested URL
        let mut page = parse_page(&self.registry, &final_url, kind, &body)?;
        if final_url != *url {
            debug!(final_url = %final_url, "followed redirects");
            page.url = url.to_string();
        }
        Ok(page)
    }

    /// GET `url`, following redirects by hand so every hop passes the
    /// validator's scheme, allow-list and private-host checks.
    async fn follow_redirects(&self, url: &Url, attempt: u32) -> Result<(reqwest::Response, Url)> {
        let mut current = url.clone();

        for hop in 0..=MAX_REDIRECTS {
            let response = self
                .client
                .get(current.as_str())
                .send()
                .await
                .map_err(|e| classify_transport(url, attempt, &e))?;

            if !response.status().is_redirection() {
                return Ok((response, current));
            }

            let status = response.status().as_u16();
            let Some(target) = response
                .headers()
                .get(header::LOCATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|location| current.join(location).ok())
            else {
                return Err(FeatureLensError::HttpStatus {
                    url: url.to_string(),
                    status,
                });
            };

            if hop == MAX_REDIRECTS {
                break;
            }

            let validation = self.validator.validate_url(&target, &SeenSet::new());
            if !validation.allowed {
                warn!(location = %target, reason = %validation.reason, "redirect target rejected");
                return Err(FeatureLensError::rejected(
                    url.as_str(),
                    format!("redirect to {target}: {}", validation.reason),
                ));
            }

            debug!(hop = hop + 1, status, location = %target, "following redirect");
            self.limiter.wait_for(&target).await;
            current = target;
        }

        Err(FeatureLensError::Network(format!(
            "{url}: more than {MAX_REDIRECTS} redirects"
        )))
    }
}

/// Exponential backoff: `base * 2^(attempt - 1)`.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.saturating_sub(1).min(10);
    Duration::from_millis(base_ms.saturating_mul(factor))
}

fn classify_transport(url: &Url, attempt: u32, e: &reqwest::Error) -> FeatureLensError {
    if e.is_timeout() {
        FeatureLensError::ScrapingTimeout {
            url: url.to_string(),
            attempts: attempt,
        }
    } else {
        FeatureLensError::Network(format!("{url}: {e}"))
    }
}

// ---------------------------------------------------------------------------
// Page parsing
// ---------------------------------------------------------------------------

/// Turn a fetched body into a [`SourceContent`].
///
/// Kept synchronous so the non-`Send` DOM never crosses an await.
pub fn parse_page(
    registry: &AdapterRegistry,
    url: &Url,
    kind: SourceKind,
    body: &str,
) -> Result<SourceContent> {
    let doc = Html::parse_document(body);
    let region = registry.extract(&doc, url);
    let converted = featurelens_markdown::convert_region(&region.html)?;

    if converted.text.trim().is_empty() {
        return Err(FeatureLensError::EmptyBody {
            url: url.to_string(),
        });
    }

    let fragment = Html::parse_fragment(&region.html);
    let links = extract_links(&fragment, url);

    Ok(SourceContent {
        url: url.to_string(),
        title: region
            .title
            .or(converted.title)
            .or_else(|| document_title(&doc)),
        fetched_at: Utc::now(),
        status: SourceStatus::Success,
        kind,
        word_count: converted.word_count,
        content_hash: Some(compute_hash(&converted.text)),
        text: converted.text,
        structure: PageStructure {
            headings: converted.headings,
            code_block_count: converted.code_block_count,
            code_languages: converted.code_languages,
            language: document_language(&doc),
        },
        links,
        adapter: Some(region.adapter),
        relevance_score: None,
        discovery_method: None,
        discovered_from: None,
        depth: 0,
        error: None,
    })
}

/// Outbound links in the retained region, resolved and deduplicated.
fn extract_links(region: &Html, base_url: &Url) -> Vec<DiscoveredLink> {
    static LINK_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

    let mut links: Vec<DiscoveredLink> = Vec::new();

    for el in region.select(&LINK_SEL) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        // Skip anchors, javascript:, mailto:
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
        {
            continue;
        }

        let Ok(mut resolved) = base_url.join(href) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        resolved.set_fragment(None);
        let url = resolved.to_string();

        if links.iter().any(|l| l.url == url) {
            continue;
        }

        let anchor_text = collapse_spaces(&el.text().collect::<String>());
        let context = link_context(el).unwrap_or_else(|| anchor_text.clone());

        links.push(DiscoveredLink {
            url,
            anchor_text,
            context,
        });
    }

    links
}

/// Text of the nearest block-level ancestor, capped.
fn link_context(el: ElementRef) -> Option<String> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|ancestor| CONTEXT_TAGS.contains(&ancestor.value().name()))
        .map(|block| {
            let text = collapse_spaces(&block.text().collect::<String>());
            text.chars().take(MAX_CONTEXT_CHARS).collect()
        })
}

fn document_title(doc: &Html) -> Option<String> {
    static TITLE_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("title").expect("valid selector"));

    doc.select(&TITLE_SEL)
        .next()
        .map(|el| collapse_spaces(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

fn document_language(doc: &Html) -> Option<String> {
    static HTML_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("html[lang]").expect("valid selector"));

    doc.select(&HTML_SEL)
        .next()
        .and_then(|el| el.value().attr("lang"))
        .map(|lang| lang.trim().to_lowercase())
        .filter(|lang| !lang.is_empty())
}

fn collapse_spaces(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Compute SHA-256 hash of content.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
