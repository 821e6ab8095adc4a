//! Generic (fallback) adapter.
//!
//! Always matches. Uses readability-style heuristics to find the main content
//! area and falls back to the whole body.

use std::sync::LazyLock;

use scraper::{Html, Selector};
use url::Url;

use super::{PlatformAdapter, Region, first_h1, selectors, strip_region};

pub(crate) const CONTENT_SELECTORS: [&str; 4] = ["main", "article", r#"[role="main"]"#, ".content"];

pub(crate) const CHROME_SELECTORS: [&str; 14] = [
    "nav",
    "header",
    "footer",
    "aside",
    "script",
    "style",
    "form",
    ".sidebar",
    ".nav",
    ".advertisement",
    ".ads",
    r#"[role="navigation"]"#,
    r#"[role="banner"]"#,
    r#"[role="contentinfo"]"#,
];

static CONTENT: LazyLock<Vec<Selector>> = LazyLock::new(|| selectors(&CONTENT_SELECTORS));
static CHROME: LazyLock<Vec<Selector>> = LazyLock::new(|| selectors(&CHROME_SELECTORS));
static BODY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("valid selector"));

/// Generic adapter that works on arbitrary HTML pages.
pub struct GenericAdapter;

impl GenericAdapter {
    /// The heuristic region, or the stripped body when nothing matches.
    pub fn extract_or_body(&self, doc: &Html) -> Region {
        if let Some(region) = self.extract_region(doc) {
            return region;
        }

        match doc.select(&BODY).next() {
            Some(body) => Region {
                html: strip_region(body, &CHROME),
                title: first_h1(body),
                adapter: self.name().to_string(),
            },
            None => Region {
                adapter: self.name().to_string(),
                ..Region::default()
            },
        }
    }
}

impl PlatformAdapter for GenericAdapter {
    fn detect(&self, _doc: &Html, _url: &Url) -> bool {
        true
    }

    fn content_selectors(&self) -> &[Selector] {
        &CONTENT
    }

    fn strip_selectors(&self) -> &[Selector] {
        &CHROME
    }

    fn name(&self) -> &str {
        "generic"
    }
}
