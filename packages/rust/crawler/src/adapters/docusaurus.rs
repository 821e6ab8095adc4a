//! Docusaurus platform adapter.

use std::sync::LazyLock;

use scraper::{Html, Selector};
use url::Url;

use super::{PlatformAdapter, selectors};

static GENERATOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[name="generator"]"#).expect("valid selector"));
static VERSION_ATTR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("[data-docusaurus-version]").expect("valid selector"));

static CONTENT: LazyLock<Vec<Selector>> =
    LazyLock::new(|| selectors(&["article .markdown", "article", ".markdown", "main"]));
static STRIP: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[
        ".theme-doc-footer",
        ".pagination-nav",
        ".theme-doc-breadcrumbs",
        ".theme-doc-toc-mobile",
        ".hash-link",
        "nav",
        "script",
        "style",
    ])
});

/// Detects and extracts content from Docusaurus-powered documentation sites.
pub struct DocusaurusAdapter;

impl PlatformAdapter for DocusaurusAdapter {
    fn detect(&self, doc: &Html, _url: &Url) -> bool {
        // <meta name="generator" content="Docusaurus ...">
        let by_generator = doc.select(&GENERATOR).any(|el| {
            el.value()
                .attr("content")
                .is_some_and(|c| c.to_lowercase().contains("docusaurus"))
        });

        by_generator || doc.select(&VERSION_ATTR).next().is_some()
    }

    fn content_selectors(&self) -> &[Selector] {
        &CONTENT
    }

    fn strip_selectors(&self) -> &[Selector] {
        &STRIP
    }

    fn name(&self) -> &str {
        "docusaurus"
    }
}
