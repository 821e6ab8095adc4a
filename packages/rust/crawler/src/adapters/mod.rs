//! Content-region adapters.
//!
//! An adapter decides which part of a page is content and which parts are
//! chrome. Configured origin rules win, then platform detection
//! (Docusaurus, Read the Docs), then the generic `<main>`/`<article>`
//! heuristic.

mod docusaurus;
mod generic;
mod origin;
mod readthedocs;

use std::collections::HashSet;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use featurelens_shared::{OriginRule, Result};

pub use docusaurus::DocusaurusAdapter;
pub use generic::GenericAdapter;
pub use origin::OriginAdapter;
pub use readthedocs::ReadTheDocsAdapter;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// The retained content region of a page.
#[derive(Debug, Clone, Default)]
pub struct Region {
    /// Inner HTML of the region with strip selectors already applied.
    pub html: String,
    /// First H1 inside the region.
    pub title: Option<String>,
    /// Name of the adapter that produced the region.
    pub adapter: String,
}

/// Locates the content region for one family of pages.
///
/// Adapters are tried in priority order; `GenericAdapter` is the always-last fallback.
pub trait PlatformAdapter: Send + Sync {
    /// Whether this adapter should handle the document.
    fn detect(&self, doc: &Html, url: &Url) -> bool;

    /// Candidate region selectors, most specific first.
    fn content_selectors(&self) -> &[Selector];

    /// Chrome removed from inside the region.
    fn strip_selectors(&self) -> &[Selector];

    /// Human-readable adapter name for tracing.
    fn name(&self) -> &str;

    /// The first matching region, stripped. `None` when no selector matches.
    fn extract_region(&self, doc: &Html) -> Option<Region> {
        self.content_selectors().iter().find_map(|sel| {
            doc.select(sel).next().map(|el| Region {
                html: strip_region(el, self.strip_selectors()),
                title: first_h1(el),
                adapter: self.name().to_string(),
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds origin adapters and built-in platform adapters in priority order.
pub struct AdapterRegistry {
    origins: Vec<OriginAdapter>,
    platforms: Vec<Box<dyn PlatformAdapter>>,
    fallback: GenericAdapter,
}

impl AdapterRegistry {
    /// Built-in adapters only.
    pub fn new() -> Self {
        Self {
            origins: Vec::new(),
            platforms: vec![Box::new(DocusaurusAdapter), Box::new(ReadTheDocsAdapter)],
            fallback: GenericAdapter,
        }
    }

    /// Built-in adapters plus one adapter per configured origin rule.
    ///
    /// Fails on selectors that don't parse.
    pub fn with_origins(rules: &[OriginRule]) -> Result<Self> {
        let mut origins = rules
            .iter()
            .map(OriginAdapter::from_rule)
            .collect::<Result<Vec<_>>>()?;
        // Most specific domain first
        origins.sort_by_key(|adapter| std::cmp::Reverse(adapter.domain().len()));

        Ok(Self {
            origins,
            ..Self::new()
        })
    }

    /// The retained region for `doc`.
    pub fn extract(&self, doc: &Html, url: &Url) -> Region {
        let candidates = self
            .origins
            .iter()
            .map(|a| a as &dyn PlatformAdapter)
            .chain(self.platforms.iter().map(|a| a.as_ref()));

        for adapter in candidates {
            if adapter.detect(doc, url) {
                if let Some(region) = adapter.extract_region(doc) {
                    return region;
                }
            }
        }

        self.fallback.extract_or_body(doc)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse selector literals, panicking on typos in built-in lists.
pub(crate) fn selectors(list: &[&str]) -> Vec<Selector> {
    list.iter()
        .map(|s| Selector::parse(s).expect("valid built-in selector"))
        .collect()
}

/// Inner HTML of `region` with every element matching `strip` removed.
pub(crate) fn strip_region(region: ElementRef, strip: &[Selector]) -> String {
    let matched: Vec<ElementRef> = strip.iter().flat_map(|sel| region.select(sel)).collect();
    let ids: HashSet<_> = matched.iter().map(|el| el.id()).collect();

    let mut html = region.inner_html();
    for el in matched {
        // Nested matches go away with their outermost matched ancestor
        if el.ancestors().any(|node| ids.contains(&node.id())) {
            continue;
        }
        html = html.replacen(&el.html(), "", 1);
    }
    html
}

/// Text of the first H1 under `root`.
pub(crate) fn first_h1(root: ElementRef) -> Option<String> {
    static H1: std::sync::LazyLock<Selector> =
        std::sync::LazyLock::new(|| Selector::parse("h1").expect("valid selector"));

    root.select(&H1)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    const DOCUSAURUS: &str = r#"<html data-docusaurus-version="3.1.0"><head>
        <meta name="generator" content="Docusaurus v3.1.0"></head><body>
        <nav class="navbar"><a href="/blog">Blog</a></nav>
        <main><article><div class="markdown">
            <h1>Installation</h1>
            <p>Run <code>npm install example-tool</code>.</p>
            <a href="/docs/configuration">Configuration</a>
        </div>
        <footer class="theme-doc-footer"><a href="/edit">Edit this page</a></footer>
        </article></main>
        <footer>Copyright 2024</footer>
    </body></html>"#;

    const READTHEDOCS: &str = r##"<html><head><link rel="stylesheet" href="_static/css/theme.css"></head>
        <body class="wy-body-for-nav">
        <nav class="wy-nav-side"><a href="index.html">Home</a></nav>
        <div class="rst-content"><div role="main" class="document">
            <h1>API Reference<a class="headerlink" href="#api">¶</a></h1>
            <p>The Client class.</p>
            <footer><a href="next.html">Next</a></footer>
        </div></div>
    </body></html>"##;

    const GENERIC: &str = r#"<html><body>
        <header><a href="/">Home</a></header>
        <main><h1>About Our Company</h1><p>Our Mission</p>
            <aside><a href="/ads">Sponsored</a></aside></main>
        <script>analytics()</script>
        <footer>Footer</footer>
    </body></html>"#;

    #[test]
    fn docusaurus_region_is_stripped() {
        let doc = Html::parse_document(DOCUSAURUS);
        let region = AdapterRegistry::new().extract(&doc, &url("https://docs.example.com/install"));

        assert_eq!(region.adapter, "docusaurus");
        assert_eq!(region.title.as_deref(), Some("Installation"));
        assert!(region.html.contains("npm install example-tool"));
        assert!(!region.html.contains("Edit this page"));
        assert!(!region.html.contains("Copyright"));
    }

    #[test]
    fn readthedocs_detected_and_extracted() {
        let doc = Html::parse_document(READTHEDOCS);
        let region = AdapterRegistry::new().extract(&doc, &url("https://proj.readthedocs.io/api"));

        assert_eq!(region.adapter, "readthedocs");
        assert!(region.html.contains("The Client class."));
        assert!(!region.html.contains("Next"));
        assert!(!region.html.contains("Home"));
    }

    #[test]
    fn generic_fallback_strips_chrome() {
        let doc = Html::parse_document(GENERIC);
        let region = AdapterRegistry::new().extract(&doc, &url("https://example.com/about"));

        assert_eq!(region.adapter, "generic");
        assert_eq!(region.title.as_deref(), Some("About Our Company"));
        assert!(region.html.contains("Our Mission"));
        assert!(!region.html.contains("Sponsored"));
        assert!(!region.html.contains("analytics"));
    }

    #[test]
    fn generic_uses_body_without_main() {
        let html = "<html><body><nav>Menu</nav><p>Plain body text</p></body></html>";
        let doc = Html::parse_document(html);
        let region = AdapterRegistry::new().extract(&doc, &url("https://example.com/"));

        assert!(region.html.contains("Plain body text"));
        assert!(!region.html.contains("Menu"));
    }

    #[test]
    fn origin_rule_takes_precedence() {
        let rules = vec![OriginRule {
            domain: "example.com".into(),
            content_selectors: vec!["#docs-body".into()],
            strip_selectors: vec![".promo".into()],
            ..OriginRule::default()
        }];
        let registry = AdapterRegistry::with_origins(&rules).unwrap();

        let html = r#"<html><body><main><p>Main text</p></main>
            <div id="docs-body"><h1>Rule</h1><p>Rule text</p><div class="promo">Buy now</div></div>
        </body></html>"#;
        let doc = Html::parse_document(html);

        let region = registry.extract(&doc, &url("https://www.example.com/page"));
        assert_eq!(region.adapter, "origin:example.com");
        assert!(region.html.contains("Rule text"));
        assert!(!region.html.contains("Main text"));
        assert!(!region.html.contains("Buy now"));

        let other = registry.extract(&doc, &url("https://other.com/page"));
        assert_eq!(other.adapter, "generic");
    }

    #[test]
    fn origin_rule_without_match_falls_through() {
        let rules = vec![OriginRule {
            domain: "example.com".into(),
            content_selectors: vec!["#missing".into()],
            ..OriginRule::default()
        }];
        let registry = AdapterRegistry::with_origins(&rules).unwrap();
        let doc = Html::parse_document(GENERIC);

        let region = registry.extract(&doc, &url("https://example.com/about"));
        assert_eq!(region.adapter, "generic");
    }

    #[test]
    fn invalid_origin_selector_is_config_error() {
        let rules = vec![OriginRule {
            domain: "example.com".into(),
            content_selectors: vec!["[[broken".into()],
            ..OriginRule::default()
        }];
        assert!(AdapterRegistry::with_origins(&rules).is_err());
    }
}
