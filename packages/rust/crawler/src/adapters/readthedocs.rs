//! Read the Docs platform adapter.

use std::sync::LazyLock;

use scraper::{Html, Selector};
use url::Url;

use super::{PlatformAdapter, selectors};

static MARKERS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[
        r#"meta[name="readthedocs"]"#,
        ".wy-nav-side",
        ".wy-body-for-nav",
        // Sphinx static assets
        r#"link[href*="_static"]"#,
    ])
});

static CONTENT: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[r#"[role="main"]"#, ".document", ".rst-content .section", "main"])
});
static STRIP: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[
        "footer",
        r#"[role="navigation"]"#,
        ".headerlink",
        ".rst-versions",
        "script",
        "style",
    ])
});

/// Detects and extracts content from Read the Docs (Sphinx) documentation sites.
pub struct ReadTheDocsAdapter;

impl PlatformAdapter for ReadTheDocsAdapter {
    fn detect(&self, doc: &Html, url: &Url) -> bool {
        url.host_str().is_some_and(|h| h.ends_with(".readthedocs.io"))
            || MARKERS.iter().any(|sel| doc.select(sel).next().is_some())
    }

    fn content_selectors(&self) -> &[Selector] {
        &CONTENT
    }

    fn strip_selectors(&self) -> &[Selector] {
        &STRIP
    }

    fn name(&self) -> &str {
        "readthedocs"
    }
}
