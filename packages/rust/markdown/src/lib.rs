//! HTML-to-text conversion for scraped content regions.
//!
//! Turns the retained content region of a page into Markdown-flavored plain
//! text: headings and fenced code blocks survive (the extractor needs them),
//! link syntax and images are flattened away. Structural metadata (headings,
//! code blocks) is read from the cleaned text so it always agrees with it.

mod cleanup;

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};

use featurelens_shared::{FeatureLensError, Result};

/// Tags that never carry readable content.
const SKIP_TAGS: [&str; 7] = [
    "script", "style", "nav", "iframe", "noscript", "svg", "button",
];

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Result of converting a content region.
#[derive(Debug, Clone, Default)]
pub struct ConvertResult {
    /// Cleaned, Markdown-flavored text.
    pub text: String,
    /// First H1, if any.
    pub title: Option<String>,
    /// Approximate prose word count (code blocks excluded).
    pub word_count: usize,
    /// H1–H3 headings in document order.
    pub headings: Vec<String>,
    pub code_block_count: usize,
    /// Distinct fence languages in first-seen order.
    pub code_languages: Vec<String>,
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// Convert the inner HTML of a content region to clean text.
///
/// 1. Pre-processes HTML tables into Markdown tables
/// 2. Converts HTML → Markdown via `htmd`
/// 3. Runs the cleanup pipeline
/// 4. Reads title, headings, code blocks, and word count from the result
#[instrument(skip_all, fields(html_len = content_html.len()))]
pub fn convert_region(content_html: &str) -> Result<ConvertResult> {
    let content_html = preprocess_tables(content_html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(SKIP_TAGS.to_vec())
        .build();

    let raw_markdown = converter
        .convert(&content_html)
        .map_err(|e| FeatureLensError::Conversion(format!("htmd conversion failed: {e}")))?;

    let text = cleanup::run_pipeline(&raw_markdown);
    let (code_block_count, code_languages) = scan_code_blocks(&text);

    let result = ConvertResult {
        title: extract_title(&text),
        word_count: count_words(&text),
        headings: extract_headings(&text),
        code_block_count,
        code_languages,
        text,
    };

    debug!(
        word_count = result.word_count,
        headings = result.headings.len(),
        code_blocks = result.code_block_count,
        "region converted"
    );

    Ok(result)
}

// ---------------------------------------------------------------------------
// Table pre-processing
// ---------------------------------------------------------------------------

/// Replace `<table>` elements with Markdown tables before htmd runs.
///
/// `htmd` 0.1 doesn't support table conversion.
fn preprocess_tables(html: &str) -> String {
    static TABLE_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("table").expect("valid selector"));

    let doc = Html::parse_fragment(html);
    let mut result = html.to_string();

    for table in doc.select(&TABLE_SEL) {
        let md_table = table_to_markdown(&table);
        result = result.replacen(&table.html(), &md_table, 1);
    }

    result
}

/// Render one table as Markdown rows; the first row is treated as the header.
fn table_to_markdown(table: &ElementRef) -> String {
    static ROW_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("tr").expect("valid selector"));
    static CELL_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("th, td").expect("valid selector"));

    let rows: Vec<Vec<String>> = table
        .select(&ROW_SEL)
        .map(|tr| {
            tr.select(&CELL_SEL)
                .map(|cell| collapse_spaces(&cell.text().collect::<String>()))
                .collect::<Vec<_>>()
        })
        .filter(|cells| !cells.is_empty())
        .collect();

    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    if width == 0 {
        return String::new();
    }

    let render = |cells: &[String]| {
        let mut padded = cells.to_vec();
        padded.resize(width, String::new());
        format!("| {} |\n", padded.join(" | "))
    };

    let mut md = String::from("\n\n");
    md.push_str(&render(&rows[0]));
    md.push_str(&render(&vec!["---".to_string(); width]));
    for row in &rows[1..] {
        md.push_str(&render(row));
    }
    md.push('\n');
    md
}

fn collapse_spaces(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Structure helpers
// ---------------------------------------------------------------------------

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,3})\s+(.+?)\s*#*$").expect("valid regex"));

/// Title from the first H1.
fn extract_title(text: &str) -> Option<String> {
    prose_lines(text)
        .filter_map(|line| HEADING_RE.captures(line))
        .find(|caps| &caps[1] == "#")
        .map(|caps| caps[2].to_string())
}

/// H1–H3 headings outside code blocks.
fn extract_headings(text: &str) -> Vec<String> {
    prose_lines(text)
        .filter_map(|line| HEADING_RE.captures(line))
        .map(|caps| caps[2].to_string())
        .collect()
}

/// Count fenced blocks and collect their info-string languages.
fn scan_code_blocks(text: &str) -> (usize, Vec<String>) {
    let mut count = 0;
    let mut languages: Vec<String> = Vec::new();
    let mut in_block = false;

    for line in text.lines() {
        let Some(info) = line.trim_start().strip_prefix("```") else {
            continue;
        };
        if in_block {
            in_block = false;
            continue;
        }
        in_block = true;
        count += 1;
        let lang = info.trim().to_lowercase();
        if !lang.is_empty() && !languages.contains(&lang) {
            languages.push(lang);
        }
    }

    (count, languages)
}

/// Count prose words, skipping code blocks and heading markers.
fn count_words(text: &str) -> usize {
    prose_lines(text)
        .flat_map(str::split_whitespace)
        .filter(|w| w.chars().any(char::is_alphanumeric))
        .count()
}

/// Lines that are not inside fenced code blocks.
fn prose_lines(text: &str) -> impl Iterator<Item = &str> {
    let mut in_block = false;
    text.lines().filter(move |line| {
        if line.trim_start().starts_with("```") {
            in_block = !in_block;
            return false;
        }
        !in_block
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_simple_region() {
        let html = "<h1>Hello World</h1><p>Some text here.</p>";
        let result = convert_region(html).unwrap();

        assert!(result.text.contains("# Hello World"));
        assert!(result.text.contains("Some text here."));
        assert_eq!(result.title.as_deref(), Some("Hello World"));
        assert_eq!(result.word_count, 5);
    }

    #[test]
    fn convert_preserves_code_blocks() {
        let html = r#"<h1>Code Example</h1>
            <pre><code class="language-yaml">xpack.security.enabled: true</code></pre>
            <pre><code class="language-bash">curl -X GET localhost:9200</code></pre>"#;

        let result = convert_region(html).unwrap();
        assert!(result.text.contains("```yaml"));
        assert!(result.text.contains("xpack.security.enabled"));
        assert_eq!(result.code_block_count, 2);
        assert_eq!(result.code_languages, vec!["yaml", "bash"]);
    }

    #[test]
    fn convert_flattens_links() {
        let html = r#"<p>Read the <a href="/docs/setup">setup guide</a> first.</p>
            <p><img src="/logo.png" alt="logo"></p>"#;
        let result = convert_region(html).unwrap();
        assert!(result.text.contains("Read the setup guide first."));
        assert!(!result.text.contains("/docs/setup"));
        assert!(!result.text.contains("logo.png"));
    }

    #[test]
    fn convert_preserves_tables() {
        let html = r#"<h1>Data</h1>
            <table>
                <thead><tr><th>Setting</th><th>Default</th></tr></thead>
                <tbody><tr><td>enabled</td><td>false</td></tr></tbody>
            </table>"#;

        let result = convert_region(html).unwrap();
        assert!(result.text.contains("| Setting | Default |"));
        assert!(result.text.contains("| enabled | false |"));
    }

    #[test]
    fn headings_collected_in_order() {
        let html = "<h1>Alerting</h1><h2>Rules</h2><p>x</p><h3>Actions</h3><h4>Deep</h4>";
        let result = convert_region(html).unwrap();
        assert_eq!(result.headings, vec!["Alerting", "Rules", "Actions"]);
    }

    #[test]
    fn word_count_excludes_code_blocks() {
        let html = r#"<h1>Title</h1><p>One two three.</p>
            <pre><code>lots of code words that should not be counted</code></pre>"#;

        let result = convert_region(html).unwrap();
        assert_eq!(result.word_count, 4, "text: {}", result.text);
    }

    #[test]
    fn convert_empty_region() {
        let result = convert_region("").unwrap();
        assert!(result.title.is_none());
        assert_eq!(result.word_count, 0);
    }

    #[test]
    fn skip_tags_are_dropped() {
        let html = "<p>Visible</p><script>track()</script><nav>Menu</nav>";
        let result = convert_region(html).unwrap();
        assert!(result.text.contains("Visible"));
        assert!(!result.text.contains("track()"));
        assert!(!result.text.contains("Menu"));
    }
}
