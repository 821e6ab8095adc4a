//! Post-conversion cleanup pipeline.
//!
//! Each cleanup pass is a function `&str -> String` applied in sequence.
//! Fenced code blocks pass through every text-level rewrite untouched.

use std::sync::LazyLock;

use regex::Regex;

/// Run the full cleanup pipeline on raw Markdown text.
pub(crate) fn run_pipeline(md: &str) -> String {
    let mut result = md.to_string();

    result = fix_code_block_languages(&result);
    result = map_prose(&result, strip_html_tags);
    result = map_prose(&result, flatten_links);
    result = normalize_whitespace(&result);
    result = clean_blank_lines(&result);

    result.trim().to_string()
}

/// Apply `pass` to every line outside fenced code blocks.
fn map_prose(md: &str, pass: fn(&str) -> String) -> String {
    let mut in_code_block = false;

    md.lines()
        .map(|line| {
            if line.trim_start().starts_with("```") {
                in_code_block = !in_code_block;
                return line.to_string();
            }
            if in_code_block {
                line.to_string()
            } else {
                pass(line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Code block language hints
// ---------------------------------------------------------------------------

/// Strip class-style prefixes from fence languages (`language-js` → `js`).
fn fix_code_block_languages(md: &str) -> String {
    static LANG_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^(\s*)```(?:language-|lang-|highlight-)([\w+-]+)").expect("valid regex")
    });

    LANG_PREFIX_RE.replace_all(md, "$1```$2").to_string()
}

// ---------------------------------------------------------------------------
// Leftover HTML
// ---------------------------------------------------------------------------

/// Remove stray container tags that survived conversion, keeping their text.
fn strip_html_tags(line: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"</?(?:div|span|section|article|aside|header|footer|figure|figcaption|details|summary|br)(?:\s[^>]*)?/?>").expect("valid regex")
    });

    HTML_TAG_RE.replace_all(line, "").to_string()
}

// ---------------------------------------------------------------------------
// Links and images
// ---------------------------------------------------------------------------

/// Drop images and replace `[text](url)` with `text`.
///
/// Discovered links are collected from the DOM before conversion, so the
/// URLs carry no information the text needs.
fn flatten_links(line: &str) -> String {
    static IMAGE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("valid regex"));
    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("valid regex"));

    let without_images = IMAGE_RE.replace_all(line, "");
    LINK_RE.replace_all(&without_images, "$1").to_string()
}

// ---------------------------------------------------------------------------
// Whitespace
// ---------------------------------------------------------------------------

/// Trim trailing whitespace on every line.
fn normalize_whitespace(md: &str) -> String {
    md.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collapse runs of blank lines into a single blank line.
fn clean_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n").to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_blank_lines_collapses_excess() {
        let result = clean_blank_lines("Line 1\n\n\n\n\nLine 2");
        assert_eq!(result, "Line 1\n\nLine 2");
    }

    #[test]
    fn fix_code_block_languages_strips_prefix() {
        let result = fix_code_block_languages("```language-javascript\nconsole.log('hi');\n```");
        assert!(result.starts_with("```javascript"));
    }

    #[test]
    fn fix_code_block_languages_keeps_plain() {
        let input = "```rust\nfn main() {}\n```";
        assert_eq!(fix_code_block_languages(input), input);
    }

    #[test]
    fn strip_html_tags_keeps_inner_text() {
        let result = strip_html_tags("<div class=\"note\">Important info</div>");
        assert_eq!(result, "Important info");
    }

    #[test]
    fn flatten_links_keeps_anchor_text() {
        let result = flatten_links("See [the API](https://example.com/api) and ![diagram](d.png).");
        assert_eq!(result, "See the API and .");
    }

    #[test]
    fn prose_passes_skip_code_blocks() {
        let input = "```html\n<div>[x](y)</div>\n```\n<span>[a](b)</span>";
        let result = map_prose(&map_prose(input, strip_html_tags), flatten_links);
        assert!(result.contains("<div>[x](y)</div>"));
        assert!(result.ends_with("\na"));
    }

    #[test]
    fn full_pipeline_cleans_text() {
        let input = "# Title\n\n\n\n## Section   \n\n<div>Some [content](/c)</div>\n\n```language-python\nprint('hi')\n```\n\n\n";
        let result = run_pipeline(input);

        assert!(!result.contains("\n\n\n"));
        assert!(result.contains("```python"));
        assert!(result.contains("Some content"));
        assert!(!result.contains("<div>"));
        assert!(!result.ends_with('\n'));
    }
}
