//! Adapter built from a configured `[[scraping.origins]]` rule.

use scraper::{Html, Selector};
use url::Url;

use featurelens_shared::{FeatureLensError, OriginRule, Result, host_matches};

use super::PlatformAdapter;
use super::generic::{CHROME_SELECTORS, CONTENT_SELECTORS};

/// Selector rules for one origin.
///
/// Without configured content selectors the generic heuristics are used;
/// configured strip selectors are added to the generic chrome list.
pub struct OriginAdapter {
    domain: String,
    name: String,
    content: Vec<Selector>,
    strip: Vec<Selector>,
}

impl OriginAdapter {
    pub fn from_rule(rule: &OriginRule) -> Result<Self> {
        let content = if rule.content_selectors.is_empty() {
            parse_all(&rule.domain, CONTENT_SELECTORS.iter().copied())?
        } else {
            parse_all(&rule.domain, rule.content_selectors.iter().map(String::as_str))?
        };

        let strip = parse_all(
            &rule.domain,
            rule.strip_selectors
                .iter()
                .map(String::as_str)
                .chain(CHROME_SELECTORS.iter().copied()),
        )?;

        Ok(Self {
            domain: rule.domain.clone(),
            name: format!("origin:{}", rule.domain),
            content,
            strip,
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }
}

fn parse_all<'a>(domain: &str, raw: impl Iterator<Item = &'a str>) -> Result<Vec<Selector>> {
    raw.map(|s| {
        Selector::parse(s).map_err(|e| {
            FeatureLensError::config(format!("invalid selector '{s}' for origin {domain}: {e}"))
        })
    })
    .collect()
}

impl PlatformAdapter for OriginAdapter {
    fn detect(&self, _doc: &Html, url: &Url) -> bool {
        url.host_str()
            .is_some_and(|host| host_matches(host, &self.domain))
    }

    fn content_selectors(&self) -> &[Selector] {
        &self.content
    }

    fn strip_selectors(&self) -> &[Selector] {
        &self.strip
    }

    fn name(&self) -> &str {
        &self.name
    }
}
