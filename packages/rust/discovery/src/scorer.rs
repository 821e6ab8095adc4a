//! Relevance scoring for discovered links.
//!
//! A score is the sum of four independently capped sub-scores, so raising
//! any one component can never lower the total:
//!
//! | component      | cap  | signal                                          |
//! |----------------|------|-------------------------------------------------|
//! | authority      | 0.30 | configured per-domain weight                    |
//! | content type   | 0.25 | documentation > article > forum, by URL pattern |
//! | textual        | 0.30 | anchor/context token overlap with the feature   |
//! | alignment      | 0.15 | URL path mentions the feature's product area    |

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use featurelens_shared::{DiscoveredLink, DiscoveryConfig, Feature, OriginRule, host_matches};

use crate::text::{token_set, tokens};

pub const AUTHORITY_CAP: f32 = 0.30;
pub const CONTENT_TYPE_CAP: f32 = 0.25;
pub const TEXTUAL_CAP: f32 = 0.30;
pub const ALIGNMENT_CAP: f32 = 0.15;

/// Feature tokens beyond this many don't dilute the overlap ratio.
const TEXTUAL_SATURATION: usize = 6;

static DOC_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)/(docs?|documentation|guide|guides|reference|manual|api|handbook|current)(/|$)")
        .expect("valid regex")
});
static ARTICLE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)/(blog|blogs|articles?|tutorials?|learn|posts?|news|webinars?)(/|$)")
        .expect("valid regex")
});
static FORUM_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)/(questions|discuss|forums?|community|t|threads?|issues)(/|$)")
        .expect("valid regex")
});

/// Coarse page category inferred from a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Documentation,
    Article,
    Forum,
    Other,
}

impl ContentType {
    pub fn classify(url: &Url) -> Self {
        let host = url.host_str().unwrap_or_default();
        let path = url.path();

        if host.starts_with("docs.") || host.ends_with(".readthedocs.io") || DOC_PATH.is_match(path)
        {
            Self::Documentation
        } else if host.starts_with("discuss.")
            || host_matches(host, "stackoverflow.com")
            || FORUM_PATH.is_match(path)
        {
            Self::Forum
        } else if ARTICLE_PATH.is_match(path) || host.starts_with("blog.") {
            Self::Article
        } else {
            Self::Other
        }
    }

    /// Weight in [0,1] before the cap is applied.
    pub fn weight(self) -> f32 {
        match self {
            Self::Documentation => 1.0,
            Self::Article => 0.6,
            Self::Forum => 0.3,
            Self::Other => 0.1,
        }
    }
}

/// Per-component contributions, each already capped.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreBreakdown {
    pub authority: f32,
    pub content_type: f32,
    pub textual: f32,
    pub alignment: f32,
}

impl ScoreBreakdown {
    /// Sum of the components, clamped to [0,1].
    pub fn total(&self) -> f32 {
        (self.authority + self.content_type + self.textual + self.alignment).clamp(0.0, 1.0)
    }
}

/// Scores links against a feature using configured domain weights.
#[derive(Debug, Clone)]
pub struct RelevanceScorer {
    authorities: Vec<(String, f32)>,
    default_authority: f32,
    domain_keywords: Vec<(String, Vec<String>)>,
}

impl RelevanceScorer {
    pub fn new(config: &DiscoveryConfig, origins: &[OriginRule]) -> Self {
        let mut authorities: Vec<(String, f32)> = origins
            .iter()
            .filter_map(|rule| rule.authority.map(|a| (rule.domain.clone(), a)))
            .collect();
        // Most specific domain first
        authorities.sort_by_key(|(domain, _)| std::cmp::Reverse(domain.len()));

        Self {
            authorities,
            default_authority: config.default_authority,
            domain_keywords: config
                .domain_keywords
                .iter()
                .map(|(tag, words)| (tag.to_lowercase(), words.clone()))
                .collect(),
        }
    }

    /// Composite relevance of `link` for `feature`, in [0,1].
    pub fn score(&self, link: &DiscoveredLink, feature: &Feature) -> f32 {
        self.breakdown(link, feature).total()
    }

    /// Individual sub-scores. An unparseable URL scores zero everywhere.
    pub fn breakdown(&self, link: &DiscoveredLink, feature: &Feature) -> ScoreBreakdown {
        let Ok(url) = Url::parse(&link.url) else {
            return ScoreBreakdown::default();
        };

        ScoreBreakdown {
            authority: capped(self.authority(&url), AUTHORITY_CAP),
            content_type: capped(ContentType::classify(&url).weight(), CONTENT_TYPE_CAP),
            textual: capped(textual_overlap(link, feature), TEXTUAL_CAP),
            alignment: capped(self.alignment(&url, link, feature), ALIGNMENT_CAP),
        }
    }

    /// Configured origin weight, or the default for every other host.
    fn authority(&self, url: &Url) -> f32 {
        let host = url.host_str().unwrap_or_default();
        self.authorities
            .iter()
            .find(|(domain, _)| host_matches(host, domain))
            .map_or(self.default_authority, |(_, weight)| *weight)
    }

    /// 1.0 when the path names the product area, 0.5 when only the link text does.
    fn alignment(&self, url: &Url, link: &DiscoveredLink, feature: &Feature) -> f32 {
        let keywords = self.keywords_for(&feature.domain);
        if keywords.is_empty() {
            return 0.0;
        }

        let path_tokens = token_set(url.path());
        if keywords.iter().any(|k| path_tokens.contains(k)) {
            return 1.0;
        }

        let text_tokens = token_set(&format!("{} {}", link.anchor_text, link.context));
        if keywords.iter().any(|k| text_tokens.contains(k)) {
            0.5
        } else {
            0.0
        }
    }

    /// Configured keywords for a domain tag, or the tag's own tokens.
    fn keywords_for(&self, domain: &str) -> Vec<String> {
        let tag = domain.trim().to_lowercase();
        let configured = self
            .domain_keywords
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, words)| words.iter().flat_map(|w| tokens(w)).collect::<Vec<_>>());

        configured.unwrap_or_else(|| tokens(&tag).collect())
    }
}

/// Share of the feature's distinct tokens found near the link.
fn textual_overlap(link: &DiscoveredLink, feature: &Feature) -> f32 {
    let feature_tokens = token_set(&format!("{} {}", feature.name, feature.description));
    if feature_tokens.is_empty() {
        return 0.0;
    }

    let link_tokens = token_set(&format!("{} {}", link.anchor_text, link.context));
    let hits = feature_tokens.intersection(&link_tokens).count();
    let denominator = feature_tokens.len().min(TEXTUAL_SATURATION);

    hits as f32 / denominator as f32
}

fn capped(weight: f32, cap: f32) -> f32 {
    if weight.is_nan() {
        return 0.0;
    }
    weight.clamp(0.0, 1.0) * cap
}
