//! Relevance scoring and link discovery.
//!
//! Given the pages scraped for a feature, [`LinkDiscovery::select`] scores
//! every outbound link and returns the bounded candidate set worth fetching
//! as related sources.

mod scorer;
pub mod text;

use std::collections::HashMap;

use tracing::{debug, instrument};

use featurelens_shared::{DiscoveryConfig, Feature, OriginRule, SourceContent};

pub use scorer::{
    ALIGNMENT_CAP, AUTHORITY_CAP, CONTENT_TYPE_CAP, ContentType, RelevanceScorer, ScoreBreakdown,
    TEXTUAL_CAP,
};

/// A link selected for secondary scraping.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub url: String,
    pub score: f32,
    /// URL of the page the link was found on.
    pub discovered_from: String,
    /// Hops from the nearest primary source.
    pub depth: u32,
    pub anchor_text: String,
}

/// Scores outbound links and applies the threshold, cap, and depth policy.
#[derive(Debug, Clone)]
pub struct LinkDiscovery {
    scorer: RelevanceScorer,
    threshold: f32,
    max_related: usize,
    max_follow_depth: u32,
}

impl LinkDiscovery {
    pub fn new(config: &DiscoveryConfig, origins: &[OriginRule]) -> Self {
        Self {
            scorer: RelevanceScorer::new(config, origins),
            threshold: config.relevance_threshold,
            max_related: config.max_related_sources,
            max_follow_depth: config.max_follow_depth,
        }
    }

    pub fn scorer(&self) -> &RelevanceScorer {
        &self.scorer
    }

    pub fn max_related(&self) -> usize {
        self.max_related
    }

    pub fn max_follow_depth(&self) -> u32 {
        self.max_follow_depth
    }

    /// Candidates found on `pages`, which sit `depth - 1` hops from a primary.
    ///
    /// Only successful pages contribute. Links scoring at or below the
    /// threshold are dropped, duplicates keep their best score, and the
    /// result is ordered best-first and capped at `limit` (never above the
    /// configured maximum). `exclude` filters URLs the caller already has.
    #[instrument(skip_all, fields(feature_id = %feature.id, depth))]
    pub fn select<'a>(
        &self,
        feature: &Feature,
        pages: impl IntoIterator<Item = &'a SourceContent>,
        depth: u32,
        limit: usize,
        exclude: impl Fn(&str) -> bool,
    ) -> Vec<Candidate> {
        if depth == 0 || depth > self.max_follow_depth {
            return Vec::new();
        }

        let mut best: HashMap<String, Candidate> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut considered = 0usize;

        for page in pages.into_iter().filter(|p| p.is_success()) {
            for link in &page.links {
                considered += 1;
                if link.url == page.url || exclude(&link.url) {
                    continue;
                }

                let score = self.scorer.score(link, feature);
                if score <= self.threshold {
                    continue;
                }

                match best.get_mut(&link.url) {
                    Some(existing) if existing.score >= score => {}
                    Some(existing) => {
                        existing.score = score;
                        existing.discovered_from = page.url.clone();
                        existing.anchor_text = link.anchor_text.clone();
                    }
                    None => {
                        order.push(link.url.clone());
                        best.insert(
                            link.url.clone(),
                            Candidate {
                                url: link.url.clone(),
                                score,
                                discovered_from: page.url.clone(),
                                depth,
                                anchor_text: link.anchor_text.clone(),
                            },
                        );
                    }
                }
            }
        }

        // Discovery order breaks ties
        let mut candidates: Vec<Candidate> =
            order.iter().filter_map(|url| best.remove(url)).collect();
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates.truncate(limit.min(self.max_related));

        debug!(considered, selected = candidates.len(), "link discovery done");
        candidates
    }
}
