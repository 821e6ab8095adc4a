//! Research orchestrator: the per-feature state machine.
//!
//! One cycle runs `pending → in_progress → {completed, failed}`:
//! validate → scrape primaries (bounded fan-out) → discover and scrape related
//! sources → extract (two passes) → embed → persist.
//!
//! Only total primary failure ends in `failed`. Every other absorbed failure
//! is recorded as a [`StageIssue`](featurelens_shared::StageIssue) and
//! degrades the populated fields instead.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::{Duration, Utc};
use futures::StreamExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use featurelens_crawler::{RateLimiter, Scraper, SeenSet, SourceValidator, normalize_url};
use featurelens_discovery::{Candidate, LinkDiscovery};
use featurelens_shared::{
    AppConfig, ContentResearch, Feature, FeatureLensError, ResearchDepth, ResearchStatus, Result,
    SourceContent, SourceKind, Stage,
};
use featurelens_storage::ResearchStore;

use crate::capabilities::{EmbeddingCapability, ExtractionCapability, FeatureSource};
use crate::embeddings::{EmbeddingGenerator, WindowInputs};
use crate::extractor::ContentExtractor;

// ---------------------------------------------------------------------------
// Settings and progress
// ---------------------------------------------------------------------------

/// Orchestration knobs resolved once from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct ResearchSettings {
    pub primary_fan_out: usize,
    /// Successful sources younger than this are reused by a new cycle.
    pub source_freshness: Duration,
    pub stale_after: Duration,
    pub concurrent_features: usize,
    pub default_depth: ResearchDepth,
    pub max_follow_depth: u32,
}

impl ResearchSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        // Capped at roughly a century
        let hours = |h: u64| Duration::hours(h.min(876_000) as i64);
        Self {
            primary_fan_out: config.scraping.primary_fan_out.max(1),
            source_freshness: hours(config.research.source_freshness_hours),
            stale_after: hours(config.research.stale_after_hours),
            concurrent_features: config.research.concurrent_features.max(1),
            default_depth: ResearchDepth::from_follow_depth(config.discovery.max_follow_depth),
            max_follow_depth: config.discovery.max_follow_depth,
        }
    }
}

/// Progress callback for reporting cycle status.
pub trait ResearchProgress: Send + Sync {
    /// Called when a cycle enters a new stage.
    fn stage(&self, feature_id: &str, stage: Stage);
    /// Called once per source, fetched or not.
    fn source_done(&self, feature_id: &str, source: &SourceContent);
    /// Called when a cycle finishes, persisted or not.
    fn done(&self, research: &ContentResearch);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ResearchProgress for SilentProgress {
    fn stage(&self, _feature_id: &str, _stage: Stage) {}
    fn source_done(&self, _feature_id: &str, _source: &SourceContent) {}
    fn done(&self, _research: &ContentResearch) {}
}

/// Per-call options for [`Researcher::research_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ResearchOptions {
    pub force_refresh: bool,
    /// Overrides the stored or configured depth.
    pub depth: Option<ResearchDepth>,
}

// ---------------------------------------------------------------------------
// Active-cycle registry
// ---------------------------------------------------------------------------

type ActiveSet = Arc<Mutex<HashSet<String>>>;

/// Holds a feature id in the active set until dropped.
struct CycleGuard {
    active: ActiveSet,
    feature_id: String,
}

impl CycleGuard {
    fn acquire(active: &ActiveSet, feature_id: &str) -> Result<Self> {
        let mut set = active.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(feature_id.to_string()) {
            return Err(FeatureLensError::CycleInProgress {
                feature_id: feature_id.to_string(),
            });
        }
        Ok(Self {
            active: Arc::clone(active),
            feature_id: feature_id.to_string(),
        })
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.feature_id);
    }
}

// ---------------------------------------------------------------------------
// Researcher
// ---------------------------------------------------------------------------

/// Runs research cycles and serves cached results.
///
/// One instance is shared by every cycle so the rate limiter and the
/// active-cycle set cover all of them.
pub struct Researcher {
    settings: ResearchSettings,
    validator: SourceValidator,
    scraper: Arc<Scraper>,
    discovery: LinkDiscovery,
    extractor: ContentExtractor,
    embedder: EmbeddingGenerator,
    features: Arc<dyn FeatureSource>,
    store: Arc<dyn ResearchStore>,
    progress: Arc<dyn ResearchProgress>,
    active: ActiveSet,
}

impl Researcher {
    pub fn new(
        config: &AppConfig,
        features: Arc<dyn FeatureSource>,
        store: Arc<dyn ResearchStore>,
        extraction: Arc<dyn ExtractionCapability>,
        embedding: Arc<dyn EmbeddingCapability>,
    ) -> Result<Self> {
        let scraping = Arc::new(config.scraping.clone());
        let limiter = Arc::new(RateLimiter::new(Arc::clone(&scraping)));

        Ok(Self {
            settings: ResearchSettings::from_config(config),
            validator: SourceValidator::new(&scraping),
            scraper: Arc::new(Scraper::new(Arc::clone(&scraping), limiter)?),
            discovery: LinkDiscovery::new(&config.discovery, &scraping.origins),
            extractor: ContentExtractor::new(extraction, &config.extraction),
            embedder: EmbeddingGenerator::new(embedding, &config.embedding),
            features,
            store,
            progress: Arc::new(SilentProgress),
            active: Arc::default(),
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn ResearchProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn settings(&self) -> &ResearchSettings {
        &self.settings
    }

    /// Cache-only read. Never touches the network.
    pub async fn get_cached(&self, feature_id: &str) -> Result<Option<ContentResearch>> {
        self.store.get(feature_id).await
    }

    /// Reset completed documents older than `stale_after` to `pending`.
    pub async fn invalidate_stale(&self) -> Result<usize> {
        let count = self.store.invalidate_stale(self.settings.stale_after).await?;
        info!(count, "stale research invalidated");
        Ok(count)
    }

    /// Research one feature. A completed cached result is returned as-is
    /// unless `force_refresh` is set.
    pub async fn research(&self, feature_id: &str, force_refresh: bool) -> Result<ContentResearch> {
        let options = ResearchOptions {
            force_refresh,
            depth: None,
        };
        self.research_with(feature_id, options, &CancellationToken::new())
            .await
    }

    /// Research several features, at most `concurrent_features` at a time.
    ///
    /// Results keep the order of `feature_ids`.
    pub async fn research_many(
        &self,
        feature_ids: &[String],
        force_refresh: bool,
    ) -> Vec<(String, Result<ContentResearch>)> {
        let options = ResearchOptions {
            force_refresh,
            depth: None,
        };
        self.research_many_with(feature_ids, options, &CancellationToken::new())
            .await
    }

    /// [`research_many`](Self::research_many) with options and one shared
    /// cancellation signal.
    pub async fn research_many_with(
        &self,
        feature_ids: &[String],
        options: ResearchOptions,
        cancel: &CancellationToken,
    ) -> Vec<(String, Result<ContentResearch>)> {
        futures::stream::iter(feature_ids)
            .map(|id| async move { (id.clone(), self.research_with(id, options, cancel).await) })
            .buffered(self.settings.concurrent_features)
            .collect()
            .await
    }

    /// Full entry point with options and a cancellation signal.
    ///
    /// Returns `Ok` with a `failed` document when no primary source could be
    /// used. `StoreWrite` carries the finished document when only the final
    /// write failed.
    #[instrument(skip_all, fields(feature_id = %feature_id, force = options.force_refresh))]
    pub async fn research_with(
        &self,
        feature_id: &str,
        options: ResearchOptions,
        cancel: &CancellationToken,
    ) -> Result<ContentResearch> {
        let _guard = CycleGuard::acquire(&self.active, feature_id)?;
        let started = Instant::now();

        let feature = self.features.get_feature(feature_id).await?;
        let existing = match self.store.get(feature_id).await? {
            Some(cached)
                if cached.status == ResearchStatus::Completed && !options.force_refresh =>
            {
                debug!(cycle = cached.cycle, "returning cached research");
                return Ok(cached);
            }
            other => other,
        };

        let depth = options
            .depth
            .or(existing.as_ref().map(|r| r.research_depth))
            .unwrap_or(self.settings.default_depth);

        let (mut research, previous) = match existing {
            Some(mut research) => {
                let previous = research.reset(depth);
                (research, previous)
            }
            None => (ContentResearch::new(feature_id, depth), Vec::new()),
        };
        research.cycle += 1;
        let reusable = self.reusable_sources(previous);

        self.persist_progress(&mut research).await;
        research.transition(ResearchStatus::InProgress)?;
        self.persist_progress(&mut research).await;
        info!(
            cycle = research.cycle,
            depth = depth.as_str(),
            reusable = reusable.len(),
            "research cycle started"
        );

        let mut seen = SeenSet::new();
        self.primary_stage(&feature, &mut research, &mut seen, &reusable, cancel)
            .await;

        if research.successful_primary_count() == 0 {
            if cancel.is_cancelled() {
                research.record_issue(
                    Stage::Cancellation,
                    None,
                    "cancelled before any primary source succeeded",
                );
            }
            research.transition(ResearchStatus::Failed)?;
            warn!(
                attempted = research.primary_sources.len(),
                "no usable primary source, research failed"
            );
            return self.finish(research, started).await;
        }

        if self.checkpoint(&mut research, cancel, Stage::LinkDiscovery) {
            self.related_stage(&feature, &mut research, &mut seen, &reusable, cancel)
                .await;
        }
        if self.checkpoint(&mut research, cancel, Stage::Extraction) {
            self.extraction_stage(&feature, &mut research).await;
        }
        if self.checkpoint(&mut research, cancel, Stage::Embedding) {
            self.embedding_stage(&feature, &mut research).await;
        }

        research.transition(ResearchStatus::Completed)?;
        self.finish(research, started).await
    }

    // -----------------------------------------------------------------------
    // Stages
    // -----------------------------------------------------------------------

    async fn primary_stage(
        &self,
        feature: &Feature,
        research: &mut ContentResearch,
        seen: &mut SeenSet,
        reusable: &HashMap<String, SourceContent>,
        cancel: &CancellationToken,
    ) {
        self.progress.stage(&feature.id, Stage::PrimaryScrape);
        if feature.documentation_links.is_empty() {
            research.record_issue(Stage::Validation, None, "feature has no documentation links");
            return;
        }

        let mut slots: Vec<Option<SourceContent>> = Vec::new();
        let mut to_fetch: Vec<(usize, Url)> = Vec::new();

        for raw in &feature.documentation_links {
            let url = match self.validator.check(raw, seen) {
                Ok(url) => url,
                Err(e) => {
                    research.record_issue(Stage::Validation, Some(raw.as_str()), e.to_string());
                    slots.push(Some(SourceContent::skipped(
                        raw.as_str(),
                        SourceKind::Primary,
                        e.to_string(),
                    )));
                    continue;
                }
            };
            seen.insert(&url);

            match reusable.get(&normalize_url(&url)) {
                Some(cached) => {
                    debug!(url = %url, "reusing fresh primary source");
                    let mut source = cached.clone();
                    source.kind = SourceKind::Primary;
                    source.depth = 0;
                    slots.push(Some(source));
                }
                None => {
                    to_fetch.push((slots.len(), url));
                    slots.push(None);
                }
            }
        }

        let (indices, urls): (Vec<usize>, Vec<Url>) = to_fetch.into_iter().unzip();
        let results = self.fetch_all(urls.clone(), SourceKind::Primary, cancel).await;
        for ((index, url), result) in indices.into_iter().zip(urls).zip(results) {
            let source = self.settle(research, Stage::PrimaryScrape, &url, SourceKind::Primary, result);
            slots[index] = Some(source);
        }

        research.primary_sources = slots.into_iter().flatten().collect();
        for source in &research.primary_sources {
            self.progress.source_done(&feature.id, source);
        }
    }

    async fn related_stage(
        &self,
        feature: &Feature,
        research: &mut ContentResearch,
        seen: &mut SeenSet,
        reusable: &HashMap<String, SourceContent>,
        cancel: &CancellationToken,
    ) {
        let follow_depth = research
            .research_depth
            .follow_depth()
            .min(self.settings.max_follow_depth);

        for hop in 1..=follow_depth {
            let budget = self
                .discovery
                .max_related()
                .saturating_sub(research.related_sources.len());
            if budget == 0 || cancel.is_cancelled() {
                break;
            }

            let candidates: Vec<Candidate> = {
                let pages: Vec<&SourceContent> = if hop == 1 {
                    research.primary_sources.iter().collect()
                } else {
                    research
                        .related_sources
                        .iter()
                        .filter(|s| s.depth == hop - 1)
                        .collect()
                };
                // Links that would fail validation never take a budget slot
                let seen: &SeenSet = seen;
                self.discovery.select(feature, pages, hop, budget, |link| {
                    !self.validator.validate(link, seen).allowed
                })
            };
            if candidates.is_empty() {
                debug!(hop, "no related candidates above threshold");
                break;
            }

            self.progress.stage(&feature.id, Stage::RelatedScrape);
            let mut to_fetch: Vec<(Candidate, Url)> = Vec::new();
            for candidate in candidates {
                let url = match self.validator.check(&candidate.url, seen) {
                    Ok(url) => url,
                    Err(e) => {
                        research.record_issue(
                            Stage::Validation,
                            Some(candidate.url.as_str()),
                            e.to_string(),
                        );
                        let skipped = SourceContent::skipped(
                            candidate.url.as_str(),
                            SourceKind::Related,
                            e.to_string(),
                        );
                        research.related_sources.push(skipped.into_related(
                            candidate.score,
                            &candidate.discovered_from,
                            hop,
                        ));
                        continue;
                    }
                };
                seen.insert(&url);

                if let Some(cached) = reusable.get(&normalize_url(&url)) {
                    debug!(url = %url, "reusing fresh related source");
                    research.related_sources.push(
                        cached
                            .clone()
                            .into_related(candidate.score, &candidate.discovered_from, hop),
                    );
                } else {
                    to_fetch.push((candidate, url));
                }
            }

            let urls: Vec<Url> = to_fetch.iter().map(|(_, url)| url.clone()).collect();
            let results = self.fetch_all(urls, SourceKind::Related, cancel).await;
            for ((candidate, url), result) in to_fetch.into_iter().zip(results) {
                let source = self
                    .settle(research, Stage::RelatedScrape, &url, SourceKind::Related, result)
                    .into_related(candidate.score, &candidate.discovered_from, hop);
                self.progress.source_done(&feature.id, &source);
                research.related_sources.push(source);
            }

            info!(
                hop,
                related = research.related_sources.len(),
                ok = research.related_sources.iter().filter(|s| s.is_success()).count(),
                "related sources scraped"
            );
        }
    }

    async fn extraction_stage(&self, feature: &Feature, research: &mut ContentResearch) {
        let extraction = self
            .extractor
            .extract(
                feature,
                research
                    .primary_sources
                    .iter()
                    .chain(research.related_sources.iter()),
            )
            .await;

        for failure in &extraction.failures {
            research.record_issue(
                Stage::Extraction,
                Some(format!("pass_{}", failure.pass).as_str()),
                failure.reason.clone(),
            );
        }
        research.extracted = extraction.content;
        research.insights = extraction.insights;
    }

    async fn embedding_stage(&self, feature: &Feature, research: &mut ContentResearch) {
        let sources: Vec<&SourceContent> = research
            .primary_sources
            .iter()
            .chain(research.related_sources.iter())
            .collect();
        let inputs = WindowInputs {
            feature,
            extracted: &research.extracted,
            insights: research.insights.as_ref(),
            sources: &sources,
        };
        let outcome = self.embedder.generate(&inputs).await;

        for failure in outcome.failures {
            let slot = match &failure {
                FeatureLensError::EmbeddingUnavailable { slot, .. } => Some(slot.as_str()),
                _ => None,
            };
            research.record_issue(Stage::Embedding, slot, failure.to_string());
        }
        research.embeddings = outcome.set;
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Fetch `urls` concurrently up to the fan-out limit, results in input order.
    ///
    /// Each task checks `cancel` before fetching; fetches already in flight finish.
    async fn fetch_all(
        &self,
        urls: Vec<Url>,
        kind: SourceKind,
        cancel: &CancellationToken,
    ) -> Vec<Result<SourceContent>> {
        let semaphore = Arc::new(Semaphore::new(self.settings.primary_fan_out));
        let mut handles = Vec::with_capacity(urls.len());

        for url in urls {
            let scraper = Arc::clone(&self.scraper);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| FeatureLensError::Cancelled)?;
                if cancel.is_cancelled() {
                    return Err(FeatureLensError::Cancelled);
                }
                scraper.fetch(&url, kind).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle.await {
                Ok(result) => result,
                Err(e) => Err(FeatureLensError::Network(format!("fetch task failed: {e}"))),
            });
        }
        results
    }

    /// Turn a fetch result into a retained source, recording any failure.
    fn settle(
        &self,
        research: &mut ContentResearch,
        stage: Stage,
        url: &Url,
        kind: SourceKind,
        result: Result<SourceContent>,
    ) -> SourceContent {
        match result {
            Ok(source) => source,
            Err(FeatureLensError::Cancelled) => {
                SourceContent::skipped(url.as_str(), kind, "cancelled")
            }
            Err(e) => {
                research.record_issue(stage, Some(url.as_str()), e.to_string());
                SourceContent::failed(url.as_str(), kind, e.to_string())
            }
        }
    }

    /// Between stages: report the next stage, or record cancellation and stop.
    fn checkpoint(
        &self,
        research: &mut ContentResearch,
        cancel: &CancellationToken,
        next: Stage,
    ) -> bool {
        if cancel.is_cancelled() {
            if !research.diagnostics.iter().any(|i| i.stage == Stage::Cancellation) {
                let reason = format!("cancelled before {next:?}");
                research.record_issue(Stage::Cancellation, None, reason);
            }
            return false;
        }
        self.progress.stage(&research.feature_id, next);
        true
    }

    /// Successful previous sources still inside the freshness window.
    fn reusable_sources(&self, previous: Vec<SourceContent>) -> HashMap<String, SourceContent> {
        let cutoff = Utc::now() - self.settings.source_freshness;
        previous
            .into_iter()
            .filter(|s| s.is_success() && s.fetched_at >= cutoff)
            .filter_map(|s| Url::parse(&s.url).ok().map(|url| (normalize_url(&url), s)))
            .collect()
    }

    /// Intermediate write. A failure is recorded, not fatal.
    async fn persist_progress(&self, research: &mut ContentResearch) {
        if let Err(e) = self.store.upsert(&research.feature_id, research).await {
            warn!(error = %e, status = %research.status, "intermediate research write failed");
            research.record_issue(Stage::Persistence, None, e.to_string());
        }
    }

    /// Final write. The document is handed back even when the write fails.
    async fn finish(&self, research: ContentResearch, started: Instant) -> Result<ContentResearch> {
        self.progress.stage(&research.feature_id, Stage::Persistence);
        info!(
            status = %research.status,
            health = ?research.health(),
            primary_ok = research.successful_primary_count(),
            related = research.related_sources.len(),
            issues = research.diagnostics.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "research cycle finished"
        );
        self.progress.done(&research);

        match self.store.upsert(&research.feature_id, &research).await {
            Ok(()) => Ok(research),
            Err(e) => Err(FeatureLensError::StoreWrite {
                feature_id: research.feature_id.clone(),
                message: e.to_string(),
                research: Box::new(research),
            }),
        }
    }
}
