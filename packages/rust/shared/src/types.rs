//! Core domain types for FeatureLens research documents.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FeatureLensError, Result};

/// Current schema version for persisted research documents.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Feature
// ---------------------------------------------------------------------------

/// A feature record as owned by the CRUD layer. Read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Product-area tag (e.g. `security`, `observability`).
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub documentation_links: Vec<String>,
}

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Lifecycle of a [`ContentResearch`] document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ResearchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Forward-only transitions. Going back to `Pending` requires an explicit reset.
    pub fn can_transition_to(&self, next: ResearchStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
        )
    }
}

impl std::fmt::Display for ResearchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResearchStatus {
    type Err = FeatureLensError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(FeatureLensError::validation(format!(
                "unknown research status '{other}'"
            ))),
        }
    }
}

/// Outcome of fetching a single source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Success,
    Failed,
    Skipped,
}

/// Whether a source came from the feature itself or from link discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Primary,
    Related,
}

/// How a related source was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    LinkFollowing,
}

/// How far link discovery may expand from the primary sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchDepth {
    /// Primary sources only.
    Shallow,
    /// One hop from any primary source.
    #[default]
    Standard,
    /// Related sources may expand one more hop.
    Deep,
}

impl ResearchDepth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shallow => "shallow",
            Self::Standard => "standard",
            Self::Deep => "deep",
        }
    }

    pub fn follow_depth(&self) -> u32 {
        match self {
            Self::Shallow => 0,
            Self::Standard => 1,
            Self::Deep => 2,
        }
    }

    pub fn from_follow_depth(depth: u32) -> Self {
        match depth {
            0 => Self::Shallow,
            1 => Self::Standard,
            _ => Self::Deep,
        }
    }
}

// ---------------------------------------------------------------------------
// SourceContent
// ---------------------------------------------------------------------------

/// An outbound hyperlink found inside a page's retained content region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredLink {
    /// Absolute URL, fragment stripped.
    pub url: String,
    pub anchor_text: String,
    /// Text of the enclosing block, trimmed, used for relevance scoring.
    #[serde(default)]
    pub context: String,
}

/// Light structural metadata computed from a page's retained region.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageStructure {
    #[serde(default)]
    pub headings: Vec<String>,
    #[serde(default)]
    pub code_block_count: usize,
    #[serde(default)]
    pub code_languages: Vec<String>,
    /// Natural language of the page, from `<html lang>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// One scraped page, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceContent {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub status: SourceStatus,
    pub kind: SourceKind,
    #[serde(default)]
    pub word_count: usize,
    /// Cleaned text body.
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub structure: PageStructure,
    #[serde(default)]
    pub links: Vec<DiscoveredLink>,
    /// SHA-256 of the raw response body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    /// Adapter that selected the retained region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter: Option<String>,
    /// Relevance score in [0, 1], related sources only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery_method: Option<DiscoveryMethod>,
    /// Source page the link was discovered on, related sources only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovered_from: Option<String>,
    /// Follow depth at which the page was fetched (0 for primary).
    #[serde(default)]
    pub depth: u32,
    /// Failure or skip reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceContent {
    /// A failed fetch retained for audit history.
    pub fn failed(url: impl Into<String>, kind: SourceKind, reason: impl Into<String>) -> Self {
        Self::unsuccessful(url.into(), kind, SourceStatus::Failed, reason.into())
    }

    /// A source that was never fetched (validation rejection, cancellation).
    pub fn skipped(url: impl Into<String>, kind: SourceKind, reason: impl Into<String>) -> Self {
        Self::unsuccessful(url.into(), kind, SourceStatus::Skipped, reason.into())
    }

    fn unsuccessful(url: String, kind: SourceKind, status: SourceStatus, reason: String) -> Self {
        Self {
            url,
            title: None,
            fetched_at: Utc::now(),
            status,
            kind,
            word_count: 0,
            text: String::new(),
            structure: PageStructure::default(),
            links: Vec::new(),
            content_hash: None,
            adapter: None,
            relevance_score: None,
            discovery_method: None,
            discovered_from: None,
            depth: 0,
            error: Some(reason),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SourceStatus::Success
    }

    /// Mark this page as a related source found by link following.
    pub fn into_related(mut self, score: f32, discovered_from: &str, depth: u32) -> Self {
        self.kind = SourceKind::Related;
        self.relevance_score = Some(score.clamp(0.0, 1.0));
        self.discovery_method = Some(DiscoveryMethod::LinkFollowing);
        self.discovered_from = Some(discovered_from.to_string());
        self.depth = depth;
        self
    }
}

// ---------------------------------------------------------------------------
// ExtractedContent
// ---------------------------------------------------------------------------

/// Coarse difficulty tier for use cases and implementation effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityTier {
    Beginner,
    Intermediate,
    Advanced,
}

impl ComplexityTier {
    /// Map loosely-worded tiers ("basic", "expert", "medium") onto the three tiers.
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "beginner" | "basic" | "easy" | "low" | "simple" => Some(Self::Beginner),
            "intermediate" | "medium" | "moderate" => Some(Self::Intermediate),
            "advanced" | "expert" | "hard" | "high" | "complex" => Some(Self::Advanced),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UseCase {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<ComplexityTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeExample {
    #[serde(default)]
    pub title: String,
    pub code: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub description: String,
}

/// Items of the required-field checklist evaluated after each extraction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gap {
    KeyConcepts,
    UseCases,
    Capabilities,
    Prerequisites,
    CodeExamples,
    QuantifiedMetrics,
}

impl Gap {
    pub const ALL: [Gap; 6] = [
        Gap::KeyConcepts,
        Gap::UseCases,
        Gap::Capabilities,
        Gap::Prerequisites,
        Gap::CodeExamples,
        Gap::QuantifiedMetrics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeyConcepts => "key_concepts",
            Self::UseCases => "use_cases",
            Self::Capabilities => "capabilities",
            Self::Prerequisites => "prerequisites",
            Self::CodeExamples => "code_examples",
            Self::QuantifiedMetrics => "quantified_metrics",
        }
    }
}

impl std::fmt::Display for Gap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which checklist items remain unmet after all extraction passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completeness {
    pub missing: Vec<Gap>,
    /// Fraction of checklist items satisfied, in [0, 1].
    pub score: f32,
}

impl Completeness {
    pub fn from_missing(mut missing: Vec<Gap>) -> Self {
        missing.sort();
        missing.dedup();
        let total = Gap::ALL.len() as f32;
        let score = (total - missing.len() as f32) / total;
        Self {
            missing,
            score: score.clamp(0.0, 1.0),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

impl Default for Completeness {
    fn default() -> Self {
        Self::from_missing(Gap::ALL.to_vec())
    }
}

/// Structured knowledge derived from scraped sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContent {
    #[serde(default)]
    pub key_concepts: Vec<String>,
    #[serde(default)]
    pub use_cases: Vec<UseCase>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub code_examples: Vec<CodeExample>,
    /// Quantified claims (limits, latencies, retention periods).
    #[serde(default)]
    pub metrics: Vec<String>,
    #[serde(default)]
    pub related_features: Vec<String>,
    #[serde(default)]
    pub completeness: Completeness,
    /// Number of extraction passes that returned a usable payload.
    #[serde(default)]
    pub passes: u8,
    /// Set when extraction aborted (pass 1 failure, no source text).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_note: Option<String>,
}

impl ExtractedContent {
    /// An empty result carrying an explicit failure note.
    pub fn failed(note: impl Into<String>) -> Self {
        Self {
            failure_note: Some(note.into()),
            ..Default::default()
        }
    }
}

/// Optional AI-generated summaries stored alongside the extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Insights {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_value: Option<String>,
    #[serde(default)]
    pub recommended_audience: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation_complexity: Option<ComplexityTier>,
}

impl Insights {
    pub fn is_empty(&self) -> bool {
        self.technical_summary.is_none()
            && self.business_value.is_none()
            && self.recommended_audience.is_empty()
            && self.implementation_complexity.is_none()
    }
}

// ---------------------------------------------------------------------------
// EmbeddingSet
// ---------------------------------------------------------------------------

/// The three named embedding slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingKind {
    FeatureSummary,
    TechnicalContent,
    FullDocumentation,
}

impl EmbeddingKind {
    pub const ALL: [EmbeddingKind; 3] = [
        EmbeddingKind::FeatureSummary,
        EmbeddingKind::TechnicalContent,
        EmbeddingKind::FullDocumentation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FeatureSummary => "feature_summary",
            Self::TechnicalContent => "technical_content",
            Self::FullDocumentation => "full_documentation",
        }
    }
}

impl std::fmt::Display for EmbeddingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Weighted-term sparse vector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SparseVector(pub BTreeMap<String, f32>);

impl SparseVector {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn weight(&self, term: &str) -> Option<f32> {
        self.0.get(term).copied()
    }
}

/// One populated embedding slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub vector: SparseVector,
    /// Text window the vector was generated from.
    pub source_text: String,
    pub generated_at: DateTime<Utc>,
}

/// Three independently nullable embeddings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingSet {
    #[serde(default)]
    pub feature_summary: Option<Embedding>,
    #[serde(default)]
    pub technical_content: Option<Embedding>,
    #[serde(default)]
    pub full_documentation: Option<Embedding>,
    #[serde(default)]
    pub model: String,
}

impl EmbeddingSet {
    pub fn get(&self, kind: EmbeddingKind) -> Option<&Embedding> {
        match kind {
            EmbeddingKind::FeatureSummary => self.feature_summary.as_ref(),
            EmbeddingKind::TechnicalContent => self.technical_content.as_ref(),
            EmbeddingKind::FullDocumentation => self.full_documentation.as_ref(),
        }
    }

    pub fn set(&mut self, kind: EmbeddingKind, embedding: Option<Embedding>) {
        match kind {
            EmbeddingKind::FeatureSummary => self.feature_summary = embedding,
            EmbeddingKind::TechnicalContent => self.technical_content = embedding,
            EmbeddingKind::FullDocumentation => self.full_documentation = embedding,
        }
    }

    pub fn populated(&self) -> usize {
        EmbeddingKind::ALL
            .iter()
            .filter(|k| self.get(**k).is_some())
            .count()
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Pipeline stage an issue was recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validation,
    PrimaryScrape,
    LinkDiscovery,
    RelatedScrape,
    Extraction,
    Embedding,
    Persistence,
    Cancellation,
}

/// A failure absorbed by the pipeline rather than propagated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageIssue {
    pub stage: Stage,
    /// URL, embedding slot, or pass the issue concerns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Caller-facing summary of how a cycle went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    Degraded,
    Failed,
}

// ---------------------------------------------------------------------------
// ContentResearch
// ---------------------------------------------------------------------------

/// Aggregate root persisted per feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentResearch {
    pub schema_version: u32,
    pub feature_id: String,
    pub status: ResearchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub research_depth: ResearchDepth,
    /// Incremented each time a new research cycle starts.
    #[serde(default)]
    pub cycle: u32,
    #[serde(default)]
    pub primary_sources: Vec<SourceContent>,
    #[serde(default)]
    pub related_sources: Vec<SourceContent>,
    #[serde(default)]
    pub extracted: ExtractedContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insights: Option<Insights>,
    #[serde(default)]
    pub embeddings: EmbeddingSet,
    #[serde(default)]
    pub diagnostics: Vec<StageIssue>,
}

impl ContentResearch {
    /// A fresh `pending` document.
    pub fn new(feature_id: impl Into<String>, depth: ResearchDepth) -> Self {
        let now = Utc::now();
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            feature_id: feature_id.into(),
            status: ResearchStatus::Pending,
            created_at: now,
            updated_at: now,
            research_depth: depth,
            cycle: 0,
            primary_sources: Vec::new(),
            related_sources: Vec::new(),
            extracted: ExtractedContent::default(),
            insights: None,
            embeddings: EmbeddingSet::default(),
            diagnostics: Vec::new(),
        }
    }

    /// Move to `next`, rejecting any backwards or skipping transition.
    pub fn transition(&mut self, next: ResearchStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(FeatureLensError::validation(format!(
                "invalid research status transition {} -> {next}",
                self.status
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Start a new cycle: back to `pending`, derived fields cleared.
    ///
    /// Returns the previous cycle's sources so callers can reuse fresh ones.
    pub fn reset(&mut self, depth: ResearchDepth) -> Vec<SourceContent> {
        self.status = ResearchStatus::Pending;
        self.updated_at = Utc::now();
        self.research_depth = depth;
        self.extracted = ExtractedContent::default();
        self.insights = None;
        self.embeddings = EmbeddingSet::default();
        self.diagnostics.clear();
        let mut previous = std::mem::take(&mut self.primary_sources);
        previous.append(&mut self.related_sources);
        previous
    }

    pub fn record_issue(&mut self, stage: Stage, target: Option<&str>, reason: impl Into<String>) {
        self.diagnostics.push(StageIssue {
            stage,
            target: target.map(str::to_string),
            reason: reason.into(),
            at: Utc::now(),
        });
    }

    pub fn successful_primary_count(&self) -> usize {
        self.primary_sources.iter().filter(|s| s.is_success()).count()
    }

    /// `Failed` for a failed cycle, `Degraded` when anything was absorbed,
    /// otherwise `Healthy`.
    pub fn health(&self) -> Health {
        match self.status {
            ResearchStatus::Failed => Health::Failed,
            _ if !self.diagnostics.is_empty() || !self.extracted.completeness.is_complete() => {
                Health::Degraded
            }
            _ => Health::Healthy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_only_forward() {
        let mut research = ContentResearch::new("feat-1", ResearchDepth::Standard);
        assert!(research.transition(ResearchStatus::Completed).is_err());
        research.transition(ResearchStatus::InProgress).unwrap();
        research.transition(ResearchStatus::Completed).unwrap();
        assert!(research.transition(ResearchStatus::InProgress).is_err());
        assert!(research.transition(ResearchStatus::Pending).is_err());
    }

    #[test]
    fn reset_returns_previous_sources() {
        let mut research = ContentResearch::new("feat-1", ResearchDepth::Standard);
        research
            .primary_sources
            .push(SourceContent::failed("https://a.example.com", SourceKind::Primary, "404"));
        research
            .related_sources
            .push(SourceContent::skipped("https://b.example.com", SourceKind::Related, "dup"));
        research.transition(ResearchStatus::InProgress).unwrap();
        research.transition(ResearchStatus::Completed).unwrap();

        let previous = research.reset(ResearchDepth::Standard);
        assert_eq!(previous.len(), 2);
        assert_eq!(research.status, ResearchStatus::Pending);
        assert!(research.primary_sources.is_empty());
        assert!(research.transition(ResearchStatus::InProgress).is_ok());
    }

    #[test]
    fn completeness_score() {
        assert_eq!(Completeness::default().score, 0.0);
        assert!(Completeness::from_missing(vec![]).is_complete());
        let half = Completeness::from_missing(vec![
            Gap::CodeExamples,
            Gap::QuantifiedMetrics,
            Gap::Prerequisites,
            Gap::CodeExamples,
        ]);
        assert_eq!(half.missing.len(), 3);
        assert!((half.score - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn related_score_is_clamped() {
        let source = SourceContent::failed("https://a.example.com", SourceKind::Primary, "x")
            .into_related(1.7, "https://root.example.com", 1);
        assert_eq!(source.relevance_score, Some(1.0));
        assert_eq!(source.kind, SourceKind::Related);
        assert_eq!(source.discovery_method, Some(DiscoveryMethod::LinkFollowing));
    }

    #[test]
    fn research_serialization() {
        let mut research = ContentResearch::new("feat-1", ResearchDepth::Deep);
        research.embeddings.model = "local-tf".into();
        let json = serde_json::to_string_pretty(&research).expect("serialize");
        assert!(json.contains(r#""status": "pending""#));
        let parsed: ContentResearch = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, research);
    }

    #[test]
    fn complexity_parse_lenient() {
        assert_eq!(ComplexityTier::parse_lenient("Basic"), Some(ComplexityTier::Beginner));
        assert_eq!(ComplexityTier::parse_lenient(" expert "), Some(ComplexityTier::Advanced));
        assert_eq!(ComplexityTier::parse_lenient("unknown"), None);
    }

    #[test]
    fn health_reflects_diagnostics() {
        let mut research = ContentResearch::new("feat-1", ResearchDepth::Standard);
        research.extracted.completeness = Completeness::from_missing(vec![]);
        research.transition(ResearchStatus::InProgress).unwrap();
        research.transition(ResearchStatus::Completed).unwrap();
        assert_eq!(research.health(), Health::Healthy);

        research.record_issue(Stage::Embedding, Some("full_documentation"), "timeout");
        assert_eq!(research.health(), Health::Degraded);
    }
}
