//! Embedding generation over three prepared text windows.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument, warn};

use featurelens_shared::{
    Embedding, EmbeddingConfig, EmbeddingKind, EmbeddingSet, ExtractedContent, Feature,
    FeatureLensError, Insights, SourceContent, SourceKind,
};

use crate::capabilities::EmbeddingCapability;
use crate::extractor::{CHARS_PER_TOKEN, prepare_text, truncate_chars};

/// Everything the windows are built from.
#[derive(Debug, Clone, Copy)]
pub struct WindowInputs<'a> {
    pub feature: &'a Feature,
    pub extracted: &'a ExtractedContent,
    pub insights: Option<&'a Insights>,
    pub sources: &'a [&'a SourceContent],
}

/// Build the text window for `kind`, bounded to `max_chars`.
pub fn text_window(kind: EmbeddingKind, inputs: &WindowInputs<'_>, max_chars: usize) -> String {
    let text = match kind {
        EmbeddingKind::FeatureSummary => summary_window(inputs),
        EmbeddingKind::TechnicalContent => technical_window(inputs, max_chars),
        EmbeddingKind::FullDocumentation => prepare_text(inputs.sources.iter().copied(), max_chars),
    };
    truncate_chars(text.trim(), max_chars)
}

fn summary_window(inputs: &WindowInputs<'_>) -> String {
    let feature = inputs.feature;
    let mut parts = vec![feature.name.clone()];
    if !feature.description.is_empty() {
        parts.push(feature.description.clone());
    }
    if !feature.domain.is_empty() {
        parts.push(format!("Domain: {}", feature.domain));
    }
    if let Some(summary) = inputs.insights.and_then(|i| i.technical_summary.as_ref()) {
        parts.push(summary.clone());
    }
    if !inputs.extracted.key_concepts.is_empty() {
        parts.push(format!("Concepts: {}", inputs.extracted.key_concepts.join(", ")));
    }
    parts.join("\n")
}

/// Concepts and use cases first, then capabilities and code, then prose to fill.
fn technical_window(inputs: &WindowInputs<'_>, max_chars: usize) -> String {
    let extracted = inputs.extracted;
    let mut out = String::new();

    if !extracted.key_concepts.is_empty() {
        out.push_str(&format!("Concepts: {}\n", extracted.key_concepts.join(", ")));
    }
    for use_case in &extracted.use_cases {
        out.push_str(&format!("Use case: {}. {}\n", use_case.title, use_case.description));
    }
    if !extracted.capabilities.is_empty() {
        out.push_str(&format!("Capabilities: {}\n", extracted.capabilities.join("; ")));
    }
    if !extracted.prerequisites.is_empty() {
        out.push_str(&format!("Prerequisites: {}\n", extracted.prerequisites.join("; ")));
    }
    for example in &extracted.code_examples {
        out.push_str(&format!("{}\n{}\n", example.title, example.code));
    }

    let remaining = max_chars.saturating_sub(out.len());
    if remaining > 0 {
        out.push_str(&plain_prose(inputs.sources, remaining));
    }
    out
}

/// Source bodies without headings, primaries first.
fn plain_prose(sources: &[&SourceContent], max_chars: usize) -> String {
    let mut ordered: Vec<&SourceContent> =
        sources.iter().copied().filter(|s| s.is_success()).collect();
    ordered.sort_by_key(|s| s.kind != SourceKind::Primary);

    let joined = ordered
        .iter()
        .map(|s| s.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    truncate_chars(&joined, max_chars)
}

/// Outcome of [`EmbeddingGenerator::generate`]: whichever slots succeeded,
/// plus one `EmbeddingUnavailable` per slot that did not.
#[derive(Debug)]
pub struct EmbeddingOutcome {
    pub set: EmbeddingSet,
    pub failures: Vec<FeatureLensError>,
}

/// Fills the three embedding slots independently.
pub struct EmbeddingGenerator {
    capability: Arc<dyn EmbeddingCapability>,
    max_chars: usize,
    timeout: Duration,
}

impl EmbeddingGenerator {
    pub fn new(capability: Arc<dyn EmbeddingCapability>, config: &EmbeddingConfig) -> Self {
        Self {
            capability,
            max_chars: config.max_input_tokens.max(1) * CHARS_PER_TOKEN,
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        }
    }

    #[instrument(skip_all, fields(feature_id = %inputs.feature.id, model = %self.capability.model_id()))]
    pub async fn generate(&self, inputs: &WindowInputs<'_>) -> EmbeddingOutcome {
        let slots = EmbeddingKind::ALL.map(|kind| self.embed_slot(kind, inputs));
        let results = futures::future::join_all(slots).await;

        let mut set = EmbeddingSet {
            model: self.capability.model_id().to_string(),
            ..EmbeddingSet::default()
        };
        let mut failures = Vec::new();
        for (kind, result) in EmbeddingKind::ALL.into_iter().zip(results) {
            match result {
                Ok(embedding) => set.set(kind, Some(embedding)),
                Err(e) => {
                    warn!(slot = %kind, error = %e, "embedding slot left empty");
                    failures.push(e);
                }
            }
        }

        info!(populated = set.populated(), "embeddings generated");
        EmbeddingOutcome { set, failures }
    }

    async fn embed_slot(
        &self,
        kind: EmbeddingKind,
        inputs: &WindowInputs<'_>,
    ) -> Result<Embedding, FeatureLensError> {
        let unavailable = |message: String| FeatureLensError::EmbeddingUnavailable {
            slot: kind,
            message,
        };

        let window = text_window(kind, inputs, self.max_chars);
        if window.is_empty() {
            return Err(unavailable("empty text window".into()));
        }

        let vector = tokio::time::timeout(self.timeout, self.capability.embed(&window))
            .await
            .map_err(|_| unavailable(format!("timed out after {}s", self.timeout.as_secs())))?
            .map_err(|e| unavailable(e.to_string()))?;

        if vector.is_empty() {
            return Err(unavailable("empty vector".into()));
        }

        Ok(Embedding {
            vector,
            source_text: window,
            generated_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::LocalSparseEmbedder;
    use async_trait::async_trait;
    use featurelens_shared::{
        CodeExample, PageStructure, Result, SourceStatus, SparseVector, UseCase,
    };

    /// Fails whenever the window contains a marker string.
    struct FailsOn(&'static str);

    #[async_trait]
    impl EmbeddingCapability for FailsOn {
        fn model_id(&self) -> &str {
            "fails-on"
        }

        async fn embed(&self, text: &str) -> Result<SparseVector> {
            if text.contains(self.0) {
                Err(FeatureLensError::Network("inference endpoint unavailable".into()))
            } else {
                Ok(LocalSparseEmbedder::vectorize(text))
            }
        }
    }

    fn feature() -> Feature {
        Feature {
            id: "alerting".into(),
            name: "Kibana Alerting".into(),
            description: "Rules and connectors".into(),
            domain: "observability".into(),
            documentation_links: vec![],
        }
    }

    fn extracted() -> ExtractedContent {
        ExtractedContent {
            key_concepts: vec!["rule".into(), "connector".into()],
            use_cases: vec![UseCase {
                title: "Notify on errors".into(),
                description: "Email when error rate spikes".into(),
                complexity: None,
                estimated_time: None,
            }],
            code_examples: vec![CodeExample {
                title: "Enable".into(),
                code: "xpack.alerting.enabled: true".into(),
                language: "yaml".into(),
                description: String::new(),
            }],
            ..ExtractedContent::default()
        }
    }

    fn source() -> SourceContent {
        SourceContent {
            url: "https://docs.example.com/alerting".into(),
            title: Some("Alerting".into()),
            fetched_at: Utc::now(),
            status: SourceStatus::Success,
            kind: SourceKind::Primary,
            word_count: 6,
            text: "RAWPROSE alerting documentation body text".into(),
            structure: PageStructure::default(),
            links: vec![],
            content_hash: None,
            adapter: None,
            relevance_score: None,
            discovery_method: None,
            discovered_from: None,
            depth: 0,
            error: None,
        }
    }

    fn config(max_input_tokens: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            max_input_tokens,
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn technical_window_puts_structure_before_prose() {
        let (feature, extracted, page) = (feature(), extracted(), source());
        let sources = [&page];
        let inputs = WindowInputs {
            feature: &feature,
            extracted: &extracted,
            insights: None,
            sources: &sources,
        };

        let window = text_window(EmbeddingKind::TechnicalContent, &inputs, 10_000);
        let concepts = window.find("Concepts").unwrap();
        let prose = window.find("RAWPROSE").unwrap();
        assert!(concepts < prose);
        assert!(window.contains("Use case: Notify on errors"));

        let tight = text_window(EmbeddingKind::TechnicalContent, &inputs, 40);
        assert!(tight.len() <= 40);
        assert!(!tight.contains("RAWPROSE"));
    }

    #[tokio::test]
    async fn one_failing_slot_does_not_block_others() {
        let (feature, extracted, page) = (feature(), extracted(), source());
        let sources = [&page];
        let inputs = WindowInputs {
            feature: &feature,
            extracted: &extracted,
            insights: None,
            sources: &sources,
        };
        // Only the full documentation window starts with the source heading
        let generator = EmbeddingGenerator::new(Arc::new(FailsOn("## Source:")), &config(512));

        let outcome = generator.generate(&inputs).await;
        assert!(outcome.set.feature_summary.is_some());
        assert!(outcome.set.full_documentation.is_none());
        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(
            outcome.failures[0],
            FeatureLensError::EmbeddingUnavailable {
                slot: EmbeddingKind::FullDocumentation,
                ..
            }
        ));
        assert_eq!(outcome.set.model, "fails-on");
    }

    #[tokio::test]
    async fn windows_are_truncated_to_model_limit() {
        let (feature, extracted) = (feature(), extracted());
        let mut page = source();
        page.text = "alerting ".repeat(2_000);
        let sources = [&page];
        let inputs = WindowInputs {
            feature: &feature,
            extracted: &extracted,
            insights: None,
            sources: &sources,
        };
        let generator = EmbeddingGenerator::new(
            Arc::new(LocalSparseEmbedder::new("local-term-frequency")),
            &config(16),
        );

        let outcome = generator.generate(&inputs).await;
        assert_eq!(outcome.set.populated(), 3);
        for kind in EmbeddingKind::ALL {
            assert!(outcome.set.get(kind).unwrap().source_text.len() <= 64);
        }
    }
}
