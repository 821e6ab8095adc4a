//! Two-pass structured extraction with a gap-filling second pass.
//!
//! Pass 1 asks for the full schema over budget-bounded source text. The
//! result is checked against the [`Gap`] checklist, and any unmet items that
//! are configured as fillable get one narrower pass over the same text.
//! Pass 2 only fills empty fields; it never overwrites pass 1.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use featurelens_shared::{
    CodeExample, Completeness, ComplexityTier, ExtractedContent, ExtractionConfig, Feature,
    FeatureLensError, Gap, Insights, Result, SourceContent, SourceKind, UseCase,
};

use crate::capabilities::{ExtractionCapability, ExtractionRequest};

/// Rough characters-per-token ratio used for budget truncation.
pub const CHARS_PER_TOKEN: usize = 4;

// ---------------------------------------------------------------------------
// Response payload
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Payload {
    key_concepts: Vec<String>,
    use_cases: Vec<RawUseCase>,
    capabilities: Vec<String>,
    prerequisites: Vec<String>,
    code_examples: Vec<CodeExample>,
    metrics: Vec<String>,
    related_features: Vec<String>,
    technical_summary: Option<String>,
    business_value: Option<String>,
    target_audience: Vec<String>,
    complexity: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawUseCase {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    complexity: Option<String>,
    #[serde(default)]
    estimated_time: Option<String>,
}

impl Payload {
    fn parse(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| FeatureLensError::ExtractionSchema(format!("response off schema: {e}")))
    }

    fn into_parts(self) -> (ExtractedContent, Insights) {
        let content = ExtractedContent {
            key_concepts: clean_list(self.key_concepts),
            use_cases: self
                .use_cases
                .into_iter()
                .filter(|u| !u.title.trim().is_empty())
                .map(|u| UseCase {
                    title: u.title.trim().to_string(),
                    description: u.description.trim().to_string(),
                    complexity: u.complexity.as_deref().and_then(ComplexityTier::parse_lenient),
                    estimated_time: u.estimated_time.filter(|t| !t.trim().is_empty()),
                })
                .collect(),
            capabilities: clean_list(self.capabilities),
            prerequisites: clean_list(self.prerequisites),
            code_examples: self
                .code_examples
                .into_iter()
                .filter(|c| !c.code.trim().is_empty())
                .collect(),
            metrics: clean_list(self.metrics),
            related_features: clean_list(self.related_features),
            ..ExtractedContent::default()
        };

        let insights = Insights {
            technical_summary: non_empty(self.technical_summary),
            business_value: non_empty(self.business_value),
            recommended_audience: clean_list(self.target_audience),
            implementation_complexity: self
                .complexity
                .as_deref()
                .and_then(ComplexityTier::parse_lenient),
        };

        (content, insights)
    }
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let item = item.trim();
        if !item.is_empty() && !out.iter().any(|seen| seen.eq_ignore_ascii_case(item)) {
            out.push(item.to_string());
        }
    }
    out
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Gap check and merge
// ---------------------------------------------------------------------------

/// Checklist items `content` leaves unmet, in checklist order.
pub fn find_gaps(content: &ExtractedContent) -> Vec<Gap> {
    Gap::ALL
        .into_iter()
        .filter(|gap| match gap {
            Gap::KeyConcepts => content.key_concepts.is_empty(),
            Gap::UseCases => content.use_cases.is_empty(),
            Gap::Capabilities => content.capabilities.is_empty(),
            Gap::Prerequisites => content.prerequisites.is_empty(),
            Gap::CodeExamples => content.code_examples.is_empty(),
            Gap::QuantifiedMetrics => {
                !content.metrics.iter().any(|m| m.chars().any(|c| c.is_ascii_digit()))
            }
        })
        .collect()
}

/// Copy fields from `fill` into `base` only where `base` is empty.
pub fn merge_missing(base: &mut ExtractedContent, fill: ExtractedContent) {
    fn take<T>(slot: &mut Vec<T>, fill: Vec<T>) {
        if slot.is_empty() {
            *slot = fill;
        }
    }

    take(&mut base.key_concepts, fill.key_concepts);
    take(&mut base.use_cases, fill.use_cases);
    take(&mut base.capabilities, fill.capabilities);
    take(&mut base.prerequisites, fill.prerequisites);
    take(&mut base.code_examples, fill.code_examples);
    take(&mut base.related_features, fill.related_features);
    if find_gaps(base).contains(&Gap::QuantifiedMetrics) {
        base.metrics.extend(fill.metrics);
    }
}

fn merge_insights(base: &mut Insights, fill: Insights) {
    if base.technical_summary.is_none() {
        base.technical_summary = fill.technical_summary;
    }
    if base.business_value.is_none() {
        base.business_value = fill.business_value;
    }
    if base.recommended_audience.is_empty() {
        base.recommended_audience = fill.recommended_audience;
    }
    if base.implementation_complexity.is_none() {
        base.implementation_complexity = fill.implementation_complexity;
    }
}

// ---------------------------------------------------------------------------
// Source text preparation
// ---------------------------------------------------------------------------

/// Concatenate successful sources, primaries first, within `max_chars`.
pub fn prepare_text<'a>(
    sources: impl IntoIterator<Item = &'a SourceContent>,
    max_chars: usize,
) -> String {
    let mut usable: Vec<&SourceContent> = sources
        .into_iter()
        .filter(|s| s.is_success() && !s.text.trim().is_empty())
        .collect();
    // Stable, so primary order is kept
    usable.sort_by_key(|s| s.kind != SourceKind::Primary);

    let mut out = String::new();
    for source in usable {
        if out.len() >= max_chars {
            break;
        }
        let heading = source.title.as_deref().unwrap_or(&source.url);
        out.push_str(&format!("## Source: {heading}\nURL: {}\n\n", source.url));
        out.push_str(source.text.trim());
        out.push_str("\n\n");
    }

    truncate_chars(out.trim_end(), max_chars)
}

/// Truncate at a char boundary, preferring the last paragraph break.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }

    let mut end = max_chars;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    let cut = &text[..end];
    match cut.rfind("\n\n") {
        Some(idx) if idx > end / 2 => cut[..idx].to_string(),
        _ => cut.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// A pass that failed and was absorbed.
#[derive(Debug, Clone, PartialEq)]
pub struct PassFailure {
    pub pass: u8,
    pub reason: String,
}

/// Outcome of [`ContentExtractor::extract`]. Always populated.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub content: ExtractedContent,
    pub insights: Option<Insights>,
    pub failures: Vec<PassFailure>,
}

/// Runs the extraction passes against one capability.
pub struct ContentExtractor {
    capability: Arc<dyn ExtractionCapability>,
    token_budget: usize,
    timeout: Duration,
    fillable: Vec<Gap>,
}

impl ContentExtractor {
    pub fn new(capability: Arc<dyn ExtractionCapability>, config: &ExtractionConfig) -> Self {
        Self {
            capability,
            token_budget: config.token_budget.max(1),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            fillable: config.fillable_gaps.clone(),
        }
    }

    pub fn model_id(&self) -> &str {
        self.capability.model_id()
    }

    /// Extract structured content for `feature` from `sources`.
    #[instrument(skip_all, fields(feature_id = %feature.id, model = %self.capability.model_id()))]
    pub async fn extract<'a>(
        &self,
        feature: &Feature,
        sources: impl IntoIterator<Item = &'a SourceContent>,
    ) -> Extraction {
        let text = prepare_text(sources, self.token_budget * CHARS_PER_TOKEN);
        if text.is_empty() {
            warn!("no usable source text");
            return Extraction {
                content: ExtractedContent::failed("no usable source text"),
                insights: None,
                failures: vec![PassFailure {
                    pass: 1,
                    reason: "no usable source text".into(),
                }],
            };
        }

        // Pass 1
        let (mut content, mut insights) =
            match self.run_pass(ExtractionRequest::full(feature), &text).await {
                Ok(parts) => parts,
                Err(e) => {
                    warn!(error = %e, "pass 1 failed, extraction aborted");
                    return Extraction {
                        content: ExtractedContent::failed(format!("pass 1 failed: {e}")),
                        insights: None,
                        failures: vec![PassFailure {
                            pass: 1,
                            reason: e.to_string(),
                        }],
                    };
                }
            };
        content.passes = 1;
        let mut failures = Vec::new();

        // Gap check
        let gaps = find_gaps(&content);
        let targeted: Vec<Gap> = gaps
            .iter()
            .copied()
            .filter(|g| self.fillable.contains(g))
            .collect();
        debug!(gaps = ?gaps, fillable = ?targeted, "gap check after pass 1");

        // Pass 2
        if !targeted.is_empty() {
            match self
                .run_pass(ExtractionRequest::targeted(feature, &targeted), &text)
                .await
            {
                Ok((fill, fill_insights)) => {
                    merge_missing(&mut content, fill);
                    merge_insights(&mut insights, fill_insights);
                    content.passes = 2;
                }
                Err(e) => {
                    warn!(error = %e, "pass 2 failed, keeping pass 1 result");
                    failures.push(PassFailure {
                        pass: 2,
                        reason: e.to_string(),
                    });
                }
            }
        }

        content.completeness = Completeness::from_missing(find_gaps(&content));
        info!(
            passes = content.passes,
            missing = content.completeness.missing.len(),
            concepts = content.key_concepts.len(),
            code_examples = content.code_examples.len(),
            "extraction done"
        );

        Extraction {
            content,
            insights: (!insights.is_empty()).then_some(insights),
            failures,
        }
    }

    /// One pass. A schema error is retried once with a stricter request.
    async fn run_pass(
        &self,
        request: ExtractionRequest,
        text: &str,
    ) -> Result<(ExtractedContent, Insights)> {
        match self.call(&request, text).await {
            Err(FeatureLensError::ExtractionSchema(reason)) => {
                debug!(pass = request.pass, %reason, "malformed response, retrying strictly");
                self.call(&request.into_strict(), text).await
            }
            other => other,
        }
    }

    async fn call(
        &self,
        request: &ExtractionRequest,
        text: &str,
    ) -> Result<(ExtractedContent, Insights)> {
        let value = tokio::time::timeout(self.timeout, self.capability.extract(request, text))
            .await
            .map_err(|_| {
                FeatureLensError::Extraction(format!(
                    "pass {} timed out after {}s",
                    request.pass,
                    self.timeout.as_secs()
                ))
            })??;

        Ok(Payload::parse(value)?.into_parts())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use featurelens_shared::{PageStructure, SourceStatus};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted replies and records every request.
    struct Scripted {
        replies: Mutex<VecDeque<Result<serde_json::Value>>>,
        seen: Mutex<Vec<ExtractionRequest>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<serde_json::Value>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ExtractionRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ExtractionCapability for Scripted {
        fn model_id(&self) -> &str {
            "scripted"
        }

        async fn extract(
            &self,
            request: &ExtractionRequest,
            _text: &str,
        ) -> Result<serde_json::Value> {
            self.seen.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FeatureLensError::Extraction("script exhausted".into())))
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

    fn source(url: &str, kind: SourceKind, text: &str) -> SourceContent {
        SourceContent {
            url: url.into(),
            title: Some(url.rsplit('/').next().unwrap_or_default().to_string()),
            fetched_at: Utc::now(),
            status: SourceStatus::Success,
            kind,
            word_count: text.split_whitespace().count(),
            text: text.into(),
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

    fn sources() -> Vec<SourceContent> {
        vec![source(
            "https://docs.example.com/alerting",
            SourceKind::Primary,
            "Alerting rules check conditions every 60 seconds.",
        )]
    }

    fn pass_one_without_code() -> serde_json::Value {
        serde_json::json!({
            "key_concepts": ["rule", "connector", "Rule"],
            "use_cases": [{ "title": "Notify on errors", "description": "Email on spikes", "complexity": "basic" }],
            "capabilities": ["Scheduled checks"],
            "prerequisites": ["Platinum license"],
            "code_examples": [],
            "metrics": ["Rules run at most every 60 seconds"],
            "technical_summary": "Rules evaluate conditions on a schedule.",
            "complexity": "medium"
        })
    }

    fn extractor(capability: Arc<dyn ExtractionCapability>) -> ContentExtractor {
        ContentExtractor::new(capability, &ExtractionConfig::default())
    }

    #[tokio::test]
    async fn second_pass_fills_code_examples() {
        let capability = Scripted::new(vec![
            Ok(pass_one_without_code()),
            Ok(serde_json::json!({
                "code_examples": [{ "title": "Create rule", "code": "POST _alerting/rule", "language": "http" }],
                "key_concepts": ["should not overwrite"]
            })),
        ]);
        let result = extractor(capability.clone()).extract(&feature(), &sources()).await;

        assert_eq!(result.content.code_examples.len(), 1);
        assert_eq!(result.content.key_concepts, vec!["rule", "connector"]);
        assert!(result.content.completeness.is_complete());
        assert_eq!(result.content.completeness.score, 1.0);
        assert_eq!(result.content.passes, 2);
        assert!(result.failures.is_empty());

        let requests = capability.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].fields, vec!["code_examples"]);

        let insights = result.insights.unwrap();
        assert_eq!(insights.implementation_complexity, Some(ComplexityTier::Intermediate));
        assert_eq!(
            result.content.use_cases[0].complexity,
            Some(ComplexityTier::Beginner)
        );
    }

    #[tokio::test]
    async fn complete_first_pass_skips_second() {
        let mut full = pass_one_without_code();
        full["code_examples"] = serde_json::json!([{ "code": "xpack.alerting.enabled: true" }]);
        let capability = Scripted::new(vec![Ok(full)]);

        let result = extractor(capability.clone()).extract(&feature(), &sources()).await;
        assert_eq!(capability.requests().len(), 1);
        assert_eq!(result.content.passes, 1);
        assert!(result.content.completeness.is_complete());
    }

    #[tokio::test]
    async fn pass_two_failure_keeps_pass_one() {
        let capability = Scripted::new(vec![
            Ok(pass_one_without_code()),
            Err(FeatureLensError::Extraction("timeout".into())),
        ]);
        let result = extractor(capability).extract(&feature(), &sources()).await;

        assert_eq!(result.content.capabilities, vec!["Scheduled checks"]);
        assert_eq!(result.content.completeness.missing, vec![Gap::CodeExamples]);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].pass, 2);
        assert!(result.content.failure_note.is_none());
    }

    #[tokio::test]
    async fn schema_error_retried_once_strictly() {
        let mut full = pass_one_without_code();
        full["code_examples"] = serde_json::json!([{ "code": "GET _alerting" }]);
        let capability = Scripted::new(vec![
            Err(FeatureLensError::ExtractionSchema("prose".into())),
            Ok(full),
        ]);

        let result = extractor(capability.clone()).extract(&feature(), &sources()).await;
        let requests = capability.requests();
        assert_eq!(requests.len(), 2);
        assert!(!requests[0].strict);
        assert!(requests[1].strict);
        assert!(result.content.completeness.is_complete());
    }

    #[tokio::test]
    async fn pass_one_failure_yields_failure_note() {
        let capability = Scripted::new(vec![
            Err(FeatureLensError::ExtractionSchema("prose".into())),
            Ok(serde_json::json!({ "key_concepts": "not a list" })),
        ]);
        let result = extractor(capability.clone()).extract(&feature(), &sources()).await;

        assert_eq!(capability.requests().len(), 2);
        assert!(result.content.failure_note.is_some());
        assert!(result.content.key_concepts.is_empty());
        assert_eq!(result.content.completeness.score, 0.0);
        assert_eq!(result.failures[0].pass, 1);
        assert!(result.insights.is_none());
    }

    #[tokio::test]
    async fn fillable_gaps_limit_second_pass() {
        let capability = Scripted::new(vec![Ok(pass_one_without_code())]);
        let config = ExtractionConfig {
            fillable_gaps: vec![Gap::QuantifiedMetrics],
            ..ExtractionConfig::default()
        };
        let result = ContentExtractor::new(capability.clone(), &config)
            .extract(&feature(), &sources())
            .await;

        assert_eq!(capability.requests().len(), 1);
        assert_eq!(result.content.completeness.missing, vec![Gap::CodeExamples]);
    }

    #[tokio::test]
    async fn no_source_text_is_failure() {
        let capability = Scripted::new(vec![]);
        let mut failed = sources();
        failed[0].status = SourceStatus::Failed;

        let result = extractor(capability.clone()).extract(&feature(), &failed).await;
        assert!(capability.requests().is_empty());
        assert_eq!(
            result.content.failure_note.as_deref(),
            Some("no usable source text")
        );
    }

    #[test]
    fn metrics_need_a_number() {
        let mut content = ExtractedContent {
            metrics: vec!["Rules are fast".into()],
            ..ExtractedContent::default()
        };
        assert!(find_gaps(&content).contains(&Gap::QuantifiedMetrics));
        content.metrics.push("Up to 1000 rules per space".into());
        assert!(!find_gaps(&content).contains(&Gap::QuantifiedMetrics));
    }

    #[test]
    fn prepared_text_prefers_primary_and_respects_budget() {
        let related = source("https://blog.example.com/related", SourceKind::Related, "RELATED");
        let primary = source("https://docs.example.com/primary", SourceKind::Primary, "PRIMARY");
        let text = prepare_text([&related, &primary], 10_000);
        assert!(text.find("PRIMARY").unwrap() < text.find("RELATED").unwrap());

        let long = source(
            "https://docs.example.com/long",
            SourceKind::Primary,
            &"é".repeat(500),
        );
        let bounded = prepare_text([&long], 101);
        assert!(bounded.len() <= 101);
    }
}
