//! External collaborator contracts consumed by the research pipeline.
//!
//! Each seam is an object-safe `async_trait` so a concrete variant can be
//! chosen once at startup and shared behind an `Arc`.

use async_trait::async_trait;
use serde::Serialize;

use featurelens_shared::{Feature, Gap, Result, SparseVector};

// ---------------------------------------------------------------------------
// Extraction request
// ---------------------------------------------------------------------------

/// Fields every first-pass request asks for.
pub const PASS_ONE_FIELDS: [&str; 11] = [
    "key_concepts",
    "use_cases",
    "capabilities",
    "prerequisites",
    "code_examples",
    "metrics",
    "related_features",
    "technical_summary",
    "business_value",
    "target_audience",
    "complexity",
];

/// A structured-extraction request with a fixed field schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionRequest {
    pub feature_name: String,
    pub feature_description: String,
    pub feature_domain: String,
    /// Top-level JSON keys the response must carry.
    pub fields: Vec<String>,
    /// 1 for the full pass, 2 for gap filling.
    pub pass: u8,
    /// Set on the retry after a malformed response.
    pub strict: bool,
}

impl ExtractionRequest {
    /// The full first-pass schema.
    pub fn full(feature: &Feature) -> Self {
        Self::with_fields(feature, 1, PASS_ONE_FIELDS.iter().map(|f| f.to_string()).collect())
    }

    /// A narrower request covering only `gaps`.
    pub fn targeted(feature: &Feature, gaps: &[Gap]) -> Self {
        Self::with_fields(feature, 2, gaps.iter().map(|g| gap_field(*g).to_string()).collect())
    }

    fn with_fields(feature: &Feature, pass: u8, fields: Vec<String>) -> Self {
        Self {
            feature_name: feature.name.clone(),
            feature_description: feature.description.clone(),
            feature_domain: feature.domain.clone(),
            fields,
            pass,
            strict: false,
        }
    }

    pub fn into_strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// System instructions describing the expected JSON object.
    pub fn instructions(&self) -> String {
        let mut out = format!(
            "Extract structured knowledge about the feature \"{}\" ({}) from the documentation \
             provided by the user.\nRespond with a single JSON object containing exactly these keys:\n",
            self.feature_name,
            if self.feature_domain.is_empty() { "general" } else { &self.feature_domain },
        );
        for field in &self.fields {
            out.push_str(&format!("- {field}: {}\n", field_shape(field)));
        }
        if self.pass > 1 {
            out.push_str("Earlier extraction left these keys empty. Look for them specifically.\n");
        }
        if self.strict {
            out.push_str(
                "Your previous answer was not valid. Return ONLY the JSON object, \
                 no prose and no code fences. Use [] or null when nothing applies.\n",
            );
        }
        out
    }
}

/// JSON key carrying the data for a checklist item.
pub fn gap_field(gap: Gap) -> &'static str {
    match gap {
        Gap::KeyConcepts => "key_concepts",
        Gap::UseCases => "use_cases",
        Gap::Capabilities => "capabilities",
        Gap::Prerequisites => "prerequisites",
        Gap::CodeExamples => "code_examples",
        Gap::QuantifiedMetrics => "metrics",
    }
}

fn field_shape(field: &str) -> &'static str {
    match field {
        "use_cases" => {
            "array of {title, description, complexity: beginner|intermediate|advanced, estimated_time}"
        }
        "code_examples" => "array of {title, code, language, description}",
        "metrics" => "array of strings, each a quantified claim with its number and unit",
        "technical_summary" | "business_value" => "string or null",
        "complexity" => "beginner|intermediate|advanced or null",
        _ => "array of short strings",
    }
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Text-generation backend that returns JSON for an [`ExtractionRequest`].
#[async_trait]
pub trait ExtractionCapability: Send + Sync {
    fn model_id(&self) -> &str;

    /// Run one request over `text`. A response that is not a JSON object
    /// must surface as [`FeatureLensError::ExtractionSchema`].
    ///
    /// [`FeatureLensError::ExtractionSchema`]: featurelens_shared::FeatureLensError::ExtractionSchema
    async fn extract(&self, request: &ExtractionRequest, text: &str) -> Result<serde_json::Value>;
}

/// Sparse-embedding inference backend.
#[async_trait]
pub trait EmbeddingCapability: Send + Sync {
    fn model_id(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<SparseVector>;
}

/// Read-only access to feature records owned elsewhere.
#[async_trait]
pub trait FeatureSource: Send + Sync {
    /// Fails with `FeatureNotFound` for unknown ids.
    async fn get_feature(&self, id: &str) -> Result<Feature>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature() -> Feature {
        Feature {
            id: "alerting".into(),
            name: "Kibana Alerting".into(),
            description: "Rules and connectors".into(),
            domain: "observability".into(),
            documentation_links: vec![],
        }
    }

    #[test]
    fn full_request_asks_for_every_field() {
        let request = ExtractionRequest::full(&feature());
        assert_eq!(request.pass, 1);
        assert_eq!(request.fields.len(), PASS_ONE_FIELDS.len());
        let prompt = request.instructions();
        assert!(prompt.contains("Kibana Alerting"));
        assert!(prompt.contains("- code_examples: array of {title, code"));
        assert!(!prompt.contains("ONLY the JSON object"));
    }

    #[test]
    fn targeted_request_only_names_gaps() {
        let request =
            ExtractionRequest::targeted(&feature(), &[Gap::CodeExamples, Gap::QuantifiedMetrics])
                .into_strict();
        assert_eq!(request.fields, vec!["code_examples", "metrics"]);
        assert_eq!(request.pass, 2);
        let prompt = request.instructions();
        assert!(!prompt.contains("key_concepts"));
        assert!(prompt.contains("left these keys empty"));
        assert!(prompt.contains("ONLY the JSON object"));
    }
}
