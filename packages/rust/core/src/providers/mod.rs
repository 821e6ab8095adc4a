//! Concrete capability variants, chosen once from configuration.

mod bridge;
mod openrouter;
mod sparse;

use std::sync::Arc;

use featurelens_shared::{
    EmbeddingConfig, EmbeddingProvider, ExtractionConfig, ExtractionProvider, FeatureLensError,
    Result,
};

use crate::capabilities::{EmbeddingCapability, ExtractionCapability};

pub use bridge::BridgeExtractor;
pub use openrouter::OpenRouterExtractor;
pub use sparse::{HttpSparseEmbedder, LocalSparseEmbedder};

/// Build the configured extraction backend.
///
/// The bridge variant spawns its subprocess here and waits for the handshake.
pub async fn extractor_from_config(
    config: &ExtractionConfig,
) -> Result<Arc<dyn ExtractionCapability>> {
    match config.provider {
        ExtractionProvider::Openrouter => Ok(Arc::new(OpenRouterExtractor::from_config(config)?)),
        ExtractionProvider::Bridge => Ok(Arc::new(BridgeExtractor::spawn(config).await?)),
    }
}

/// Build the configured embedding backend.
pub fn embedder_from_config(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingCapability>> {
    match config.provider {
        EmbeddingProvider::Local => Ok(Arc::new(LocalSparseEmbedder::new(&config.model))),
        EmbeddingProvider::Http => Ok(Arc::new(HttpSparseEmbedder::from_config(config)?)),
    }
}

/// Parse a model reply into a JSON object, tolerating a Markdown code fence.
pub(crate) fn parse_json_object(raw: &str) -> Result<serde_json::Value> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let value: serde_json::Value = serde_json::from_str(body).map_err(|e| {
        FeatureLensError::ExtractionSchema(format!(
            "response is not valid JSON: {e} (got: {})",
            preview(body)
        ))
    })?;

    ensure_object(value)
}

pub(crate) fn ensure_object(value: serde_json::Value) -> Result<serde_json::Value> {
    if value.is_object() {
        Ok(value)
    } else {
        Err(FeatureLensError::ExtractionSchema(format!(
            "expected a JSON object, got: {}",
            preview(&value.to_string())
        )))
    }
}

fn preview(s: &str) -> &str {
    match s.char_indices().nth(200) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_fenced_objects() {
        let plain = parse_json_object(r#"{"key_concepts": ["rules"]}"#).unwrap();
        assert_eq!(plain["key_concepts"][0], "rules");

        let fenced = parse_json_object("```json\n{\"capabilities\": []}\n```").unwrap();
        assert!(fenced["capabilities"].is_array());
    }

    #[test]
    fn rejects_prose_and_non_objects() {
        let prose = parse_json_object("Here are the concepts: rules, connectors").unwrap_err();
        assert!(matches!(prose, FeatureLensError::ExtractionSchema(_)));

        let array = parse_json_object("[1, 2, 3]").unwrap_err();
        assert!(matches!(array, FeatureLensError::ExtractionSchema(_)));
    }

    #[test]
    fn local_embedder_needs_no_endpoint() {
        let embedder = embedder_from_config(&EmbeddingConfig::default()).unwrap();
        assert_eq!(embedder.model_id(), "local-term-frequency");

        let http = EmbeddingConfig {
            provider: EmbeddingProvider::Http,
            endpoint: None,
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            embedder_from_config(&http),
            Err(FeatureLensError::Config { .. })
        ));
    }
}
