//! Sparse-embedding backends.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header};
use serde::Deserialize;
use tracing::instrument;

use featurelens_discovery::text::tokens;
use featurelens_shared::{EmbeddingConfig, FeatureLensError, Result, SparseVector};

use crate::capabilities::EmbeddingCapability;

// ---------------------------------------------------------------------------
// Local
// ---------------------------------------------------------------------------

/// Offline embedder: log-scaled term frequencies, L2-normalized.
///
/// Deterministic for a given input.
#[derive(Debug, Clone)]
pub struct LocalSparseEmbedder {
    model: String,
}

impl LocalSparseEmbedder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }

    pub fn vectorize(text: &str) -> SparseVector {
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for token in tokens(text) {
            *counts.entry(token).or_default() += 1;
        }

        let mut weights: BTreeMap<String, f32> = counts
            .into_iter()
            .map(|(term, tf)| (term, 1.0 + (tf as f32).ln()))
            .collect();

        let norm = weights.values().map(|w| w * w).sum::<f32>().sqrt();
        if norm > 0.0 {
            weights.values_mut().for_each(|w| *w /= norm);
        }
        SparseVector(weights)
    }
}

#[async_trait]
impl EmbeddingCapability for LocalSparseEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<SparseVector> {
        let vector = Self::vectorize(text);
        if vector.is_empty() {
            return Err(FeatureLensError::validation("text has no embeddable terms"));
        }
        Ok(vector)
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: BTreeMap<String, f32>,
}

/// Remote inference endpoint.
///
/// Request: `POST {"model": .., "input": ..}`.
/// Response: `{"embedding": {"term": weight, ..}}`.
pub struct HttpSparseEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpSparseEmbedder {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let endpoint = config.endpoint.clone().ok_or_else(|| {
            FeatureLensError::config("embedding.endpoint is required for the http provider")
        })?;
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|key| !key.is_empty());

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| FeatureLensError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            model: config.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl EmbeddingCapability for HttpSparseEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model, chars = text.len()))]
    async fn embed(&self, text: &str) -> Result<SparseVector> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "model": self.model, "input": text }));
        if let Some(key) = &self.api_key {
            request = request.header(header::AUTHORIZATION, format!("Bearer {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| FeatureLensError::Network(format!("embedding request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeatureLensError::Network(format!(
                "embedding endpoint returned HTTP {}",
                status.as_u16()
            )));
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| FeatureLensError::parse(format!("unreadable embedding response: {e}")))?;

        let weights: BTreeMap<String, f32> = body
            .embedding
            .into_iter()
            .filter(|(_, w)| w.is_finite() && *w != 0.0)
            .collect();
        Ok(SparseVector(weights))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use featurelens_shared::EmbeddingProvider;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn local_weights_are_normalized_and_deterministic() {
        let embedder = LocalSparseEmbedder::new("local-term-frequency");
        let text = "Alerting rules trigger connectors. Rules run on a schedule.";

        let a = embedder.embed(text).await.unwrap();
        let b = embedder.embed(text).await.unwrap();
        assert_eq!(a, b);

        assert!(a.weight("rules").unwrap() > a.weight("alerting").unwrap());
        let norm: f32 = a.0.values().map(|w| w * w).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn local_rejects_empty_text() {
        let embedder = LocalSparseEmbedder::new("local-term-frequency");
        assert!(embedder.embed("  a an ").await.is_err());
    }

    #[tokio::test]
    async fn http_embedder_reads_term_weights() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .and(body_partial_json(serde_json::json!({ "model": "splade" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embedding": { "alerting": 1.2, "rules": 0.8, "noise": 0.0 }
            })))
            .mount(&server)
            .await;

        let embedder = HttpSparseEmbedder::from_config(&EmbeddingConfig {
            provider: EmbeddingProvider::Http,
            model: "splade".into(),
            endpoint: Some(format!("{}/embed", server.uri())),
            ..EmbeddingConfig::default()
        })
        .unwrap();

        let vector = embedder.embed("Alerting rules").await.unwrap();
        assert_eq!(vector.len(), 2);
        assert_eq!(vector.weight("alerting"), Some(1.2));
    }

    #[tokio::test]
    async fn http_embedder_surfaces_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let embedder = HttpSparseEmbedder::from_config(&EmbeddingConfig {
            provider: EmbeddingProvider::Http,
            endpoint: Some(server.uri()),
            ..EmbeddingConfig::default()
        })
        .unwrap();

        let err = embedder.embed("text").await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
