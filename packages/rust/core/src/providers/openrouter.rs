//! OpenRouter-compatible chat-completions extractor.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header};
use serde::Deserialize;
use tracing::{debug, instrument};

use featurelens_shared::{ExtractionConfig, FeatureLensError, Result};

use crate::capabilities::{ExtractionCapability, ExtractionRequest};

use super::parse_json_object;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Calls a chat-completions endpoint in JSON-object response mode.
pub struct OpenRouterExtractor {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl OpenRouterExtractor {
    /// Read the API key from the configured environment variable.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                FeatureLensError::config(format!(
                    "extraction API key not found. Set the {} environment variable.",
                    config.api_key_env
                ))
            })?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &ExtractionConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| FeatureLensError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl ExtractionCapability for OpenRouterExtractor {
    fn model_id(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model, pass = request.pass, strict = request.strict))]
    async fn extract(&self, request: &ExtractionRequest, text: &str) -> Result<serde_json::Value> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": request.instructions() },
                { "role": "user", "content": text },
            ],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FeatureLensError::Extraction("extraction request timed out".into())
                } else {
                    FeatureLensError::Extraction(format!("extraction request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(FeatureLensError::Extraction(format!(
                "provider returned HTTP {}: {}",
                status.as_u16(),
                detail.chars().take(200).collect::<String>()
            )));
        }

        let chat: ChatResponse = response.json().await.map_err(|e| {
            FeatureLensError::Extraction(format!("unreadable provider response: {e}"))
        })?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                FeatureLensError::ExtractionSchema("provider response has no message content".into())
            })?;

        debug!(chars = content.len(), "extraction response received");
        parse_json_object(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use featurelens_shared::Feature;
    use wiremock::matchers::{header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ExtractionRequest {
        ExtractionRequest::full(&Feature {
            id: "alerting".into(),
            name: "Kibana Alerting".into(),
            description: String::new(),
            domain: String::new(),
            documentation_links: vec![],
        })
    }

    fn extractor(server: &MockServer) -> OpenRouterExtractor {
        let config = ExtractionConfig {
            endpoint: format!("{}/v1/chat/completions", server.uri()),
            timeout_secs: 5,
            ..ExtractionConfig::default()
        };
        OpenRouterExtractor::with_api_key(&config, "sk-test").unwrap()
    }

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] })
    }

    #[tokio::test]
    async fn returns_parsed_object() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header_eq("authorization", "Bearer sk-test"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion(r#"{"key_concepts": ["rules", "connectors"]}"#)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let value = extractor(&server).extract(&request(), "docs").await.unwrap();
        assert_eq!(value["key_concepts"][1], "connectors");
    }

    #[tokio::test]
    async fn prose_reply_is_schema_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("Sure! Rules.")))
            .mount(&server)
            .await;

        let err = extractor(&server).extract(&request(), "docs").await.unwrap_err();
        assert!(matches!(err, FeatureLensError::ExtractionSchema(_)));
    }

    #[tokio::test]
    async fn provider_failure_is_extraction_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let err = extractor(&server).extract(&request(), "docs").await.unwrap_err();
        assert!(matches!(err, FeatureLensError::Extraction(ref m) if m.contains("502")));
    }

    #[test]
    fn missing_api_key_is_config_error() {
        let config = ExtractionConfig {
            api_key_env: "FL_TEST_MISSING_EXTRACTION_KEY".into(),
            ..ExtractionConfig::default()
        };
        assert!(matches!(
            OpenRouterExtractor::from_config(&config),
            Err(FeatureLensError::Config { .. })
        ));
    }
}
