//! Extraction over a JSON-lines subprocess bridge.
//!
//! Protocol, one JSON object per line:
//! - bridge → host: `{"type":"ready"}` once after start
//! - host → bridge: `{"type":"extract","id":"req-1","request":{..},"text":".."}`
//! - bridge → host: `{"type":"result","id":"req-1","result":{..}}` or
//!   `{"type":"error","id":"req-1","error":"..","code":"schema"}`
//! - host → bridge: `{"type":"shutdown"}`

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use featurelens_shared::{ExtractionConfig, FeatureLensError, Result};

use crate::capabilities::{ExtractionCapability, ExtractionRequest};

use super::{ensure_object, parse_json_object};

/// How long the bridge may take to announce itself.
const READY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, serde::Serialize)]
#[serde(tag = "type")]
enum RequestMessage<'a> {
    #[serde(rename = "extract")]
    Extract {
        id: String,
        request: &'a ExtractionRequest,
        text: &'a str,
    },
    #[serde(rename = "shutdown")]
    Shutdown,
}

#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type")]
enum ResponseMessage {
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "result")]
    Result {
        id: String,
        result: serde_json::Value,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        id: Option<String>,
        error: String,
        #[serde(default)]
        code: Option<String>,
    },
}

struct BridgeHandle {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    request_counter: u64,
}

impl BridgeHandle {
    async fn read_message(&mut self) -> Result<ResponseMessage> {
        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| FeatureLensError::Extraction(format!("bridge read error: {e}")))?;

        if read == 0 {
            return Err(FeatureLensError::Extraction(
                "bridge closed stdout unexpectedly".into(),
            ));
        }

        serde_json::from_str(line.trim()).map_err(|e| {
            FeatureLensError::Extraction(format!(
                "invalid bridge message: {e} (got: {})",
                line.trim().chars().take(200).collect::<String>()
            ))
        })
    }

    async fn write_message(&mut self, message: &RequestMessage<'_>) -> Result<()> {
        let mut json = serde_json::to_string(message).map_err(|e| {
            FeatureLensError::Extraction(format!("failed to serialize request: {e}"))
        })?;
        json.push('\n');

        self.stdin.write_all(json.as_bytes()).await.map_err(|e| {
            FeatureLensError::Extraction(format!("failed to write to bridge stdin: {e}"))
        })?;
        self.stdin
            .flush()
            .await
            .map_err(|e| FeatureLensError::Extraction(format!("failed to flush bridge stdin: {e}")))
    }

    async fn wait_for_ready(&mut self) -> Result<()> {
        let message = tokio::time::timeout(READY_TIMEOUT, self.read_message())
            .await
            .map_err(|_| FeatureLensError::Extraction("bridge never reported ready".into()))??;

        match message {
            ResponseMessage::Ready => {
                info!("bridge is ready");
                Ok(())
            }
            other => Err(FeatureLensError::Extraction(format!(
                "expected ready message, got: {other:?}"
            ))),
        }
    }

    async fn send(&mut self, request: &ExtractionRequest, text: &str) -> Result<serde_json::Value> {
        self.request_counter += 1;
        let id = format!("req-{}", self.request_counter);

        self.write_message(&RequestMessage::Extract {
            id: id.clone(),
            request,
            text,
        })
        .await?;

        match self.read_message().await? {
            ResponseMessage::Result { id: resp_id, result } => {
                if resp_id != id {
                    return Err(FeatureLensError::Extraction(format!(
                        "bridge answered {resp_id}, expected {id}"
                    )));
                }
                match result {
                    serde_json::Value::String(raw) => parse_json_object(&raw),
                    value => ensure_object(value),
                }
            }
            ResponseMessage::Error { error, code, .. } if code.as_deref() == Some("schema") => {
                Err(FeatureLensError::ExtractionSchema(error))
            }
            ResponseMessage::Error { error, .. } => Err(FeatureLensError::Extraction(error)),
            ResponseMessage::Ready => Err(FeatureLensError::Extraction(
                "unexpected ready message during extraction".into(),
            )),
        }
    }
}

/// Serializes requests over one long-lived bridge subprocess.
pub struct BridgeExtractor {
    model: String,
    handle: Mutex<BridgeHandle>,
}

impl BridgeExtractor {
    /// Spawn `bridge_cmd bridge_args..` and wait for its ready handshake.
    #[instrument(skip_all, fields(cmd = %config.bridge_cmd))]
    pub async fn spawn(config: &ExtractionConfig) -> Result<Self> {
        info!(args = ?config.bridge_args, "spawning extraction bridge");

        let mut child = Command::new(&config.bridge_cmd)
            .args(&config.bridge_args)
            .env("FEATURELENS_MODEL", &config.model)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                FeatureLensError::Extraction(format!(
                    "failed to spawn bridge: {e}. Is `{}` installed?",
                    config.bridge_cmd
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| FeatureLensError::Extraction("failed to capture bridge stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FeatureLensError::Extraction("failed to capture bridge stdout".into()))?;

        let mut handle = BridgeHandle {
            child,
            stdin,
            reader: BufReader::new(stdout),
            request_counter: 0,
        };
        handle.wait_for_ready().await?;

        Ok(Self {
            model: config.model.clone(),
            handle: Mutex::new(handle),
        })
    }

    /// Ask the bridge to exit and reap it.
    pub async fn shutdown(self) -> Result<()> {
        let mut handle = self.handle.into_inner();
        if let Err(e) = handle.write_message(&RequestMessage::Shutdown).await {
            warn!(error = %e, "bridge shutdown message not delivered");
        }

        match handle.child.wait().await {
            Ok(status) => info!(?status, "bridge exited"),
            Err(e) => warn!("bridge wait error: {e}"),
        }
        Ok(())
    }
}

#[async_trait]
impl ExtractionCapability for BridgeExtractor {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn extract(&self, request: &ExtractionRequest, text: &str) -> Result<serde_json::Value> {
        self.handle.lock().await.send(request, text).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use featurelens_shared::{ExtractionProvider, Feature};

    fn bridge_config(script: &str) -> ExtractionConfig {
        ExtractionConfig {
            provider: ExtractionProvider::Bridge,
            bridge_cmd: "sh".into(),
            bridge_args: vec!["-c".into(), script.into()],
            ..ExtractionConfig::default()
        }
    }

    fn request() -> ExtractionRequest {
        ExtractionRequest::full(&Feature {
            id: "alerting".into(),
            name: "Kibana Alerting".into(),
            description: String::new(),
            domain: String::new(),
            documentation_links: vec![],
        })
    }

    #[tokio::test]
    async fn handshake_then_result() {
        let script = r#"echo '{"type":"ready"}'
read line
echo '{"type":"result","id":"req-1","result":{"key_concepts":["rules"]}}'
read line"#;
        let bridge = BridgeExtractor::spawn(&bridge_config(script)).await.unwrap();

        let value = bridge.extract(&request(), "docs").await.unwrap();
        assert_eq!(value["key_concepts"][0], "rules");
        bridge.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn schema_errors_are_typed() {
        let script = r#"echo '{"type":"ready"}'
read line
echo '{"type":"error","id":"req-1","error":"not json","code":"schema"}'
read line
echo '{"type":"error","id":"req-2","error":"rate limited"}'
read line"#;
        let bridge = BridgeExtractor::spawn(&bridge_config(script)).await.unwrap();

        let first = bridge.extract(&request(), "docs").await.unwrap_err();
        assert!(matches!(first, FeatureLensError::ExtractionSchema(_)));
        let second = bridge.extract(&request(), "docs").await.unwrap_err();
        assert!(matches!(second, FeatureLensError::Extraction(ref m) if m == "rate limited"));
        bridge.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn missing_ready_fails_spawn() {
        let script = r#"echo '{"type":"result","id":"req-0","result":{}}'"#;
        assert!(BridgeExtractor::spawn(&bridge_config(script)).await.is_err());
    }
}
