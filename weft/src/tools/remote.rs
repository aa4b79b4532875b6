//! Remote tool adapter: typed HTTP requests to a tool cluster.
//!
//! Wire protocol (kept bit-exact for compatibility):
//! `POST {base}/v1/tools/{tool_type}.{action}` with `Authorization: Bearer
//! <token>`; JSON body = tool params plus a `context` object carrying
//! `workspace_id` and `execution_id`. Response:
//! `{success, result?, error?: {code, message, details?}, timestamp}`.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::ExecutionContext;
use crate::error::CoreError;
use crate::ports::ToolResult;

const NETWORK_RETRIES: usize = 2;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Deserialize)]
struct WireError {
    code: String,
    message: String,
    #[serde(default)]
    #[allow(dead_code)]
    details: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    success: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<WireError>,
    #[serde(default)]
    #[allow(dead_code)]
    timestamp: Option<String>,
}

/// HTTP client for a remote tool cluster.
pub struct RemoteToolClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl RemoteToolClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// The exact on-wire URL for a tool action.
    pub fn url_for(&self, tool_type: &str, action: &str) -> String {
        format!("{}/v1/tools/{}.{}", self.base_url, tool_type, action)
    }

    /// Posts one invocation. Network-level failures are retried with bounded
    /// backoff; application-level errors (`success=false`) are returned as-is
    /// and never retried.
    pub async fn invoke(
        &self,
        tool_type: &str,
        action: &str,
        args: &Value,
        ctx: &ExecutionContext,
        execution_id: Option<&str>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ToolResult, CoreError> {
        let url = self.url_for(tool_type, action);
        let mut body = match args {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("input".to_string(), other.clone());
                map
            }
        };
        body.insert(
            "context".to_string(),
            json!({
                "workspace_id": ctx.workspace_id(),
                "execution_id": execution_id,
            }),
        );
        let body = Value::Object(body);

        let mut attempt = 0;
        loop {
            debug!(url = %url, attempt, "remote tool invoke");
            let send = self
                .http
                .post(&url)
                .bearer_auth(&self.token)
                .json(&body)
                .timeout(timeout)
                .send();
            let outcome = tokio::select! {
                r = send => r,
                _ = cancel.cancelled() => return Err(CoreError::Cancelled),
            };

            match outcome {
                Ok(response) if response.status().is_success() => {
                    let wire: WireResponse =
                        response
                            .json()
                            .await
                            .map_err(|e| CoreError::ToolCallMalformed {
                                message: format!("remote tool response does not parse: {e}"),
                            })?;
                    return Ok(match (wire.success, wire.result, wire.error) {
                        (true, Some(result), _) => ToolResult::ok(result),
                        (true, None, _) => {
                            ToolResult::failed("invalid_response", "success without result")
                        }
                        (false, _, Some(err)) => ToolResult::failed(err.code, err.message),
                        (false, _, None) => {
                            ToolResult::failed("invalid_response", "failure without error")
                        }
                    });
                }
                Ok(response) => {
                    // Non-2xx counts as network-level: the cluster never
                    // produced an application answer.
                    warn!(url = %url, status = %response.status(), "remote tool http error");
                }
                Err(e) if e.is_timeout() => {
                    return Err(CoreError::StepTimeout {
                        step_id: format!("{tool_type}.{action}"),
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "remote tool network error");
                }
            }

            if attempt >= NETWORK_RETRIES {
                return Err(CoreError::ProviderUnavailable {
                    provider: tool_type.to_string(),
                    message: format!("remote tool unreachable after {} attempts", attempt + 1),
                });
            }
            let delay = RETRY_BASE_DELAY * 2u32.pow(attempt as u32);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(CoreError::Cancelled),
            }
            attempt += 1;
        }
    }
}
