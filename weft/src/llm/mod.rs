//! LLM port implementations and the provider mux.
//!
//! The capability router yields a [`ModelHandle`](crate::router::ModelHandle)
//! naming a provider; [`ProviderMux`] dispatches the call to the configured
//! client for that provider. Clients: [`MockLlm`] (scriptable, offline) and
//! [`OpenAiCompatClient`] (Chat Completions; also serves Anthropic through its
//! OpenAI-compatible surface with a different base URL).

mod mock;
mod openai;

pub use mock::{MockLlm, MockResponse};
pub use openai::OpenAiCompatClient;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::domain::IrSchema;
use crate::error::CoreError;
use crate::ports::{ChatMessage, LlmClient, ToolDecl, TypedResponse};
use crate::router::{ModelHandle, ProviderKind};

/// Extracts a JSON object from model output, tolerating ```json fences and
/// surrounding prose. Returns `schema_violation` when nothing parses.
pub fn extract_json(content: &str, location: &str) -> Result<Value, CoreError> {
    let trimmed = content.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Ok(v);
    }
    // Fenced block first, then the outermost brace span.
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start..];
        let inner = after
            .trim_start_matches("```json")
            .trim_start_matches("```");
        if let Some(end) = inner.find("```") {
            if let Ok(v) = serde_json::from_str::<Value>(inner[..end].trim()) {
                return Ok(v);
            }
        }
    }
    if let (Some(open), Some(close)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if open < close {
            if let Ok(v) = serde_json::from_str::<Value>(&trimmed[open..=close]) {
                return Ok(v);
            }
        }
    }
    Err(CoreError::SchemaViolation {
        location: location.to_string(),
        message: "model output is not valid JSON".to_string(),
    })
}

/// Routes chat calls to the configured client for the handle's provider.
///
/// Built once by the composition root; unconfigured providers are simply
/// absent, and the router never hands out handles for them.
#[derive(Default, Clone)]
pub struct ProviderMux {
    openai: Option<Arc<dyn LlmClient>>,
    anthropic: Option<Arc<dyn LlmClient>>,
    mock: Option<Arc<dyn LlmClient>>,
}

impl ProviderMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_openai(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.openai = Some(client);
        self
    }

    pub fn with_anthropic(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.anthropic = Some(client);
        self
    }

    pub fn with_mock(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.mock = Some(client);
        self
    }

    /// Providers that have a client, for seeding the router.
    pub fn configured(&self) -> Vec<ProviderKind> {
        let mut out = Vec::new();
        if self.mock.is_some() {
            out.push(ProviderKind::Mock);
        }
        if self.openai.is_some() {
            out.push(ProviderKind::OpenAi);
        }
        if self.anthropic.is_some() {
            out.push(ProviderKind::Anthropic);
        }
        out
    }
}

#[async_trait]
impl LlmClient for ProviderMux {
    async fn chat(
        &self,
        handle: &ModelHandle,
        messages: &[ChatMessage],
        schema: Option<&IrSchema>,
        tools: Option<&[ToolDecl]>,
        cancel: &CancellationToken,
    ) -> Result<TypedResponse, CoreError> {
        let client = match handle.provider {
            ProviderKind::OpenAi => self.openai.as_ref(),
            ProviderKind::Anthropic => self.anthropic.as_ref(),
            ProviderKind::Mock => self.mock.as_ref(),
        }
        .ok_or_else(|| CoreError::ProviderUnavailable {
            provider: format!("{:?}", handle.provider),
            message: "provider not configured".to_string(),
        })?;
        client.chat(handle, messages, schema, tools, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_plain() {
        let v = extract_json(r#"{"a": 1}"#, "t").unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn extract_json_fenced() {
        let v = extract_json("Here you go:\n```json\n{\"a\": 1}\n```\n", "t").unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn extract_json_embedded_in_prose() {
        let v = extract_json("The plan is {\"a\": [1, 2]} as requested.", "t").unwrap();
        assert_eq!(v["a"][1], 2);
    }

    #[test]
    fn extract_json_garbage_is_schema_violation() {
        let err = extract_json("no json here", "t").unwrap_err();
        assert_eq!(err.code(), "schema_violation");
    }
}
