//! Scriptable mock LLM for tests and offline runs.
//!
//! Rules match on a substring of the request (any message's content); the
//! first matching rule answers. An optional per-call delay makes cancellation
//! and timeout paths testable.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::domain::IrSchema;
use crate::error::CoreError;
use crate::ports::{ChatMessage, LlmClient, LlmUsage, RawToolCall, ToolDecl, TypedResponse};
use crate::router::ModelHandle;

/// One scripted answer.
#[derive(Clone, Debug, Default)]
pub struct MockResponse {
    pub content: String,
    pub json: Option<Value>,
    pub tool_calls: Vec<RawToolCall>,
    /// Usage reported for the call; drives cost accrual in tests.
    pub usage: LlmUsage,
    /// Per-answer delay before responding.
    pub delay: Option<Duration>,
}

impl MockResponse {
    pub fn json(value: Value) -> Self {
        Self {
            content: value.to_string(),
            json: Some(value),
            tool_calls: Vec::new(),
            usage: LlmUsage {
                prompt_tokens: 100,
                completion_tokens: 50,
            },
            delay: None,
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            json: None,
            tool_calls: Vec::new(),
            usage: LlmUsage {
                prompt_tokens: 100,
                completion_tokens: 50,
            },
            delay: None,
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<RawToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }

    pub fn with_usage(mut self, prompt_tokens: u32, completion_tokens: u32) -> Self {
        self.usage = LlmUsage {
            prompt_tokens,
            completion_tokens,
        };
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

struct MockRule {
    contains: String,
    response: MockResponse,
}

/// Mock LLM: rule-matched scripted responses.
///
/// **Interaction**: registered on the [`ProviderMux`](super::ProviderMux) as
/// the `mock` provider; the default local router resolves every profile to it
/// when no real provider is configured.
#[derive(Default)]
pub struct MockLlm {
    rules: RwLock<Vec<MockRule>>,
    fallback: RwLock<Option<MockResponse>>,
    delay: RwLock<Option<Duration>>,
    calls: AtomicUsize,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers requests whose message text contains `needle`.
    pub fn on_contains(self, needle: impl Into<String>, response: MockResponse) -> Self {
        self.rules
            .write()
            .expect("mock rules lock")
            .push(MockRule {
                contains: needle.into(),
                response,
            });
        self
    }

    /// Answer for requests no rule matches.
    pub fn otherwise(self, response: MockResponse) -> Self {
        *self.fallback.write().expect("mock fallback lock") = Some(response);
        self
    }

    /// Delay before answering; lets tests exercise timeouts and cancellation.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.write().expect("mock delay lock") = Some(delay);
        self
    }

    /// Total chat calls served so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn pick(&self, messages: &[ChatMessage]) -> Option<MockResponse> {
        let rules = self.rules.read().expect("mock rules lock");
        for rule in rules.iter() {
            if messages.iter().any(|m| m.content.contains(&rule.contains)) {
                return Some(rule.response.clone());
            }
        }
        self.fallback.read().expect("mock fallback lock").clone()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn chat(
        &self,
        _handle: &ModelHandle,
        messages: &[ChatMessage],
        schema: Option<&IrSchema>,
        _tools: Option<&[ToolDecl]>,
        cancel: &CancellationToken,
    ) -> Result<TypedResponse, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let response = self.pick(messages).ok_or_else(|| {
            CoreError::ProviderUnavailable {
                provider: "mock".to_string(),
                message: "no scripted response matches the request".to_string(),
            }
        })?;

        let delay = response
            .delay
            .or(*self.delay.read().expect("mock delay lock"));
        if let Some(delay) = delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(CoreError::Cancelled),
            }
        } else if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        if let Some(schema) = schema {
            match &response.json {
                Some(json) => schema.validate(json, "mock_response")?,
                None => {
                    return Err(CoreError::SchemaViolation {
                        location: "mock_response".to_string(),
                        message: "scripted response has no JSON but a schema was required"
                            .to_string(),
                    })
                }
            }
        }

        Ok(TypedResponse {
            content: response.content,
            json: response.json,
            tool_calls: response.tool_calls,
            usage: response.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{CapabilityProfile, ProviderKind};
    use serde_json::json;

    fn handle() -> ModelHandle {
        ModelHandle {
            profile: CapabilityProfile::Fast,
            endpoint_name: "mock".into(),
            provider: ProviderKind::Mock,
            model: "mock".into(),
            cost_per_1k_tokens_usd: 0.0,
        }
    }

    #[tokio::test]
    async fn rule_matching_prefers_first_match() {
        let llm = MockLlm::new()
            .on_contains("alpha", MockResponse::text("first"))
            .on_contains("alpha beta", MockResponse::text("second"));
        let out = llm
            .chat(
                &handle(),
                &[ChatMessage::user("alpha beta")],
                None,
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out.content, "first");
    }

    #[tokio::test]
    async fn schema_checked_against_scripted_json() {
        let mut required = std::collections::BTreeMap::new();
        required.insert("plan".to_string(), crate::domain::IrFieldType::String);
        let schema = IrSchema { required };
        let llm = MockLlm::new().otherwise(MockResponse::json(json!({"other": 1})));
        let err = llm
            .chat(
                &handle(),
                &[ChatMessage::user("x")],
                Some(&schema),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "schema_violation");
    }

    #[tokio::test]
    async fn delayed_call_aborts_on_cancel() {
        let llm = MockLlm::new()
            .otherwise(MockResponse::text("late"))
            .with_delay(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = llm
            .chat(&handle(), &[ChatMessage::user("x")], None, None, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "cancelled");
    }
}
