//! Intent extraction: one FAST-profile LLM call per input, typed JSON out.
//!
//! The extractor never raises into the caller: any LLM or parse failure
//! appends a `signal_extraction_failed` event and yields no signals. It also
//! never decides promotion; volume is allowed to be large and the steward
//! governs it later.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use timeline_event::WireEvent;

use crate::context::ExecutionContext;
use crate::domain::{IntentSignal, IrFieldType, IrSchema, SignalSource};
use crate::events::append_best_effort;
use crate::llm::extract_json;
use crate::ports::{ChatMessage, EventLogPort, LlmClient, NewEvent};
use crate::router::{CapabilityProfile, CapabilityRouter};

/// What produced the text being mined for intent.
#[derive(Clone, Copy, Debug)]
pub enum ExtractSource {
    Message,
    File,
    ToolOutput,
    PlaybookEvent,
}

impl ExtractSource {
    fn signal_source(self) -> SignalSource {
        match self {
            ExtractSource::Message => SignalSource::Message,
            ExtractSource::File => SignalSource::File,
            ExtractSource::ToolOutput => SignalSource::ToolOutput,
            ExtractSource::PlaybookEvent => SignalSource::PlaybookEvent,
        }
    }
}

#[derive(Deserialize)]
struct ExtractedSignal {
    text: String,
    confidence: f32,
    #[serde(default)]
    topic_hint: Option<String>,
}

#[derive(Deserialize)]
struct ExtractionOutput {
    signals: Vec<ExtractedSignal>,
}

const EXTRACTION_PROMPT: &str = r#"Mine the following input for user intents: things the user wants done, tracked, or decided. Output JSON only:
{"signals": [{"text": "<one intent, imperative phrasing>", "confidence": <0..1>, "topic_hint": "<optional short topic>"}]}
Report an empty list when the input carries no actionable intent. Do not invent intents."#;

/// LLM-driven signal extraction.
pub struct IntentExtractor {
    llm: Arc<dyn LlmClient>,
    router: Arc<CapabilityRouter>,
    log: Arc<dyn EventLogPort>,
}

impl IntentExtractor {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        router: Arc<CapabilityRouter>,
        log: Arc<dyn EventLogPort>,
    ) -> Self {
        Self { llm, router, log }
    }

    /// Extracts signals from one input. Empty input returns `[]` without an
    /// LLM call; failures return `[]` after logging.
    pub async fn extract(
        &self,
        ctx: &ExecutionContext,
        source: ExtractSource,
        text: &str,
    ) -> Vec<IntentSignal> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        match self.try_extract(ctx, source, text).await {
            Ok(signals) => signals,
            Err(e) => {
                append_best_effort(
                    &self.log,
                    NewEvent::workspace(
                        ctx.workspace_id(),
                        &WireEvent::SignalExtractionFailed {
                            message: e.to_string(),
                        },
                    ),
                )
                .await;
                Vec::new()
            }
        }
    }

    async fn try_extract(
        &self,
        ctx: &ExecutionContext,
        source: ExtractSource,
        text: &str,
    ) -> Result<Vec<IntentSignal>, crate::error::CoreError> {
        let handle = self.router.resolve(CapabilityProfile::Fast)?;
        let mut required = BTreeMap::new();
        required.insert("signals".to_string(), IrFieldType::Array);
        let schema = IrSchema { required };
        let messages = [
            ChatMessage::system(EXTRACTION_PROMPT),
            ChatMessage::user(text),
        ];
        let response = self
            .llm
            .chat(
                &handle,
                &messages,
                Some(&schema),
                None,
                &CancellationToken::new(),
            )
            .await?;
        let value = match response.json {
            Some(v) => v,
            None => extract_json(&response.content, "intent_extraction")?,
        };
        let parsed: ExtractionOutput =
            serde_json::from_value(value).map_err(|e| crate::error::CoreError::SchemaViolation {
                location: "intent_extraction".to_string(),
                message: e.to_string(),
            })?;

        let signals: Vec<IntentSignal> = parsed
            .signals
            .into_iter()
            .filter(|s| !s.text.trim().is_empty())
            .map(|s| {
                let mut signal = IntentSignal::new(
                    ctx.workspace_id(),
                    source.signal_source(),
                    s.text,
                    s.confidence,
                );
                signal.topic_hint = s.topic_hint;
                signal
            })
            .collect();
        debug!(count = signals.len(), "signals extracted");
        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TenancyMode;
    use crate::events::InMemoryEventLog;
    use crate::llm::{MockLlm, MockResponse};
    use crate::router::{ProviderKind, RouterConfig};
    use serde_json::json;

    fn extractor(llm: MockLlm) -> (IntentExtractor, Arc<InMemoryEventLog>) {
        let log = Arc::new(InMemoryEventLog::new());
        let router = Arc::new(CapabilityRouter::new(
            RouterConfig::local_default(),
            [ProviderKind::Mock],
        ));
        (
            IntentExtractor::new(Arc::new(llm), router, log.clone()),
            log,
        )
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("u-1", "ws-1", TenancyMode::Local)
    }

    /// **Scenario**: empty message yields no signals, no LLM call, no error.
    #[tokio::test]
    async fn empty_input_short_circuits() {
        let llm = MockLlm::new(); // would fail if called: no rules
        let (extractor, log) = extractor(llm);
        let signals = extractor.extract(&ctx(), ExtractSource::Message, "   ").await;
        assert!(signals.is_empty());
        let events = log.range("ws-1", Default::default()).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn signals_parsed_and_clamped() {
        let llm = MockLlm::new().otherwise(MockResponse::json(json!({
            "signals": [
                {"text": "draft the weekly plan", "confidence": 0.9},
                {"text": "", "confidence": 0.8},
                {"text": "review pricing", "confidence": 1.4, "topic_hint": "pricing"},
            ]
        })));
        let (extractor, _log) = extractor(llm);
        let signals = extractor
            .extract(&ctx(), ExtractSource::Message, "please draft the weekly plan")
            .await;
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].text, "draft the weekly plan");
        assert_eq!(signals[1].confidence, 1.0);
        assert_eq!(signals[1].topic_hint.as_deref(), Some("pricing"));
    }

    /// **Scenario**: LLM failure degrades to an empty list plus one
    /// signal_extraction_failed event; nothing raises into the caller.
    #[tokio::test]
    async fn failure_logs_and_returns_empty() {
        let llm = MockLlm::new(); // no scripted response -> provider error
        let (extractor, log) = extractor(llm);
        let signals = extractor
            .extract(&ctx(), ExtractSource::Message, "anything")
            .await;
        assert!(signals.is_empty());
        let events = log.range("ws-1", Default::default()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "signal_extraction_failed");
    }
}
