//! Workspace chat entry point.
//!
//! One user turn flows through here: record the message, extract signals,
//! then run the two consumer pipelines side by side — the decision pipeline
//! (may start a playbook) and the intent steward (updates the intent surface).
//! All side effects land on the event log and flow back out as timeline
//! events.

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use timeline_event::WireEvent;

use crate::context::ExecutionContext;
use crate::decision::{Decision, DecisionPipeline};
use crate::domain::Workspace;
use crate::error::CoreError;
use crate::events::append_best_effort;
use crate::intent::{ExtractSource, IntentClusterer, IntentExtractor, IntentSteward};
use crate::ports::{
    ChatMessage, EventFilter, EventLogPort, LlmClient, NewEvent, PlaybookExecutorPort,
};
use crate::router::{CapabilityProfile, CapabilityRouter};
use crate::runtime::ExecutorService;
use crate::store::StoreSet;

/// What a turn produced.
#[derive(Clone, Debug)]
pub struct EngineReply {
    pub decision: Decision,
    /// Assistant text for Q&A and settings turns.
    pub reply: Option<String>,
    /// Session started by an execute turn.
    pub execution_id: Option<String>,
}

/// The assembled core. Built once by the composition root; every collaborator
/// is passed in explicitly.
pub struct Engine {
    stores: StoreSet,
    log: Arc<dyn EventLogPort>,
    llm: Arc<dyn LlmClient>,
    router: Arc<CapabilityRouter>,
    extractor: IntentExtractor,
    steward: IntentSteward,
    decision: DecisionPipeline,
    executor: ExecutorService,
    clusterer: IntentClusterer,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stores: StoreSet,
        log: Arc<dyn EventLogPort>,
        llm: Arc<dyn LlmClient>,
        router: Arc<CapabilityRouter>,
        extractor: IntentExtractor,
        steward: IntentSteward,
        decision: DecisionPipeline,
        executor: ExecutorService,
        clusterer: IntentClusterer,
    ) -> Self {
        Self {
            stores,
            log,
            llm,
            router,
            extractor,
            steward,
            decision,
            executor,
            clusterer,
        }
    }

    pub fn stores(&self) -> &StoreSet {
        &self.stores
    }

    pub fn events(&self) -> &Arc<dyn EventLogPort> {
        &self.log
    }

    pub fn executor(&self) -> &ExecutorService {
        &self.executor
    }

    pub fn clusterer(&self) -> &IntentClusterer {
        &self.clusterer
    }

    /// Creates the workspace if it does not exist yet.
    pub async fn ensure_workspace(&self, workspace_id: &str, title: &str) -> Result<(), CoreError> {
        if self.stores.workspaces.get(workspace_id).await?.is_none() {
            let mut ws = Workspace::new(workspace_id, title, "local");
            ws.launch_status = crate::domain::LaunchStatus::Active;
            self.stores.workspaces.create(&ws).await?;
        }
        Ok(())
    }

    /// Handles one user message.
    pub async fn handle_message(
        &self,
        ctx: &ExecutionContext,
        text: &str,
    ) -> Result<EngineReply, CoreError> {
        append_best_effort(
            &self.log,
            NewEvent::workspace(
                ctx.workspace_id(),
                &WireEvent::ChatMessage {
                    role: "user".to_string(),
                    text: text.to_string(),
                },
            ),
        )
        .await;

        let signals = self
            .extractor
            .extract(ctx, ExtractSource::Message, text)
            .await;
        for signal in &signals {
            self.stores.signals.insert(signal).await?;
        }

        let cards = self.stores.cards.list(ctx.workspace_id()).await?;
        let history = self.recent_history(ctx).await?;

        // Two parallel consumers of the turn: execution decision and intent
        // governance.
        let (decision, steward_result) = tokio::join!(
            self.decision.decide(ctx, text, &cards),
            self.steward.govern_and_apply(ctx, &history, &signals),
        );
        if let Err(e) = steward_result {
            // Governance failure never blocks the turn; it is already on the log.
            tracing::warn!(error = %e, "intent governance failed this turn");
        }

        append_best_effort(
            &self.log,
            NewEvent::workspace(
                ctx.workspace_id(),
                &WireEvent::DecisionMade {
                    decision: serde_json::to_value(&decision).unwrap_or(json!(null)),
                },
            ),
        )
        .await;

        match &decision {
            Decision::Qa => {
                let reply = self.qa_reply(ctx, text).await?;
                Ok(EngineReply {
                    decision,
                    reply: Some(reply),
                    execution_id: None,
                })
            }
            Decision::ManageSettings { target } => {
                let reply = format!("Opening {target} settings; apply the change there.");
                append_best_effort(
                    &self.log,
                    NewEvent::workspace(
                        ctx.workspace_id(),
                        &WireEvent::ChatCompleted {
                            text: reply.clone(),
                        },
                    ),
                )
                .await;
                Ok(EngineReply {
                    decision,
                    reply: Some(reply),
                    execution_id: None,
                })
            }
            Decision::StartPlaybook {
                playbook_code,
                variant_id,
                inputs,
            } => {
                let execution_id = self
                    .executor
                    .start(ctx, playbook_code, variant_id.as_deref(), inputs.clone())
                    .await?;
                info!(execution_id = %execution_id, playbook = %playbook_code, "playbook started");
                Ok(EngineReply {
                    decision,
                    reply: None,
                    execution_id: Some(execution_id),
                })
            }
        }
    }

    async fn qa_reply(&self, ctx: &ExecutionContext, text: &str) -> Result<String, CoreError> {
        let handle = self.router.resolve(CapabilityProfile::Standard)?;
        let messages = [
            ChatMessage::system(
                "You are the workspace assistant. Answer briefly from what you know.",
            ),
            ChatMessage::user(text),
        ];
        let response = self
            .llm
            .chat(&handle, &messages, None, None, &CancellationToken::new())
            .await?;
        append_best_effort(
            &self.log,
            NewEvent::workspace(
                ctx.workspace_id(),
                &WireEvent::ChatCompleted {
                    text: response.content.clone(),
                },
            ),
        )
        .await;
        Ok(response.content)
    }

    /// Last few chat messages, oldest first, for steward context.
    async fn recent_history(&self, ctx: &ExecutionContext) -> Result<Vec<String>, CoreError> {
        let events = self
            .log
            .range(
                ctx.workspace_id(),
                EventFilter {
                    kind: Some("chat_message".to_string()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(events
            .iter()
            .rev()
            .take(10)
            .rev()
            .filter_map(|e| e.payload.get("text").and_then(|t| t.as_str()))
            .map(str::to_string)
            .collect())
    }
}
