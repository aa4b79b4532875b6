//! Execution decision pipeline.
//!
//! Classifies each utterance in three STANDARD-profile layers: interaction
//! type (Q&A / execute / manage), task domain (narrows candidates by tag), and
//! playbook selection (ranks candidates by semantic match, historical success
//! rate, and tool availability). Anything ambiguous degrades to Q&A — the
//! engine never starts a playbook on a low-confidence read.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::ExecutionContext;
use crate::domain::{DangerLevel, IntentCard, SessionStatus};
use crate::error::CoreError;
use crate::llm::extract_json;
use crate::playbook::PlaybookLoader;
use crate::ports::{ChatMessage, LlmClient};
use crate::router::{CapabilityProfile, CapabilityRouter};
use crate::store::StoreSet;

use crate::domain::{IrFieldType, IrSchema};

/// What the engine should do with an utterance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    Qa,
    ManageSettings { target: String },
    StartPlaybook {
        playbook_code: String,
        variant_id: Option<String>,
        inputs: Value,
    },
}

#[derive(Clone, Debug)]
pub struct DecisionConfig {
    /// Candidates offered to the selection layer.
    pub max_candidates: usize,
    /// Combined score below which the pipeline degrades to Q&A.
    pub min_score: f32,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            max_candidates: 5,
            min_score: 0.35,
        }
    }
}

#[derive(Deserialize)]
struct InteractionOutput {
    interaction: String,
    #[serde(default)]
    target: Option<String>,
}

#[derive(Deserialize)]
struct DomainOutput {
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Deserialize)]
struct RankEntry {
    code: String,
    score: f32,
    #[serde(default)]
    inputs: Option<Value>,
}

#[derive(Deserialize)]
struct RankOutput {
    ranking: Vec<RankEntry>,
}

const INTERACTION_PROMPT: &str = r#"Classify the user's utterance. Output JSON only:
{"interaction": "qa" | "execute" | "manage", "target": "<settings area when manage, else null>"}
"qa" answers a question; "execute" asks for work a workflow could run; "manage" changes configuration (tool connections, settings)."#;

const DOMAIN_PROMPT: &str = r#"Which task domains does this request touch? Pick only from the given tags. Output JSON only: {"tags": ["..."]}"#;

const SELECTION_PROMPT: &str = r#"Rank the candidate playbooks for this request by semantic fit. Output JSON only:
{"ranking": [{"code": "...", "score": <0..1>, "inputs": {<inputs extracted from the utterance, when obvious>}}]}
Omit playbooks that clearly do not fit."#;

struct Candidate {
    code: String,
    tags: Vec<String>,
    tools_available: bool,
    max_danger: DangerLevel,
}

/// The three-layer classifier.
pub struct DecisionPipeline {
    llm: Arc<dyn LlmClient>,
    router: Arc<CapabilityRouter>,
    loader: Arc<PlaybookLoader>,
    stores: StoreSet,
    config: DecisionConfig,
}

impl DecisionPipeline {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        router: Arc<CapabilityRouter>,
        loader: Arc<PlaybookLoader>,
        stores: StoreSet,
        config: DecisionConfig,
    ) -> Self {
        Self {
            llm,
            router,
            loader,
            stores,
            config,
        }
    }

    /// Classifies one utterance. Never fails: classification errors degrade to
    /// Q&A.
    pub async fn decide(
        &self,
        ctx: &ExecutionContext,
        utterance: &str,
        visible_cards: &[IntentCard],
    ) -> Decision {
        match self.try_decide(ctx, utterance, visible_cards).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, "decision pipeline failed; degrading to qa");
                Decision::Qa
            }
        }
    }

    async fn try_decide(
        &self,
        ctx: &ExecutionContext,
        utterance: &str,
        visible_cards: &[IntentCard],
    ) -> Result<Decision, CoreError> {
        // Layer 1: interaction type.
        let interaction: InteractionOutput = self
            .typed_call(
                INTERACTION_PROMPT,
                &json!({ "utterance": utterance }).to_string(),
                "interaction",
                IrFieldType::String,
            )
            .await?;
        match interaction.interaction.as_str() {
            "qa" => return Ok(Decision::Qa),
            "manage" => {
                return Ok(Decision::ManageSettings {
                    target: interaction.target.unwrap_or_else(|| "settings".to_string()),
                })
            }
            "execute" => {}
            other => {
                debug!(interaction = other, "unknown interaction type; qa");
                return Ok(Decision::Qa);
            }
        }

        let candidates = self.gather_candidates(ctx).await?;
        if candidates.is_empty() {
            return Ok(Decision::Qa);
        }

        // Layer 2: task domain narrows by tag.
        let all_tags: Vec<&str> = candidates
            .iter()
            .flat_map(|c| c.tags.iter().map(String::as_str))
            .collect();
        let narrowed: Vec<&Candidate> = if all_tags.is_empty() {
            candidates.iter().collect()
        } else {
            let domain: DomainOutput = self
                .typed_call(
                    DOMAIN_PROMPT,
                    &json!({ "utterance": utterance, "tags": all_tags }).to_string(),
                    "tags",
                    IrFieldType::Array,
                )
                .await?;
            let chosen: Vec<&Candidate> = candidates
                .iter()
                .filter(|c| {
                    c.tags.is_empty() || c.tags.iter().any(|t| domain.tags.contains(t))
                })
                .collect();
            if chosen.is_empty() {
                candidates.iter().collect()
            } else {
                chosen
            }
        };

        // Layer 3: ranked selection over at most max_candidates.
        let offered: Vec<&Candidate> = narrowed
            .into_iter()
            .take(self.config.max_candidates)
            .collect();
        let offer_json: Vec<Value> = offered
            .iter()
            .map(|c| json!({ "code": c.code, "tags": c.tags }))
            .collect();
        let ranking: RankOutput = self
            .typed_call(
                SELECTION_PROMPT,
                &json!({
                    "utterance": utterance,
                    "candidates": offer_json,
                    "active_intents": visible_cards.iter().map(|c| &c.title).collect::<Vec<_>>(),
                })
                .to_string(),
                "ranking",
                IrFieldType::Array,
            )
            .await?;

        let workspace = self.stores.workspaces.get(ctx.workspace_id()).await?;
        let pins: Vec<String> = workspace
            .as_ref()
            .map(|w| w.effective_pins().to_vec())
            .unwrap_or_default();
        let recent = self.recently_used(ctx).await?;

        let mut scored: Vec<(f32, usize, &Candidate, Option<Value>)> = Vec::new();
        for entry in ranking.ranking {
            let Some(candidate) = offered.iter().find(|c| c.code == entry.code).copied() else {
                continue;
            };
            let success = self.success_rate(ctx, &candidate.code).await?;
            let availability = if candidate.tools_available { 1.0 } else { 0.0 };
            let combined =
                entry.score.clamp(0.0, 1.0) * 0.6 + success * 0.25 + availability * 0.15;
            // Tie-break key: pinned > recently used > lower danger.
            let tie = (pins.contains(&candidate.code) as usize) * 4
                + (recent.contains(&candidate.code) as usize) * 2
                + (candidate.max_danger == DangerLevel::Low) as usize;
            scored.push((combined, tie, candidate, entry.inputs));
        }
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.1.cmp(&a.1))
        });

        match scored.into_iter().next() {
            Some((score, _, candidate, inputs)) if score >= self.config.min_score => {
                Ok(Decision::StartPlaybook {
                    playbook_code: candidate.code.clone(),
                    variant_id: None,
                    inputs: inputs.unwrap_or(json!({})),
                })
            }
            _ => Ok(Decision::Qa),
        }
    }

    async fn gather_candidates(&self, ctx: &ExecutionContext) -> Result<Vec<Candidate>, CoreError> {
        let connections = self.stores.connections.list(ctx.workspace_id()).await?;
        let mut out = Vec::new();
        for fm in self.loader.library().all_frontmatter() {
            let tools_available = fm
                .required_tools
                .iter()
                .all(|t| connections.iter().any(|c| &c.tool_type == t));
            let max_danger = fm
                .required_tools
                .iter()
                .filter_map(|t| connections.iter().find(|c| &c.tool_type == t))
                .map(|c| c.danger_level)
                .max()
                .unwrap_or(DangerLevel::Low);
            if out.iter().any(|c: &Candidate| c.code == fm.code) {
                continue;
            }
            out.push(Candidate {
                code: fm.code.clone(),
                tags: fm.tags.clone(),
                tools_available,
                max_danger,
            });
        }
        Ok(out)
    }

    /// Completed / total runs for a playbook; 0.5 with no history.
    async fn success_rate(&self, ctx: &ExecutionContext, code: &str) -> Result<f32, CoreError> {
        let sessions = self.stores.executions.list_sessions(ctx.workspace_id()).await?;
        let runs: Vec<_> = sessions
            .iter()
            .filter(|s| s.playbook_code == code && s.status.is_terminal())
            .collect();
        if runs.is_empty() {
            return Ok(0.5);
        }
        let completed = runs
            .iter()
            .filter(|s| s.status == SessionStatus::Completed)
            .count();
        Ok(completed as f32 / runs.len() as f32)
    }

    async fn recently_used(&self, ctx: &ExecutionContext) -> Result<Vec<String>, CoreError> {
        let mut sessions = self.stores.executions.list_sessions(ctx.workspace_id()).await?;
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(sessions
            .into_iter()
            .take(5)
            .map(|s| s.playbook_code)
            .collect())
    }

    async fn typed_call<T: serde::de::DeserializeOwned>(
        &self,
        system: &str,
        user: &str,
        required_field: &str,
        field_type: IrFieldType,
    ) -> Result<T, CoreError> {
        let handle = self.router.resolve(CapabilityProfile::Standard)?;
        let mut required = BTreeMap::new();
        required.insert(required_field.to_string(), field_type);
        let schema = IrSchema { required };
        let messages = [ChatMessage::system(system), ChatMessage::user(user)];
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
            None => extract_json(&response.content, "decision")?,
        };
        serde_json::from_value(value).map_err(|e| CoreError::SchemaViolation {
            location: "decision".to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TenancyMode;
    use crate::llm::{MockLlm, MockResponse};
    use crate::playbook::{parse_playbook, PlaybookLibrary};
    use crate::router::{ProviderKind, RouterConfig};

    fn library() -> PlaybookLibrary {
        let mut library = PlaybookLibrary::new();
        let text = r#"---
code: content_drafting
version: "1.0"
kind: workflow
scope: system
required_tools: []
required_capabilities: [standard]
tags: [content]
---
Draft the weekly content plan.

```json
{"steps": [{"id": "draft", "kind": "llm_call", "prompt": "p", "output_schema": {"required": {"plan": "string"}}}]}
```
"#;
        library.register(parse_playbook(text).unwrap());
        library
    }

    fn pipeline(llm: MockLlm) -> DecisionPipeline {
        DecisionPipeline::new(
            Arc::new(llm),
            Arc::new(CapabilityRouter::new(
                RouterConfig::local_default(),
                [ProviderKind::Mock],
            )),
            Arc::new(PlaybookLoader::new(library())),
            StoreSet::in_memory(),
            DecisionConfig::default(),
        )
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("u-1", "ws-1", TenancyMode::Local)
    }

    /// **Scenario**: a question routes to Q&A; no playbook starts.
    #[tokio::test]
    async fn question_is_qa() {
        let llm = MockLlm::new().on_contains(
            "what is mindscape?",
            MockResponse::json(json!({"interaction": "qa"})),
        );
        let pipeline = pipeline(llm);
        let decision = pipeline.decide(&ctx(), "what is mindscape?", &[]).await;
        assert_eq!(decision, Decision::Qa);
    }

    #[tokio::test]
    async fn execute_request_selects_playbook() {
        let llm = MockLlm::new()
            .on_contains(
                "Classify the user's utterance",
                MockResponse::json(json!({"interaction": "execute"})),
            )
            .on_contains(
                "task domains",
                MockResponse::json(json!({"tags": ["content"]})),
            )
            .on_contains(
                "Rank the candidate playbooks",
                MockResponse::json(json!({
                    "ranking": [{"code": "content_drafting", "score": 0.9,
                                 "inputs": {"week": "this"}}]
                })),
            );
        let pipeline = pipeline(llm);
        let decision = pipeline
            .decide(&ctx(), "please draft this week's content plan", &[])
            .await;
        match decision {
            Decision::StartPlaybook { playbook_code, inputs, .. } => {
                assert_eq!(playbook_code, "content_drafting");
                assert_eq!(inputs["week"], "this");
            }
            other => panic!("expected StartPlaybook, got {other:?}"),
        }
    }

    /// **Scenario**: no candidate at or above the minimum score degrades to Q&A.
    #[tokio::test]
    async fn weak_match_degrades_to_qa() {
        let llm = MockLlm::new()
            .on_contains(
                "Classify the user's utterance",
                MockResponse::json(json!({"interaction": "execute"})),
            )
            .on_contains(
                "task domains",
                MockResponse::json(json!({"tags": ["content"]})),
            )
            .on_contains(
                "Rank the candidate playbooks",
                MockResponse::json(json!({
                    "ranking": [{"code": "content_drafting", "score": 0.05}]
                })),
            );
        let pipeline = pipeline(llm);
        let decision = pipeline.decide(&ctx(), "do something vague", &[]).await;
        assert_eq!(decision, Decision::Qa);
    }

    #[tokio::test]
    async fn manage_request_routes_to_settings() {
        let llm = MockLlm::new().otherwise(MockResponse::json(
            json!({"interaction": "manage", "target": "tool_connection"}),
        ));
        let pipeline = pipeline(llm);
        let decision = pipeline
            .decide(&ctx(), "connect my wordpress site", &[])
            .await;
        assert_eq!(
            decision,
            Decision::ManageSettings {
                target: "tool_connection".to_string()
            }
        );
    }

    #[tokio::test]
    async fn classifier_failure_degrades_to_qa() {
        let pipeline = pipeline(MockLlm::new());
        let decision = pipeline.decide(&ctx(), "anything", &[]).await;
        assert_eq!(decision, Decision::Qa);
    }
}
