//! Intent steward: governs signal-to-card promotion.
//!
//! Two stages. Stage A is a cheap pre-screen: minimum-confidence filter plus
//! an embedding cosine dedup against existing cards (inclusive threshold — a
//! signal exactly at the threshold merges). Stage B is a STANDARD-profile LLM
//! call producing a typed plan whose operations reference signals and cards by
//! id only. The plan is applied by a single transactional writer under the
//! per-workspace lock; concurrent stewards for one workspace never interleave.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use timeline_event::WireEvent;

use crate::context::ExecutionContext;
use crate::domain::{
    CardStatus, IntentCard, IntentCluster, IntentLayoutPlan, IntentSignal, IrFieldType, IrSchema,
    LayoutOp,
};
use crate::error::CoreError;
use crate::events::append_best_effort;
use crate::llm::extract_json;
use crate::ports::{
    ChatMessage, EmbeddingPort, EventLogPort, LlmClient, NewEvent, VectorStorePort,
};
use crate::router::{CapabilityProfile, CapabilityRouter};
use crate::store::StoreSet;

#[derive(Clone, Debug)]
pub struct StewardConfig {
    /// Cosine similarity at or above which a signal merges into a card.
    pub dedup_threshold: f32,
    /// Signals below this confidence are dismissed in stage A.
    pub min_confidence: f32,
    /// Candidate cards considered per signal.
    pub top_k: usize,
    /// Bounded ring size for retained signals.
    pub signal_ring: usize,
}

impl Default for StewardConfig {
    fn default() -> Self {
        Self {
            dedup_threshold: 0.85,
            min_confidence: 0.5,
            top_k: 5,
            signal_ring: 512,
        }
    }
}

enum Prescreen {
    Dismiss(String),
    MergeInto { signal_id: String, card_id: String },
    Fresh(IntentSignal),
}

const STAGE_B_PROMPT: &str = r#"You govern a workspace's intent surface. Given fresh signals and the visible cards, produce a layout plan. Output JSON only:
{"ops": [
  {"op": "create_card", "title": "...", "description": "...", "priority": "high|medium|low", "signal_ids": ["..."]},
  {"op": "update_card", "card_id": "...", "title": null, "description": null, "priority": null, "status": null, "signal_ids": ["..."]},
  {"op": "keep_signal_only", "signal_id": "..."},
  {"op": "dismiss_signal", "signal_id": "..."}
]}
Promote a signal to a card only when it reads as a durable goal. Reference signals and cards strictly by the ids given."#;

/// The steward service.
pub struct IntentSteward {
    llm: Arc<dyn LlmClient>,
    router: Arc<CapabilityRouter>,
    embeddings: Arc<dyn EmbeddingPort>,
    vectors: Arc<dyn VectorStorePort>,
    stores: StoreSet,
    log: Arc<dyn EventLogPort>,
    config: StewardConfig,
}

impl IntentSteward {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        router: Arc<CapabilityRouter>,
        embeddings: Arc<dyn EmbeddingPort>,
        vectors: Arc<dyn VectorStorePort>,
        stores: StoreSet,
        log: Arc<dyn EventLogPort>,
        config: StewardConfig,
    ) -> Self {
        Self {
            llm,
            router,
            embeddings,
            vectors,
            stores,
            log,
            config,
        }
    }

    /// The per-turn entry point: governs under the workspace lock and applies
    /// the plan with the same lock held.
    pub async fn govern_and_apply(
        &self,
        ctx: &ExecutionContext,
        recent_history: &[String],
        signals: &[IntentSignal],
    ) -> Result<IntentLayoutPlan, CoreError> {
        let _guard = self.stores.locks.lock(ctx.workspace_id()).await;
        let cards = self.stores.cards.list(ctx.workspace_id()).await?;
        let clusters = self.stores.clusters.list(ctx.workspace_id()).await?;
        let plan = self
            .govern(ctx, recent_history, signals, &cards, &clusters)
            .await;
        self.apply(ctx, &plan).await?;
        self.stores
            .signals
            .prune(ctx.workspace_id(), self.config.signal_ring)
            .await?;
        Ok(plan)
    }

    /// Produces the layout plan. Never fails: stage-B errors degrade to
    /// keep_signal_only for the signals that reached stage B.
    pub async fn govern(
        &self,
        ctx: &ExecutionContext,
        recent_history: &[String],
        signals: &[IntentSignal],
        visible_cards: &[IntentCard],
        cluster_features: &[IntentCluster],
    ) -> IntentLayoutPlan {
        let mut plan = IntentLayoutPlan::new(ctx.workspace_id());
        if signals.is_empty() {
            return plan;
        }

        let prescreened = match self.prescreen(ctx, signals, visible_cards).await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "steward pre-screen failed; keeping all signals");
                plan.ops = IntentLayoutPlan::keep_all(
                    ctx.workspace_id(),
                    &signals.iter().map(|s| s.id.clone()).collect::<Vec<_>>(),
                )
                .ops;
                return plan;
            }
        };

        let mut fresh = Vec::new();
        for outcome in prescreened {
            match outcome {
                Prescreen::Dismiss(signal_id) => {
                    plan.ops.push(LayoutOp::DismissSignal { signal_id })
                }
                Prescreen::MergeInto { signal_id, card_id } => {
                    plan.ops.push(LayoutOp::UpdateCard {
                        card_id,
                        title: None,
                        description: None,
                        priority: None,
                        status: None,
                        signal_ids: vec![signal_id],
                    })
                }
                Prescreen::Fresh(signal) => fresh.push(signal),
            }
        }

        if !fresh.is_empty() {
            match self
                .stage_b(ctx, recent_history, &fresh, visible_cards, cluster_features)
                .await
            {
                Ok(ops) => plan.ops.extend(ops),
                Err(e) => {
                    // No speculative card creation on failure.
                    warn!(error = %e, "steward stage B failed; degrading to keep_signal_only");
                    for signal in &fresh {
                        plan.ops.push(LayoutOp::KeepSignalOnly {
                            signal_id: signal.id.clone(),
                        });
                    }
                }
            }
        }
        plan
    }

    async fn prescreen(
        &self,
        ctx: &ExecutionContext,
        signals: &[IntentSignal],
        visible_cards: &[IntentCard],
    ) -> Result<Vec<Prescreen>, CoreError> {
        let texts: Vec<String> = signals.iter().map(|s| s.text.clone()).collect();
        let vectors = self.embeddings.embed(&texts).await?;
        let mut out = Vec::with_capacity(signals.len());
        for (signal, vector) in signals.iter().zip(vectors) {
            if signal.confidence < self.config.min_confidence {
                out.push(Prescreen::Dismiss(signal.id.clone()));
                continue;
            }
            let hits = self
                .vectors
                .search(ctx.workspace_id(), &vector, self.config.top_k)
                .await?;
            // Inclusive threshold: exactly at the line still merges. Among
            // candidates within tolerance, the most recently active card wins.
            let best_card = hits
                .iter()
                .filter(|h| h.score >= self.config.dedup_threshold)
                .filter_map(|h| visible_cards.iter().find(|c| c.id == h.key))
                .filter(|c| c.status == CardStatus::Active)
                .max_by_key(|c| c.updated_at);
            match best_card {
                Some(card) => out.push(Prescreen::MergeInto {
                    signal_id: signal.id.clone(),
                    card_id: card.id.clone(),
                }),
                None => out.push(Prescreen::Fresh(signal.clone())),
            }
        }
        Ok(out)
    }

    async fn stage_b(
        &self,
        _ctx: &ExecutionContext,
        recent_history: &[String],
        fresh: &[IntentSignal],
        visible_cards: &[IntentCard],
        cluster_features: &[IntentCluster],
    ) -> Result<Vec<LayoutOp>, CoreError> {
        let handle = self.router.resolve(CapabilityProfile::Standard)?;
        let mut required = BTreeMap::new();
        required.insert("ops".to_string(), IrFieldType::Array);
        let schema = IrSchema { required };

        let context = json!({
            "recent_history": recent_history,
            "signals": fresh.iter().map(|s| json!({
                "id": s.id, "text": s.text, "confidence": s.confidence,
                "topic_hint": s.topic_hint,
            })).collect::<Vec<_>>(),
            "cards": visible_cards.iter().map(|c| json!({
                "id": c.id, "title": c.title, "status": c.status,
                "priority": c.priority, "updated_at": c.updated_at,
            })).collect::<Vec<_>>(),
            "themes": cluster_features.iter().map(|cl| json!({
                "label": cl.label, "size": cl.member_card_ids.len(),
            })).collect::<Vec<_>>(),
        });
        let messages = [
            ChatMessage::system(STAGE_B_PROMPT),
            ChatMessage::user(context.to_string()),
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
            None => extract_json(&response.content, "steward_stage_b")?,
        };
        let ops: Vec<LayoutOp> = serde_json::from_value(value["ops"].clone()).map_err(|e| {
            CoreError::SchemaViolation {
                location: "steward_stage_b".to_string(),
                message: e.to_string(),
            }
        })?;

        // Operations may only reference ids we offered.
        let known_signals: Vec<&str> = fresh.iter().map(|s| s.id.as_str()).collect();
        let known_cards: Vec<&str> = visible_cards.iter().map(|c| c.id.as_str()).collect();
        let mut validated = Vec::with_capacity(ops.len());
        for op in ops {
            let ok = match &op {
                LayoutOp::CreateCard { signal_ids, .. } => signal_ids
                    .iter()
                    .all(|id| known_signals.contains(&id.as_str())),
                LayoutOp::UpdateCard {
                    card_id,
                    signal_ids,
                    ..
                } => {
                    known_cards.contains(&card_id.as_str())
                        && signal_ids
                            .iter()
                            .all(|id| known_signals.contains(&id.as_str()))
                }
                LayoutOp::KeepSignalOnly { signal_id }
                | LayoutOp::DismissSignal { signal_id } => {
                    known_signals.contains(&signal_id.as_str())
                }
            };
            if ok {
                validated.push(op);
            } else {
                warn!("steward op references unknown ids; dropped");
            }
        }
        Ok(validated)
    }

    /// Applies a plan against the card store. Caller holds the workspace lock.
    async fn apply(&self, ctx: &ExecutionContext, plan: &IntentLayoutPlan) -> Result<(), CoreError> {
        let ws = ctx.workspace_id();
        let mut consumed_signals: Vec<String> = Vec::new();
        for op in &plan.ops {
            match op {
                LayoutOp::CreateCard {
                    title,
                    description,
                    priority,
                    signal_ids,
                } => {
                    let card = IntentCard::new(ws, title.clone(), description.clone(), *priority);
                    self.stores.cards.insert(&card).await?;
                    self.index_card(&card).await?;
                    consumed_signals.extend(signal_ids.iter().cloned());
                    append_best_effort(
                        &self.log,
                        NewEvent::workspace(
                            ws,
                            &WireEvent::IntentCardCreated {
                                card_id: card.id.clone(),
                                title: card.title.clone(),
                            },
                        ),
                    )
                    .await;
                }
                LayoutOp::UpdateCard {
                    card_id,
                    title,
                    description,
                    priority,
                    status,
                    signal_ids,
                } => {
                    let Some(mut card) = self.stores.cards.get(ws, card_id).await? else {
                        warn!(card_id, "update_card target missing; dropped");
                        continue;
                    };
                    if let Some(t) = title {
                        card.title = t.clone();
                    }
                    if let Some(d) = description {
                        card.description = d.clone();
                    }
                    if let Some(p) = priority {
                        card.priority = *p;
                    }
                    if let Some(s) = status {
                        card.status = *s;
                    }
                    card.updated_at = chrono::Utc::now();
                    let card = match self.stores.cards.update(&card).await {
                        Ok(c) => c,
                        Err(crate::error::StoreError::Conflict { .. }) => {
                            // Retry once with the fresh row; the lock keeps
                            // other stewards out, so this only races user edits.
                            let Some(mut fresh) = self.stores.cards.get(ws, card_id).await? else {
                                continue;
                            };
                            fresh.updated_at = chrono::Utc::now();
                            self.stores.cards.update(&fresh).await?
                        }
                        Err(e) => return Err(e.into()),
                    };
                    self.index_card(&card).await?;
                    consumed_signals.extend(signal_ids.iter().cloned());
                    append_best_effort(
                        &self.log,
                        NewEvent::workspace(
                            ws,
                            &WireEvent::IntentCardUpdated {
                                card_id: card.id.clone(),
                            },
                        ),
                    )
                    .await;
                }
                LayoutOp::KeepSignalOnly { signal_id } => {
                    append_best_effort(
                        &self.log,
                        NewEvent::workspace(
                            ws,
                            &WireEvent::IntentSignalKept {
                                signal_id: signal_id.clone(),
                            },
                        ),
                    )
                    .await;
                }
                LayoutOp::DismissSignal { signal_id } => {
                    consumed_signals.push(signal_id.clone());
                }
            }
        }
        if !consumed_signals.is_empty() {
            self.stores.signals.delete(ws, &consumed_signals).await?;
        }
        debug!(ops = plan.ops.len(), "layout plan applied");
        Ok(())
    }

    /// Keeps the card's embedding current for the stage-A dedup search.
    async fn index_card(&self, card: &IntentCard) -> Result<(), CoreError> {
        let text = format!("{}\n{}", card.title, card.description);
        let vectors = self.embeddings.embed(&[text]).await?;
        if let Some(v) = vectors.first() {
            self.vectors
                .upsert(
                    &card.workspace_id,
                    &card.id,
                    v,
                    json!({"title": card.title}),
                )
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TenancyMode;
    use crate::domain::{CardPriority, SignalSource};
    use crate::embedding::HashEmbedder;
    use crate::events::InMemoryEventLog;
    use crate::llm::{MockLlm, MockResponse};
    use crate::router::{ProviderKind, RouterConfig};
    use crate::vector::InMemoryVectorStore;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("u-1", "ws-1", TenancyMode::Local)
    }

    fn steward(llm: MockLlm) -> (IntentSteward, StoreSet, Arc<InMemoryEventLog>) {
        let stores = StoreSet::in_memory();
        let log = Arc::new(InMemoryEventLog::new());
        let router = Arc::new(CapabilityRouter::new(
            RouterConfig::local_default(),
            [ProviderKind::Mock],
        ));
        let s = IntentSteward::new(
            Arc::new(llm),
            router,
            Arc::new(HashEmbedder::new(64)),
            Arc::new(InMemoryVectorStore::new()),
            stores.clone(),
            log.clone(),
            StewardConfig::default(),
        );
        (s, stores, log)
    }

    fn signal(text: &str, confidence: f32) -> IntentSignal {
        IntentSignal::new("ws-1", SignalSource::Message, text, confidence)
    }

    #[tokio::test]
    async fn low_confidence_signals_are_dismissed() {
        let (steward, _stores, _log) = steward(MockLlm::new());
        let signals = vec![signal("maybe do something", 0.2)];
        let plan = steward.govern(&ctx(), &[], &signals, &[], &[]).await;
        assert_eq!(plan.ops.len(), 1);
        assert!(matches!(plan.ops[0], LayoutOp::DismissSignal { .. }));
    }

    /// **Scenario**: stage-B failure degrades to keep_signal_only; no card is
    /// speculatively created.
    #[tokio::test]
    async fn stage_b_failure_keeps_signals() {
        // MockLlm with no rules: stage B errors.
        let (steward, stores, _log) = steward(MockLlm::new());
        let signals = vec![signal("launch the newsletter", 0.9)];
        let plan = steward
            .govern_and_apply(&ctx(), &[], &signals)
            .await
            .unwrap();
        assert!(plan
            .ops
            .iter()
            .all(|op| matches!(op, LayoutOp::KeepSignalOnly { .. })));
        assert!(stores.cards.list("ws-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stage_b_plan_creates_cards() {
        let signals = vec![signal("launch the newsletter", 0.9)];
        let sid = signals[0].id.clone();
        let llm = MockLlm::new().otherwise(MockResponse::json(json!({
            "ops": [{
                "op": "create_card",
                "title": "Launch newsletter",
                "description": "Get the first issue out",
                "priority": "high",
                "signal_ids": [sid],
            }]
        })));
        let (steward, stores, log) = steward(llm);
        steward
            .govern_and_apply(&ctx(), &[], &signals)
            .await
            .unwrap();
        let cards = stores.cards.list("ws-1").await.unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].title, "Launch newsletter");
        assert_eq!(cards[0].priority, CardPriority::High);
        let events = log.range("ws-1", Default::default()).await.unwrap();
        assert!(events.iter().any(|e| e.kind == "intent_card_created"));
    }

    /// **Scenario**: a signal at or above the dedup threshold merges into the
    /// most recently active matching card instead of creating a new one.
    #[tokio::test]
    async fn duplicate_signal_merges_into_recent_card() {
        let (steward, stores, _log) = steward(MockLlm::new());
        // Seed a card whose embedding matches the incoming signal exactly.
        let card = IntentCard::new(
            "ws-1",
            "draft weekly content plan",
            "draft weekly content plan",
            CardPriority::Medium,
        );
        stores.cards.insert(&card).await.unwrap();
        steward.index_card(&card).await.unwrap();

        let signals = vec![signal("draft weekly content plan", 0.9)];
        let plan = steward
            .govern_and_apply(&ctx(), &[], &signals)
            .await
            .unwrap();
        assert!(plan.ops.iter().any(|op| matches!(
            op,
            LayoutOp::UpdateCard { card_id, .. } if card_id == &card.id
        )));
        // Merged, not duplicated.
        assert_eq!(stores.cards.list("ws-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ops_with_unknown_ids_are_dropped() {
        let signals = vec![signal("launch the newsletter", 0.9)];
        let llm = MockLlm::new().otherwise(MockResponse::json(json!({
            "ops": [{
                "op": "update_card",
                "card_id": "ghost-card",
                "signal_ids": [],
            }]
        })));
        let (steward, stores, _log) = steward(llm);
        steward
            .govern_and_apply(&ctx(), &[], &signals)
            .await
            .unwrap();
        assert!(stores.cards.list("ws-1").await.unwrap().is_empty());
    }
}
