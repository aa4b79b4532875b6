//! Intent clustering: periodic embedding-based grouping of cards.
//!
//! Rebuilds from scratch each run: average-linkage agglomerative merging on
//! centroid cosine distance with a minimum cohesion threshold, then a
//! FAST-profile LLM call to name each cluster. Cluster ids are ephemeral per
//! rebuild; card back-references are rewritten in the same transaction as the
//! cluster rows, so a card's `cluster_id` always names a live cluster.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use timeline_event::WireEvent;

use crate::domain::{CardStatus, IntentCard, IntentCluster, IrFieldType, IrSchema};
use crate::embedding::cosine_similarity;
use crate::error::CoreError;
use crate::events::append_best_effort;
use crate::ports::{ChatMessage, EmbeddingPort, EventLogPort, LlmClient, NewEvent};
use crate::router::{CapabilityProfile, CapabilityRouter};
use crate::store::StoreSet;

const NAMING_PROMPT: &str = r#"Name this group of related user intents. Output JSON only: {"label": "<2-4 word theme>"}"#;

pub struct IntentClusterer {
    llm: Arc<dyn LlmClient>,
    router: Arc<CapabilityRouter>,
    embeddings: Arc<dyn EmbeddingPort>,
    stores: StoreSet,
    log: Arc<dyn EventLogPort>,
    /// Minimum centroid cosine similarity for a merge.
    min_cohesion: f32,
}

impl IntentClusterer {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        router: Arc<CapabilityRouter>,
        embeddings: Arc<dyn EmbeddingPort>,
        stores: StoreSet,
        log: Arc<dyn EventLogPort>,
    ) -> Self {
        Self {
            llm,
            router,
            embeddings,
            stores,
            log,
            min_cohesion: 0.6,
        }
    }

    pub fn with_min_cohesion(mut self, min_cohesion: f32) -> Self {
        self.min_cohesion = min_cohesion;
        self
    }

    /// Rebuilds the workspace's clusters from its active cards.
    pub async fn cluster(&self, workspace_id: &str) -> Result<Vec<IntentCluster>, CoreError> {
        let cards: Vec<IntentCard> = self
            .stores
            .cards
            .list(workspace_id)
            .await?
            .into_iter()
            .filter(|c| c.status == CardStatus::Active)
            .collect();
        if cards.is_empty() {
            self.stores.clusters.replace_all(workspace_id, &[], &[]).await?;
            return Ok(Vec::new());
        }

        let texts: Vec<String> = cards
            .iter()
            .map(|c| format!("{}\n{}", c.title, c.description))
            .collect();
        let vectors = self.embeddings.embed(&texts).await?;

        let groups = agglomerate(&vectors, self.min_cohesion);
        let mut clusters = Vec::with_capacity(groups.len());
        let mut assignments = Vec::new();
        for members in groups {
            let centroid = centroid_of(&members, &vectors);
            let member_cards: Vec<&IntentCard> = members.iter().map(|&i| &cards[i]).collect();
            let label = self.name_cluster(&member_cards).await;
            let cluster = IntentCluster {
                id: uuid::Uuid::new_v4().to_string(),
                workspace_id: workspace_id.to_string(),
                label,
                centroid,
                member_card_ids: member_cards.iter().map(|c| c.id.clone()).collect(),
                created_at: Utc::now(),
            };
            for card in &member_cards {
                assignments.push((card.id.clone(), cluster.id.clone()));
            }
            clusters.push(cluster);
        }

        self.stores
            .clusters
            .replace_all(workspace_id, &clusters, &assignments)
            .await?;
        append_best_effort(
            &self.log,
            NewEvent::workspace(
                workspace_id,
                &WireEvent::IntentClustersRebuilt {
                    cluster_count: clusters.len(),
                },
            ),
        )
        .await;
        debug!(clusters = clusters.len(), cards = cards.len(), "clusters rebuilt");
        Ok(clusters)
    }

    /// FAST-profile naming; falls back to the first member's title on error.
    async fn name_cluster(&self, members: &[&IntentCard]) -> String {
        let fallback = || {
            members
                .first()
                .map(|c| c.title.clone())
                .unwrap_or_else(|| "theme".to_string())
        };
        let titles: Vec<&str> = members.iter().map(|c| c.title.as_str()).collect();
        let result: Result<String, CoreError> = async {
            let handle = self.router.resolve(CapabilityProfile::Fast)?;
            let mut required = BTreeMap::new();
            required.insert("label".to_string(), IrFieldType::String);
            let schema = IrSchema { required };
            let messages = [
                ChatMessage::system(NAMING_PROMPT),
                ChatMessage::user(json!({ "intents": titles }).to_string()),
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
            Ok(response
                .json
                .as_ref()
                .and_then(|v| v.get("label"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string())
        }
        .await;
        match result {
            Ok(label) if !label.is_empty() => label,
            Ok(_) => fallback(),
            Err(e) => {
                warn!(error = %e, "cluster naming failed; using fallback label");
                fallback()
            }
        }
    }
}

/// Average-linkage agglomerative grouping: merge the closest pair of clusters
/// while their centroid similarity stays at or above the cohesion floor.
fn agglomerate(vectors: &[Vec<f32>], min_cohesion: f32) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = (0..vectors.len()).map(|i| vec![i]).collect();
    loop {
        let mut best: Option<(usize, usize, f32)> = None;
        for a in 0..groups.len() {
            for b in (a + 1)..groups.len() {
                let ca = centroid_of(&groups[a], vectors);
                let cb = centroid_of(&groups[b], vectors);
                let sim = cosine_similarity(&ca, &cb);
                if sim >= min_cohesion && best.map(|(_, _, s)| sim > s).unwrap_or(true) {
                    best = Some((a, b, sim));
                }
            }
        }
        match best {
            Some((a, b, _)) => {
                let merged = groups.remove(b);
                groups[a].extend(merged);
            }
            None => return groups,
        }
    }
}

fn centroid_of(members: &[usize], vectors: &[Vec<f32>]) -> Vec<f32> {
    if members.is_empty() {
        return Vec::new();
    }
    let dim = vectors[members[0]].len();
    let mut centroid = vec![0.0f32; dim];
    for &i in members {
        for (c, v) in centroid.iter_mut().zip(&vectors[i]) {
            *c += v;
        }
    }
    for c in &mut centroid {
        *c /= members.len() as f32;
    }
    centroid
}
