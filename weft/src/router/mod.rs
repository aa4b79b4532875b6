//! Capability router: abstract quality/price tiers mapped onto concrete model
//! endpoints.
//!
//! Playbooks and pipelines name a [`CapabilityProfile`], never a model id. The
//! router resolves a profile to the first endpoint in its fallback chain whose
//! provider is configured, whose cost sits under the profile ceiling, and whose
//! features satisfy the profile. Budget enforcement (per-profile and absolute
//! session caps) lives with the runtime's cost ledger; the router only carries
//! the numbers.
//!
//! A step resolves its handle once and keeps it: the router never changes
//! model mid-step.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Abstract quality/price tier, decoupling playbooks from model identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityProfile {
    Fast,
    Standard,
    Precise,
    ToolStrict,
    SafeWrite,
}

impl CapabilityProfile {
    pub fn as_str(self) -> &'static str {
        match self {
            CapabilityProfile::Fast => "fast",
            CapabilityProfile::Standard => "standard",
            CapabilityProfile::Precise => "precise",
            CapabilityProfile::ToolStrict => "tool_strict",
            CapabilityProfile::SafeWrite => "safe_write",
        }
    }

    pub fn all() -> [CapabilityProfile; 5] {
        [
            CapabilityProfile::Fast,
            CapabilityProfile::Standard,
            CapabilityProfile::Precise,
            CapabilityProfile::ToolStrict,
            CapabilityProfile::SafeWrite,
        ]
    }
}

/// Feature a profile may require from an endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFeature {
    /// Reliable typed-JSON output.
    JsonOutput,
    /// Strict tool-call adherence (arguments always parse).
    StrictToolCalls,
    /// Suitable for reviewed, externally-visible writes.
    SafeWriteReview,
}

/// LLM provider behind an endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    /// Scriptable in-process endpoint for tests and offline runs.
    Mock,
}

/// One concrete model endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelEndpoint {
    pub provider: ProviderKind,
    pub model: String,
    /// Blended cost per 1k tokens (prompt + completion), USD.
    pub cost_per_1k_tokens_usd: f64,
    pub features: BTreeSet<ModelFeature>,
}

/// Per-profile routing policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProfileSpec {
    /// Hard ceiling on endpoint cost for this profile (USD per 1k tokens).
    pub cost_ceiling_per_1k_usd: f64,
    pub required_features: BTreeSet<ModelFeature>,
    /// Endpoint names tried in order.
    pub fallback: Vec<String>,
    /// Per-session budget for calls billed to this profile, USD.
    pub session_budget_usd: f64,
}

/// Full routing table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouterConfig {
    pub endpoints: BTreeMap<String, ModelEndpoint>,
    pub profiles: BTreeMap<CapabilityProfile, ProfileSpec>,
    /// Absolute per-session cap across all profiles, USD.
    pub absolute_session_cap_usd: f64,
}

impl RouterConfig {
    /// Routing table for the local adapter set: mock first so offline runs and
    /// tests resolve without credentials, then OpenAI, then Anthropic.
    pub fn local_default() -> Self {
        let mut endpoints = BTreeMap::new();
        let all: BTreeSet<ModelFeature> = [
            ModelFeature::JsonOutput,
            ModelFeature::StrictToolCalls,
            ModelFeature::SafeWriteReview,
        ]
        .into_iter()
        .collect();
        endpoints.insert(
            "mock".to_string(),
            ModelEndpoint {
                provider: ProviderKind::Mock,
                model: "mock".to_string(),
                cost_per_1k_tokens_usd: 0.0,
                features: all.clone(),
            },
        );
        endpoints.insert(
            "openai-mini".to_string(),
            ModelEndpoint {
                provider: ProviderKind::OpenAi,
                model: "gpt-4o-mini".to_string(),
                cost_per_1k_tokens_usd: 0.000_375,
                features: [ModelFeature::JsonOutput].into_iter().collect(),
            },
        );
        endpoints.insert(
            "openai-core".to_string(),
            ModelEndpoint {
                provider: ProviderKind::OpenAi,
                model: "gpt-4o".to_string(),
                cost_per_1k_tokens_usd: 0.007_5,
                features: all.clone(),
            },
        );
        endpoints.insert(
            "anthropic-sonnet".to_string(),
            ModelEndpoint {
                provider: ProviderKind::Anthropic,
                model: "claude-3-5-sonnet-latest".to_string(),
                cost_per_1k_tokens_usd: 0.009,
                features: all,
            },
        );

        let mut profiles = BTreeMap::new();
        profiles.insert(
            CapabilityProfile::Fast,
            ProfileSpec {
                cost_ceiling_per_1k_usd: 0.001,
                required_features: [ModelFeature::JsonOutput].into_iter().collect(),
                fallback: vec!["mock".into(), "openai-mini".into()],
                session_budget_usd: 0.50,
            },
        );
        profiles.insert(
            CapabilityProfile::Standard,
            ProfileSpec {
                cost_ceiling_per_1k_usd: 0.01,
                required_features: [ModelFeature::JsonOutput].into_iter().collect(),
                fallback: vec!["mock".into(), "openai-core".into(), "anthropic-sonnet".into()],
                session_budget_usd: 2.00,
            },
        );
        profiles.insert(
            CapabilityProfile::Precise,
            ProfileSpec {
                cost_ceiling_per_1k_usd: 0.02,
                required_features: [ModelFeature::JsonOutput].into_iter().collect(),
                fallback: vec!["mock".into(), "anthropic-sonnet".into(), "openai-core".into()],
                session_budget_usd: 5.00,
            },
        );
        profiles.insert(
            CapabilityProfile::ToolStrict,
            ProfileSpec {
                cost_ceiling_per_1k_usd: 0.01,
                required_features: [ModelFeature::JsonOutput, ModelFeature::StrictToolCalls]
                    .into_iter()
                    .collect(),
                fallback: vec!["mock".into(), "openai-core".into()],
                session_budget_usd: 2.00,
            },
        );
        profiles.insert(
            CapabilityProfile::SafeWrite,
            ProfileSpec {
                cost_ceiling_per_1k_usd: 0.02,
                required_features: [ModelFeature::JsonOutput, ModelFeature::SafeWriteReview]
                    .into_iter()
                    .collect(),
                fallback: vec!["mock".into(), "anthropic-sonnet".into(), "openai-core".into()],
                session_budget_usd: 1.00,
            },
        );

        Self {
            endpoints,
            profiles,
            absolute_session_cap_usd: 10.0,
        }
    }

    pub fn profile(&self, profile: CapabilityProfile) -> Option<&ProfileSpec> {
        self.profiles.get(&profile)
    }
}

/// Resolved handle for one step: the endpoint a step will use for its whole
/// lifetime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelHandle {
    pub profile: CapabilityProfile,
    pub endpoint_name: String,
    pub provider: ProviderKind,
    pub model: String,
    pub cost_per_1k_tokens_usd: f64,
}

impl ModelHandle {
    /// Cost of one call at this endpoint's blended rate.
    pub fn cost_usd(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        let tokens = prompt_tokens as f64 + completion_tokens as f64;
        tokens / 1000.0 * self.cost_per_1k_tokens_usd
    }
}

/// Maps capability profiles onto concrete endpoints.
#[derive(Clone, Debug)]
pub struct CapabilityRouter {
    config: RouterConfig,
    configured: BTreeSet<ProviderKind>,
}

impl CapabilityRouter {
    pub fn new(config: RouterConfig, configured: impl IntoIterator<Item = ProviderKind>) -> Self {
        Self {
            config,
            configured: configured.into_iter().collect(),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Selects the first endpoint in the profile's fallback chain whose
    /// provider is configured, cost is under the ceiling, and features satisfy
    /// the profile.
    pub fn resolve(&self, profile: CapabilityProfile) -> Result<ModelHandle, CoreError> {
        let spec = self
            .config
            .profiles
            .get(&profile)
            .ok_or_else(|| CoreError::ProviderUnavailable {
                provider: "none".to_string(),
                message: format!("no routing policy for profile {}", profile.as_str()),
            })?;
        for name in &spec.fallback {
            let Some(endpoint) = self.config.endpoints.get(name) else {
                continue;
            };
            if !self.configured.contains(&endpoint.provider) {
                continue;
            }
            if endpoint.cost_per_1k_tokens_usd > spec.cost_ceiling_per_1k_usd {
                continue;
            }
            if !spec.required_features.is_subset(&endpoint.features) {
                continue;
            }
            return Ok(ModelHandle {
                profile,
                endpoint_name: name.clone(),
                provider: endpoint.provider,
                model: endpoint.model.clone(),
                cost_per_1k_tokens_usd: endpoint.cost_per_1k_tokens_usd,
            });
        }
        Err(CoreError::ProviderUnavailable {
            provider: "none".to_string(),
            message: format!(
                "no configured endpoint satisfies profile {}",
                profile.as_str()
            ),
        })
    }
}
