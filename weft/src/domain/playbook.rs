//! Playbook templates, variants, step graphs, and IR schemas.
//!
//! A template is Markdown + YAML frontmatter + a machine-executable step
//! graph. Templates are immutable once loaded and content-addressed by
//! `(code, version)`; variants are separate entities referencing a parent and
//! never mutate it.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::router::CapabilityProfile;

/// Template scope, in increasing specificity. Resolution precedence is
/// workspace > profile > tenant > system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybookScope {
    System,
    Tenant,
    Profile,
    Workspace,
}

/// YAML frontmatter between the `---` fences.
///
/// Unknown top-level keys are preserved in `extra` (and ignored), so
/// serializing and re-parsing yields an equal value modulo map ordering.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frontmatter {
    /// Stable identifier, optionally `capability_code.local_code`.
    pub code: String,
    pub version: String,
    pub kind: String,
    pub scope: PlaybookScope,
    pub required_tools: Vec<String>,
    pub required_capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Field type in a declared IR schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IrFieldType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl IrFieldType {
    fn matches(self, v: &Value) -> bool {
        match self {
            IrFieldType::String => v.is_string(),
            IrFieldType::Number => v.is_number(),
            IrFieldType::Boolean => v.is_boolean(),
            IrFieldType::Array => v.is_array(),
            IrFieldType::Object => v.is_object(),
            IrFieldType::Any => true,
        }
    }
}

/// Declared schema for a step's `outputs_ir`: required named, typed fields.
///
/// The IR is the contract that lets the capability router swap models without
/// touching the runtime, so violations are fatal for the step.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IrSchema {
    #[serde(default)]
    pub required: BTreeMap<String, IrFieldType>,
}

impl IrSchema {
    /// Validates a value: must be an object carrying every required field with
    /// the declared type.
    pub fn validate(&self, value: &Value, location: &str) -> Result<(), CoreError> {
        let obj = value.as_object().ok_or_else(|| CoreError::SchemaViolation {
            location: location.to_string(),
            message: "expected a JSON object".to_string(),
        })?;
        for (name, ty) in &self.required {
            match obj.get(name) {
                None => {
                    return Err(CoreError::SchemaViolation {
                        location: location.to_string(),
                        message: format!("missing required field `{name}`"),
                    })
                }
                Some(v) if !ty.matches(v) => {
                    return Err(CoreError::SchemaViolation {
                        location: location.to_string(),
                        message: format!("field `{name}` has wrong type"),
                    })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Declared condition for a `decision` step, evaluated over the IR context.
///
/// `path` is dotted (`"step_id.field.subfield"`). When `equals` is present the
/// branch matches on equality; otherwise on the value being present and truthy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionSpec {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<Value>,
    pub then_step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub else_step: Option<String>,
}

/// Step kind plus its kind-specific declaration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepSpecKind {
    LlmCall {
        prompt: String,
        #[serde(default)]
        output_schema: IrSchema,
    },
    ToolCall {
        tool_type: String,
        prompt: String,
        /// Write-classified: gated against readonly connections before dispatch.
        #[serde(default)]
        writes: bool,
    },
    Decision { decision: DecisionSpec },
    SubPlaybook { playbook_code: String },
    ArtifactEmit {
        /// Relative path inside the project sandbox.
        path: String,
        /// Dotted IR path the content is read from.
        content_from: String,
        #[serde(default = "default_mime")]
        mime: String,
    },
}

fn default_mime() -> String {
    "text/markdown".to_string()
}

impl StepSpecKind {
    pub fn name(&self) -> &'static str {
        match self {
            StepSpecKind::LlmCall { .. } => "llm_call",
            StepSpecKind::ToolCall { .. } => "tool_call",
            StepSpecKind::Decision { .. } => "decision",
            StepSpecKind::SubPlaybook { .. } => "sub_playbook",
            StepSpecKind::ArtifactEmit { .. } => "artifact_emit",
        }
    }
}

/// One node of the executable step graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub id: String,
    #[serde(flatten)]
    pub kind: StepSpecKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<CapabilityProfile>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Steps sharing a group run concurrently (bounded fan-out); the frontier
    /// advances only when all of them succeed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub continue_on_error: bool,
}

/// Parsed template: frontmatter, Markdown body, step graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlaybookTemplate {
    pub frontmatter: Frontmatter,
    pub body: String,
    pub steps: Vec<StepSpec>,
}

/// User-edited override of a template. Points at its parent by
/// `(parent_code, parent_version)`; parents are never mutated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlaybookVariant {
    pub id: String,
    /// Present for workspace-scoped variants.
    pub workspace_id: Option<String>,
    /// Present for profile-scoped variants (the owning actor).
    pub owner_actor_id: Option<String>,
    pub scope: PlaybookScope,
    pub parent_code: String,
    pub parent_version: String,
    pub steps: Vec<StepSpec>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

/// The loader's output: the template (or variant) chosen for a request,
/// validated against available tools and known capabilities.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPlaybook {
    pub code: String,
    pub version: String,
    pub scope: PlaybookScope,
    pub locale: Option<String>,
    pub frontmatter: Frontmatter,
    pub body: String,
    pub steps: Vec<StepSpec>,
    /// Set when a variant supplied the steps.
    pub variant_id: Option<String>,
}

/// Validates a step graph: unique ids, known dependencies, acyclic, decision
/// targets present. Returns the topological order of step ids.
pub fn validate_step_graph(code: &str, steps: &[StepSpec]) -> Result<Vec<String>, CoreError> {
    let unusable = |message: String| CoreError::PlaybookUnusable {
        code: code.to_string(),
        message,
    };

    if steps.is_empty() {
        return Err(unusable("playbook has no steps".to_string()));
    }

    let mut ids = HashSet::new();
    for step in steps {
        if !ids.insert(step.id.as_str()) {
            return Err(unusable(format!("duplicate step id `{}`", step.id)));
        }
    }
    let declared_at: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();
    for (index, step) in steps.iter().enumerate() {
        for dep in &step.depends_on {
            if !ids.contains(dep.as_str()) {
                return Err(unusable(format!(
                    "step `{}` depends on unknown step `{}`",
                    step.id, dep
                )));
            }
            // Execution is sequential by declaration index; a dependency
            // declared later would never have outputs yet.
            if declared_at[dep.as_str()] >= index {
                return Err(unusable(format!(
                    "step `{}` depends on later step `{}`",
                    step.id, dep
                )));
            }
        }
        if let StepSpecKind::Decision { decision } = &step.kind {
            if !ids.contains(decision.then_step.as_str()) {
                return Err(unusable(format!(
                    "decision `{}` targets unknown step `{}`",
                    step.id, decision.then_step
                )));
            }
            if let Some(e) = &decision.else_step {
                if !ids.contains(e.as_str()) {
                    return Err(unusable(format!(
                        "decision `{}` targets unknown step `{e}`",
                        step.id
                    )));
                }
            }
        }
    }

    // Dependencies all point backwards, so declaration order is a valid
    // topological order (and cycles are impossible).
    Ok(steps.iter().map(|s| s.id.clone()).collect())
}
