//! Playbook resolution: scope precedence, locale closeness, validation.

use std::collections::HashMap;
use std::path::Path;

use tracing::{info, warn};

use crate::domain::{
    validate_step_graph, DangerLevel, Frontmatter, PlaybookScope, PlaybookTemplate,
    PlaybookVariant, ResolvedPlaybook, StepSpec, StepSpecKind, ToolConnection,
};
use crate::error::CoreError;
use crate::router::CapabilityProfile;

use super::parse_playbook;

/// Immutable set of system templates, loaded once at startup.
///
/// Templates are content-addressed by `(code, version)`; registering the same
/// pair twice replaces the entry (last scan wins), never mutates an existing
/// loaded template in place.
#[derive(Default)]
pub struct PlaybookLibrary {
    templates: HashMap<String, Vec<PlaybookTemplate>>,
}

impl PlaybookLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one template.
    pub fn register(&mut self, template: PlaybookTemplate) {
        let entry = self
            .templates
            .entry(template.frontmatter.code.clone())
            .or_default();
        entry.retain(|t| {
            t.frontmatter.version != template.frontmatter.version
                || t.frontmatter.locale != template.frontmatter.locale
        });
        entry.push(template);
    }

    /// Scans a directory tree for `*.md` playbooks. Invalid files are logged
    /// and skipped; a broken file never takes the engine down at startup.
    pub fn scan_dir(&mut self, dir: impl AsRef<Path>) -> usize {
        let mut loaded = 0;
        for entry in walkdir::WalkDir::new(dir.as_ref())
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().map(|x| x == "md").unwrap_or(false))
        {
            let path = entry.path();
            let text = match std::fs::read_to_string(path) {
                Ok(t) => t,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "playbook file unreadable; skipped");
                    continue;
                }
            };
            match parse_playbook(&text) {
                Ok(template) => {
                    info!(
                        path = %path.display(),
                        code = %template.frontmatter.code,
                        version = %template.frontmatter.version,
                        "playbook loaded"
                    );
                    self.register(template);
                    loaded += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "playbook invalid; skipped");
                }
            }
        }
        loaded
    }

    pub fn codes(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    pub fn templates_for(&self, code: &str) -> &[PlaybookTemplate] {
        self.templates.get(code).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Frontmatter of every registered template (for decision-pipeline candidates).
    pub fn all_frontmatter(&self) -> Vec<&Frontmatter> {
        self.templates
            .values()
            .flat_map(|v| v.iter().map(|t| &t.frontmatter))
            .collect()
    }
}

/// Locale closeness: exact match > language family > default > other.
fn locale_score(template_locale: Option<&str>, target: Option<&str>) -> u8 {
    match (template_locale, target) {
        (Some(t), Some(want)) if t.eq_ignore_ascii_case(want) => 3,
        (Some(t), Some(want)) => {
            let family = |s: &str| s.split(['-', '_']).next().unwrap_or(s).to_ascii_lowercase();
            if family(t) == family(want) {
                2
            } else if t.eq_ignore_ascii_case("en") {
                1
            } else {
                0
            }
        }
        (None, _) => 1,
        (Some(t), None) => {
            if t.eq_ignore_ascii_case("en") {
                1
            } else {
                0
            }
        }
    }
}

/// Dotted-numeric version ordering with lexicographic fallback.
fn version_key(version: &str) -> Vec<u64> {
    version
        .split('.')
        .map(|part| part.trim().parse::<u64>().unwrap_or(0))
        .collect()
}

/// Resolves playbooks against the library. Pure: identical inputs yield
/// identical outputs; all stored state (variants, connections) is passed in.
pub struct PlaybookLoader {
    library: PlaybookLibrary,
}

impl PlaybookLoader {
    pub fn new(library: PlaybookLibrary) -> Self {
        Self { library }
    }

    pub fn library(&self) -> &PlaybookLibrary {
        &self.library
    }

    /// Loads the best template for `(code, locale)`, overlays the
    /// highest-precedence applicable variant, and validates the result.
    pub fn load(
        &self,
        code: &str,
        target_locale: Option<&str>,
        visible_variants: &[PlaybookVariant],
        connections: &[ToolConnection],
    ) -> Result<ResolvedPlaybook, CoreError> {
        let candidates = self.library.templates_for(code);
        if candidates.is_empty() {
            return Err(CoreError::PlaybookUnusable {
                code: code.to_string(),
                message: "no template registered for code".to_string(),
            });
        }

        let template = candidates
            .iter()
            .max_by_key(|t| {
                (
                    locale_score(t.frontmatter.locale.as_deref(), target_locale),
                    version_key(&t.frontmatter.version),
                )
            })
            .ok_or_else(|| CoreError::PlaybookUnusable {
                code: code.to_string(),
                message: "no usable template".to_string(),
            })?;

        // Variant precedence: workspace > profile > tenant. System is the
        // template itself.
        let variant = visible_variants
            .iter()
            .filter(|v| {
                v.parent_code == template.frontmatter.code
                    && v.parent_version == template.frontmatter.version
            })
            .max_by_key(|v| match v.scope {
                PlaybookScope::Workspace => 3u8,
                PlaybookScope::Profile => 2,
                PlaybookScope::Tenant => 1,
                PlaybookScope::System => 0,
            });

        let (steps, scope, variant_id) = match variant {
            Some(v) => (v.steps.clone(), v.scope, Some(v.id.clone())),
            None => (
                template.steps.clone(),
                template.frontmatter.scope,
                None,
            ),
        };

        self.validate(code, &steps, &template.frontmatter, connections)?;

        Ok(ResolvedPlaybook {
            code: template.frontmatter.code.clone(),
            version: template.frontmatter.version.clone(),
            scope,
            locale: template.frontmatter.locale.clone(),
            frontmatter: template.frontmatter.clone(),
            body: template.body.clone(),
            steps,
            variant_id,
        })
    }

    fn validate(
        &self,
        code: &str,
        steps: &[StepSpec],
        frontmatter: &Frontmatter,
        connections: &[ToolConnection],
    ) -> Result<(), CoreError> {
        validate_step_graph(code, steps)?;

        let unusable = |message: String| CoreError::PlaybookUnusable {
            code: code.to_string(),
            message,
        };

        // Required tools must have a connection; unknown tools are an error,
        // never a silent skip.
        for tool in &frontmatter.required_tools {
            if !connections.iter().any(|c| &c.tool_type == tool) {
                return Err(unusable(format!("required tool `{tool}` has no connection")));
            }
        }
        for step in steps {
            if let StepSpecKind::ToolCall { tool_type, .. } = &step.kind {
                let connection = connections
                    .iter()
                    .find(|c| &c.tool_type == tool_type)
                    .ok_or_else(|| {
                        unusable(format!("step `{}` uses unknown tool `{tool_type}`", step.id))
                    })?;
                // continue_on_error would let a high-danger side effect fail
                // quietly; forbidden.
                if step.continue_on_error && connection.danger_level == DangerLevel::High {
                    return Err(unusable(format!(
                        "step `{}` declares continue_on_error on a high-danger tool",
                        step.id
                    )));
                }
            }
        }

        let known: Vec<&str> = CapabilityProfile::all().iter().map(|p| p.as_str()).collect();
        for capability in &frontmatter.required_capabilities {
            if !known.contains(&capability.as_str()) {
                return Err(unusable(format!("unknown required capability `{capability}`")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{IrSchema, PlaybookScope};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn template(code: &str, version: &str, locale: Option<&str>) -> PlaybookTemplate {
        PlaybookTemplate {
            frontmatter: Frontmatter {
                code: code.to_string(),
                version: version.to_string(),
                kind: "workflow".to_string(),
                scope: PlaybookScope::System,
                required_tools: vec![],
                required_capabilities: vec!["standard".to_string()],
                locale: locale.map(|l| l.to_string()),
                icon: None,
                tags: vec![],
                extra: BTreeMap::new(),
            },
            body: String::new(),
            steps: vec![StepSpec {
                id: "draft".to_string(),
                kind: StepSpecKind::LlmCall {
                    prompt: "p".to_string(),
                    output_schema: IrSchema::default(),
                },
                profile: None,
                depends_on: vec![],
                parallel_group: None,
                timeout_ms: None,
                max_retries: 0,
                continue_on_error: false,
            }],
        }
    }

    fn loader_with(templates: Vec<PlaybookTemplate>) -> PlaybookLoader {
        let mut library = PlaybookLibrary::new();
        for t in templates {
            library.register(t);
        }
        PlaybookLoader::new(library)
    }

    #[test]
    fn exact_locale_beats_family_beats_default() {
        let loader = loader_with(vec![
            template("demo", "1.0", Some("en")),
            template("demo", "1.0", Some("ja")),
            template("demo", "1.0", Some("ja-JP")),
        ]);
        let resolved = loader.load("demo", Some("ja-JP"), &[], &[]).unwrap();
        assert_eq!(resolved.locale.as_deref(), Some("ja-JP"));
        let resolved = loader.load("demo", Some("ja-KS"), &[], &[]).unwrap();
        assert_eq!(resolved.locale.as_deref(), Some("ja"));
        let resolved = loader.load("demo", Some("fr"), &[], &[]).unwrap();
        assert_eq!(resolved.locale.as_deref(), Some("en"));
    }

    #[test]
    fn higher_version_wins_within_locale() {
        let loader = loader_with(vec![
            template("demo", "1.2.0", Some("en")),
            template("demo", "1.10.0", Some("en")),
        ]);
        let resolved = loader.load("demo", Some("en"), &[], &[]).unwrap();
        assert_eq!(resolved.version, "1.10.0");
    }

    #[test]
    fn workspace_variant_beats_profile_variant() {
        let loader = loader_with(vec![template("demo", "1.0", None)]);
        let mk = |scope, id: &str| PlaybookVariant {
            id: id.to_string(),
            workspace_id: Some("ws-1".to_string()),
            owner_actor_id: Some("u-1".to_string()),
            scope,
            parent_code: "demo".to_string(),
            parent_version: "1.0".to_string(),
            steps: template("demo", "1.0", None).steps,
            created_at: Utc::now(),
            version: 0,
        };
        let variants = vec![mk(PlaybookScope::Profile, "v-profile"), mk(PlaybookScope::Workspace, "v-ws")];
        let resolved = loader.load("demo", None, &variants, &[]).unwrap();
        assert_eq!(resolved.variant_id.as_deref(), Some("v-ws"));
        assert_eq!(resolved.scope, PlaybookScope::Workspace);
    }

    #[test]
    fn unknown_code_is_unusable() {
        let loader = loader_with(vec![]);
        let err = loader.load("ghost", None, &[], &[]).unwrap_err();
        assert_eq!(err.code(), "playbook_unusable");
    }

    #[test]
    fn missing_required_tool_is_unusable() {
        let mut t = template("demo", "1.0", None);
        t.frontmatter.required_tools.push("wordpress".to_string());
        let loader = loader_with(vec![t]);
        let err = loader.load("demo", None, &[], &[]).unwrap_err();
        assert_eq!(err.code(), "playbook_unusable");
    }

    #[test]
    fn continue_on_error_forbidden_on_high_danger_tool() {
        let mut t = template("demo", "1.0", None);
        t.steps = vec![StepSpec {
            id: "publish".to_string(),
            kind: StepSpecKind::ToolCall {
                tool_type: "wordpress".to_string(),
                prompt: "publish it".to_string(),
                writes: true,
            },
            profile: None,
            depends_on: vec![],
            parallel_group: None,
            timeout_ms: None,
            max_retries: 0,
            continue_on_error: true,
        }];
        let loader = loader_with(vec![t]);
        let conn = ToolConnection::local("ws-1", "wordpress", DangerLevel::High);
        let err = loader.load("demo", None, &[], &[conn]).unwrap_err();
        assert_eq!(err.code(), "playbook_unusable");
    }

    /// **Scenario**: loading is pure; identical inputs resolve identically.
    #[test]
    fn load_is_deterministic() {
        let loader = loader_with(vec![
            template("demo", "1.0", Some("en")),
            template("demo", "2.0", Some("en")),
        ]);
        let a = loader.load("demo", Some("en"), &[], &[]).unwrap();
        let b = loader.load("demo", Some("en"), &[], &[]).unwrap();
        assert_eq!(a, b);
    }
}
