//! Intermediate representation plumbing.
//!
//! Between phases, steps exchange stable typed JSON. The IR context visible to
//! a step is one object: `inputs` (session inputs) plus each finished step's
//! `outputs_ir` under its step id. Paths are dotted
//! (`"draft.plan"`, `"inputs.focus"`).

use serde_json::{Map, Value};

use crate::domain::{StepRecord, StepState};

/// Assembles the IR context for the next step from the session inputs and all
/// finished step records.
pub fn ir_context(session_inputs: &Value, records: &[StepRecord]) -> Value {
    let mut root = Map::new();
    root.insert("inputs".to_string(), session_inputs.clone());
    for record in records {
        if record.state == StepState::Succeeded {
            if let Some(outputs) = &record.outputs_ir {
                root.insert(record.step_id.clone(), outputs.clone());
            }
        }
    }
    Value::Object(root)
}

/// Resolves a dotted path against the IR context.
pub fn lookup_path<'a>(ctx: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = ctx;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

/// Renders `{{path}}` placeholders in a prompt from the IR context. String
/// values insert raw; other values insert as JSON. Unknown paths render empty,
/// never error: prompts degrade, schemas catch real damage downstream.
pub fn render_template(template: &str, ctx: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let path = after[..end].trim();
                match lookup_path(ctx, path) {
                    Some(Value::String(s)) => out.push_str(s),
                    Some(other) => out.push_str(&other.to_string()),
                    None => {}
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn succeeded(step_id: &str, outputs: Value) -> StepRecord {
        let mut r = StepRecord::pending("exec-1", step_id, 0, "llm_call");
        r.state = StepState::Succeeded;
        r.outputs_ir = Some(outputs);
        r
    }

    #[test]
    fn context_exposes_inputs_and_finished_outputs() {
        let records = vec![
            succeeded("analyze", json!({"summary": "launch week"})),
            StepRecord::pending("exec-1", "draft", 1, "llm_call"),
        ];
        let ctx = ir_context(&json!({"focus": "launch"}), &records);
        assert_eq!(ctx["inputs"]["focus"], "launch");
        assert_eq!(ctx["analyze"]["summary"], "launch week");
        assert!(ctx.get("draft").is_none());
    }

    #[test]
    fn lookup_follows_dotted_paths() {
        let ctx = json!({"draft": {"plan": {"title": "Week 31"}}});
        assert_eq!(
            lookup_path(&ctx, "draft.plan.title"),
            Some(&json!("Week 31"))
        );
        assert_eq!(lookup_path(&ctx, "draft.missing"), None);
    }

    #[test]
    fn render_substitutes_strings_raw_and_values_as_json() {
        let ctx = json!({"analyze": {"summary": "launch week", "count": 3}});
        let out = render_template(
            "Plan for {{analyze.summary}} ({{analyze.count}} items)",
            &ctx,
        );
        assert_eq!(out, "Plan for launch week (3 items)");
    }

    #[test]
    fn render_drops_unknown_paths() {
        let out = render_template("a {{nope.x}} b", &json!({}));
        assert_eq!(out, "a  b");
    }
}
