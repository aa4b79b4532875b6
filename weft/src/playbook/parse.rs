//! Playbook file parsing.

use serde::Deserialize;

use crate::domain::{Frontmatter, PlaybookTemplate, StepSpec};
use crate::error::CoreError;

#[derive(Deserialize)]
struct StepGraphBlock {
    steps: Vec<StepSpec>,
}

fn unusable(code: &str, message: impl Into<String>) -> CoreError {
    CoreError::PlaybookUnusable {
        code: code.to_string(),
        message: message.into(),
    }
}

/// Parses one playbook file: frontmatter, body, optional step graph.
///
/// The step graph is the last ```json fence in the body; a playbook without
/// one parses fine (steps empty) and is rejected later at load time.
pub fn parse_playbook(text: &str) -> Result<PlaybookTemplate, CoreError> {
    let text = text.trim_start_matches('\u{feff}');
    let rest = text
        .strip_prefix("---")
        .ok_or_else(|| unusable("unknown", "missing frontmatter opening fence"))?;
    let close = rest
        .find("\n---")
        .ok_or_else(|| unusable("unknown", "missing frontmatter closing fence"))?;
    let yaml = &rest[..close];
    let body = rest[close + 4..].trim_start_matches('\n').to_string();

    let frontmatter: Frontmatter = serde_yaml::from_str(yaml)
        .map_err(|e| unusable("unknown", format!("frontmatter does not parse: {e}")))?;

    let steps = match extract_json_block(&body) {
        Some(block) => {
            let graph: StepGraphBlock = serde_json::from_str(block).map_err(|e| {
                unusable(&frontmatter.code, format!("step graph does not parse: {e}"))
            })?;
            graph.steps
        }
        None => Vec::new(),
    };

    Ok(PlaybookTemplate {
        frontmatter,
        body,
        steps,
    })
}

/// Serializes frontmatter back to YAML. Round-trips with [`parse_playbook`]:
/// re-parsing the output yields an equal value modulo map ordering.
pub fn serialize_frontmatter(frontmatter: &Frontmatter) -> Result<String, CoreError> {
    serde_yaml::to_string(frontmatter).map_err(|e| CoreError::PlaybookUnusable {
        code: frontmatter.code.clone(),
        message: format!("frontmatter does not serialize: {e}"),
    })
}

/// Returns the content of the last ```json fence, if any.
fn extract_json_block(body: &str) -> Option<&str> {
    let mut last = None;
    let mut search = body;
    let mut offset = 0;
    while let Some(start) = search.find("```json") {
        let content_start = offset + start + "```json".len();
        let after = &body[content_start..];
        if let Some(end) = after.find("```") {
            last = Some(after[..end].trim());
            let consumed = start + "```json".len() + end + 3;
            offset += consumed;
            search = &body[offset..];
        } else {
            break;
        }
    }
    last
}
