//! Tolerant parsing of oracle responses

use super::{ModificationProposal, NodeDescriptor, OracleError, ProposalStrategy};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

const DEFAULT_CONFIDENCE: f64 = 0.5;
const MAX_JSON_CANDIDATES: usize = 8;

/// A parsed, defaulted oracle response
#[derive(Debug, Clone, PartialEq)]
pub struct OracleResponse {
    pub modifications: Vec<ModificationProposal>,
    pub overall_strategy: String,
    pub batch_confidence: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResponse {
    modifications: Vec<Value>,
    #[serde(default)]
    overall_strategy: Option<Value>,
    #[serde(default)]
    batch_confidence: Option<Value>,
}

#[derive(Debug)]
struct RawProposal {
    node_index: Option<i64>,
    original_snippet: Option<String>,
    modified_snippet: Option<String>,
    original_content: Option<String>,
    modified_content: Option<String>,
    reasoning: Option<String>,
    confidence: Option<f64>,
    should_apply: Option<bool>,
    strategy: Option<String>,
    warnings: Vec<String>,
}

impl RawProposal {
    /// Read a proposal field by field so one oddly typed value only loses that field
    fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let field = |camel: &str, snake: &str| object.get(camel).or_else(|| object.get(snake));
        let text = |camel: &str, snake: &str| field(camel, snake).and_then(lenient_string);

        Some(Self {
            node_index: field("nodeIndex", "node_index").and_then(lenient_i64),
            original_snippet: text("originalSnippet", "original_snippet"),
            modified_snippet: text("modifiedSnippet", "modified_snippet"),
            original_content: text("originalContent", "original_content"),
            modified_content: text("modifiedContent", "modified_content"),
            reasoning: text("reasoning", "reasoning"),
            confidence: field("confidence", "confidence").and_then(lenient_f64),
            should_apply: field("shouldApply", "should_apply").and_then(lenient_bool),
            strategy: text("strategy", "strategy"),
            warnings: match field("warnings", "warnings") {
                Some(Value::Array(items)) => items.iter().filter_map(lenient_string).collect(),
                Some(Value::String(single)) => vec![single.clone()],
                _ => Vec::new(),
            },
        })
    }
}

fn lenient_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn lenient_string(value: &Value) -> Option<String> {
    value.as_str().map(str::to_string)
}

/// Parse raw oracle text against the nodes that were sent.
///
/// Accepts bare JSON, fenced JSON, or JSON surrounded by prose.
pub fn parse_response(text: &str, nodes: &[NodeDescriptor]) -> anyhow::Result<OracleResponse> {
    let raw = extract_response(text)?;

    let mut modifications = Vec::with_capacity(raw.modifications.len());
    for (position, value) in raw.modifications.iter().enumerate() {
        let Some(proposal) = RawProposal::from_value(value) else {
            warn!("Dropping proposal {}: not a JSON object", position);
            continue;
        };
        let index = proposal.node_index.unwrap_or(position as i64);
        let Some(node) = usize::try_from(index).ok().and_then(|i| nodes.get(i)) else {
            warn!(
                "Dropping proposal for node {} (batch has {} nodes)",
                index,
                nodes.len()
            );
            continue;
        };
        modifications.push(fill_defaults(proposal, node));
    }

    let batch_confidence = clamp_confidence(raw.batch_confidence.as_ref().and_then(lenient_f64))
        .unwrap_or_else(|| {
        if modifications.is_empty() {
            DEFAULT_CONFIDENCE
        } else {
            modifications.iter().map(|m| m.confidence).sum::<f64>() / modifications.len() as f64
        }
    });

    Ok(OracleResponse {
        modifications,
        overall_strategy: raw
            .overall_strategy
            .as_ref()
            .and_then(lenient_string)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "unspecified".to_string()),
        batch_confidence,
    })
}

fn fill_defaults(raw: RawProposal, node: &NodeDescriptor) -> ModificationProposal {
    let mut warnings = raw.warnings;
    let mut should_apply = raw.should_apply.unwrap_or(true);

    let modified_content = match raw.modified_content {
        Some(content) => content,
        None => {
            warn!(node = node.index, "Proposal has no modifiedContent; not applying");
            warnings.push("missing modifiedContent".to_string());
            should_apply = false;
            String::new()
        }
    };

    ModificationProposal {
        node_index: node.index,
        original_snippet: raw.original_snippet,
        modified_snippet: raw.modified_snippet,
        original_content: raw
            .original_content
            .unwrap_or_else(|| node.content.clone()),
        modified_content,
        reasoning: raw.reasoning.unwrap_or_default(),
        confidence: clamp_confidence(raw.confidence).unwrap_or(DEFAULT_CONFIDENCE),
        should_apply,
        strategy: raw
            .strategy
            .as_deref()
            .map(ProposalStrategy::from_label)
            .unwrap_or(ProposalStrategy::Unspecified),
        warnings,
    }
}

fn clamp_confidence(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite()).map(|v| v.clamp(0.0, 1.0))
}

fn extract_response(text: &str) -> anyhow::Result<RawResponse> {
    let trimmed = text.trim();
    let mut last_error = match serde_json::from_str::<RawResponse>(trimmed) {
        Ok(raw) => return Ok(raw),
        Err(err) => err.to_string(),
    };

    for candidate in json_object_candidates(trimmed).into_iter().take(MAX_JSON_CANDIDATES) {
        match serde_json::from_str::<RawResponse>(&candidate) {
            Ok(raw) => return Ok(raw),
            Err(err) => last_error = err.to_string(),
        }
    }

    Err(OracleError::Malformed(last_error).into())
}

/// Balanced top-level `{...}` blocks in order of appearance.
///
/// Objects nested inside an earlier `{` are never candidates, even when the
/// outer object is cut off.
fn json_object_candidates(content: &str) -> Vec<String> {
    top_level_object_starts(content)
        .into_iter()
        .filter_map(|idx| extract_balanced_json_from(content, idx))
        .collect()
}

fn top_level_object_starts(content: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in content.char_indices() {
        // Prose between objects: quotes and stray closers mean nothing here.
        if depth == 0 {
            if ch == '{' {
                starts.push(idx);
                depth = 1;
            }
            continue;
        }

        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => depth -= 1,
            _ => {}
        }
    }
    starts
}

fn extract_balanced_json_from(content: &str, start: usize) -> Option<String> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in content[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
                continue;
            }
            if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(ch) {
                    return None;
                }
                if stack.is_empty() {
                    let end = start + offset + ch.len_utf8();
                    return Some(content[start..end].to_string());
                }
            }
            _ => {}
        }
    }
    None
}
