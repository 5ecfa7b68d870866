//! Text helpers, node dedup and hashing shared across stages

use crate::extract::ExtractedNode;
use std::collections::HashSet;

pub fn truncate(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }

    if max <= 3 {
        return s.chars().take(max).collect();
    }

    let truncated: String = s.chars().take(max - 3).collect();
    format!("{}...", truncated)
}

/// Collapse every run of whitespace (including newlines) to a single space and trim.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercased whitespace-separated words with surrounding punctuation stripped.
pub fn phrase_words(s: &str) -> Vec<String> {
    s.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Canonical identity of an extracted node: file, line range, trimmed content.
pub fn node_key(node: &ExtractedNode) -> (String, String, String) {
    (
        node.file_path.to_string_lossy().to_string(),
        format!("{}-{}", node.start_line, node.end_line),
        node.content.trim().to_string(),
    )
}

/// Drop later duplicates by `node_key`, keeping first-seen order.
pub fn dedup_nodes(nodes: Vec<ExtractedNode>) -> Vec<ExtractedNode> {
    let mut seen = HashSet::with_capacity(nodes.len());
    nodes
        .into_iter()
        .filter(|node| seen.insert(node_key(node)))
        .collect()
}

/// Stable content digest used to detect unchanged files between runs.
pub fn content_hash(content: &str) -> String {
    blake3::hash(content.as_bytes()).to_hex().to_string()
}

/// Byte offset to (1-based line, 0-based byte column) lookup.
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(content: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            content
                .bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self { line_starts }
    }

    pub fn position(&self, offset: usize) -> (usize, usize) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        (line + 1, offset - self.line_starts[line])
    }
}
