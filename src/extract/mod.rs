//! Tree extraction of text-bearing nodes
//!
//! Each candidate file is parsed with tree-sitter and walked for text units
//! (element text, string attributes, string literals). A unit containing the
//! whole phrase is an exact hit; when a file has none, runs of neighbouring
//! units that jointly spell the phrase are matched as fragmented text.
//! Files without a usable tree are scanned with a regex instead.

pub mod fallback;
pub mod fragments;
pub mod parser;
pub mod snippet;

use crate::config::Config;
use crate::scan::{CandidateFile, Language};
use crate::util::{collapse_whitespace, dedup_nodes, phrase_words, LineIndex};
use parser::TextUnit;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// What kind of source construct a node came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Free text inside an element
    Text,
    /// String-valued attribute or JSX prop
    Attribute,
    /// Generic string literal
    StringLiteral,
    /// Several units that jointly spell the phrase
    Fragmented,
    /// Regex hit in a file without a usable tree
    LineMatch,
}

impl NodeKind {
    fn relevance(&self) -> f64 {
        match self {
            NodeKind::Text => 1.0,
            NodeKind::Attribute => 0.9,
            NodeKind::StringLiteral => 0.8,
            NodeKind::Fragmented => 0.9,
            NodeKind::LineMatch => 0.5,
        }
    }
}

/// One fragment of a fragmented node, in document order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentPiece {
    pub text: String,
    pub start_line: usize,
    pub end_line: usize,
    pub start_column: usize,
    pub end_column: usize,
    pub word_count: usize,
}

/// A located occurrence of the search phrase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedNode {
    pub node_kind: NodeKind,
    pub content: String,
    pub file_path: PathBuf,
    pub absolute_path: PathBuf,
    pub start_line: usize,
    pub end_line: usize,
    pub start_column: usize,
    pub end_column: usize,
    pub context_before: Vec<String>,
    pub context_after: Vec<String>,
    pub relevance_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment_sequence: Option<Vec<FragmentPiece>>,
    /// Source regenerated from the syntax tree around the node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl ExtractedNode {
    pub fn is_fragmented(&self) -> bool {
        self.fragment_sequence.is_some()
    }
}

/// Extract and deduplicate nodes from every candidate
pub fn extract_nodes(
    candidates: &[CandidateFile],
    phrase: &str,
    config: &Config,
) -> Vec<ExtractedNode> {
    let mut nodes = Vec::new();
    for candidate in candidates {
        let content = match std::fs::read_to_string(&candidate.absolute_path) {
            Ok(c) => c,
            Err(err) => {
                warn!(path = %candidate.absolute_path.display(), "Failed to read candidate: {}", err);
                continue;
            }
        };
        nodes.extend(extract_from_content(
            &candidate.relative_path,
            &candidate.absolute_path,
            &content,
            candidate.file_kind,
            phrase,
            config,
        ));
    }
    dedup_nodes(nodes)
}

/// Extract nodes from one file's content
pub fn extract_from_content(
    relative: &Path,
    absolute: &Path,
    content: &str,
    language: Language,
    phrase: &str,
    config: &Config,
) -> Vec<ExtractedNode> {
    let builder = NodeBuilder::new(relative, absolute, content, config);

    let Some(tree) = parser::parse(content, language) else {
        if language.has_grammar() {
            warn!(path = %relative.display(), "Parser produced no tree; using regex scan");
        }
        return regex_nodes(&builder, phrase);
    };

    let root = tree.root_node();
    let units = parser::collect_units(root, content);
    let phrase_lower = collapse_whitespace(phrase).to_lowercase();
    if phrase_lower.is_empty() {
        return Vec::new();
    }

    let exact: Vec<ExtractedNode> = units
        .iter()
        .filter(|u| collapse_whitespace(&u.text).to_lowercase().contains(&phrase_lower))
        .map(|u| builder.single(u))
        .collect();
    if !exact.is_empty() {
        return exact;
    }

    let words = phrase_words(phrase);
    let unit_words: Vec<Vec<String>> = units.iter().map(|u| phrase_words(&u.text)).collect();
    let fragmented: Vec<ExtractedNode> = fragments::find_sequences(
        &unit_words,
        &words,
        config.fragment_lookahead,
        config.fragment_min_coverage,
    )
    .into_iter()
    .map(|m| {
        let pieces: Vec<&TextUnit> = m.units.iter().map(|&i| &units[i]).collect();
        let snippet = pieces.first().zip(pieces.last()).and_then(|(first, last)| {
            parser::common_element_range(root, first.start_byte, last.end_byte)
        });
        builder.fragmented(&pieces, m.coverage(words.len()), snippet)
    })
    .collect();

    // Text inside ERROR regions never becomes a unit.
    if fragmented.is_empty() && root.has_error() {
        debug!(path = %relative.display(), "Syntax errors and no tree matches; using regex scan");
        return regex_nodes(&builder, phrase);
    }
    fragmented
}

fn regex_nodes(builder: &NodeBuilder, phrase: &str) -> Vec<ExtractedNode> {
    fallback::scan(builder.content, phrase)
        .into_iter()
        .map(|(start, end)| builder.line_match(start, end))
        .collect()
}

/// Shared per-file state for building nodes
struct NodeBuilder<'a> {
    relative: &'a Path,
    absolute: &'a Path,
    content: &'a str,
    lines: Vec<&'a str>,
    index: LineIndex,
    context_lines: usize,
}

impl<'a> NodeBuilder<'a> {
    fn new(relative: &'a Path, absolute: &'a Path, content: &'a str, config: &Config) -> Self {
        Self {
            relative,
            absolute,
            content,
            lines: content.lines().collect(),
            index: LineIndex::new(content),
            context_lines: config.context_lines,
        }
    }

    fn node(
        &self,
        kind: NodeKind,
        text: String,
        start_byte: usize,
        end_byte: usize,
        relevance: f64,
    ) -> ExtractedNode {
        let (start_line, start_column) = self.index.position(start_byte);
        let (end_line, end_column) = self.index.position(end_byte);
        let (context_before, context_after) =
            snippet::surrounding_lines(&self.lines, start_line, end_line, self.context_lines);

        ExtractedNode {
            node_kind: kind,
            content: text,
            file_path: self.relative.to_path_buf(),
            absolute_path: self.absolute.to_path_buf(),
            start_line,
            end_line,
            start_column,
            end_column,
            context_before,
            context_after,
            relevance_score: relevance,
            fragment_sequence: None,
            snippet: None,
        }
    }

    fn slice(&self, range: Option<(usize, usize)>) -> Option<String> {
        range.and_then(|(s, e)| self.content.get(s..e)).map(str::to_string)
    }

    fn single(&self, unit: &TextUnit) -> ExtractedNode {
        let mut node = self.node(
            unit.kind,
            unit.text.clone(),
            unit.start_byte,
            unit.end_byte,
            unit.kind.relevance(),
        );
        node.snippet = self.slice(unit.snippet);
        node
    }

    fn fragmented(
        &self,
        pieces: &[&TextUnit],
        coverage: f64,
        snippet: Option<(usize, usize)>,
    ) -> ExtractedNode {
        let text = pieces
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let start = pieces.first().map(|p| p.start_byte).unwrap_or(0);
        let end = pieces.last().map(|p| p.end_byte).unwrap_or(start);

        let mut node = self.node(
            NodeKind::Fragmented,
            text,
            start,
            end,
            NodeKind::Fragmented.relevance() * coverage,
        );
        node.fragment_sequence = Some(
            pieces
                .iter()
                .map(|p| {
                    let (start_line, start_column) = self.index.position(p.start_byte);
                    let (end_line, end_column) = self.index.position(p.end_byte);
                    FragmentPiece {
                        text: p.text.clone(),
                        start_line,
                        end_line,
                        start_column,
                        end_column,
                        word_count: p.text.split_whitespace().count(),
                    }
                })
                .collect(),
        );
        node.snippet = self.slice(snippet);
        node
    }

    fn line_match(&self, start: usize, end: usize) -> ExtractedNode {
        let text = self.content[start..end].to_string();
        self.node(NodeKind::LineMatch, text, start, end, NodeKind::LineMatch.relevance())
    }
}
