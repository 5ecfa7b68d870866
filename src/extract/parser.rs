//! Tree-sitter parsing and text-unit collection

use super::NodeKind;
use crate::scan::Language;
use std::cell::RefCell;
use tree_sitter::{Node, Parser, Tree, TreeCursor};

// ═══════════════════════════════════════════════════════════════════════════
//  THREAD-LOCAL PARSER POOL
// ═══════════════════════════════════════════════════════════════════════════
//
// Tree-sitter parsers are expensive to create but can be reused for multiple
// files of the same language. Each thread keeps its own pre-configured set.

thread_local! {
    static HTML_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        // Ignore error here - parse() then yields None and the caller falls back
        let _ = p.set_language(&tree_sitter_html::LANGUAGE.into());
        p
    });

    static JS_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_javascript::LANGUAGE.into());
        p
    });

    static TS_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into());
        p
    });

    static TSX_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_typescript::LANGUAGE_TSX.into());
        p
    });

    static PYTHON_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_python::LANGUAGE.into());
        p
    });

    static RUST_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_rust::LANGUAGE.into());
        p
    });

    static GO_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_go::LANGUAGE.into());
        p
    });
}

/// Parse content using the pooled parser for `language`
pub(crate) fn parse(content: &str, language: Language) -> Option<Tree> {
    match language {
        Language::Html => HTML_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::JavaScript => JS_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::TypeScript => TS_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::Tsx => TSX_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::Python => PYTHON_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::Rust => RUST_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::Go => GO_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::PlainText => None,
    }
}

/// Snippets larger than this are replaced by a line window
pub(crate) const MAX_SNIPPET_BYTES: usize = 2000;

const TEXT_KINDS: &[&str] = &["text", "jsx_text"];

const ELEMENT_KINDS: &[&str] = &[
    "element",
    "script_element",
    "style_element",
    "jsx_element",
    "jsx_self_closing_element",
];

const STRING_KINDS: &[&str] = &[
    "string",
    "template_string",
    "string_literal",
    "raw_string_literal",
    "interpreted_string_literal",
];

const SKIPPED_KINDS: &[&str] = &["comment", "raw_text", "line_comment", "block_comment"];

/// One text-bearing tree node, trimmed to its literal text
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TextUnit {
    pub kind: NodeKind,
    pub text: String,
    pub start_byte: usize,
    pub end_byte: usize,
    /// Byte range of the regenerated enclosing source, when small enough
    pub snippet: Option<(usize, usize)>,
}

/// Collect text units in document order
pub(crate) fn collect_units(root: Node, content: &str) -> Vec<TextUnit> {
    let mut units = Vec::new();
    let mut cursor = root.walk();
    collect_recursive(&mut cursor, content, &mut units);
    units
}

fn collect_recursive(cursor: &mut TreeCursor, content: &str, units: &mut Vec<TextUnit>) {
    loop {
        let node = cursor.node();
        let kind = node.kind();
        let mut descend = true;

        if TEXT_KINDS.contains(&kind) {
            push_unit(units, content, NodeKind::Text, node, node.byte_range());
            descend = false;
        } else if kind == "attribute_value" {
            push_unit(units, content, NodeKind::Attribute, node, node.byte_range());
            descend = false;
        } else if STRING_KINDS.contains(&kind) {
            let inner = string_inner_range(node, content);
            if is_jsx_attribute_value(node) {
                push_unit(units, content, NodeKind::Attribute, node, inner);
            } else if content[inner.clone()].trim().chars().count() > 3 {
                push_unit(units, content, NodeKind::StringLiteral, node, inner);
            }
            descend = false;
        } else if SKIPPED_KINDS.contains(&kind) {
            descend = false;
        }

        if descend && cursor.goto_first_child() {
            collect_recursive(cursor, content, units);
            cursor.goto_parent();
        }

        if !cursor.goto_next_sibling() {
            break;
        }
    }
}

fn push_unit(
    units: &mut Vec<TextUnit>,
    content: &str,
    kind: NodeKind,
    node: Node,
    range: std::ops::Range<usize>,
) {
    let Some(raw) = content.get(range.clone()) else {
        return;
    };
    let trimmed_start = raw.len() - raw.trim_start().len();
    let text = raw.trim();
    if text.is_empty() {
        return;
    }
    let start_byte = range.start + trimmed_start;

    units.push(TextUnit {
        kind,
        text: text.to_string(),
        start_byte,
        end_byte: start_byte + text.len(),
        snippet: snippet_range(node, kind),
    });
}

/// Range between the quotes of a string node
fn string_inner_range(node: Node, content: &str) -> std::ops::Range<usize> {
    let mut cursor = node.walk();
    let inner: Vec<Node> = node
        .named_children(&mut cursor)
        .filter(|c| c.kind().contains("content") || c.kind() == "string_fragment")
        .collect();
    if let (Some(first), Some(last)) = (inner.first(), inner.last()) {
        return first.start_byte()..last.end_byte();
    }

    let range = node.byte_range();
    let text = &content[range.clone()];
    let is_quote = |c: char| c == '"' || c == '\'' || c == '`';
    match (text.find(is_quote), text.rfind(is_quote)) {
        (Some(open), Some(close)) if open < close => range.start + open + 1..range.start + close,
        _ => range,
    }
}

fn is_jsx_attribute_value(node: Node) -> bool {
    let Some(parent) = node.parent() else {
        return false;
    };
    match parent.kind() {
        "jsx_attribute" => true,
        "jsx_expression" => parent
            .parent()
            .map(|gp| gp.kind() == "jsx_attribute")
            .unwrap_or(false),
        _ => false,
    }
}

/// Source range regenerated for a single unit
fn snippet_range(node: Node, kind: NodeKind) -> Option<(usize, usize)> {
    let target = match kind {
        NodeKind::Text => nearest_ancestor(node, ELEMENT_KINDS),
        NodeKind::Attribute => nearest_ancestor(node, &["attribute", "jsx_attribute"]),
        _ => node.parent(),
    }
    .unwrap_or(node);

    bounded(target).or_else(|| bounded(node))
}

/// Nearest element containing the whole byte range, for fragment sequences
pub(crate) fn common_element_range(root: Node, start: usize, end: usize) -> Option<(usize, usize)> {
    let spanning = root.descendant_for_byte_range(start, end)?;
    let element = if ELEMENT_KINDS.contains(&spanning.kind()) {
        spanning
    } else {
        nearest_ancestor(spanning, ELEMENT_KINDS).unwrap_or(spanning)
    };
    bounded(element).or_else(|| bounded(spanning))
}

fn nearest_ancestor<'tree>(node: Node<'tree>, kinds: &[&str]) -> Option<Node<'tree>> {
    let mut current = node.parent();
    while let Some(n) = current {
        if kinds.contains(&n.kind()) {
            return Some(n);
        }
        current = n.parent();
    }
    None
}

fn bounded(node: Node) -> Option<(usize, usize)> {
    let range = node.byte_range();
    (range.len() <= MAX_SNIPPET_BYTES).then_some((range.start, range.end))
}
