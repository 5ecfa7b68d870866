//! Text-level replacement strategies
//!
//! Each function takes the current in-memory file content and returns the
//! rewritten content, or `None` when its preconditions do not hold. Nothing
//! here trusts recorded positions without checking the text at them first.

use crate::extract::FragmentPiece;
use crate::util::{collapse_whitespace, LineIndex};
use regex::RegexBuilder;
use std::ops::Range;

/// Exact snippet swap at the occurrence nearest `line`
pub(crate) fn snippet_exact(
    content: &str,
    original: &str,
    modified: &str,
    line: usize,
) -> Option<String> {
    let start = nearest_occurrence(content, original, line)?;
    Some(splice(content, start..start + original.len(), modified))
}

/// Snippet swap after collapsing whitespace, confined to a single line
pub(crate) fn snippet_normalized(
    content: &str,
    original: &str,
    modified: &str,
    line: usize,
) -> Option<String> {
    let target = collapse_whitespace(original);
    if target.is_empty() {
        return None;
    }
    let replacement = collapse_whitespace(modified);
    let lines = line_ranges(content);

    for idx in lines_by_distance(lines.len(), line) {
        let range = lines[idx].clone();
        let text = &content[range.clone()];
        let collapsed = collapse_whitespace(text);
        if let Some(found) = collapsed.find(&target) {
            let indent = &text[..text.len() - text.trim_start().len()];
            let new_line = format!(
                "{}{}{}{}",
                indent,
                &collapsed[..found],
                replacement,
                &collapsed[found + target.len()..]
            );
            return Some(splice(content, range, &new_line));
        }
    }
    None
}

/// Spread `modified` over the fragments by their original word counts.
///
/// Every fragment must still be found on its recorded lines before any is
/// touched; replacements then run from the last fragment to the first.
pub(crate) fn redistribute(
    content: &str,
    pieces: &[FragmentPiece],
    modified: &str,
) -> Option<String> {
    if pieces.is_empty() {
        return None;
    }
    let lines = line_ranges(content);
    let spans = pieces
        .iter()
        .map(|piece| locate_piece(content, &lines, piece))
        .collect::<Option<Vec<_>>>()?;
    if spans.windows(2).any(|pair| pair[0].end > pair[1].start) {
        return None;
    }

    let words: Vec<&str> = modified.split_whitespace().collect();
    let texts = distribute(&words, pieces);

    let mut out = content.to_string();
    for (span, text) in spans.into_iter().zip(texts).rev() {
        out.replace_range(span, &text);
    }
    Some(out)
}

/// Literal swap at the occurrence nearest `line`
pub(crate) fn direct(content: &str, original: &str, modified: &str, line: usize) -> Option<String> {
    snippet_exact(content, original, modified, line)
}

/// Trimmed swap on the recorded line or up to two lines away, then the
/// same search case-insensitively
pub(crate) fn line_fallback(
    content: &str,
    original: &str,
    modified: &str,
    line: usize,
) -> Option<String> {
    let needle = original.trim();
    if needle.is_empty() {
        return None;
    }
    let replacement = modified.trim();
    let lines = line_ranges(content);
    let order: Vec<usize> = [0i64, -1, 1, -2, 2]
        .iter()
        .filter_map(|delta| usize::try_from(line as i64 - 1 + delta).ok())
        .filter(|idx| *idx < lines.len())
        .collect();

    for &idx in &order {
        let range = lines[idx].clone();
        if let Some(found) = content[range.clone()].find(needle) {
            let start = range.start + found;
            return Some(splice(content, start..start + needle.len(), replacement));
        }
    }

    let pattern = RegexBuilder::new(&regex::escape(needle))
        .case_insensitive(true)
        .build()
        .ok()?;
    for &idx in &order {
        let range = lines[idx].clone();
        if let Some(m) = pattern.find(&content[range.clone()]) {
            let start = range.start + m.start();
            return Some(splice(content, start..range.start + m.end(), replacement));
        }
    }
    None
}

/// Byte offset of the occurrence whose line is closest to `line`; first on ties
fn nearest_occurrence(content: &str, needle: &str, line: usize) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    let index = LineIndex::new(content);
    content
        .match_indices(needle)
        .map(|(pos, _)| pos)
        .min_by_key(|&pos| index.position(pos).0.abs_diff(line))
}

fn splice(content: &str, range: Range<usize>, replacement: &str) -> String {
    let mut out = String::with_capacity(content.len() + replacement.len());
    out.push_str(&content[..range.start]);
    out.push_str(replacement);
    out.push_str(&content[range.end..]);
    out
}

/// Byte range of each line, without the line terminator
fn line_ranges(content: &str) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    for line in content.split_inclusive('\n') {
        let body = line.trim_end_matches('\n').trim_end_matches('\r');
        ranges.push(start..start + body.len());
        start += line.len();
    }
    ranges
}

/// Line indices (0-based) ordered by distance from a 1-based line
fn lines_by_distance(count: usize, line: usize) -> Vec<usize> {
    let target = line.saturating_sub(1);
    let mut order: Vec<usize> = (0..count).collect();
    order.sort_by_key(|idx| idx.abs_diff(target));
    order
}

fn locate_piece(content: &str, lines: &[Range<usize>], piece: &FragmentPiece) -> Option<Range<usize>> {
    if piece.text.is_empty() {
        return None;
    }
    let first = lines.get(piece.start_line.checked_sub(1)?)?;
    let last = lines.get(piece.end_line.checked_sub(1)?)?;
    let region = first.start..last.end;

    let recorded = first.start + piece.start_column;
    if recorded + piece.text.len() <= region.end
        && content
            .get(recorded..)
            .is_some_and(|rest| rest.starts_with(&piece.text))
    {
        return Some(recorded..recorded + piece.text.len());
    }

    content[region.clone()]
        .find(&piece.text)
        .map(|found| region.start + found..region.start + found + piece.text.len())
}

/// Each fragment gets as many words as it had; the last takes the rest
fn distribute(words: &[&str], pieces: &[FragmentPiece]) -> Vec<String> {
    let mut rest = words;
    pieces
        .iter()
        .enumerate()
        .map(|(i, piece)| {
            let take = if i + 1 == pieces.len() {
                rest.len()
            } else {
                piece.word_count.min(rest.len())
            };
            let (head, tail) = rest.split_at(take);
            rest = tail;
            head.join(" ")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn piece(text: &str, line: usize, column: usize) -> FragmentPiece {
        FragmentPiece {
            text: text.to_string(),
            start_line: line,
            end_line: line,
            start_column: column,
            end_column: column + text.len(),
            word_count: text.split_whitespace().count(),
        }
    }

    #[test]
    fn test_nearest_occurrence_prefers_closest_line() {
        let content = "go\nx\ngo\nx\nx\ngo\n";
        assert_eq!(nearest_occurrence(content, "go", 1), Some(0));
        assert_eq!(nearest_occurrence(content, "go", 5), Some(12));
        // Lines 1 and 3 are equally near line 2.
        assert_eq!(nearest_occurrence(content, "go", 2), Some(0));
        assert_eq!(nearest_occurrence(content, "", 2), None);
    }

    #[test]
    fn test_snippet_normalized_keeps_indent() {
        let content = "<div>\n    <p>Sign   in</p>\n</div>\n";
        let out = snippet_normalized(content, "<p>Sign in</p>", "<p>Log\n in</p>", 2).unwrap();
        assert_eq!(out, "<div>\n    <p>Log in</p>\n</div>\n");
        assert!(snippet_normalized(content, "<p>Sign up</p>", "x", 2).is_none());
    }

    #[test]
    fn test_redistribute_by_word_count() {
        let content = "<p>Buy <b>it now</b> today</p>";
        let pieces = vec![piece("Buy", 1, 3), piece("it now", 1, 10), piece("today", 1, 21)];
        let out = redistribute(content, &pieces, "Purchase this item immediately").unwrap();
        assert_eq!(out, "<p>Purchase <b>this item</b> immediately</p>");

        // Fewer words than fragments leaves trailing fragments empty.
        let out = redistribute(content, &pieces, "Go").unwrap();
        assert_eq!(out, "<p>Go <b></b> </p>");
    }

    #[test]
    fn test_redistribute_requires_every_fragment() {
        let content = "<p>Buy <b>it now</b></p>";
        let pieces = vec![piece("Buy", 1, 3), piece("later", 1, 10)];
        assert!(redistribute(content, &pieces, "x y").is_none());
    }

    #[test]
    fn test_redistribute_recovers_shifted_column() {
        let content = "  <h1>hi<span>world</span></h1>";
        let pieces = vec![piece("hi", 1, 4), piece("world", 1, 12)];
        let out = redistribute(content, &pieces, "hello planet").unwrap();
        assert_eq!(out, "  <h1>hello<span>planet</span></h1>");
    }

    #[test]
    fn test_line_fallback_searches_nearby_lines() {
        let content = "a\nb\nClick here\nc\n";
        assert_eq!(
            line_fallback(content, "  Click here ", "Tap here", 2).unwrap(),
            "a\nb\nTap here\nc\n"
        );
        assert!(line_fallback(content, "Click here", "Tap", 6).is_none());
    }

    #[test]
    fn test_line_fallback_case_insensitive_retry() {
        let content = "Press SIGN IN now\n";
        assert_eq!(
            line_fallback(content, "sign in", "Log in", 1).unwrap(),
            "Press Log in now\n"
        );
    }

    #[test]
    fn test_line_ranges_strip_terminators() {
        let content = "ab\r\ncd\n\nef";
        let ranges = line_ranges(content);
        let lines: Vec<&str> = ranges.iter().map(|r| &content[r.clone()]).collect();
        assert_eq!(lines, vec!["ab", "cd", "", "ef"]);
    }
}
