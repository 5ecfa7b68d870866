//! Regex scanning for files without a usable syntax tree

use regex::{Regex, RegexBuilder};

/// Build a case-insensitive pattern for the phrase that tolerates any
/// whitespace and inline tags between words.
pub(crate) fn phrase_pattern(phrase: &str) -> Option<Regex> {
    let words: Vec<String> = phrase.split_whitespace().map(regex::escape).collect();
    if words.is_empty() {
        return None;
    }
    RegexBuilder::new(&words.join(r"(?:\s|<[^<>]*>)+"))
        .case_insensitive(true)
        .build()
        .ok()
}

/// Byte ranges of every phrase occurrence
pub(crate) fn scan(content: &str, phrase: &str) -> Vec<(usize, usize)> {
    let Some(pattern) = phrase_pattern(phrase) else {
        return Vec::new();
    };
    pattern
        .find_iter(content)
        .map(|m| (m.start(), m.end()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_tolerates_tags_and_case() {
        let content = "# Title\n\nSay Hello <em>World</em> twice: hello\n  world.";
        let hits: Vec<&str> = scan(content, "hello world")
            .into_iter()
            .map(|(s, e)| &content[s..e])
            .collect();
        assert_eq!(hits, vec!["Hello <em>World", "hello\n  world"]);
    }

    #[test]
    fn test_scan_escapes_regex_metacharacters() {
        let content = "price (USD) is $5.00";
        assert_eq!(scan(content, "(USD) is $5.00").len(), 1);
        assert!(scan(content, "").is_empty());
    }
}
