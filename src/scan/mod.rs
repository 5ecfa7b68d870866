//! Source discovery and candidate shortlisting
//!
//! Walks the project tree and keeps only files whose content plausibly
//! contains the search phrase. This runs before any parsing, so it is the
//! main guard against parsing a whole large tree.

use crate::config::Config;
use crate::util::phrase_words;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Languages the extractor knows how to parse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    Html,
    JavaScript,
    TypeScript,
    Tsx,
    Python,
    Rust,
    Go,
    /// Scanned with the regex fallback only
    PlainText,
}

impl Language {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "html" | "htm" | "vue" | "svelte" => Language::Html,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "ts" | "mts" | "cts" => Language::TypeScript,
            "tsx" => Language::Tsx,
            "py" | "pyi" => Language::Python,
            "rs" => Language::Rust,
            "go" => Language::Go,
            _ => Language::PlainText,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(Language::PlainText)
    }

    /// Whether element markers (`<tag>`) delimit text in this language
    pub fn is_markup(&self) -> bool {
        matches!(self, Language::Html | Language::JavaScript | Language::Tsx)
    }

    pub fn has_grammar(&self) -> bool {
        !matches!(self, Language::PlainText)
    }
}

/// How a file's content was matched against the phrase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    Exact,
    CaseInsensitive,
    KeyPhrase,
    WordMajority,
}

impl MatchStrategy {
    pub fn confidence(&self) -> f64 {
        match self {
            MatchStrategy::Exact => 1.0,
            MatchStrategy::CaseInsensitive => 0.95,
            MatchStrategy::KeyPhrase => 0.7,
            MatchStrategy::WordMajority => 0.6,
        }
    }
}

/// A file shortlisted for extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFile {
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub file_kind: Language,
    pub strategy: MatchStrategy,
    pub confidence: f64,
}

/// Phrase-derived lookup material, computed once per run
#[derive(Debug, Clone)]
pub struct PhraseMatcher {
    phrase: String,
    phrase_lower: String,
    key_phrases: Vec<String>,
    majority_words: Vec<String>,
    key_phrase_threshold: f64,
    word_majority_threshold: f64,
}

impl PhraseMatcher {
    pub fn new(phrase: &str, config: &Config) -> Self {
        let words = phrase_words(phrase);

        let mut key_phrases: Vec<String> =
            words.iter().filter(|w| w.len() > 3).cloned().collect();
        for window in [2usize, 3] {
            if words.len() >= window {
                key_phrases.extend(words.windows(window).map(|w| w.join(" ")));
            }
        }

        let majority_words = words.iter().filter(|w| w.len() > 2).cloned().collect();

        Self {
            phrase: phrase.trim().to_string(),
            phrase_lower: phrase.trim().to_lowercase(),
            key_phrases,
            majority_words,
            key_phrase_threshold: config.key_phrase_threshold,
            word_majority_threshold: config.word_majority_threshold,
        }
    }

    /// Test content against the graded strategies, strictest first
    pub fn match_content(&self, content: &str) -> Option<MatchStrategy> {
        if self.phrase.is_empty() {
            return None;
        }
        if content.contains(&self.phrase) {
            return Some(MatchStrategy::Exact);
        }

        let lower = content.to_lowercase();
        if lower.contains(&self.phrase_lower) {
            return Some(MatchStrategy::CaseInsensitive);
        }

        if !self.key_phrases.is_empty() {
            let hits = self
                .key_phrases
                .iter()
                .filter(|p| lower.contains(p.as_str()))
                .count();
            if hits as f64 / self.key_phrases.len() as f64 >= self.key_phrase_threshold {
                return Some(MatchStrategy::KeyPhrase);
            }
        }

        if !self.majority_words.is_empty() {
            let hits = self
                .majority_words
                .iter()
                .filter(|w| lower.contains(w.as_str()))
                .count();
            if hits as f64 / self.majority_words.len() as f64 >= self.word_majority_threshold {
                return Some(MatchStrategy::WordMajority);
            }
        }

        None
    }
}

/// Enumerate every file under `root` the config allows
pub fn discover_files(root: &Path, config: &Config) -> anyhow::Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(anyhow::anyhow!(
            "Project root is not a directory: {}",
            root.display()
        ));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored(e.path(), e.file_type().is_dir(), config))
    {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                debug!("Skipping unreadable entry: {}", err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !config.accepts_extension(ext) {
            continue;
        }

        let too_large = entry
            .metadata()
            .map(|m| m.len() > config.max_file_bytes)
            .unwrap_or(true);
        if too_large {
            debug!(path = %path.display(), "Skipping oversized or unreadable file");
            continue;
        }

        files.push(path.to_path_buf());
    }

    Ok(files)
}

/// Shortlist the files whose content plausibly contains `phrase`
pub fn find_candidates(
    root: &Path,
    phrase: &str,
    config: &Config,
) -> anyhow::Result<Vec<CandidateFile>> {
    let files = discover_files(root, config)?;
    Ok(shortlist(root, &files, phrase, config))
}

/// Keep the discovered files whose content matches one of the strategies
pub fn shortlist(root: &Path, files: &[PathBuf], phrase: &str, config: &Config) -> Vec<CandidateFile> {
    let matcher = PhraseMatcher::new(phrase, config);

    let mut candidates: Vec<CandidateFile> = files
        .par_iter()
        .filter_map(|path| {
            let content = match std::fs::read_to_string(path) {
                Ok(c) => c,
                Err(err) => {
                    debug!(path = %path.display(), "Skipping non-UTF-8 or unreadable file: {}", err);
                    return None;
                }
            };
            let strategy = matcher.match_content(&content)?;
            Some(CandidateFile {
                relative_path: path.strip_prefix(root).unwrap_or(path).to_path_buf(),
                absolute_path: path.clone(),
                file_kind: Language::from_path(path),
                strategy,
                confidence: strategy.confidence(),
            })
        })
        .collect();

    candidates.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    info!(
        discovered = files.len(),
        candidates = candidates.len(),
        "Scanned project for \"{}\"",
        phrase
    );
    candidates
}

/// Check if a path should be skipped during the walk
fn is_ignored(path: &Path, is_dir: bool, config: &Config) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if config.is_ignored_dir(name) {
        return true;
    }
    is_dir && name.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn matcher(phrase: &str) -> PhraseMatcher {
        PhraseMatcher::new(phrase, &Config::default())
    }

    #[test]
    fn test_language_detection() {
        assert_eq!(Language::from_extension("HTML"), Language::Html);
        assert_eq!(Language::from_extension("jsx"), Language::JavaScript);
        assert_eq!(Language::from_extension("tsx"), Language::Tsx);
        assert_eq!(Language::from_extension("ts"), Language::TypeScript);
        assert_eq!(Language::from_extension("md"), Language::PlainText);
        assert!(Language::Tsx.is_markup());
        assert!(!Language::Python.is_markup());
    }

    #[test]
    fn test_strategy_order() {
        let m = matcher("Hello World");
        assert_eq!(m.match_content("<p>Hello World</p>"), Some(MatchStrategy::Exact));
        assert_eq!(
            m.match_content("<p>hello world</p>"),
            Some(MatchStrategy::CaseInsensitive)
        );
        // Key phrases are "hello", "world" and "hello world"; two of three occur.
        assert_eq!(
            m.match_content("<p>hello <b>world</b></p>"),
            Some(MatchStrategy::KeyPhrase)
        );
    }

    #[test]
    fn test_word_majority_boundary() {
        // Eight key phrases (three words, five windows), at most two occur.
        let m = matcher("quick brown fox jumps");
        assert_eq!(
            m.match_content("quick ... brown ... fox"),
            Some(MatchStrategy::WordMajority)
        );
        assert_eq!(m.match_content("quick ... fox"), None);
    }

    #[test]
    fn test_disjoint_vocabulary_rejected() {
        let m = matcher("checkout button label");
        assert_eq!(m.match_content("fn main() { println!(\"hi\"); }"), None);
    }

    #[test]
    fn test_empty_phrase_matches_nothing() {
        assert_eq!(matcher("   ").match_content("anything"), None);
    }

    #[test]
    fn test_find_candidates_selects_exact_over_partial() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("a.html"),
            "<p>The quick brown fox jumps</p>",
        )
        .unwrap();
        fs::write(dir.path().join("b.html"), "<p>A quick red fox sleeps</p>").unwrap();

        let candidates =
            find_candidates(dir.path(), "quick brown fox jumps", &Config::default()).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].relative_path, PathBuf::from("a.html"));
        assert_eq!(candidates[0].strategy, MatchStrategy::Exact);
    }

    #[test]
    fn test_ignored_dirs_and_extensions_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        fs::create_dir_all(dir.path().join(".cache")).unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("node_modules/pkg/index.js"), "'Sign in'").unwrap();
        fs::write(dir.path().join(".cache/page.html"), "Sign in").unwrap();
        fs::write(dir.path().join("src/page.html"), "Sign in").unwrap();
        fs::write(dir.path().join("src/notes.bin"), "Sign in").unwrap();

        let candidates = find_candidates(dir.path(), "Sign in", &Config::default()).unwrap();
        let paths: Vec<_> = candidates.iter().map(|c| c.relative_path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("src/page.html")]);
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(find_candidates(&missing, "x", &Config::default()).is_err());
    }
}
