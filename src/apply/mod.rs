//! Writing accepted proposals back to disk
//!
//! Proposals are grouped per file and applied bottom-up (descending start
//! line), so a replacement never moves the recorded position of one that
//! is still pending. Each proposal goes through a cascade of strategies
//! and the first that validates against the current content wins.

mod strategies;

use crate::batch::{Batch, BatchResult};
use crate::config::Config;
use crate::diff::{unified_diff, FileDiff};
use crate::extract::ExtractedNode;
use crate::oracle::{ModificationProposal, ProposalStrategy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Which strategy landed a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppliedVia {
    Snippet,
    NormalizedSnippet,
    Fragments,
    Direct,
    LineFallback,
}

impl AppliedVia {
    pub fn label(&self) -> &'static str {
        match self {
            AppliedVia::Snippet => "snippet",
            AppliedVia::NormalizedSnippet => "normalized_snippet",
            AppliedVia::Fragments => "fragments",
            AppliedVia::Direct => "direct",
            AppliedVia::LineFallback => "line_fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedEdit {
    pub file: PathBuf,
    pub start_line: usize,
    pub via: AppliedVia,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedProposal {
    pub file: PathBuf,
    pub start_line: usize,
    pub batch_id: String,
    pub node_index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileFailure {
    pub file: PathBuf,
    pub error: String,
}

/// Everything the applier did in one pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub files_modified: Vec<PathBuf>,
    pub total_replacements: usize,
    pub diffs: Vec<FileDiff>,
    pub applied: Vec<AppliedEdit>,
    pub skipped: Vec<SkippedProposal>,
    pub write_failures: Vec<FileFailure>,
}

/// A proposal paired with the node it rewrites
struct PendingEdit<'a> {
    batch_id: &'a str,
    node: &'a ExtractedNode,
    proposal: &'a ModificationProposal,
}

impl PendingEdit<'_> {
    fn skip(&self, reason: &str) -> SkippedProposal {
        SkippedProposal {
            file: self.node.file_path.clone(),
            start_line: self.node.start_line,
            batch_id: self.batch_id.to_string(),
            node_index: self.proposal.node_index,
            reason: reason.to_string(),
        }
    }
}

/// The only component that writes project files
#[derive(Debug, Clone, Copy)]
pub struct PatchApplier {
    dry_run: bool,
    generate_diffs: bool,
}

impl PatchApplier {
    pub fn new(dry_run: bool, generate_diffs: bool) -> Self {
        Self {
            dry_run,
            generate_diffs,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.dry_run, config.generate_diffs)
    }

    /// Apply every accepted proposal from successful batches
    pub fn apply(&self, batches: &[Batch], results: &[BatchResult]) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        let by_id: HashMap<&str, &Batch> =
            batches.iter().map(|b| (b.batch_id.as_str(), b)).collect();

        let mut per_file: BTreeMap<&Path, Vec<PendingEdit>> = BTreeMap::new();
        for result in results.iter().filter(|r| r.success) {
            let Some(batch) = by_id.get(result.batch_id.as_str()) else {
                warn!("Result for unknown batch {}", result.batch_id);
                continue;
            };
            for proposal in result.modifications.iter().filter(|p| p.should_apply) {
                let Some(node) = batch.nodes.get(proposal.node_index) else {
                    warn!(
                        "Proposal for node {} outside {}",
                        proposal.node_index, batch.batch_id
                    );
                    continue;
                };
                per_file
                    .entry(node.absolute_path.as_path())
                    .or_default()
                    .push(PendingEdit {
                        batch_id: &batch.batch_id,
                        node,
                        proposal,
                    });
            }
        }

        for (path, mut edits) in per_file {
            edits.sort_by(|a, b| {
                (b.node.start_line, b.node.start_column)
                    .cmp(&(a.node.start_line, a.node.start_column))
            });
            self.apply_file(path, &edits, &mut outcome);
        }

        info!(
            "Applied {} replacements across {} files ({} skipped)",
            outcome.total_replacements,
            outcome.files_modified.len(),
            outcome.skipped.len()
        );
        outcome
    }

    fn apply_file(&self, path: &Path, edits: &[PendingEdit], outcome: &mut ApplyOutcome) {
        let Some(relative) = edits.first().map(|e| e.node.file_path.clone()) else {
            return;
        };
        let original = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                warn!(path = %path.display(), "Failed to read file for patching: {}", err);
                outcome.write_failures.push(FileFailure {
                    file: relative,
                    error: err.to_string(),
                });
                return;
            }
        };

        let mut content = original.clone();
        let mut applied = Vec::new();
        for edit in edits {
            if is_noop(edit.proposal) {
                outcome.skipped.push(edit.skip("modified text equals original"));
                continue;
            }
            if edit.proposal.strategy == ProposalStrategy::Skip {
                outcome.skipped.push(edit.skip("oracle chose to skip"));
                continue;
            }
            match apply_proposal(&content, edit.node, edit.proposal) {
                Some((updated, via)) if updated != content => {
                    debug!(
                        file = %relative.display(),
                        line = edit.node.start_line,
                        "Applied via {}",
                        via.label()
                    );
                    content = updated;
                    applied.push(AppliedEdit {
                        file: relative.clone(),
                        start_line: edit.node.start_line,
                        via,
                    });
                }
                Some(_) => outcome.skipped.push(edit.skip("replacement left file unchanged")),
                None => {
                    debug!(
                        file = %relative.display(),
                        line = edit.node.start_line,
                        "No strategy matched proposal"
                    );
                    outcome.skipped.push(edit.skip("no strategy matched current content"));
                }
            }
        }

        if applied.is_empty() {
            return;
        }

        if !self.dry_run {
            if let Err(err) = fs::write(path, &content) {
                warn!(path = %path.display(), "Failed to write patched file: {}", err);
                outcome.write_failures.push(FileFailure {
                    file: relative,
                    error: err.to_string(),
                });
                return;
            }
        }

        if self.generate_diffs {
            outcome.diffs.push(FileDiff {
                diff: unified_diff(&relative.to_string_lossy(), &original, &content),
                path: relative.clone(),
            });
        }
        outcome.total_replacements += applied.len();
        outcome.applied.extend(applied);
        outcome.files_modified.push(relative);
    }
}

fn is_noop(proposal: &ModificationProposal) -> bool {
    let snippet_unchanged = match (&proposal.original_snippet, &proposal.modified_snippet) {
        (Some(original), Some(modified)) => original == modified,
        _ => true,
    };
    snippet_unchanged && proposal.original_content == proposal.modified_content
}

/// Run the strategy cascade for one proposal
fn apply_proposal(
    content: &str,
    node: &ExtractedNode,
    proposal: &ModificationProposal,
) -> Option<(String, AppliedVia)> {
    let line = node.start_line;

    if let (Some(original), Some(modified)) =
        (&proposal.original_snippet, &proposal.modified_snippet)
    {
        if let Some(updated) = strategies::snippet_exact(content, original, modified, line) {
            return Some((updated, AppliedVia::Snippet));
        }
        if let Some(updated) = strategies::snippet_normalized(content, original, modified, line) {
            return Some((updated, AppliedVia::NormalizedSnippet));
        }
    }

    if let Some(pieces) = &node.fragment_sequence {
        if let Some(updated) =
            strategies::redistribute(content, pieces, &proposal.modified_content)
        {
            return Some((updated, AppliedVia::Fragments));
        }
    }

    if let Some(updated) = strategies::direct(
        content,
        &proposal.original_content,
        &proposal.modified_content,
        line,
    ) {
        return Some((updated, AppliedVia::Direct));
    }

    strategies::line_fallback(
        content,
        &proposal.original_content,
        &proposal.modified_content,
        line,
    )
    .map(|updated| (updated, AppliedVia::LineFallback))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{extract_from_content, NodeKind};
    use crate::scan::Language;
    use tempfile::TempDir;

    fn node_at(dir: &TempDir, file: &str, line: usize, content: &str) -> ExtractedNode {
        ExtractedNode {
            node_kind: NodeKind::Text,
            content: content.to_string(),
            file_path: PathBuf::from(file),
            absolute_path: dir.path().join(file),
            start_line: line,
            end_line: line,
            start_column: 0,
            end_column: content.len(),
            context_before: vec![],
            context_after: vec![],
            relevance_score: 1.0,
            fragment_sequence: None,
            snippet: None,
        }
    }

    fn proposal(index: usize, original: &str, modified: &str) -> ModificationProposal {
        ModificationProposal {
            node_index: index,
            original_snippet: None,
            modified_snippet: None,
            original_content: original.to_string(),
            modified_content: modified.to_string(),
            reasoning: String::new(),
            confidence: 0.9,
            should_apply: true,
            strategy: ProposalStrategy::Unspecified,
            warnings: vec![],
        }
    }

    fn batch(id: &str, nodes: Vec<ExtractedNode>) -> Batch {
        Batch {
            batch_id: id.to_string(),
            search_term: "Sign in".to_string(),
            replacement_term: "Log in".to_string(),
            user_instruction: "rename".to_string(),
            nodes,
            confidence: 1.0,
        }
    }

    fn result(id: &str, modifications: Vec<ModificationProposal>) -> BatchResult {
        BatchResult {
            batch_id: id.to_string(),
            successful_modifications: modifications.len(),
            modifications,
            success: true,
            error_message: None,
            processed_nodes: 0,
            overall_strategy: "rename".to_string(),
            batch_confidence: 0.9,
        }
    }

    #[test]
    fn test_snippet_replacement_wins_over_literal_match() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.html"), "<nav>\n  <a href=\"/login\">Sign in</a>\n</nav>\n")
            .unwrap();
        let node = node_at(&dir, "a.html", 2, "Sign in");
        let mut p = proposal(0, "Sign in", "Log in");
        p.original_snippet = Some("<a href=\"/login\">Sign in</a>".to_string());
        p.modified_snippet = Some("<a href=\"/login\" class=\"cta\">Log in</a>".to_string());

        let outcome =
            PatchApplier::new(false, false).apply(&[batch("b1", vec![node])], &[result("b1", vec![p])]);

        assert_eq!(outcome.applied[0].via, AppliedVia::Snippet);
        assert_eq!(
            fs::read_to_string(dir.path().join("a.html")).unwrap(),
            "<nav>\n  <a href=\"/login\" class=\"cta\">Log in</a>\n</nav>\n"
        );
    }

    #[test]
    fn test_replacements_on_lines_10_20_30_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let original: String = (1..=35)
            .map(|i| match i {
                10 | 20 | 30 => "  <p>Sign in</p>\n".to_string(),
                _ => format!("  <!-- line {} -->\n", i),
            })
            .collect();
        fs::write(dir.path().join("page.html"), &original).unwrap();

        let nodes = vec![
            node_at(&dir, "page.html", 10, "Sign in"),
            node_at(&dir, "page.html", 20, "Sign in"),
            node_at(&dir, "page.html", 30, "Sign in"),
        ];
        let proposals = vec![
            proposal(0, "Sign in", "Sign in to your account\n  and continue"),
            proposal(1, "Sign in", "Go"),
            proposal(2, "Sign in", "Enter the members area"),
        ];
        let outcome = PatchApplier::new(false, true)
            .apply(&[batch("b1", nodes)], &[result("b1", proposals)]);

        assert_eq!(outcome.total_replacements, 3);
        assert!(outcome.skipped.is_empty());
        let written = fs::read_to_string(dir.path().join("page.html")).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines[9], "  <p>Sign in to your account");
        assert_eq!(lines[10], "  and continue</p>");
        assert_eq!(lines[20], "  <p>Go</p>");
        assert_eq!(lines[30], "  <p>Enter the members area</p>");
        assert_eq!(lines.len(), 36);
        assert_eq!(outcome.diffs.len(), 1);
        assert_eq!(outcome.diffs[0].stats(), (4, 3));
    }

    #[test]
    fn test_fragmented_heading_is_redistributed() {
        let dir = tempfile::tempdir().unwrap();
        let html = "<h1>hi<span>world</span></h1>\n";
        let path = dir.path().join("index.html");
        fs::write(&path, html).unwrap();
        let nodes = extract_from_content(
            Path::new("index.html"),
            &path,
            html,
            Language::Html,
            "hi world",
            &Config::default(),
        );
        assert!(nodes[0].is_fragmented());

        let outcome = PatchApplier::new(false, false).apply(
            &[batch("b1", nodes)],
            &[result("b1", vec![proposal(0, "hi world", "hello planet")])],
        );

        assert_eq!(outcome.applied[0].via, AppliedVia::Fragments);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "<h1>hello<span>planet</span></h1>\n"
        );
    }

    #[test]
    fn test_case_insensitive_line_fallback_near_recorded_line() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.md"), "# Notes\n\nPress SIGN IN to start.\n").unwrap();
        let node = node_at(&dir, "notes.md", 2, "sign in");
        let outcome = PatchApplier::new(false, false).apply(
            &[batch("b1", vec![node])],
            &[result("b1", vec![proposal(0, "sign in", "Log in")])],
        );

        assert_eq!(outcome.applied[0].via, AppliedVia::LineFallback);
        assert_eq!(
            fs::read_to_string(dir.path().join("notes.md")).unwrap(),
            "# Notes\n\nPress Log in to start.\n"
        );
    }

    #[test]
    fn test_misses_and_noops_are_skipped_but_file_still_written() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.html"), "<p>Sign in</p>\n<p>Sign up</p>\n").unwrap();
        let nodes = vec![
            node_at(&dir, "a.html", 1, "Sign in"),
            node_at(&dir, "a.html", 2, "Sign up"),
            node_at(&dir, "a.html", 2, "Register"),
        ];
        let mut declined = proposal(1, "Sign up", "Join");
        declined.should_apply = false;
        let proposals = vec![
            proposal(0, "Sign in", "Log in"),
            declined,
            proposal(2, "Register", "Create account"),
            proposal(1, "Sign up", "Sign up"),
        ];
        let outcome = PatchApplier::new(false, false)
            .apply(&[batch("b1", nodes)], &[result("b1", proposals)]);

        assert_eq!(outcome.total_replacements, 1);
        assert_eq!(outcome.skipped.len(), 2);
        assert!(outcome
            .skipped
            .iter()
            .any(|s| s.reason == "no strategy matched current content" && s.node_index == 2));
        assert!(outcome
            .skipped
            .iter()
            .any(|s| s.reason == "modified text equals original" && s.node_index == 1));
        assert_eq!(
            fs::read_to_string(dir.path().join("a.html")).unwrap(),
            "<p>Log in</p>\n<p>Sign up</p>\n"
        );
    }

    #[test]
    fn test_dry_run_reports_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.html"), "<p>Sign in</p>\n").unwrap();
        let node = node_at(&dir, "a.html", 1, "Sign in");
        let outcome = PatchApplier::new(true, true).apply(
            &[batch("b1", vec![node])],
            &[result("b1", vec![proposal(0, "Sign in", "Log in")])],
        );

        assert_eq!(outcome.files_modified, vec![PathBuf::from("a.html")]);
        assert!(outcome.diffs[0].diff.contains("+<p>Log in</p>"));
        assert_eq!(
            fs::read_to_string(dir.path().join("a.html")).unwrap(),
            "<p>Sign in</p>\n"
        );
    }

    #[test]
    fn test_unreadable_file_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.html"), "<p>Sign in</p>\n").unwrap();
        let nodes = vec![
            node_at(&dir, "a.html", 1, "Sign in"),
            node_at(&dir, "b.html", 1, "Sign in"),
        ];
        let proposals = vec![
            proposal(0, "Sign in", "Log in"),
            proposal(1, "Sign in", "Log in"),
        ];
        let outcome = PatchApplier::new(false, false)
            .apply(&[batch("b1", nodes)], &[result("b1", proposals)]);

        assert_eq!(outcome.write_failures.len(), 1);
        assert_eq!(outcome.write_failures[0].file, PathBuf::from("a.html"));
        assert_eq!(outcome.files_modified, vec![PathBuf::from("b.html")]);
    }

    #[test]
    fn test_failed_batches_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.html"), "<p>Sign in</p>\n").unwrap();
        let node = node_at(&dir, "a.html", 1, "Sign in");
        let mut failed = result("b1", vec![proposal(0, "Sign in", "Log in")]);
        failed.success = false;
        let outcome = PatchApplier::new(false, false).apply(&[batch("b1", vec![node])], &[failed]);
        assert_eq!(outcome, ApplyOutcome::default());
    }
}
