//! Batching and the oracle round-trip
//!
//! Nodes are split into fixed-size batches in extraction order. Batches are
//! sent one at a time; a failing or slow oracle call turns into a failed
//! [`BatchResult`] and processing moves on to the next batch.

use crate::extract::snippet::line_window;
use crate::extract::ExtractedNode;
use crate::oracle::{parse_response, ModificationProposal, NodeDescriptor, Oracle, OracleRequest};
use crate::scan::Language;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// A group of nodes sent in one oracle call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: String,
    pub search_term: String,
    pub replacement_term: String,
    pub user_instruction: String,
    pub nodes: Vec<ExtractedNode>,
    /// Mean relevance of the nodes
    pub confidence: f64,
}

/// Outcome of one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub batch_id: String,
    pub modifications: Vec<ModificationProposal>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub processed_nodes: usize,
    pub successful_modifications: usize,
    pub overall_strategy: String,
    pub batch_confidence: f64,
}

impl BatchResult {
    fn failed(batch: &Batch, message: String) -> Self {
        Self {
            batch_id: batch.batch_id.clone(),
            modifications: Vec::new(),
            success: false,
            error_message: Some(message),
            processed_nodes: batch.nodes.len(),
            successful_modifications: 0,
            overall_strategy: "failed".to_string(),
            batch_confidence: 0.0,
        }
    }
}

/// Split nodes into ordered batches of at most `batch_size`
pub fn make_batches(
    nodes: &[ExtractedNode],
    search: &str,
    replace: &str,
    instruction: &str,
    batch_size: usize,
) -> Vec<Batch> {
    nodes
        .chunks(batch_size.max(1))
        .enumerate()
        .map(|(i, chunk)| Batch {
            batch_id: format!("batch-{:03}", i + 1),
            search_term: search.to_string(),
            replacement_term: replace.to_string(),
            user_instruction: instruction.to_string(),
            nodes: chunk.to_vec(),
            confidence: chunk.iter().map(|n| n.relevance_score).sum::<f64>() / chunk.len() as f64,
        })
        .collect()
}

/// Drives batches through an oracle
pub struct BatchOrchestrator<O: Oracle> {
    oracle: O,
    timeout: Duration,
}

impl<O: Oracle> BatchOrchestrator<O> {
    pub fn new(oracle: O, timeout: Duration) -> Self {
        Self { oracle, timeout }
    }

    /// Process every batch in order
    pub async fn run(&self, batches: &[Batch]) -> Vec<BatchResult> {
        let mut sources = SourceCache::default();
        let mut results = Vec::with_capacity(batches.len());
        for (i, batch) in batches.iter().enumerate() {
            info!(
                "Processing {} ({}/{}, {} nodes)",
                batch.batch_id,
                i + 1,
                batches.len(),
                batch.nodes.len()
            );
            let request = build_request(batch, &mut sources);
            results.push(self.process(batch, &request).await);
        }
        results
    }

    async fn process(&self, batch: &Batch, request: &OracleRequest) -> BatchResult {
        let text = match tokio::time::timeout(self.timeout, self.oracle.rewrite(request)).await {
            Ok(Ok(text)) => text,
            Ok(Err(err)) => {
                warn!(batch = %batch.batch_id, "Oracle call failed: {:#}", err);
                return BatchResult::failed(batch, format!("{:#}", err));
            }
            Err(_) => {
                warn!(batch = %batch.batch_id, "Oracle call timed out");
                return BatchResult::failed(
                    batch,
                    format!("oracle timed out after {}s", self.timeout.as_secs()),
                );
            }
        };

        match parse_response(&text, &request.nodes) {
            Ok(response) => BatchResult {
                batch_id: batch.batch_id.clone(),
                successful_modifications: response
                    .modifications
                    .iter()
                    .filter(|m| m.should_apply)
                    .count(),
                modifications: response.modifications,
                success: true,
                error_message: None,
                processed_nodes: batch.nodes.len(),
                overall_strategy: response.overall_strategy,
                batch_confidence: response.batch_confidence,
            },
            Err(err) => {
                warn!(batch = %batch.batch_id, "Unusable oracle response: {:#}", err);
                BatchResult::failed(batch, format!("{:#}", err))
            }
        }
    }
}

/// File contents read once per run for line-window snippets
#[derive(Default)]
struct SourceCache {
    files: HashMap<PathBuf, Option<String>>,
}

impl SourceCache {
    fn get(&mut self, node: &ExtractedNode) -> Option<&str> {
        self.files
            .entry(node.absolute_path.clone())
            .or_insert_with(|| std::fs::read_to_string(&node.absolute_path).ok())
            .as_deref()
    }
}

fn build_request(batch: &Batch, sources: &mut SourceCache) -> OracleRequest {
    OracleRequest {
        batch_id: batch.batch_id.clone(),
        search_term: batch.search_term.clone(),
        replacement_term: batch.replacement_term.clone(),
        user_instruction: batch.user_instruction.clone(),
        nodes: batch
            .nodes
            .iter()
            .enumerate()
            .map(|(index, node)| describe(index, node, sources))
            .collect(),
    }
}

fn describe(index: usize, node: &ExtractedNode, sources: &mut SourceCache) -> NodeDescriptor {
    let snippet = match &node.snippet {
        Some(snippet) => snippet.clone(),
        None => {
            let markup = Language::from_path(&node.file_path).is_markup();
            sources
                .get(node)
                .map(|content| line_window(content, node.start_line, node.end_line, markup))
                .unwrap_or_else(|| node.content.clone())
        }
    };

    NodeDescriptor {
        index,
        node_kind: node.node_kind,
        file_path: node.file_path.to_string_lossy().to_string(),
        start_line: node.start_line,
        end_line: node.end_line,
        content: node.content.clone(),
        snippet,
        context_before: node.context_before.clone(),
        context_after: node.context_after.clone(),
        fragments: node
            .fragment_sequence
            .as_ref()
            .map(|pieces| pieces.iter().map(|p| p.text.clone()).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::NodeKind;
    use std::sync::Mutex;

    fn node(line: usize, relevance: f64) -> ExtractedNode {
        ExtractedNode {
            node_kind: NodeKind::Text,
            content: format!("Sign in {}", line),
            file_path: PathBuf::from("index.html"),
            absolute_path: PathBuf::from("/nonexistent/index.html"),
            start_line: line,
            end_line: line,
            start_column: 0,
            end_column: 9,
            context_before: vec![],
            context_after: vec![],
            relevance_score: relevance,
            fragment_sequence: None,
            snippet: Some(format!("<p>Sign in {}</p>", line)),
        }
    }

    /// Answers from a script, one entry per call
    struct ScriptedOracle {
        replies: Mutex<Vec<anyhow::Result<String>>>,
        seen: Mutex<Vec<OracleRequest>>,
    }

    impl ScriptedOracle {
        fn new(replies: Vec<anyhow::Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl Oracle for ScriptedOracle {
        async fn rewrite(&self, request: &OracleRequest) -> anyhow::Result<String> {
            self.seen.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(anyhow::anyhow!("script exhausted")))
        }
    }

    struct SlowOracle;

    impl Oracle for SlowOracle {
        async fn rewrite(&self, _request: &OracleRequest) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(r#"{"modifications": []}"#.to_string())
        }
    }

    #[test]
    fn test_make_batches_sizes_and_confidence() {
        let nodes: Vec<_> = (1..=25).map(|i| node(i, if i % 2 == 0 { 1.0 } else { 0.5 })).collect();
        let batches = make_batches(&nodes, "Sign in", "Log in", "rename", 10);
        assert_eq!(
            batches.iter().map(|b| b.nodes.len()).collect::<Vec<_>>(),
            vec![10, 10, 5]
        );
        assert_eq!(batches[0].batch_id, "batch-001");
        assert_eq!(batches[2].nodes[0].start_line, 21);
        assert!((batches[0].confidence - 0.75).abs() < 1e-9);
        assert!(make_batches(&[], "a", "b", "c", 10).is_empty());
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_stop_later_batches() {
        let nodes: Vec<_> = (1..=4).map(|i| node(i, 1.0)).collect();
        let batches = make_batches(&nodes, "Sign in", "Log in", "rename", 2);
        let oracle = ScriptedOracle::new(vec![
            Err(anyhow::anyhow!("upstream 502")),
            Ok(r#"{"modifications": [
                {"nodeIndex": 0, "modifiedContent": "Log in 3", "confidence": 0.9},
                {"nodeIndex": 1, "modifiedContent": "Log in 4", "shouldApply": false}
            ], "overallStrategy": "rename"}"#
                .to_string()),
        ]);
        let orchestrator = BatchOrchestrator::new(oracle, Duration::from_secs(5));
        let results = orchestrator.run(&batches).await;

        assert_eq!(results.len(), 2);
        assert!(!results[0].success);
        assert_eq!(results[0].error_message.as_deref(), Some("upstream 502"));
        assert_eq!(results[0].successful_modifications, 0);
        assert!(results[1].success);
        assert_eq!(results[1].modifications.len(), 2);
        assert_eq!(results[1].successful_modifications, 1);
        assert_eq!(results[1].modifications[0].original_content, "Sign in 3");
    }

    #[tokio::test]
    async fn test_descriptors_carry_snippets_and_fragments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.html");
        std::fs::write(&path, "<div>\n  <p>\n    Sign in\n  </p>\n</div>\n").unwrap();

        let mut plain = node(3, 1.0);
        plain.absolute_path = path;
        plain.snippet = None;
        let mut fragmented = node(1, 0.9);
        fragmented.node_kind = NodeKind::Fragmented;
        fragmented.fragment_sequence = Some(vec![
            crate::extract::FragmentPiece {
                text: "Sign".to_string(),
                start_line: 1,
                end_line: 1,
                start_column: 3,
                end_column: 7,
                word_count: 1,
            },
            crate::extract::FragmentPiece {
                text: "in".to_string(),
                start_line: 1,
                end_line: 1,
                start_column: 11,
                end_column: 13,
                word_count: 1,
            },
        ]);

        let batches = make_batches(&[plain, fragmented], "Sign in", "Log in", "rename", 10);
        let oracle = ScriptedOracle::new(vec![Ok(r#"{"modifications": []}"#.to_string())]);
        let orchestrator = BatchOrchestrator::new(oracle, Duration::from_secs(5));
        let results = orchestrator.run(&batches).await;
        assert!(results[0].success);
        assert!(results[0].modifications.is_empty());

        let seen = orchestrator.oracle.seen.lock().unwrap();
        let nodes = &seen[0].nodes;
        assert_eq!(nodes[0].snippet, "  <p>\n    Sign in\n  </p>");
        assert!(nodes[0].fragments.is_none());
        assert_eq!(nodes[1].index, 1);
        assert_eq!(
            nodes[1].fragments.as_deref(),
            Some(&["Sign".to_string(), "in".to_string()][..])
        );
    }

    #[tokio::test]
    async fn test_unparseable_response_fails_batch() {
        let batches = make_batches(&[node(1, 1.0)], "Sign in", "Log in", "rename", 10);
        let oracle = ScriptedOracle::new(vec![Ok("no idea".to_string())]);
        let results = BatchOrchestrator::new(oracle, Duration::from_secs(5))
            .run(&batches)
            .await;
        assert!(!results[0].success);
        assert!(results[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("malformed oracle response"));
    }

    #[tokio::test]
    async fn test_error_body_and_truncated_reply_fail_batch() {
        let nodes: Vec<_> = (1..=2).map(|i| node(i, 1.0)).collect();
        let batches = make_batches(&nodes, "Sign in", "Log in", "rename", 1);
        let oracle = ScriptedOracle::new(vec![
            Ok(r#"{"error": {"message": "context length exceeded"}}"#.to_string()),
            Ok(r#"{"modifications": [{"nodeIndex": 0, "modifiedContent": "Log in 2"}, {"nodeIn"#
                .to_string()),
        ]);
        let results = BatchOrchestrator::new(oracle, Duration::from_secs(5))
            .run(&batches)
            .await;
        assert!(results.iter().all(|r| !r.success));
        assert!(results.iter().all(|r| r.modifications.is_empty()));
        assert!(results.iter().all(|r| r
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("malformed oracle response"))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oracle_timeout_fails_batch() {
        let batches = make_batches(&[node(1, 1.0)], "Sign in", "Log in", "rename", 10);
        let results = BatchOrchestrator::new(SlowOracle, Duration::from_secs(2))
            .run(&batches)
            .await;
        assert!(!results[0].success);
        assert_eq!(
            results[0].error_message.as_deref(),
            Some("oracle timed out after 2s")
        );
    }
}
