//! Text-rewriting oracle protocol
//!
//! The oracle receives a batch of node descriptors plus the requested change
//! and answers with one proposal per node. Its output is untrusted: the
//! response parser fills defaults and drops what it cannot place, and the
//! applier re-validates every proposal against the current file content.

pub mod client;
pub mod parse;
pub mod prompts;

pub use client::OpenRouterOracle;
pub use parse::{parse_response, OracleResponse};

use serde::{Deserialize, Serialize};
use std::future::Future;

/// One node as presented to the oracle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescriptor {
    pub index: usize,
    pub node_kind: crate::extract::NodeKind,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub snippet: String,
    pub context_before: Vec<String>,
    pub context_after: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragments: Option<Vec<String>>,
}

/// A full batch request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleRequest {
    pub batch_id: String,
    pub search_term: String,
    pub replacement_term: String,
    pub user_instruction: String,
    pub nodes: Vec<NodeDescriptor>,
}

/// How the oracle intends a proposal to be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStrategy {
    SnippetReplace,
    ContentReplace,
    FragmentRedistribute,
    Skip,
    Unspecified,
}

impl ProposalStrategy {
    /// Lenient mapping of an oracle-supplied label
    pub fn from_label(label: &str) -> Self {
        let normalized: String = label
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect();
        match normalized.as_str() {
            "snippet_replace" | "snippet" | "replace_snippet" => ProposalStrategy::SnippetReplace,
            "content_replace" | "content" | "replace" | "direct" => {
                ProposalStrategy::ContentReplace
            }
            "fragment_redistribute" | "fragmented" | "fragments" | "redistribute" => {
                ProposalStrategy::FragmentRedistribute
            }
            "skip" | "none" => ProposalStrategy::Skip,
            _ => ProposalStrategy::Unspecified,
        }
    }
}

/// The oracle's rewrite of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModificationProposal {
    pub node_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_snippet: Option<String>,
    pub original_content: String,
    pub modified_content: String,
    pub reasoning: String,
    pub confidence: f64,
    pub should_apply: bool,
    pub strategy: ProposalStrategy,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// The seam between the orchestrator and whatever produces rewrites.
///
/// Implementations return the raw response text; parsing happens in
/// [`parse_response`] so every implementation gets the same tolerance.
pub trait Oracle: Send + Sync {
    fn rewrite(
        &self,
        request: &OracleRequest,
    ) -> impl Future<Output = anyhow::Result<String>> + Send;
}

/// Errors raised by the HTTP oracle client
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("no API key configured; set the {0} environment variable")]
    MissingApiKey(String),
    #[error("invalid API key")]
    Unauthorized,
    #[error("rate limited after {0} retries")]
    RateLimited(u32),
    #[error("oracle returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("oracle request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed oracle response: {0}")]
    Malformed(String),
}
