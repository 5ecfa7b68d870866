//! Run entry point
//!
//! Scan, extract, batch, apply. Each stage finishes before the next starts.
//! A run always produces a [`RunReport`]: empty discovery or extraction end
//! the run early with a message, and unexpected errors are carried in the
//! report instead of being returned.

use crate::apply::{ApplyOutcome, PatchApplier};
use crate::batch::{make_batches, Batch, BatchOrchestrator, BatchResult};
use crate::cache::{snapshot_files, Cache, HistoryRecord};
use crate::config::Config;
use crate::diff::FileDiff;
use crate::extract::extract_nodes;
use crate::oracle::Oracle;
use crate::scan::{discover_files, shortlist};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

pub const NO_FILES_MESSAGE: &str = "No files found containing the search term";
pub const NO_NODES_MESSAGE: &str = "No text nodes found containing the search term";

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    NoCandidates,
    NoNodes,
    Failed,
}

/// Stage counters for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub files_scanned: usize,
    pub candidate_files: usize,
    pub nodes_extracted: usize,
    pub fragmented_nodes: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub proposals: usize,
    pub applied: usize,
    pub skipped: usize,
    pub write_failures: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub success: bool,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub session_id: String,
    pub files_modified: Vec<PathBuf>,
    pub total_replacements: usize,
    pub batch_results: Vec<BatchResult>,
    pub diffs: Vec<FileDiff>,
    pub average_confidence: f64,
    pub processing_time_ms: u64,
    pub stats: RunStats,
}

impl RunReport {
    fn ended(status: RunStatus, message: String, session_id: &str, stats: RunStats, started: Instant) -> Self {
        Self {
            success: false,
            status,
            message: Some(message),
            session_id: session_id.to_string(),
            files_modified: Vec::new(),
            total_replacements: 0,
            batch_results: Vec::new(),
            diffs: Vec::new(),
            average_confidence: 0.0,
            processing_time_ms: elapsed_ms(started),
            stats,
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u64::MAX as u128) as u64
}

/// The search-and-transform engine for one project root
pub struct Engine<O: Oracle> {
    root: PathBuf,
    config: Config,
    orchestrator: BatchOrchestrator<O>,
    session_id: String,
}

impl<O: Oracle> Engine<O> {
    pub fn new(root: impl Into<PathBuf>, config: Config, oracle: O) -> Self {
        let timeout = Duration::from_secs(config.oracle_timeout_secs);
        Self {
            root: root.into(),
            config,
            orchestrator: BatchOrchestrator::new(oracle, timeout),
            session_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Record into an existing session instead of a fresh one
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Change `search` to `replace` across the project, guided by `instruction`
    pub async fn run(&self, instruction: &str, search: &str, replace: &str) -> RunReport {
        let started = Instant::now();
        let mut stats = RunStats::default();
        match self
            .execute(instruction, search, replace, started, &mut stats)
            .await
        {
            Ok(report) => report,
            Err(err) => {
                error!("Run failed: {:#}", err);
                RunReport::ended(
                    RunStatus::Failed,
                    format!("{:#}", err),
                    &self.session_id,
                    stats,
                    started,
                )
            }
        }
    }

    async fn execute(
        &self,
        instruction: &str,
        search: &str,
        replace: &str,
        started: Instant,
        stats: &mut RunStats,
    ) -> anyhow::Result<RunReport> {
        if search.trim().is_empty() {
            return Err(anyhow::anyhow!("Search term is empty"));
        }

        let root = self.root.clone();
        let config = self.config.clone();
        let phrase = search.to_string();
        let (files_scanned, candidates) = tokio::task::spawn_blocking(move || {
            let files = discover_files(&root, &config)?;
            let candidates = shortlist(&root, &files, &phrase, &config);
            anyhow::Ok((files.len(), candidates))
        })
        .await??;
        stats.files_scanned = files_scanned;
        stats.candidate_files = candidates.len();
        if candidates.is_empty() {
            info!("{}", NO_FILES_MESSAGE);
            return Ok(RunReport::ended(
                RunStatus::NoCandidates,
                NO_FILES_MESSAGE.to_string(),
                &self.session_id,
                stats.clone(),
                started,
            ));
        }

        let config = self.config.clone();
        let phrase = search.to_string();
        let nodes =
            tokio::task::spawn_blocking(move || extract_nodes(&candidates, &phrase, &config))
                .await?;
        stats.nodes_extracted = nodes.len();
        stats.fragmented_nodes = nodes.iter().filter(|n| n.is_fragmented()).count();
        if nodes.is_empty() {
            info!("{}", NO_NODES_MESSAGE);
            return Ok(RunReport::ended(
                RunStatus::NoNodes,
                NO_NODES_MESSAGE.to_string(),
                &self.session_id,
                stats.clone(),
                started,
            ));
        }

        let batches = make_batches(&nodes, search, replace, instruction, self.config.batch_size);
        stats.batches = batches.len();
        let results = self.orchestrator.run(&batches).await;
        stats.failed_batches = results.iter().filter(|r| !r.success).count();
        stats.proposals = results.iter().map(|r| r.modifications.len()).sum();

        if !self.config.dry_run {
            self.record_snapshot(&batches, &results);
        }
        let outcome = PatchApplier::from_config(&self.config).apply(&batches, &results);
        stats.applied = outcome.total_replacements;
        stats.skipped = outcome.skipped.len();
        stats.write_failures = outcome.write_failures.len();
        if !self.config.dry_run {
            self.record_history(search, replace, &outcome);
        }

        let any_succeeded = results.iter().any(|r| r.success);
        let message = if !any_succeeded {
            Some("Every batch failed; no changes were applied".to_string())
        } else if outcome.total_replacements == 0 {
            Some("No changes were applied".to_string())
        } else {
            None
        };

        info!(
            session = %self.session_id,
            files = outcome.files_modified.len(),
            replacements = outcome.total_replacements,
            "Run finished"
        );

        Ok(RunReport {
            success: any_succeeded,
            status: RunStatus::Completed,
            message,
            session_id: self.session_id.clone(),
            files_modified: outcome.files_modified,
            total_replacements: outcome.total_replacements,
            average_confidence: average_confidence(&results),
            batch_results: results,
            diffs: outcome.diffs,
            processing_time_ms: elapsed_ms(started),
            stats: stats.clone(),
        })
    }

    /// Snapshot the files proposals are about to touch
    fn record_snapshot(&self, batches: &[Batch], results: &[BatchResult]) {
        let targets: BTreeSet<PathBuf> = results
            .iter()
            .filter(|r| r.success)
            .filter_map(|r| batches.iter().find(|b| b.batch_id == r.batch_id).map(|b| (r, b)))
            .flat_map(|(r, b)| {
                r.modifications
                    .iter()
                    .filter(|m| m.should_apply)
                    .filter_map(|m| b.nodes.get(m.node_index))
                    .map(|n| n.file_path.clone())
            })
            .collect();
        if targets.is_empty() {
            return;
        }

        let files: Vec<PathBuf> = targets.into_iter().collect();
        let snapshot = snapshot_files(&self.root, &files);
        let cache = Cache::new(&self.root);
        if let Err(err) = cache.save_snapshot(&self.session_id, &snapshot, self.session_ttl()) {
            warn!("Failed to save file snapshot: {:#}", err);
        }
    }

    fn record_history(&self, search: &str, replace: &str, outcome: &ApplyOutcome) {
        let cache = Cache::new(&self.root);
        let description = format!("\"{}\" -> \"{}\"", search, replace);
        let now = Utc::now();

        let applied = outcome.applied.iter().map(|edit| HistoryRecord {
            kind: "modification".to_string(),
            file: edit.file.to_string_lossy().to_string(),
            description: description.clone(),
            timestamp: now,
            approach: edit.via.label().to_string(),
            success: true,
            details: json!({ "line": edit.start_line }),
        });
        let skipped = outcome.skipped.iter().map(|skip| HistoryRecord {
            kind: "skipped".to_string(),
            file: skip.file.to_string_lossy().to_string(),
            description: description.clone(),
            timestamp: now,
            approach: "none".to_string(),
            success: false,
            details: json!({
                "line": skip.start_line,
                "batchId": skip.batch_id,
                "reason": skip.reason,
            }),
        });
        let failed = outcome.write_failures.iter().map(|failure| HistoryRecord {
            kind: "write_failure".to_string(),
            file: failure.file.to_string_lossy().to_string(),
            description: description.clone(),
            timestamp: now,
            approach: "none".to_string(),
            success: false,
            details: json!({ "error": failure.error }),
        });

        for record in applied.chain(skipped).chain(failed) {
            if let Err(err) = cache.append_history(&self.session_id, &record) {
                warn!("Failed to record session history: {:#}", err);
                return;
            }
        }

        let summary = json!({
            "sessionId": self.session_id,
            "description": description,
            "filesModified": outcome.files_modified,
            "totalReplacements": outcome.total_replacements,
            "timestamp": now,
        });
        if let Err(err) = cache.set("last_run", &summary, self.session_ttl()) {
            warn!("Failed to record run summary: {:#}", err);
        }
    }

    fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.config.session_ttl_hours)
    }
}

/// Mean confidence of the proposals marked for application
fn average_confidence(results: &[BatchResult]) -> f64 {
    let confidences: Vec<f64> = results
        .iter()
        .flat_map(|r| r.modifications.iter())
        .filter(|m| m.should_apply)
        .map(|m| m.confidence)
        .collect();
    if confidences.is_empty() {
        return 0.0;
    }
    confidences.iter().sum::<f64>() / confidences.len() as f64
}
