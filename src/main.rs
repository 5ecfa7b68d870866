//! retext CLI: change a phrase across a source tree.
//!
//! Logging: set `RETEXT_LOG=retext=debug` (or `info`, `warn`) to see engine logs on stderr.

use anyhow::Result;
use clap::Parser;
use retext::config::Config;
use retext::oracle::OpenRouterOracle;
use retext::pipeline::{Engine, RunReport, RunStatus};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "retext",
    about = "Change text across a source tree, even when it is split across markup",
    version
)]
struct Args {
    /// What the change is for, in plain words (defaults to "Change SEARCH to REPLACE")
    instruction: Option<String>,

    /// Text to find
    #[arg(short, long, required_unless_present = "init_config")]
    search: Option<String>,

    /// Text to put in its place
    #[arg(short, long, required_unless_present = "init_config")]
    replace: Option<String>,

    /// Project root (defaults to current directory)
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Nodes per oracle call
    #[arg(long)]
    batch_size: Option<usize>,

    /// Compute changes and diffs without writing files
    #[arg(long)]
    dry_run: bool,

    /// Skip diff generation
    #[arg(long)]
    no_diff: bool,

    /// Print the full report as JSON
    #[arg(long)]
    json: bool,

    /// Record into an existing session
    #[arg(long)]
    session: Option<String>,

    /// Write a retext.toml with default settings to the project root and exit
    #[arg(long)]
    init_config: bool,

    /// Log progress to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_env("RETEXT_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if args.verbose { "retext=info" } else { "warn" })
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let root = args.root.canonicalize().unwrap_or_else(|_| args.root.clone());

    if args.init_config {
        let path = Config::default().save(&root)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    let (Some(search), Some(replace)) = (args.search.clone(), args.replace.clone()) else {
        return Err(anyhow::anyhow!("--search and --replace are required"));
    };
    let instruction = args
        .instruction
        .clone()
        .unwrap_or_else(|| format!("Change \"{}\" to \"{}\"", search, replace));

    let mut config = Config::load(&root);
    if let Some(size) = args.batch_size {
        config.batch_size = size;
    }
    config.dry_run |= args.dry_run;
    if args.no_diff {
        config.generate_diffs = false;
    }
    let config = config.sanitized();

    let oracle = OpenRouterOracle::new(&config.oracle, config.oracle_timeout_secs)?;
    let mut engine = Engine::new(root, config, oracle);
    if let Some(session) = args.session.clone() {
        engine = engine.with_session(session);
    }

    let report = engine.run(&instruction, &search, &replace).await;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report, engine.config().dry_run);
    }

    if report.status == RunStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(report: &RunReport, dry_run: bool) {
    if let Some(message) = &report.message {
        eprintln!("{}", message);
    }
    if report.status != RunStatus::Completed {
        return;
    }

    for diff in &report.diffs {
        println!("{}", diff.diff);
    }

    let stats = &report.stats;
    let verb = if dry_run { "Would modify" } else { "Modified" };
    println!(
        "{} {} files ({} replacements) in {}ms",
        verb,
        report.files_modified.len(),
        report.total_replacements,
        report.processing_time_ms
    );
    for file in &report.files_modified {
        println!("  {}", file.display());
    }
    println!(
        "  {} candidates, {} nodes ({} fragmented), {} batches ({} failed), {} skipped, avg confidence {:.2}",
        stats.candidate_files,
        stats.nodes_extracted,
        stats.fragmented_nodes,
        stats.batches,
        stats.failed_batches,
        stats.skipped,
        report.average_confidence
    );
    for result in report.batch_results.iter().filter(|r| !r.success) {
        if let Some(error) = &result.error_message {
            eprintln!("  {} failed: {}", result.batch_id, error);
        }
    }
    println!("  session {}", report.session_id);
}
