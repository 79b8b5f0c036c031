//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use regraph_classify::Classifier;
use regraph_core::{
    IngestPipeline, IngestReport, PipelineContext, ProgressReporter, repair_embeddings,
};
use regraph_embed::embedder_from_config;
use regraph_extract::ExtractorRegistry;
use regraph_shared::{
    AppConfig, FetchedResource, NodeKind, config_file_path, init_config, load_config,
    validate_config,
};
use regraph_storage::{GraphStore, LibsqlGraphStore};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// regraph — assemble a knowledge graph from crawled regulatory content.
#[derive(Parser)]
#[command(
    name = "regraph",
    version,
    about = "Ingest fetched pages and documents into a retrieval-ready knowledge graph.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Ingest a fetched-resource manifest into the graph.
    Ingest {
        /// Manifest file (JSONL) or a directory containing resources.jsonl.
        #[arg(long)]
        from: String,

        /// Graph database path (defaults to the configured db_path).
        #[arg(long)]
        db: Option<String>,
    },

    /// Re-embed live chunks whose embedding is missing.
    Repair {
        /// Graph database path (defaults to the configured db_path).
        #[arg(long)]
        db: Option<String>,

        /// Maximum chunks to repair (0 = all).
        #[arg(long, default_value = "0")]
        limit: usize,
    },

    /// Show graph statistics.
    Stats {
        /// Graph database path (defaults to the configured db_path).
        #[arg(long)]
        db: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Print the config file path.
    Path,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "regraph=info",
        1 => "regraph=debug",
        _ => "regraph=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Ingest { from, db } => cmd_ingest(&from, db.as_deref()).await,
        Command::Repair { db, limit } => cmd_repair(db.as_deref(), limit).await,
        Command::Stats { db } => cmd_stats(db.as_deref()).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Path => cmd_config_path().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Manifest reading
// ---------------------------------------------------------------------------

/// One line of a fetched-resource manifest, as written by the external
/// fetcher: metadata plus a pointer to the body file on disk.
#[derive(Debug, Deserialize)]
struct ManifestEntry {
    url: String,
    fetched_at: DateTime<Utc>,
    #[serde(default)]
    content_type: String,
    #[serde(default = "default_status")]
    http_status: u16,
    body_path: String,
}

fn default_status() -> u16 {
    200
}

/// Resolve `--from` to the manifest file path.
fn manifest_path(from: &str) -> Result<PathBuf> {
    let path = PathBuf::from(from);
    if path.is_dir() {
        let candidate = path.join("resources.jsonl");
        if !candidate.exists() {
            return Err(eyre!("no resources.jsonl found in '{from}'"));
        }
        return Ok(candidate);
    }
    if !path.exists() {
        return Err(eyre!("manifest '{from}' does not exist"));
    }
    Ok(path)
}

/// Stream manifest entries into the pipeline channel. Bad records are
/// logged and skipped; only I/O on the manifest itself is fatal.
async fn feed_manifest(path: PathBuf, tx: mpsc::Sender<FetchedResource>) -> Result<()> {
    let content = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| eyre!("cannot read manifest {}: {e}", path.display()))?;
    let base_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();

    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: ManifestEntry = match serde_json::from_str(line) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "skipping invalid manifest line");
                continue;
            }
        };
        let url = match url::Url::parse(&entry.url) {
            Ok(url) => url,
            Err(e) => {
                warn!(line = line_no + 1, url = %entry.url, error = %e, "skipping invalid URL");
                continue;
            }
        };
        let body_path = base_dir.join(&entry.body_path);
        let raw_bytes = match tokio::fs::read(&body_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %body_path.display(), error = %e, "skipping unreadable body file");
                continue;
            }
        };

        let resource = FetchedResource {
            url,
            fetched_at: entry.fetched_at,
            content_type: entry.content_type,
            raw_bytes,
            http_status: entry.http_status,
        };
        if tx.send(resource).await.is_err() {
            // Pipeline shut down; stop feeding.
            break;
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_ingest(from: &str, db: Option<&str>) -> Result<()> {
    let config = load_config()?;
    validate_config(&config)?;

    let manifest = manifest_path(from)?;
    let store = open_store(&config, db).await?;
    let pipeline = build_pipeline(&config, store)?;

    info!(manifest = %manifest.display(), "starting ingestion");

    // Ctrl-C requests a graceful stop: intake halts, in-flight resources
    // finish their merges.
    let shutdown = pipeline.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, finishing in-flight resources");
            shutdown.shutdown();
        }
    });

    let (tx, rx) = mpsc::channel(64);
    let feeder = tokio::spawn(feed_manifest(manifest, tx));

    let reporter = CliProgress::new();
    let report = pipeline.run(rx, &reporter).await?;
    feeder.await??;

    println!();
    println!("  Ingestion complete");
    println!("  Processed:   {}", report.processed);
    println!("  New:         {}", report.new);
    println!("  Updated:     {}", report.updated);
    println!("  Unchanged:   {}", report.unchanged);
    println!("  Skipped:     {}", report.skipped);
    println!("  Quarantined: {}", report.quarantined);
    println!("  Chunks:      {}", report.chunks_written);
    println!("  Embedded:    {}", report.embeddings_computed);
    if report.embed_failures > 0 {
        println!(
            "  Un-embedded: {} (run `regraph repair`)",
            report.embed_failures
        );
    }
    println!("  Time:        {:.1}s", report.elapsed.as_secs_f64());
    if !report.errors.is_empty() {
        println!("  Errors:      {}", report.errors.len());
        for (url, message) in report.errors.iter().take(10) {
            println!("    {url}: {message}");
        }
    }
    println!();

    Ok(())
}

async fn cmd_repair(db: Option<&str>, limit: usize) -> Result<()> {
    let config = load_config()?;
    validate_config(&config)?;

    let store = open_store(&config, db).await?;
    let embedder = embedder_from_config(&config.embedding, &config.retry)?;

    info!(limit, "starting embedding repair pass");
    let report = repair_embeddings(&*store, embedder, &config, limit).await?;

    println!();
    println!("  Repair complete");
    println!("  Scanned:  {}", report.scanned);
    println!("  Repaired: {}", report.repaired);
    println!("  Failed:   {}", report.failed);
    println!("  Time:     {:.1}s", report.elapsed.as_secs_f64());
    println!();

    Ok(())
}

async fn cmd_stats(db: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let store = open_store(&config, db).await?;

    let pages = store.count_nodes(Some(NodeKind::Page)).await?;
    let documents = store.count_nodes(Some(NodeKind::Document)).await?;
    let chunks = store.count_nodes(Some(NodeKind::Chunk)).await?;
    let entities = store.count_nodes(Some(NodeKind::Entity)).await?;
    let edges = store.count_edges().await?;
    let stale = store.count_stale().await?;
    let missing = store.nodes_missing_embedding(u32::MAX).await?.len();

    println!();
    println!("  Graph statistics");
    println!("  Pages:              {pages}");
    println!("  Documents:          {documents}");
    println!("  Chunks:             {chunks}");
    println!("  Entities:           {entities}");
    println!("  Edges:              {edges}");
    println!("  Stale nodes:        {stale}");
    println!("  Missing embeddings: {missing}");
    println!();

    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("created {}", path.display());
    Ok(())
}

async fn cmd_config_path() -> Result<()> {
    println!("{}", config_file_path()?.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Collaborator wiring
// ---------------------------------------------------------------------------

async fn open_store(config: &AppConfig, db: Option<&str>) -> Result<Arc<LibsqlGraphStore>> {
    let db_path = expand_home(db.unwrap_or(&config.db_path));
    let store = LibsqlGraphStore::open(&db_path)
        .await
        .map_err(|e| eyre!("cannot open graph database {}: {e}", db_path.display()))?;
    Ok(Arc::new(store))
}

fn build_pipeline(config: &AppConfig, store: Arc<LibsqlGraphStore>) -> Result<IngestPipeline> {
    let classifier = Classifier::from_config(&config.classifier)?;
    let embedder = embedder_from_config(&config.embedding, &config.retry)?;

    Ok(IngestPipeline::new(PipelineContext {
        config: config.clone(),
        classifier,
        extractors: Arc::new(ExtractorRegistry::new()),
        embedder,
        store,
    }))
}

/// Expand a leading `~` to the user's home directory.
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn resource_done(&self, url: &str, outcome: &str, processed: usize) {
        self.spinner
            .set_message(format!("[{processed}] {outcome}: {url}"));
    }

    fn done(&self, _report: &IngestReport) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_entry_parses_with_defaults() {
        let line = r#"{"url":"https://agency.example/p","fetched_at":"2026-08-01T12:00:00Z","body_path":"bodies/p.html"}"#;
        let entry: ManifestEntry = serde_json::from_str(line).expect("parse");
        assert_eq!(entry.http_status, 200);
        assert_eq!(entry.content_type, "");
        assert_eq!(entry.body_path, "bodies/p.html");
    }

    #[test]
    fn expand_home_handles_tilde() {
        let expanded = expand_home("~/graph.db");
        assert!(!expanded.to_string_lossy().starts_with('~'));

        let absolute = expand_home("/tmp/graph.db");
        assert_eq!(absolute, PathBuf::from("/tmp/graph.db"));
    }
}
