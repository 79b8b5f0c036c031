//! End-to-end ingestion pipeline: fetched resources → graph mutations.
//!
//! Per resource: canonicalize → classify → extract → fingerprint → dedup →
//! chunk → embed → merge. Resources are processed with bounded worker
//! parallelism; graph convergence under concurrency comes from every
//! mutation being an idempotent upsert keyed by deterministic id.
//!
//! Nothing past startup validation stops a run: extraction problems become
//! warnings, transient backend errors are retried then degraded, integrity
//! violations quarantine the one offending resource.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use regraph_classify::Classifier;
use regraph_embed::Embedder;
use regraph_extract::ExtractorRegistry;
use regraph_shared::{
    AppConfig, FetchedResource, Fingerprint, NodeId, RegraphError, Result, Role, canonical_url,
};
use regraph_storage::GraphStore;

use crate::assembler::{MergeInput, apply_merge, plan_merge};
use crate::chunk::split_chunks;
use crate::dedup::{self, Decision};

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Shared collaborators and configuration, passed explicitly to each stage —
/// no process-wide mutable state.
pub struct PipelineContext {
    /// Application configuration.
    pub config: AppConfig,
    /// URL classifier.
    pub classifier: Classifier,
    /// Content extractor factory.
    pub extractors: Arc<ExtractorRegistry>,
    /// Embedding backend.
    pub embedder: Arc<dyn Embedder>,
    /// Graph store.
    pub store: Arc<dyn GraphStore>,
}

// ---------------------------------------------------------------------------
// Report & progress
// ---------------------------------------------------------------------------

/// Summary of a completed ingestion run.
#[derive(Debug, Default, Clone)]
pub struct IngestReport {
    /// Resources taken off the stream.
    pub processed: usize,
    /// Resources that created a new page node.
    pub new: usize,
    /// Resources whose content was unchanged (no re-chunk, no re-embed).
    pub unchanged: usize,
    /// Resources whose content changed.
    pub updated: usize,
    /// Resources skipped (irrelevant role or HTTP error status).
    pub skipped: usize,
    /// Resources quarantined on integrity violations.
    pub quarantined: usize,
    /// Chunk nodes written.
    pub chunks_written: usize,
    /// Embeddings successfully computed.
    pub embeddings_computed: usize,
    /// Chunks left un-embedded after retries (repair pass picks them up).
    pub embed_failures: usize,
    /// Per-resource errors (URL, message).
    pub errors: Vec<(String, String)>,
    /// Per-resource extraction warnings (URL, warning).
    pub warnings: Vec<(String, String)>,
    /// Total duration of the run.
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when a resource finishes, with its outcome.
    fn resource_done(&self, url: &str, outcome: &str, processed: usize);
    /// Called when the run completes.
    fn done(&self, report: &IngestReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn resource_done(&self, _url: &str, _outcome: &str, _processed: usize) {}
    fn done(&self, _report: &IngestReport) {}
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

/// Requests a graceful stop: intake halts, in-flight resources finish their
/// merge so the graph is never left half-applied.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Signal the pipeline to stop taking new resources.
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

// ---------------------------------------------------------------------------
// Per-resource outcome
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Outcome {
    Ingested {
        decision: Decision,
        chunks_written: usize,
        embeddings_computed: usize,
        embed_failures: usize,
        warnings: Vec<String>,
    },
    Skipped,
    Quarantined(String),
    Failed(String),
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Ingested {
                decision: Decision::New,
                ..
            } => "new",
            Self::Ingested {
                decision: Decision::Unchanged,
                ..
            } => "unchanged",
            Self::Ingested {
                decision: Decision::Updated,
                ..
            } => "updated",
            Self::Skipped => "skipped",
            Self::Quarantined(_) => "quarantined",
            Self::Failed(_) => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The ingestion pipeline.
pub struct IngestPipeline {
    ctx: Arc<PipelineContext>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl IngestPipeline {
    /// Build a pipeline around its collaborators.
    pub fn new(ctx: PipelineContext) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            ctx: Arc::new(ctx),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    /// Handle for requesting a graceful stop from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Process a stream of fetched resources to completion (or shutdown).
    ///
    /// Arrival order is arbitrary and repeated delivery of the same URL is
    /// fine; idempotence is the contract that makes this safe.
    #[instrument(skip_all)]
    pub async fn run(
        &self,
        mut resources: mpsc::Receiver<FetchedResource>,
        progress: &dyn ProgressReporter,
    ) -> Result<IngestReport> {
        let start = Instant::now();
        let workers = self.ctx.config.pipeline.workers as usize;
        let worker_permits = Arc::new(Semaphore::new(workers));
        let embed_permits = Arc::new(Semaphore::new(
            self.ctx.config.pipeline.embed_concurrency as usize,
        ));
        let mut shutdown = self.shutdown_rx.clone();

        info!(workers, "starting ingestion run");
        progress.phase("Ingesting resources");

        let mut report = IngestReport::default();
        let mut join_set: JoinSet<(String, Outcome)> = JoinSet::new();

        loop {
            // Drain finished workers without blocking intake.
            while let Some(joined) = join_set.try_join_next() {
                Self::absorb(&mut report, joined, progress);
            }

            let resource = tokio::select! {
                _ = shutdown.changed() => {
                    info!("shutdown requested, stopping intake");
                    break;
                }
                next = resources.recv() => match next {
                    Some(resource) => resource,
                    None => break,
                },
            };

            // Acquiring before spawning bounds in-flight resources.
            let permit = worker_permits
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore closed");

            let ctx = self.ctx.clone();
            let embed_permits = embed_permits.clone();
            join_set.spawn(async move {
                let _permit = permit;
                let url = resource.url.to_string();
                let outcome = process_resource(&ctx, &embed_permits, resource).await;
                (url, outcome)
            });
        }

        // In-flight resources complete their merges before the run ends.
        while let Some(joined) = join_set.join_next().await {
            Self::absorb(&mut report, joined, progress);
        }

        report.elapsed = start.elapsed();
        progress.done(&report);

        info!(
            processed = report.processed,
            new = report.new,
            unchanged = report.unchanged,
            updated = report.updated,
            skipped = report.skipped,
            quarantined = report.quarantined,
            embeddings = report.embeddings_computed,
            embed_failures = report.embed_failures,
            elapsed_ms = report.elapsed.as_millis(),
            "ingestion run complete"
        );

        Ok(report)
    }

    fn absorb(
        report: &mut IngestReport,
        joined: std::result::Result<(String, Outcome), tokio::task::JoinError>,
        progress: &dyn ProgressReporter,
    ) {
        let (url, outcome) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                report.processed += 1;
                report.errors.push(("<worker>".into(), e.to_string()));
                return;
            }
        };

        report.processed += 1;
        progress.resource_done(&url, outcome.label(), report.processed);

        match outcome {
            Outcome::Ingested {
                decision,
                chunks_written,
                embeddings_computed,
                embed_failures,
                warnings,
            } => {
                match decision {
                    Decision::New => report.new += 1,
                    Decision::Unchanged => report.unchanged += 1,
                    Decision::Updated => report.updated += 1,
                }
                report.chunks_written += chunks_written;
                report.embeddings_computed += embeddings_computed;
                report.embed_failures += embed_failures;
                for warning in warnings {
                    report.warnings.push((url.clone(), warning));
                }
            }
            Outcome::Skipped => report.skipped += 1,
            Outcome::Quarantined(message) => {
                report.quarantined += 1;
                report.errors.push((url, message));
            }
            Outcome::Failed(message) => {
                report.errors.push((url, message));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-resource processing
// ---------------------------------------------------------------------------

#[instrument(skip_all, fields(url = %resource.url, status = resource.http_status))]
async fn process_resource(
    ctx: &PipelineContext,
    embed_permits: &Arc<Semaphore>,
    resource: FetchedResource,
) -> Outcome {
    let canonical = canonical_url(&resource.url);
    let canonical_str = canonical.to_string();
    let page_id = NodeId::page(&canonical_str);
    let role = ctx.classifier.classify(&canonical, &resource.content_type);

    // Irrelevant role or a failed fetch: any existing node for the URL goes
    // stale, nothing else happens.
    if role == Role::Irrelevant || resource.http_status >= 400 {
        debug!(?role, "skipping resource");
        if let Err(e) = mark_existing_stale(ctx, &page_id).await {
            return Outcome::Failed(e.to_string());
        }
        return Outcome::Skipped;
    }

    // Extraction is CPU-bound and must not stall the async workers.
    let extractor = ctx.extractors.for_resource(&resource.content_type, &resource.raw_bytes);
    let extractor_name = extractor.name();
    debug!(extractor = extractor_name, "extracting content");

    let content = {
        let bytes = resource.raw_bytes.clone();
        let content_type = resource.content_type.clone();
        let source_url = canonical_str.clone();
        let extractors = ctx.extractors.clone();
        match tokio::task::spawn_blocking(move || {
            extractors
                .for_resource(&content_type, &bytes)
                .extract(&bytes, &source_url)
        })
        .await
        {
            Ok(content) => content,
            Err(e) => {
                warn!(error = %e, "extraction task failed");
                regraph_shared::ExtractedContent::failed(&canonical_str, "extraction-failure")
            }
        }
    };

    let fingerprint = Fingerprint::of_text(&content.body_text);
    let has_content = !content.body_text.is_empty();

    // Dedup decision; integrity problems quarantine this one resource.
    let decision = match with_retries(ctx, || dedup::evaluate(&*ctx.store, &page_id, &fingerprint))
        .await
    {
        Ok(decision) => decision,
        Err(RegraphError::Integrity { message }) => return Outcome::Quarantined(message),
        Err(e) => return Outcome::Failed(e.to_string()),
    };

    if decision == Decision::Unchanged {
        // The cheap path: refresh last_seen on the page and its document,
        // zero chunking and zero embedding calls.
        let document_id = NodeId::document(&fingerprint);
        let result = with_retries(ctx, || async {
            ctx.store.touch_node(&page_id, resource.fetched_at).await?;
            if has_content {
                ctx.store.touch_node(&document_id, resource.fetched_at).await?;
            }
            Ok(())
        })
        .await;
        if let Err(e) = result {
            return Outcome::Failed(e.to_string());
        }
        return Outcome::Ingested {
            decision,
            chunks_written: 0,
            embeddings_computed: 0,
            embed_failures: 0,
            warnings: content.warnings,
        };
    }

    let prior_fingerprint = if decision == Decision::Updated {
        match ctx.store.get_node(&page_id).await {
            Ok(node) => node.and_then(|n| n.fingerprint),
            Err(e) => return Outcome::Failed(e.to_string()),
        }
    } else {
        None
    };

    // Shared content: if this fingerprint's subgraph exists, reuse it and
    // compute nothing.
    let content_known = if has_content {
        match with_retries(ctx, || dedup::content_known(&*ctx.store, &fingerprint)).await {
            Ok(known) => known,
            Err(e) => return Outcome::Failed(e.to_string()),
        }
    } else {
        false
    };

    let mut warnings = content.warnings.clone();
    let mut chunks = Vec::new();
    let mut embeddings_computed = 0usize;
    let mut embed_failures = 0usize;

    if has_content && !content_known {
        let document_id = NodeId::document(&fingerprint);
        chunks = split_chunks(&content, document_id, &ctx.config.chunking);

        for chunk in &mut chunks {
            match embed_chunk(ctx, embed_permits, &chunk.text).await {
                Ok(vector) => {
                    chunk.embedding = Some(vector);
                    embeddings_computed += 1;
                }
                Err(message) => {
                    // Degrade: the chunk is stored un-embedded and a later
                    // repair pass revisits it.
                    warn!(index = chunk.index, %message, "embedding failed, storing chunk without vector");
                    warnings.push(format!("embed-failed[{}]: {message}", chunk.index));
                    embed_failures += 1;
                }
            }
        }
    }

    // Outbound links get classified so Irrelevant targets never receive
    // edges; targets keep their canonical form for stable forward ids.
    let outbound = content
        .outbound_links
        .iter()
        .filter_map(|link| url::Url::parse(link).ok())
        .map(|link| {
            let canonical_link = canonical_url(&link);
            let role = ctx.classifier.classify(&canonical_link, "");
            (canonical_link.to_string(), role)
        })
        .collect();

    let input = MergeInput {
        canonical_url: canonical_str,
        title: content.title.clone(),
        fingerprint,
        fetched_at: resource.fetched_at,
        decision,
        prior_fingerprint,
        has_content,
        content_known,
        chunks,
        outbound,
        tags: content.tags.clone(),
    };

    let chunks_written = input.chunks.len();
    let plan = plan_merge(&input);

    match with_retries(ctx, || apply_merge(&*ctx.store, &plan)).await {
        Ok(()) => Outcome::Ingested {
            decision,
            chunks_written,
            embeddings_computed,
            embed_failures,
            warnings,
        },
        Err(RegraphError::Integrity { message }) => Outcome::Quarantined(message),
        Err(e) => Outcome::Failed(e.to_string()),
    }
}

/// Mark an existing node stale; absent nodes are left absent.
async fn mark_existing_stale(ctx: &PipelineContext, page_id: &NodeId) -> Result<()> {
    with_retries(ctx, || async {
        if ctx.store.get_node(page_id).await?.is_some() {
            ctx.store.mark_stale(page_id).await?;
        }
        Ok(())
    })
    .await
}

/// Embed one chunk under the global embedding concurrency bound, with a
/// per-call timeout. The backend retries transport-level failures itself;
/// whatever error survives here degrades the chunk.
async fn embed_chunk(
    ctx: &PipelineContext,
    embed_permits: &Arc<Semaphore>,
    text: &str,
) -> std::result::Result<Vec<f32>, String> {
    let _permit = embed_permits
        .acquire()
        .await
        .map_err(|_| "embedding pool closed".to_string())?;

    let timeout = Duration::from_secs(ctx.config.embedding.timeout_secs);
    match tokio::time::timeout(timeout, ctx.embedder.embed(text)).await {
        Ok(Ok(vector)) => Ok(vector),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("timed out after {}s", timeout.as_secs())),
    }
}

/// Retry a transient-fallible store operation with exponential backoff.
/// Non-transient errors (integrity, validation) surface immediately.
async fn with_retries<T, F, Fut>(ctx: &PipelineContext, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let retry = &ctx.config.retry;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < retry.max_attempts => {
                let delay = Duration::from_millis(retry.base_delay_ms)
                    * 2u32.saturating_pow(attempt - 1);
                warn!(error = %e, attempt, "transient store error, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
