//! `phototree ingest`: concurrent upload of local files.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use phototree_cas::{IngestOutcome, IngestPipeline, Upload};
use phototree_config::{log_ingest_debug, log_ingest_info, log_ingest_warn};
use rayon::prelude::*;
use serde_json::json;

/// Upper bound on the default worker count.
pub const MAX_INGEST_THREADS: usize = 8;

#[derive(Args)]
pub struct IngestArgs {
    /// Files to store
    #[arg(value_name = "FILES", required = true)]
    files: Vec<PathBuf>,

    /// Identity recorded as the uploader
    #[arg(long = "as", value_name = "IDENTITY", env = "USER", default_value = "anonymous")]
    identity: String,

    /// Number of worker threads (default: min(cpus, 8))
    #[arg(short = 'j', long)]
    threads: Option<usize>,
}

/// Calculate default thread count: min(cpu_cores, MAX_INGEST_THREADS)
pub fn default_thread_count() -> usize {
    num_cpus::get().clamp(1, MAX_INGEST_THREADS)
}

#[derive(Debug, Default)]
struct Summary {
    stored: usize,
    duplicates: usize,
    failed: usize,
    bytes: u64,
}

fn ingest_file(pipeline: &IngestPipeline, path: &Path, identity: &str) -> Result<IngestOutcome> {
    // Refuse oversized files before buffering them.
    let size = fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .len();
    pipeline
        .store()
        .validate_size(size)
        .with_context(|| format!("Refusing {}", path.display()))?;

    let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    log_ingest_debug!("Read upload", file = filename.as_str(), size = data.len());

    let outcome = pipeline.ingest(&Upload {
        data: &data,
        filename: &filename,
        identity,
    })?;
    Ok(outcome)
}

pub fn run(
    pipeline: &IngestPipeline,
    args: IngestArgs,
    config_threads: Option<usize>,
    json: bool,
) -> Result<()> {
    let threads = args
        .threads
        .or(config_threads)
        .unwrap_or_else(default_thread_count)
        .max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("phototree-ingest-{}", i))
        .build()
        .context("Failed to create ingest thread pool")?;

    let progress = if json {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(args.files.len() as u64);
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{bar:30}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        pb
    };

    let identity = args.identity.as_str();
    let results: Vec<Result<IngestOutcome>> = pool.install(|| {
        args.files
            .par_iter()
            .progress_with(progress.clone())
            .map(|path| ingest_file(pipeline, path, identity))
            .collect()
    });
    progress.finish_and_clear();

    let mut summary = Summary::default();
    for (path, result) in args.files.iter().zip(results) {
        match result {
            Ok(outcome) => {
                match &outcome {
                    IngestOutcome::Stored(item) => {
                        summary.stored += 1;
                        summary.bytes += item.size;
                    }
                    IngestOutcome::Duplicate { .. } => summary.duplicates += 1,
                }
                if json {
                    let mut line = serde_json::to_value(&outcome)?;
                    line["file"] = json!(path.display().to_string());
                    println!("{}", line);
                } else if outcome.is_duplicate() {
                    println!("🔁 {} (already stored at {})", path.display(), outcome.path());
                } else {
                    println!("✅ {} -> {}", path.display(), outcome.path());
                }
            }
            Err(e) => {
                summary.failed += 1;
                log_ingest_warn!(
                    "Upload failed",
                    file = tracing::field::display(path.display()),
                    error = tracing::field::display(&e)
                );
                if json {
                    println!(
                        "{}",
                        json!({
                            "file": path.display().to_string(),
                            "outcome": "failed",
                            "error": format!("{:#}", e),
                        })
                    );
                } else {
                    println!("❌ {}: {:#}", path.display(), e);
                }
            }
        }
    }

    log_ingest_info!(
        "Ingest finished",
        stored = summary.stored,
        duplicates = summary.duplicates,
        failed = summary.failed,
        threads = threads
    );
    if json {
        println!(
            "{}",
            json!({
                "summary": {
                    "stored": summary.stored,
                    "duplicates": summary.duplicates,
                    "failed": summary.failed,
                    "bytes": summary.bytes,
                }
            })
        );
    } else {
        println!(
            "\n✅ Ingest Complete: {} stored, {} duplicates, {} failed ({} bytes)",
            summary.stored, summary.duplicates, summary.failed, summary.bytes
        );
    }

    if summary.failed > 0 {
        anyhow::bail!("{} of {} files failed", summary.failed, args.files.len());
    }
    Ok(())
}
