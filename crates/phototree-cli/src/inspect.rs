//! `phototree inspect`: dry-run placement of local files.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use phototree_cas::{planner, ContentDigest, IngestPipeline};
use phototree_config::log_cli_info;
use serde_json::json;

#[derive(Args)]
pub struct InspectArgs {
    /// Files to inspect
    #[arg(value_name = "FILE", required = true)]
    files: Vec<PathBuf>,
}

pub fn run(pipeline: &IngestPipeline, args: InspectArgs, json: bool) -> Result<()> {
    let now = Utc::now();
    let stamp = u64::try_from(now.timestamp_millis()).unwrap_or(0);

    for path in &args.files {
        let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let digest = ContentDigest::of(&data);
        let (date, source) = pipeline.resolve_date(&data, now);
        let existing = pipeline.index().lookup(&digest);
        let size_check = pipeline.store().validate_size(data.len() as u64);

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let planned = planner::plan(&digest, &date, planner::extension_of(&filename), stamp);

        log_cli_info!(
            "Inspected file",
            digest = tracing::field::display(digest.short()),
            stored = existing.is_some()
        );

        if json {
            println!(
                "{}",
                json!({
                    "file": path.display().to_string(),
                    "digest": digest,
                    "size": data.len(),
                    "limit": pipeline.store().max_blob_bytes(),
                    "capture_date": date,
                    "date_source": source,
                    "partition": planned.partition(),
                    "stored_at": existing,
                    "rejected": size_check.err().map(|e| e.to_string()),
                })
            );
            continue;
        }

        println!("📷 {}", path.display());
        println!("   digest:    {}", digest);
        println!(
            "   size:      {} bytes (limit {})",
            data.len(),
            pipeline.store().max_blob_bytes()
        );
        println!("   taken:     {} ({:?})", date, source);
        match (&existing, &size_check) {
            (Some(at), _) => println!("   stored at: {}", at),
            (None, Err(e)) => println!("   rejected:  {}", e),
            (None, Ok(())) => println!("   would go:  {}/", planned.partition()),
        }
    }
    Ok(())
}
