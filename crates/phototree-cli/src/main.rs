//! # phototree CLI
//!
//! Command-line interface for the phototree content-addressed photo store.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use phototree_cas::{IngestOptions, IngestPipeline};
use phototree_config::{log_bootstrap_info, log_bootstrap_warn, log_cli_debug, Config};

mod ingest;
mod inspect;

/// phototree - deduplicating, date-partitioned photo storage
#[derive(Parser)]
#[command(name = "phototree")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Storage root directory (overrides config and PHOTOTREE_ROOT)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Emit one JSON object per line instead of human-readable output
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store photos, skipping content that is already present
    Ingest(ingest::IngestArgs),

    /// Rebuild the content index from the storage tree and report on it
    Rebuild,

    /// Show where files would be stored, without storing them
    Inspect(inspect::InspectArgs),

    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,

    /// Write the default configuration file
    Init {
        /// Destination (default: ~/.phototree/config.toml)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(root) = &cli.root {
        config.storage.root = root.clone();
    }

    phototree_config::init_logging(config.log.level.raised(cli.verbose));
    log_cli_debug!(
        "Configuration loaded",
        root = tracing::field::display(config.storage_root().display())
    );

    match cli.command {
        Commands::Ingest(args) => {
            let pipeline = open_pipeline(config.ingest_options(), cli.json)?;
            ingest::run(&pipeline, args, config.ingest.threads, cli.json)
        }
        Commands::Rebuild => {
            let (_, report) = IngestPipeline::open(config.ingest_options())
                .context("Failed to open storage root")?;
            if cli.json {
                println!("{}", serde_json::to_string(&report)?);
            } else {
                println!(
                    "✅ Indexed {} blobs from {} files ({} bytes hashed)",
                    report.indexed, report.files, report.bytes_hashed
                );
                if report.partials_removed > 0 {
                    println!("🧹 Removed {} abandoned partial writes", report.partials_removed);
                }
                if report.skipped > 0 {
                    println!("⚠️  Skipped {} unreadable entries", report.skipped);
                }
                for dup in &report.duplicates {
                    println!("🔁 {} kept {}", dup.digest.short(), dup.kept);
                    for shadowed in &dup.shadowed {
                        println!("     shadows {}", shadowed);
                    }
                }
            }
            Ok(())
        }
        Commands::Inspect(args) => {
            let pipeline = open_pipeline(config.ingest_options(), cli.json)?;
            inspect::run(&pipeline, args, cli.json)
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                print!("{}", config.to_toml()?);
                Ok(())
            }
            ConfigCommands::Init { path, force } => {
                let path = path
                    .or_else(Config::global_config_path)
                    .context("Cannot determine home directory; pass --path")?;
                Config::write_default(&path, force)?;
                println!("📄 Wrote default configuration to {}", path.display());
                Ok(())
            }
        },
    }
}

/// Open the store and rebuild the index before any upload is accepted.
fn open_pipeline(options: IngestOptions, json: bool) -> Result<IngestPipeline> {
    let root = options.root.clone();
    let (pipeline, report) = IngestPipeline::open(options)
        .with_context(|| format!("Failed to open storage root {}", root.display()))?;

    log_bootstrap_info!(
        "Index ready",
        indexed = report.indexed,
        partials_removed = report.partials_removed
    );
    for dup in &report.duplicates {
        log_bootstrap_warn!(
            "Duplicate content on disk",
            digest = tracing::field::display(dup.digest),
            kept = dup.kept.as_str(),
            shadowed = dup.shadowed.len()
        );
    }
    if !json && report.indexed > 0 {
        println!("📦 {} existing blobs in {}", report.indexed, root.display());
    }
    Ok(pipeline)
}
