//! tsdb CLI
//!
//! Command-line interface for storage maintenance:
//! - Show compaction tiers for a retention period
//! - Inspect a closed chunk index
//! - Plan and run a compaction cycle
//! - Generate a default config file

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tsdb_core::compaction::{tiers_for_retention, CompactionStrategy};
use tsdb_core::config::{generate_default_config, Config, TimeValue};
use tsdb_core::engine::MaintenanceEngine;
use tsdb_core::index::ClosedChunkIndex;
use tsdb_core::settings::{EngineSettings, IndexSettings};
use tsdb_core::storage::{Chunk, ChunkIterator, ValueType};

#[derive(Parser)]
#[command(name = "tsdb")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Storage maintenance for closed chunk indexes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: standard locations, then environment)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory, overrides the config file
    #[arg(short, long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show size-tiered compaction tiers
    Tiers {
        /// Retention period (e.g. 7d, 720h) or "unbounded"
        #[arg(short, long, default_value = "unbounded")]
        retention: String,
    },

    /// Show an index's segments and chunks
    Inspect {
        /// Index directory
        dir: PathBuf,
        /// Print every sample
        #[arg(long)]
        samples: bool,
    },

    /// Show what the next compaction cycle would merge
    Plan,

    /// Run one compaction cycle
    Compact,

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.to_string_lossy().to_string();
    }
    config.validate()?;

    let _ = tsdb_core::logging::init(&config.logging);

    let json = cli.format == "json";

    match cli.command {
        Commands::Tiers { retention } => {
            let hours = if retention.eq_ignore_ascii_case("unbounded") {
                None
            } else {
                Some(retention.parse::<TimeValue>()?.hours())
            };
            let tiers = tiers_for_retention(hours);

            if json {
                println!("{}", serde_json::to_string_pretty(&tiers)?);
            } else if tiers.is_empty() {
                println!("No tiers: size-tiered compaction is disabled for this retention");
            } else {
                let list: Vec<String> = tiers.iter().map(|t| format!("{}h", t)).collect();
                println!("{}", list.join(", "));
            }
        }

        Commands::Inspect { dir, samples } => {
            let index = ClosedChunkIndex::open(&dir).with_context(|| format!("opening index {:?}", dir))?;
            let chunks = index.chunks()?;

            if json {
                let body = serde_json::json!({
                    "id": index.id(),
                    "time_range": index.time_range(),
                    "resolution": index.resolution(),
                    "created_at": index.created_at(),
                    "segments": index.segment_count(),
                    "chunks": chunks.iter().map(|c| serde_json::json!({
                        "min_time": c.min_time,
                        "max_time": c.max_time,
                        "encoding": c.chunk.encoding().to_string(),
                        "bytes": c.chunk.bytes().len(),
                        "samples": c.chunk.num_samples(),
                    })).collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                println!("Index {}", index.id());
                println!("  Range: [{}, {}) {}", index.min_time(), index.max_time(), index.resolution());
                println!("  Created: {}", index.created_at().format("%Y-%m-%dT%H:%M:%SZ"));
                println!("  Segments: {}", index.segment_count());
                println!();
                println!("{:<16} {:<16} {:<8} {:<10} {}", "Min", "Max", "Enc", "Bytes", "Samples");
                println!("{}", "-".repeat(60));
                for entry in &chunks {
                    println!(
                        "{:<16} {:<16} {:<8} {:<10} {}",
                        entry.min_time,
                        entry.max_time,
                        entry.chunk.encoding(),
                        entry.chunk.bytes().len(),
                        entry.chunk.num_samples()
                    );
                }
            }

            if samples {
                for entry in &chunks {
                    let mut it = entry.chunk.chunk_iterator();
                    while it.next() == ValueType::Float {
                        let sample = it.at();
                        println!("{}\t{}", sample.timestamp, sample.value);
                    }
                    if let Some(e) = it.err() {
                        eprintln!("Chunk at {} is damaged: {}", entry.min_time, e);
                    }
                }
            }
        }

        Commands::Plan => {
            let engine = open_engine(&config)?;
            let plan = engine.plan()?;

            if json {
                let ids: Vec<_> = plan.iter().map(|i| i.id()).collect();
                println!("{}", serde_json::to_string_pretty(&ids)?);
            } else if plan.is_empty() {
                println!("Nothing to compact ({} compaction)", engine.compaction_type());
            } else {
                print_indexes(&plan);
                println!();
                println!(
                    "{} compaction, {}",
                    engine.compaction_type(),
                    if engine.compaction().is_in_place_compaction() {
                        "in place"
                    } else {
                        "into a new index"
                    }
                );
            }
        }

        Commands::Compact => {
            let engine = open_engine(&config)?;
            let outcome = engine.run_compaction_cycle()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else if outcome.is_empty() {
                println!("Nothing to compact");
            } else {
                println!("Compacted {} indexes", outcome.planned.len());
                if let Some(id) = outcome.created {
                    println!("  Created: {}", id);
                }
            }
        }

        Commands::Config { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content).with_context(|| format!("writing {:?}", path))?;
                    println!("Config written to {:?}", path);
                }
                None => print!("{}", content),
            }
        }
    }

    Ok(())
}

fn open_engine(config: &Config) -> anyhow::Result<MaintenanceEngine> {
    let settings = IndexSettings::new("default", EngineSettings::from(config))?;
    Ok(MaintenanceEngine::open(&config.data_dir, settings)?)
}

fn print_indexes(indexes: &[Arc<ClosedChunkIndex>]) {
    println!("{:<34} {:<16} {:<16} {}", "ID", "Min", "Max", "Segments");
    println!("{}", "-".repeat(76));
    for index in indexes {
        println!(
            "{:<34} {:<16} {:<16} {}",
            index.id().simple().to_string(),
            index.min_time(),
            index.max_time(),
            index.segment_count()
        );
    }
}
