use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug)]
#[command(
    name = "directive-chunker",
    version,
    about = "Structure, entity and chunk extraction for scanned government directives"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Hash and list the page-record documents under the input root.
    Inventory(InventoryArgs),
    /// Run structure, entity and chunk extraction over the inventory.
    Ingest(IngestArgs),
    /// Report the latest manifests and artifact store counts.
    Status(StatusArgs),
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Inventory(_) => "inventory",
            Self::Ingest(_) => "ingest",
            Self::Status(_) => "status",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct InventoryArgs {
    #[arg(long, default_value = ".cache/directives")]
    pub input_root: PathBuf,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    #[arg(long, default_value = ".cache/directives")]
    pub input_root: PathBuf,

    #[arg(long)]
    pub inventory_manifest_path: Option<PathBuf>,

    #[arg(long)]
    pub ingest_manifest_path: Option<PathBuf>,

    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub refresh_inventory: bool,

    #[arg(long = "doc-id")]
    pub doc_ids: Vec<String>,

    #[arg(long)]
    pub dictionary_path: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = ChunkStrategy::Hierarchical)]
    pub chunk_strategy: ChunkStrategy,

    #[arg(long, default_value_t = 350)]
    pub max_chunk_words: usize,

    #[arg(long, default_value_t = 40)]
    pub overlap_words: usize,

    #[arg(long, default_value_t = 10_000.0)]
    pub amount_ceiling: f64,

    #[arg(long, default_value_t = 0.35)]
    pub confidence_threshold: f64,

    #[arg(long, default_value_t = 0.15)]
    pub merge_comparability: f64,

    #[arg(long, default_value_t = 0.01)]
    pub amount_tolerance: f64,

    #[arg(long)]
    pub publication_year: Option<i32>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    Hierarchical,
    Hybrid,
    Flat,
}

impl ChunkStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hierarchical => "hierarchical",
            Self::Hybrid => "hybrid",
            Self::Flat => "flat",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/directives")]
    pub input_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}
