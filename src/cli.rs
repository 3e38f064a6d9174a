use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::semantic::DEFAULT_MODEL_ID;

#[derive(Parser, Debug)]
#[command(
    name = "policyrag",
    version,
    about = "Insurance policy PDF indexing and retrieval tooling"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Inventory(InventoryArgs),
    Ingest(IngestArgs),
    Query(QueryArgs),
    Stats(StatsArgs),
    Evaluate(EvaluateArgs),
}

#[derive(Args, Debug, Clone)]
pub struct InventoryArgs {
    #[arg(long, default_value = ".cache/policyrag")]
    pub cache_root: PathBuf,

    #[arg(long, env = "POLICY_RAG_CORPUS_DIR", default_value = "data")]
    pub corpus_dir: PathBuf,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    #[arg(long, default_value = ".cache/policyrag")]
    pub cache_root: PathBuf,

    #[arg(long, env = "POLICY_RAG_CORPUS_DIR", default_value = "data")]
    pub corpus_dir: PathBuf,

    #[arg(long, env = "POLICY_RAG_DB_PATH")]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub ingest_manifest_path: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    #[arg(long, default_value_t = DEFAULT_CHUNK_OVERLAP)]
    pub chunk_overlap: usize,

    #[arg(long, env = "POLICY_RAG_MODEL_ID", default_value = DEFAULT_MODEL_ID)]
    pub model_id: String,

    #[arg(long, default_value_t = 1)]
    pub jobs: usize,

    #[arg(long)]
    pub max_pages_per_doc: Option<usize>,

    #[arg(long, value_enum, default_value_t = TableExtractionMode::Full)]
    pub table_extraction: TableExtractionMode,
}

/// `Simple` runs the layout strategy only; `Full` stacks every strategy.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum TableExtractionMode {
    Simple,
    Full,
}

impl TableExtractionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Full => "full",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    #[arg(long, default_value = ".cache/policyrag")]
    pub cache_root: PathBuf,

    #[arg(long, env = "POLICY_RAG_DB_PATH")]
    pub db_path: Option<PathBuf>,

    #[arg(long, env = "POLICY_RAG_MODEL_ID", default_value = DEFAULT_MODEL_ID)]
    pub model_id: String,

    #[arg(long)]
    pub question: String,

    #[arg(long, default_value_t = 5)]
    pub top_k: usize,

    /// Equality filter on stored metadata, e.g. `section_type=exclusion`.
    #[arg(long = "filter")]
    pub filters: Vec<String>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatsArgs {
    #[arg(long, default_value = ".cache/policyrag")]
    pub cache_root: PathBuf,

    #[arg(long, env = "POLICY_RAG_DB_PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct EvaluateArgs {
    #[arg(long, default_value = ".cache/policyrag")]
    pub cache_root: PathBuf,

    #[arg(long, env = "POLICY_RAG_DB_PATH")]
    pub db_path: Option<PathBuf>,

    #[arg(long, env = "POLICY_RAG_MODEL_ID", default_value = DEFAULT_MODEL_ID)]
    pub model_id: String,

    #[arg(long)]
    pub cases: PathBuf,

    #[arg(long, default_value_t = 5)]
    pub top_k: usize,

    #[arg(long)]
    pub report_path: Option<PathBuf>,
}
