use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "shamela-export",
    version,
    about = "Export a Shamela archive into self-contained per-book JSON documents"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan the index store and write per-book intermediate CSV files.
    Extract(ExtractArgs),
    /// Assemble per-book JSON documents from the intermediate files and metadata.
    Build(BuildArgs),
    /// Delete the intermediate per-book page files.
    Clean(CleanArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ExtractArgs {
    #[arg(long, default_value = "C:/shamela4")]
    pub shamela_path: PathBuf,

    #[arg(long, default_value = ".")]
    pub output_path: PathBuf,

    /// Process only the first book found in each index.
    #[arg(long, default_value_t = false)]
    pub test_single_book: bool,

    /// Process only this book id.
    #[arg(long)]
    pub book_id: Option<u64>,

    /// Worker threads; defaults to the available parallelism.
    #[arg(long)]
    pub jobs: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    #[arg(long, default_value = "C:/shamela4")]
    pub shamela_path: PathBuf,

    #[arg(long, default_value = ".")]
    pub extracted_path: PathBuf,

    /// Emit a table of contents and strip markup from page text.
    #[arg(long, default_value_t = false)]
    pub generate_toc: bool,

    #[arg(long, value_enum, default_value_t = TocDepthSource::Parent)]
    pub toc_depth: TocDepthSource,

    /// Stored field carrying the heading level when `--toc-depth field` is used.
    #[arg(long, default_value = "level")]
    pub toc_level_field: String,

    #[arg(long, default_value_t = false)]
    pub test_single_book: bool,

    #[arg(long)]
    pub book_id: Option<u64>,

    #[arg(long)]
    pub jobs: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct CleanArgs {
    #[arg(long, default_value = ".")]
    pub output_path: PathBuf,

    /// Confirm deletion; nothing is removed without it.
    #[arg(long, default_value_t = false)]
    pub yes: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum TocDepthSource {
    Parent,
    Field,
    Indent,
    Flat,
}

impl TocDepthSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parent => "parent",
            Self::Field => "field",
            Self::Indent => "indent",
            Self::Flat => "flat",
        }
    }
}
