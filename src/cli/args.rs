//! CLI argument definitions using clap derive

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::cli::commands::{
    completions::CompletionsArgs, db::DbCommands, init::InitArgs, log::LogCommands,
    part::PartCommands, product::ProductCommands, report::ReportCommands, trace::TraceCommands,
    work::WorkCommands,
};

#[derive(Parser)]
#[command(name = "mes")]
#[command(author, version, about = "MES Toolkit")]
#[command(
    long_about = "Work instructions, production logs and serialized part traceability for a manufacturing line, stored in a local SQLite database."
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalOpts,
}

#[derive(clap::Args, Clone, Debug)]
pub struct GlobalOpts {
    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "auto")]
    pub format: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Enable verbose output
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Project root (default: auto-detect by finding .mes/)
    #[arg(long, global = true)]
    pub project: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new MES project
    Init(InitArgs),

    /// Part definitions and serialized parts
    #[command(subcommand)]
    Part(PartCommands),

    /// Products and their work instruction links
    #[command(subcommand)]
    Product(ProductCommands),

    /// Work instruction versions and chains
    #[command(subcommand)]
    Work(WorkCommands),

    /// Production logs and step attempts
    #[command(subcommand)]
    Log(LogCommands),

    /// Part traceability ledger and genealogy
    #[command(subcommand)]
    Trace(TraceCommands),

    /// Production, traceability and first-pass yield reports
    #[command(subcommand)]
    Report(ReportCommands),

    /// Database status and read-only queries
    #[command(subcommand)]
    Db(DbCommands),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Automatically detect based on context (yaml for show, tsv for list)
    #[default]
    Auto,
    /// YAML format (full fidelity)
    Yaml,
    /// Tab-separated values (for piping)
    Tsv,
    /// JSON format (for programming)
    Json,
    /// CSV format (for spreadsheets)
    Csv,
    /// Markdown tables
    Md,
    /// Just IDs, one per line
    Id,
}

impl OutputFormat {
    /// Resolve `auto` against the configured default, then the given fallback
    pub fn resolve(self, configured: Option<&str>, fallback: OutputFormat) -> OutputFormat {
        if self != OutputFormat::Auto {
            return self;
        }
        configured
            .and_then(|s| OutputFormat::from_str(s, true).ok())
            .filter(|f| *f != OutputFormat::Auto)
            .unwrap_or(fallback)
    }
}
