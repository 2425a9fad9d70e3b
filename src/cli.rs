use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::{loader::ImportStrategy, schema::SchemaStrategy};

#[derive(Debug, Parser)]
#[command(author, version, about = "Replicate exported CSV tables into a relational destination", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show how each raw header maps to its destination column name
    Headers(HeadersArgs),
    /// Normalize headers and clean values, writing the result as CSV
    Clean(CleanArgs),
    /// Replicate every table listed in a run configuration
    Replicate(ReplicateArgs),
}

#[derive(Debug, Args)]
pub struct HeadersArgs {
    /// Input CSV file (use '-' for stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct CleanArgs {
    /// Input CSV file (use '-' for stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Output CSV file (defaults to stdout)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Only normalize headers; leave values untouched
    #[arg(long)]
    pub raw: bool,
    /// Run configuration supplying classification rules and the forced raw list
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
    /// Logical table name checked against the forced raw list
    #[arg(long)]
    pub table: Option<String>,
}

#[derive(Debug, Args)]
pub struct ReplicateArgs {
    /// YAML run configuration listing the tables to replicate
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,
    /// PostgreSQL connection string (requires the `postgres` feature)
    #[arg(long = "database-url", conflicts_with = "dry_run")]
    pub database_url: Option<String>,
    /// Replicate into an in-memory destination instead of a database
    #[arg(long = "dry-run")]
    pub dry_run: bool,
    /// Also write the JSON run report to this file
    #[arg(long)]
    pub report: Option<PathBuf>,
    /// Skip value cleaning for every table
    #[arg(long)]
    pub raw: bool,
    /// Override the configured import strategy
    #[arg(long, value_enum)]
    pub strategy: Option<ImportStrategy>,
    /// Override the configured schema strategy
    #[arg(long = "schema-strategy", value_enum)]
    pub schema_strategy: Option<SchemaStrategy>,
    /// Override the configured batch size
    #[arg(long = "batch-size", value_parser = clap::value_parser!(usize))]
    pub batch_size: Option<usize>,
}
