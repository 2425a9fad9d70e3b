pub mod cleaner;
pub mod cli;
pub mod columns;
pub mod config;
pub mod data;
pub mod destination;
pub mod io_utils;
pub mod loader;
pub mod orchestrator;
pub mod parser;
pub mod retry;
pub mod schema;
pub mod table;

use std::{env, fs, path::Path, sync::OnceLock};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, debug, info, warn};

use crate::{
    cleaner::ValueCleaner,
    cli::{Cli, Commands},
    columns::HeaderMapping,
    config::{ReplicationConfig, RunConfig},
    destination::{Destination, memory::MemoryDestination},
    orchestrator::{Replicator, TableSource, TableState},
    parser::ParsedCsv,
    table::TextTable,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv_replicator", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Headers(args) => handle_headers(&args),
        Commands::Clean(args) => handle_clean(&args),
        Commands::Replicate(args) => handle_replicate(&args),
    }
}

fn read_csv(path: &Path, encoding: Option<&str>) -> Result<ParsedCsv> {
    let encoding = io_utils::resolve_encoding(encoding)?;
    let text = io_utils::read_input_text(path, encoding)?;
    let parsed = parser::parse_csv(&text);
    if parsed.is_empty() {
        bail!("{path:?} has no header row");
    }
    Ok(parsed)
}

fn handle_headers(args: &cli::HeadersArgs) -> Result<()> {
    let parsed = read_csv(&args.input, args.input_encoding.as_deref())?;
    let mapping = HeaderMapping::from_headers(&parsed.headers);
    let cleaner = ValueCleaner::default();
    let mut table = TextTable::new(["#", "header", "column", "type"]);
    for column in &mapping.columns {
        table.push_row([
            column.position.to_string(),
            column.original.clone(),
            column.normalized.clone(),
            cleaner.classify(&column.normalized).to_string(),
        ]);
    }
    print!("{table}");
    Ok(())
}

fn handle_clean(args: &cli::CleanArgs) -> Result<()> {
    let run_config = args
        .config
        .as_deref()
        .map(RunConfig::load)
        .transpose()?;
    let replication = run_config
        .as_ref()
        .map(|c| c.replication.clone())
        .unwrap_or_default();
    let encoding = args
        .input_encoding
        .as_deref()
        .or_else(|| run_config.as_ref().and_then(|c| c.input_encoding.as_deref()));
    let raw = args.raw
        || replication.raw_mode
        || args
            .table
            .as_deref()
            .is_some_and(|name| replication.forces_raw(name));

    let parsed = read_csv(&args.input, encoding)?;
    let mapping = HeaderMapping::from_headers(&parsed.headers);
    let columns = mapping.names();
    debug!("Cleaning {} row(s) across {} column(s)", parsed.records.len(), columns.len());

    let rows = if raw {
        parsed.records.iter().map(|r| r.values().to_vec()).collect()
    } else {
        let cleaner = ValueCleaner::new(
            replication
                .cleaner_config()
                .context("Compiling column classification rules")?,
        );
        let values: Vec<&[Option<String>]> = parsed.records.iter().map(|r| r.values()).collect();
        let cleaned = cleaner.clean_rows(&columns, &values);
        if !cleaned.warnings.is_empty() {
            warn!("{} value(s) could not be cleaned and were nulled", cleaned.warnings.len());
        }
        cleaned.rows
    };

    let mut writer = io_utils::open_csv_writer(args.output.as_deref())?;
    writer
        .write_record(&columns)
        .context("Writing header row")?;
    for row in &rows {
        writer
            .write_record(row.iter().map(|v| v.as_deref().unwrap_or_default()))
            .context("Writing cleaned row")?;
    }
    writer.flush().context("Flushing output")?;
    info!("Wrote {} row(s){}", rows.len(), if raw { " (raw)" } else { "" });
    Ok(())
}

fn apply_overrides(replication: &mut ReplicationConfig, args: &cli::ReplicateArgs) -> Result<()> {
    if args.raw {
        replication.raw_mode = true;
    }
    if let Some(strategy) = args.strategy {
        replication.import_strategy = strategy;
    }
    if let Some(strategy) = args.schema_strategy {
        replication.schema_strategy = strategy;
    }
    if let Some(size) = args.batch_size {
        replication.batch_size = size;
    }
    replication.validate()
}

fn open_destination(args: &cli::ReplicateArgs) -> Result<Box<dyn Destination>> {
    if args.dry_run {
        info!("Dry run: replicating into an in-memory destination");
        return Ok(Box::new(MemoryDestination::new()));
    }
    match &args.database_url {
        Some(url) => connect_postgres(url),
        None => bail!("Either --database-url or --dry-run is required"),
    }
}

#[cfg(feature = "postgres")]
fn connect_postgres(url: &str) -> Result<Box<dyn Destination>> {
    let destination = destination::postgres::PostgresDestination::connect(url)
        .context("Connecting to PostgreSQL")?;
    Ok(Box::new(destination))
}

#[cfg(not(feature = "postgres"))]
fn connect_postgres(_url: &str) -> Result<Box<dyn Destination>> {
    bail!("PostgreSQL support is not compiled in; rebuild with `--features postgres` or use --dry-run")
}

fn handle_replicate(args: &cli::ReplicateArgs) -> Result<()> {
    let RunConfig {
        mut replication,
        input_encoding,
        tables,
    } = RunConfig::load(&args.config)?;
    apply_overrides(&mut replication, args)
        .with_context(|| format!("Applying command line overrides to {:?}", args.config))?;
    if tables.is_empty() {
        bail!("{:?} lists no tables", args.config);
    }

    let encoding = io_utils::resolve_encoding(input_encoding.as_deref())?;
    let sources: Vec<TableSource> = tables
        .iter()
        .map(|entry| {
            match io_utils::read_input_text(&entry.path, encoding)
                .with_context(|| format!("Reading table '{}' from {:?}", entry.name, entry.path))
            {
                Ok(text) => TableSource::new(entry.name.clone(), text),
                Err(err) => TableSource::unreadable(entry.name.clone(), format!("{err:#}")),
            }
        })
        .collect();

    let destination = open_destination(args)?;
    let mut replicator = Replicator::new(destination, replication)
        .context("Compiling column classification rules")?;
    let report = replicator.replicate_all(sources);

    let json = serde_json::to_string_pretty(&report).context("Serializing run report")?;
    println!("{json}");
    if let Some(path) = &args.report {
        fs::write(path, &json).with_context(|| format!("Writing run report to {path:?}"))?;
    }

    let failed = report.count(TableState::Failed);
    if failed > 0 {
        bail!("{failed} of {} table(s) failed to replicate", report.tables.len());
    }
    Ok(())
}
