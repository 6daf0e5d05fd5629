//! Strata launcher
//!
//! `strata inspect` discovers a dataset and prints its schema and
//! fragments; `strata scan` runs a filtered, projected scan and prints the
//! resulting batches.

mod config;
mod filter;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::util::pretty::print_batches;
use clap::{Args, Parser, Subcommand, ValueEnum};
use strata_common::FileSystemBuilder;
use strata_core::{
    DataSource, Dataset, FileFormatRef, FileSystemDiscoveryOptions, IpcFileFormat, Parallelism,
    ParquetFileFormat, ScanOrdering,
};
use tracing::info;

use crate::config::LauncherConfig;
use crate::filter::{parse_filters, parse_partitioning};

#[derive(Debug, Parser)]
#[command(name = "strata", version, about = "Discover and scan partitioned datasets")]
struct Cli {
    /// Increase logging verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// JSON configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the unified schema and the fragments of a dataset.
    Inspect(DatasetArgs),
    /// Scan a dataset and print the matching rows.
    Scan(ScanArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    Parquet,
    Ipc,
}

#[derive(Debug, Args)]
struct DatasetArgs {
    /// Dataset root directory, relative to the filesystem root.
    root: String,

    #[arg(long, value_enum, default_value_t = FormatArg::Parquet)]
    format: FormatArg,

    /// none, hive or directory:<field>,<field>...
    #[arg(long, default_value = "none")]
    partitioning: String,

    /// Fail on malformed partition segments.
    #[arg(long)]
    strict: bool,

    /// Skip files that are not in the chosen format.
    #[arg(long)]
    exclude_invalid: bool,
}

#[derive(Debug, Args)]
struct ScanArgs {
    #[command(flatten)]
    dataset: DatasetArgs,

    /// Row filter `column<op>value`; repeated filters are combined with and.
    #[arg(long = "filter")]
    filters: Vec<String>,

    /// Columns to output, comma separated.
    #[arg(long, value_delimiter = ',')]
    columns: Option<Vec<String>>,

    #[arg(long)]
    batch_size: Option<usize>,

    /// Worker threads.
    #[arg(long)]
    threads: Option<usize>,

    /// Yield batches as they complete instead of in fragment order.
    #[arg(long)]
    unordered: bool,

    /// Scan on the calling thread.
    #[arg(long)]
    serial: bool,

    /// Print only the number of matching rows.
    #[arg(long)]
    count: bool,

    /// Stop after this many rows.
    #[arg(long)]
    limit: Option<usize>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => LauncherConfig::load(path)?,
        None => LauncherConfig::default(),
    };
    tracing_subscriber::fmt()
        .with_max_level(config.log_level(cli.verbose)?)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Inspect(args) => inspect(&config, &args),
        Command::Scan(args) => scan(&config, &args),
    }
}

fn open_dataset(config: &LauncherConfig, args: &DatasetArgs) -> Result<Dataset> {
    let filesystem = FileSystemBuilder::from_config(config.filesystem.clone())
        .build()
        .context("failed to create filesystem")?;
    let format: FileFormatRef = match args.format {
        FormatArg::Parquet => Arc::new(ParquetFileFormat::with_options(config.parquet.clone())),
        FormatArg::Ipc => Arc::new(IpcFileFormat::new()),
    };
    let options = FileSystemDiscoveryOptions::default()
        .with_partitioning(parse_partitioning(&args.partitioning, args.strict)?)
        .with_exclude_invalid_files(args.exclude_invalid);
    let dataset = Dataset::discover(filesystem, args.root.as_str(), format, options)
        .with_context(|| format!("failed to discover dataset at '{}'", args.root))?;
    info!(root = %args.root, fields = dataset.schema().fields().len(), "opened dataset");
    Ok(dataset)
}

fn inspect(config: &LauncherConfig, args: &DatasetArgs) -> Result<()> {
    let dataset = open_dataset(config, args)?;
    println!("schema:");
    for field in dataset.schema().fields() {
        let nullable = if field.is_nullable() { "" } else { " not null" };
        println!("  {}: {}{}", field.name(), field.data_type(), nullable);
    }
    println!("fragments:");
    for source in dataset.sources() {
        for fragment in source.fragments() {
            println!("  {}  [{}]", fragment.path(), fragment.partition_expression());
        }
    }
    Ok(())
}

fn scan(config: &LauncherConfig, args: &ScanArgs) -> Result<()> {
    let dataset = open_dataset(config, &args.dataset)?;
    let mut options = config.scan.clone();
    if let Some(batch_size) = args.batch_size {
        options.batch_size = batch_size;
    }
    if let Some(threads) = args.threads {
        options.parallelism = Parallelism::Threads(threads);
    }
    if args.unordered {
        options.ordering = ScanOrdering::Unordered;
    }
    if args.serial {
        options.use_threads = false;
    }

    let mut builder = dataset
        .new_scan()
        .options(options)
        .filter(parse_filters(&args.filters, dataset.schema())?);
    if let Some(columns) = &args.columns {
        builder = builder.project(columns.iter().cloned());
    }
    let scanner = builder.build().context("invalid scan")?;

    if args.count {
        println!("{}", scanner.count_rows()?);
        return Ok(());
    }

    let limit = args.limit.unwrap_or(usize::MAX);
    let mut batches = Vec::new();
    let mut rows = 0;
    for item in scanner.execute()? {
        if rows >= limit {
            break;
        }
        let batch = item?;
        let take = batch.num_rows().min(limit - rows);
        rows += take;
        batches.push(batch.slice(0, take));
    }
    print_batches(&batches)?;
    info!(rows, "scan finished");
    Ok(())
}
