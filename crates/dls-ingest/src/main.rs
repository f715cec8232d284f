//! DLS Ingest - statistical series ingestion tool

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dls_common::logging::{init_logging, LogConfig, LogLevel};
use dls_ingest::config::IngestConfig;
use dls_ingest::context::IngestContext;
use dls_ingest::dataset::DatasetRun;
use dls_ingest::provider::ProviderProfile;
use dls_ingest::runner::{DatasetOutcome, ProviderRunner, SdmxAdapter};
use dls_ingest::sdmx::{parse_structure, SeriesLayout, SeriesReader, SeriesSource};
use dls_ingest::store::{MemoryStore, SeriesStore};
use dls_ingest::xml::open_document;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "dls-ingest")]
#[command(author, version, about = "Statistical series ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse a data message and print its series as JSON lines
    Parse {
        #[command(flatten)]
        input: Input,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Ingest a data message into the configured store
    Ingest {
        #[command(flatten)]
        input: Input,
    },

    /// Run a provider from its published catalog
    Run {
        /// Provider profile
        #[arg(short, long)]
        provider: String,

        /// Structure message listing categories and dataflows
        #[arg(short, long)]
        catalog: String,

        /// Datasets to run, every catalog dataset when empty
        datasets: Vec<String>,
    },
}

#[derive(clap::Args, Debug)]
struct Input {
    /// Provider profile (ecb, insee, fed, imf, destatis, eurostat or any name)
    #[arg(short, long)]
    provider: String,

    /// Dataset (dataflow or DSD id)
    #[arg(short, long)]
    dataset: String,

    /// Structure message
    #[arg(short, long)]
    structure: PathBuf,

    /// Data message, plain or gzip
    data: PathBuf,
}

impl Input {
    fn open(&self) -> Result<(ProviderProfile, SeriesLayout, SeriesReader<dls_ingest::xml::DocumentSource>)> {
        let profile = ProviderProfile::by_name(&self.provider);
        let structure = open_document(&self.structure)
            .with_context(|| format!("Failed to open {}", self.structure.display()))?;
        let def = parse_structure(structure)?;
        let layout = def.layout(&self.dataset)?;

        let data = open_document(&self.data).with_context(|| format!("Failed to open {}", self.data.display()))?;
        let reader = SeriesReader::new(data, layout.clone(), profile.clone())?;
        Ok((profile, layout, reader))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    // LOG_* variables that are set take precedence over the flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("dls-ingest")
        .build()
        .with_env_overrides()?;
    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Parse { input, output } => parse(&input, output).await,
        Command::Ingest { input } => ingest(&input).await,
        Command::Run {
            provider,
            catalog,
            datasets,
        } => run(&provider, &catalog, datasets).await,
    }
}

async fn parse(input: &Input, output: Option<PathBuf>) -> Result<()> {
    let (_, _, mut reader) = input.open()?;
    let mut out: Box<dyn Write> = match output {
        Some(path) => Box::new(std::io::BufWriter::new(std::fs::File::create(path)?)),
        None => Box::new(std::io::stdout().lock()),
    };

    let (mut written, mut rejected) = (0usize, 0usize);
    for item in reader.by_ref() {
        match item {
            Ok(record) => {
                serde_json::to_writer(&mut out, &record)?;
                writeln!(out)?;
                written += 1;
            },
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(error = %e, "Series skipped");
                rejected += 1;
            },
        }
    }
    out.flush()?;

    let codes = reader.take_observed_codes();
    info!(series = written, rejected, codelists = codes.len(), "Parse complete");
    Ok(())
}

async fn ingest(input: &Input) -> Result<()> {
    let config = IngestConfig::from_env()?;
    let store = open_store(&config).await?;
    let (profile, layout, mut reader) = input.open()?;

    store.upsert_provider(&profile.provider()).await?;
    let mut run = DatasetRun::open(store.as_ref(), &profile.name, &input.dataset, config.reconcile_options()).await?;
    run.apply_layout(&layout);
    run.set_last_update(reader.prepared());

    let dataset = run.update_database(&mut reader).await?;
    let stats = dataset.last_run.clone().unwrap_or_default();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    info!(
        provider = %dataset.provider_name,
        dataset = %dataset.dataset_code,
        enable = dataset.enable,
        "Ingestion complete"
    );
    Ok(())
}

async fn run(provider: &str, catalog: &str, datasets: Vec<String>) -> Result<()> {
    let config = IngestConfig::from_env()?;
    let store = open_store(&config).await?;
    let ctx = IngestContext::with_http(store, config)?;

    let profile = ProviderProfile::by_name(provider);
    let mut adapter = SdmxAdapter::new(profile.clone(), ctx.downloader.clone(), catalog);
    if let Some(resolver) = ctx.codelist_resolver(&profile) {
        adapter = adapter.with_resolver(Arc::new(resolver));
    }

    let codes = (!datasets.is_empty()).then_some(datasets);
    let report = ProviderRunner::new(&ctx, &adapter).run(codes.as_deref()).await?;
    for (code, outcome) in &report.datasets {
        match outcome {
            DatasetOutcome::Stored(dataset) => println!(
                "{code}: stored, enable={}, {}",
                dataset.enable,
                serde_json::to_string(&dataset.last_run)?
            ),
            DatasetOutcome::Skipped(reason) => println!("{code}: skipped ({reason})"),
            DatasetOutcome::Failed(e) => println!("{code}: failed ({e})"),
        }
    }
    info!(
        provider = %report.provider,
        categories = report.categories,
        errors = report.errors,
        "Provider run complete"
    );
    Ok(())
}

#[cfg(feature = "postgres")]
async fn open_store(config: &IngestConfig) -> Result<Arc<dyn SeriesStore>> {
    match &config.database_url {
        Some(url) => {
            let store = dls_ingest::store::PgStore::connect(url, 5).await?;
            Ok(Arc::new(store))
        },
        None => {
            warn!("DATABASE_URL not set, using an in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        },
    }
}

#[cfg(not(feature = "postgres"))]
async fn open_store(config: &IngestConfig) -> Result<Arc<dyn SeriesStore>> {
    if config.database_url.is_some() {
        warn!("DATABASE_URL ignored, built without the postgres feature");
    }
    Ok(Arc::new(MemoryStore::new()))
}
