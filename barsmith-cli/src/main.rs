//! Barsmith CLI: fetch, ingest and run commands.
//!
//! Commands:
//! - `fetch`: download raw bars from Yahoo Finance and save them as CSV
//! - `ingest`: normalize and validate a raw CSV file, persisting the result
//! - `run`: fetch, save the raw CSV, then ingest it

use anyhow::{Context, Result};
use barsmith_core::data::{
    CanonicalTable, FetchRequest, Interval, RawTable, RawTableSource, YahooProvider,
};
use barsmith_core::{IngestPipeline, PipelineConfig};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "barsmith",
    about = "Barsmith: normalize and validate OHLCV bar tables"
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download raw bars from Yahoo Finance and save them as CSV.
    Fetch {
        #[command(flatten)]
        range: FetchArgs,

        /// Output CSV path. Defaults to ./data/raw/{SYMBOL}.csv.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Normalize and validate a raw CSV file.
    Ingest {
        /// Raw CSV file.
        file: PathBuf,

        #[command(flatten)]
        ingest: IngestArgs,

        /// Instrument to record when the header does not name one.
        #[arg(long)]
        instrument: Option<String>,
    },
    /// Fetch, save the raw CSV, then ingest it.
    Run {
        #[command(flatten)]
        range: FetchArgs,

        #[command(flatten)]
        ingest: IngestArgs,

        /// Directory for the raw CSV. Defaults to ./data/raw.
        #[arg(long, default_value = "data/raw")]
        raw_dir: PathBuf,
    },
}

#[derive(Args)]
struct FetchArgs {
    /// Symbol to fetch (e.g., SPY, BTC-USD).
    symbol: String,

    /// Start date (YYYY-MM-DD). Defaults to one year ago.
    #[arg(long)]
    start: Option<String>,

    /// End date (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    end: Option<String>,

    /// Bar interval: 1m, 5m, 15m, 1h, 1d, 1wk, 1mo. Defaults to the config value.
    #[arg(long)]
    interval: Option<Interval>,
}

#[derive(Args)]
struct IngestArgs {
    /// Number of header rows (1 = flat, 2 = field/instrument).
    #[arg(long)]
    header_rows: Option<usize>,

    /// Artifact directory. Overrides the config value.
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Do not persist the canonical table.
    #[arg(long, default_value_t = false)]
    no_store: bool,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Fetch { range, out } => {
            let table = run_fetch(&range, &config)?;
            let out = out.unwrap_or_else(|| default_raw_path(Path::new("data/raw"), &range.symbol));
            save_raw(&table, &out)
        }
        Commands::Ingest {
            file,
            ingest,
            instrument,
        } => {
            let config = apply_ingest_args(config, &ingest);
            let raw = RawTable::from_path(&file, config.input.header_rows)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let raw = match instrument {
                Some(symbol) => raw.with_instrument(symbol),
                None => raw,
            };
            run_ingest(raw, &config)
        }
        Commands::Run {
            range,
            ingest,
            raw_dir,
        } => {
            let mut config = apply_ingest_args(config, &ingest);
            // the fetched table is always written with a flat header
            config.input.header_rows = 1;
            let table = run_fetch(&range, &config)?;
            let path = default_raw_path(&raw_dir, &range.symbol);
            save_raw(&table, &path)?;

            let raw = RawTable::from_path(&path, config.input.header_rows)?
                .with_instrument(range.symbol.trim());
            run_ingest(raw, &config)
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => Ok(PipelineConfig::from_file(path)?),
        None => Ok(PipelineConfig::default()),
    }
}

fn apply_ingest_args(mut config: PipelineConfig, args: &IngestArgs) -> PipelineConfig {
    if let Some(rows) = args.header_rows {
        config.input.header_rows = rows;
    }
    if let Some(dir) = &args.store_dir {
        config.store.dir = dir.clone();
    }
    if args.no_store {
        config.store.enabled = false;
    }
    config
}

fn parse_date(value: Option<&str>, default: NaiveDate) -> Result<NaiveDate> {
    match value {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("invalid date '{s}', expected YYYY-MM-DD")),
        None => Ok(default),
    }
}

fn run_fetch(args: &FetchArgs, config: &PipelineConfig) -> Result<RawTable> {
    let today = chrono::Local::now().date_naive();
    let start = parse_date(args.start.as_deref(), today - chrono::Duration::days(365))?;
    let end = parse_date(args.end.as_deref(), today)?;
    let interval = args.interval.unwrap_or(config.provider.interval);

    let request = FetchRequest::new(&args.symbol, start, end, interval)?;
    let provider = YahooProvider::new(&config.provider)?;
    info!(
        source = provider.name(),
        symbol = %request.symbol,
        %start,
        %end,
        %interval,
        "fetching"
    );
    Ok(provider.fetch(&request)?)
}

fn default_raw_path(dir: &Path, symbol: &str) -> PathBuf {
    dir.join(format!("{}.csv", symbol.trim()))
}

fn save_raw(table: &RawTable, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    table
        .write_csv_path(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Raw table saved to: {} ({} rows)", path.display(), table.height());
    Ok(())
}

fn run_ingest(raw: RawTable, config: &PipelineConfig) -> Result<()> {
    let pipeline = IngestPipeline::from_config(config);
    let table = pipeline.run(raw)?;
    print_summary(&table)
}

fn print_summary(table: &CanonicalTable) -> Result<()> {
    println!("Instrument: {}", table.instrument().unwrap_or("unknown"));
    println!("Rows:       {}", table.height());
    if let Some((first, last)) = table.timestamp_range()? {
        println!("Range:      {first} to {last}");
    }
    let suspicious = table.bars()?.iter().filter(|b| !b.is_consistent()).count();
    if suspicious > 0 {
        warn!(suspicious, "bars with high/low outside open/close");
    }
    Ok(())
}
