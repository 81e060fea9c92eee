//! volume-sampler: estimate 24h exchange volume from a trailing trade sample
//!
//! Usage:
//!   volume-sampler run --spot --swap
//!   volume-sampler --window-hours 2 sample --category swap BTC-USDT-SWAP ETH-USDT-SWAP
//!   volume-sampler show --category futures --limit 20
//!   volume-sampler cache-clear

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use volume_sampler::models::{Instrument, InstrumentCategory};
use volume_sampler::sampling::{RunSummary, SampleCache, SampleOrigin};
use volume_sampler::storage::VolumeDb;
use volume_sampler::{SamplerConfig, SamplingOrchestrator};

#[derive(Parser, Debug)]
#[command(name = "volume-sampler")]
#[command(about = "Sample recent public trades and extrapolate 24h volume per instrument")]
struct Cli {
    /// SQLite database path
    #[arg(long, global = true)]
    db: Option<String>,

    /// Directory holding cached trade samples
    #[arg(long, global = true)]
    cache_dir: Option<String>,

    /// Instruments sampled concurrently
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Sample window length in hours
    #[arg(long, global = true)]
    window_hours: Option<f64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Discover instruments and sample all of them (spot only when no flag is given)
    Run {
        #[arg(long)]
        spot: bool,
        #[arg(long)]
        futures: bool,
        #[arg(long)]
        swap: bool,
    },

    /// Sample an explicit list of symbols
    Sample {
        #[arg(short, long)]
        category: InstrumentCategory,

        #[arg(required = true)]
        symbols: Vec<String>,
    },

    /// Print stored estimates, newest first
    Show {
        #[arg(short, long)]
        category: Option<InstrumentCategory>,

        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Delete every cached sample
    CacheClear,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "volume_sampler=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(cli: &Cli) -> Result<SamplerConfig> {
    let mut config = SamplerConfig::from_env();
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    if let Some(dir) = &cli.cache_dir {
        config.cache_dir = dir.clone();
    }
    if let Some(n) = cli.concurrency {
        anyhow::ensure!(n > 0, "--concurrency must be at least 1");
        config.concurrency = n;
    }
    if let Some(h) = cli.window_hours {
        anyhow::ensure!(h > 0.0, "--window-hours must be positive");
        config.window_hours = h;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Run {
            spot,
            futures,
            swap,
        } => {
            let spot = spot || !(futures || swap);
            let orchestrator = SamplingOrchestrator::from_config(&config)?;
            let summary = orchestrator
                .run(spot, futures, swap)
                .await
                .context("sampling run failed")?;
            print_summary(&summary);
        }
        Commands::Sample { category, symbols } => {
            let instruments: Vec<Instrument> = symbols
                .into_iter()
                .map(|s| Instrument::new(s.to_ascii_uppercase(), category))
                .collect();
            let orchestrator = SamplingOrchestrator::from_config(&config)?;
            let summary = orchestrator
                .sample_instruments(&instruments)
                .await
                .context("sampling failed")?;
            print_summary(&summary);
        }
        Commands::Show { category, limit } => {
            let db = VolumeDb::new(&config.db_path, &config.exchange)?;
            let rows = db.list(category, limit).await?;
            if rows.is_empty() {
                println!("No stored estimates in {}", config.db_path);
            }
            println!(
                "{:<24} {:<8} {:>12} {:>18} {:>18} {:>7}  {}",
                "SYMBOL", "TYPE", "TRADES/24H", "VOLUME/24H", "OFFICIAL", "RATIO", "SAMPLED"
            );
            for row in rows {
                let ratio = row
                    .divergence_ratio()
                    .map(|r| format!("{:.2}", r))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<24} {:<8} {:>12} {:>18.4} {:>18.4} {:>7}  {}",
                    row.symbol,
                    row.trade_type,
                    row.total_trades,
                    row.total_volume,
                    row.official_volume,
                    ratio,
                    row.timestamp
                );
            }
        }
        Commands::CacheClear => {
            let cache = SampleCache::new(&config.cache_dir);
            let removed = cache.purge()?;
            info!(removed, dir = %cache.dir().display(), "Cache cleared");
            println!("Removed {} cached samples", removed);
        }
    }

    Ok(())
}

fn print_summary(summary: &RunSummary) {
    for report in &summary.reports {
        let origin = match report.origin {
            SampleOrigin::Cache => "cache",
            SampleOrigin::Network => "api",
        };
        let status = match &report.result {
            Ok(outcome) => format!("{:?}", outcome),
            Err(e) => format!("FAILED: {}", e),
        };
        println!(
            "{:<24} {:<8} {:<6} {}",
            report.instrument.symbol,
            report.instrument.category.as_str(),
            origin,
            status
        );
    }
    println!(
        "\n{} instruments: {} inserted, {} skipped, {} failed ({} from cache)",
        summary.total(),
        summary.inserted,
        summary.skipped,
        summary.failed,
        summary.cache_hits
    );
}
