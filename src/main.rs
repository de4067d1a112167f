use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use forecast_alloc::AllocationEngine;
use forecast_alloc::CsvDirectoryLoader;
use forecast_alloc::JsonLinesSink;
use forecast_alloc::MissingDataPolicy;
use forecast_alloc::PipelineConfig;
use forecast_alloc::ResultSink;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Forecast next-day prices and allocate a long-only portfolio.
#[derive(Parser, Debug)]
#[command(name = "forecast-alloc", version, about)]
struct Cli {
  /// Pipeline configuration (TOML).
  #[arg(short, long)]
  config: PathBuf,

  /// Directory holding one `<TICKER>.csv` file per asset.
  #[arg(short, long)]
  prices: PathBuf,

  /// Append the run record to this JSON-lines file.
  #[arg(short, long)]
  output: Option<PathBuf>,

  /// Drop assets with unusable data instead of aborting.
  #[arg(long)]
  skip_missing: bool,

  /// Log filter used when `RUST_LOG` is not set.
  #[arg(long, default_value = "info")]
  log: String,
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false)
    .init();

  let mut config = PipelineConfig::load(&cli.config)
    .with_context(|| format!("failed to load config {}", cli.config.display()))?;
  if cli.skip_missing {
    config.missing_data_policy = MissingDataPolicy::SkipAsset;
  }

  let engine = AllocationEngine::new(config).context("invalid configuration")?;
  let loader = CsvDirectoryLoader::new(&cli.prices);
  let record = engine.run(&loader).context("allocation run failed")?;

  for excluded in &record.excluded {
    warn!(ticker = %excluded.ticker, error = %excluded.error, "excluded from run");
  }

  println!("{:<10} {:>14} {:>12} {:>10}", "ticker", "prediction", "return", "weight");
  for row in record.asset_rows() {
    println!(
      "{:<10} {:>14.4} {:>11.3}% {:>9.2}%",
      row.ticker,
      row.price_prediction,
      row.return_prediction * 100.0,
      row.portfolio_weight * 100.0
    );
  }
  info!(
    status = %record.allocation.solver_status,
    objective = record.allocation.objective_value,
    volatility = record.allocation.volatility,
    "allocation ready"
  );

  if let Some(path) = &cli.output {
    let mut sink = JsonLinesSink::open(path)
      .with_context(|| format!("failed to open {}", path.display()))?;
    sink.write(&record).context("failed to write run record")?;
  }

  Ok(())
}
