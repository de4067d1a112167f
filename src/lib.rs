//! # forecast-alloc
//!
//! $$
//! \mathbf{w}^\*=\arg\max_{\mathbf 1^\top\mathbf w=1,\ \mathbf l\le\mathbf w\le\mathbf u}
//! \ \hat{\boldsymbol\mu}^\top\mathbf w-\lambda\,\mathbf w^\top\Sigma\mathbf w
//! $$
//!
//! Forecast-to-allocation pipeline. Each asset's price history is fitted with
//! a piecewise-linear trend plus Fourier seasonality, the one-step-ahead
//! forecast becomes the asset's expected return, and a long-only
//! mean-variance optimizer turns those returns and the historical covariance
//! into portfolio weights.
//!
//! ```no_run
//! use forecast_alloc::AllocationEngine;
//! use forecast_alloc::CsvDirectoryLoader;
//! use forecast_alloc::PipelineConfig;
//!
//! let config = PipelineConfig::load("allocation.toml")?;
//! let loader = CsvDirectoryLoader::new("prices");
//! let record = AllocationEngine::new(config)?.run(&loader)?;
//! for row in record.asset_rows() {
//!   println!("{} {:.4}", row.ticker, row.portfolio_weight);
//! }
//! # Ok::<(), forecast_alloc::PipelineError>(())
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod pipeline;
pub mod quant;

pub use config::AssetBounds;
pub use config::MissingDataPolicy;
pub use config::PipelineConfig;
pub use config::SolverConfig;
pub use data::CsvDirectoryLoader;
pub use data::InMemoryLoader;
pub use data::PriceLoader;
pub use data::PricePoint;
pub use data::PriceSeries;
pub use error::PipelineError;
pub use error::Result;
pub use pipeline::AllocationEngine;
pub use pipeline::AssetRow;
pub use pipeline::ExcludedAsset;
pub use pipeline::JsonLinesSink;
pub use pipeline::ResultSink;
pub use pipeline::RunRecord;
pub use quant::forecast::forecast;
pub use quant::forecast::Forecast;
pub use quant::forecast::ForecastConfig;
pub use quant::forecast::MarketHoliday;
pub use quant::forecast::SeasonalityMode;
pub use quant::portfolio::AllocationResult;
pub use quant::portfolio::SolverStatus;
