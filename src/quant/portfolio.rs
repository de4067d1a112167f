//! # Portfolio
//!
//! $$
//! \sigma_p^2 = \mathbf{w}^\top \Sigma \mathbf{w}
//! $$
//!
//! Return estimation and constrained mean-variance allocation.

pub mod data;
pub mod optimizers;
pub mod types;

pub use data::ensure_psd;
pub use data::pairwise_covariance;
pub use data::simple_returns_series;
pub use data::ReturnEstimator;
pub use data::ReturnStats;
pub use optimizers::optimize_mean_variance;
pub use optimizers::project_onto_feasible;
pub use optimizers::MeanVarianceProblem;
pub use optimizers::SolverSettings;
pub use types::AllocationResult;
pub use types::PortfolioResult;
pub use types::SolverStatus;
