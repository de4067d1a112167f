//! # Quant
//!
//! $$
//! \hat p_{i,T+1}\ \longrightarrow\ \mu_i\ \longrightarrow\ \mathbf w^\*
//! $$
//!
//! Numerical core: per-asset forecasting, fit-quality losses and the
//! portfolio layer.

pub mod forecast;
pub mod loss;
pub mod portfolio;
