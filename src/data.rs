//! # Data
//!
//! $$
//! \{(d_t, p_t)\}_{t=1}^{n},\quad d_t < d_{t+1},\ p_t > 0
//! $$
//!
//! Validated price series and the loader collaborators that produce them.

pub mod loader;
pub mod series;

pub use loader::CsvDirectoryLoader;
pub use loader::InMemoryLoader;
pub use loader::PriceLoader;
pub use series::PricePoint;
pub use series::PriceSeries;
