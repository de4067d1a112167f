//! # Pipeline
//!
//! $$
//! \text{load}\ \to\ \text{forecast}\ \to\ \text{estimate}\ \to\ \text{optimize}\ \to\ \text{assemble}
//! $$
//!
//! Orchestration of a run and the record it produces.

pub mod engine;
pub mod record;
pub mod sink;

pub use engine::AllocationEngine;
pub use record::AssetRow;
pub use record::ExcludedAsset;
pub use record::RunRecord;
pub use sink::JsonLinesSink;
pub use sink::ResultSink;
