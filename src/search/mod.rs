//! Sampled search over searchable spaces.
//!
//! - [`SerialSearcher`]: trajectory generation and pair evaluation for one space
//! - [`DeepSearcher`]: full-feature search over spaces kept by analysis
//! - [`DataManager`]: per-space result store and statistics
//! - [`PairEvaluator`]: the pure per-pair computation run by workers

pub mod data_manager;
pub mod deep;
pub mod serial;
pub mod worker;

pub use data_manager::{DataManager, FailureStage, SearchData, SearchVector};
pub use deep::DeepSearcher;
pub use serial::{SearchState, SerialSearcher};
pub use worker::{delta_of_estimate, identification_values, PairEvaluator, PairOutcome};
