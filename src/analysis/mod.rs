//! Shallow analysis and consensus ranking of searchable spaces.
//!
//! Analysis runs a cheap sampled search in every shard of every
//! construction and turns the results into a priority queue per constant.
//! Queues from several analysis modules are merged by [`consensus`].

pub mod analyzer;
pub mod consensus;
pub mod module;

pub use analyzer::{match_rank, Analyzer, RankedSpace, SpaceId};
pub use consensus::{aggregate, aggregate_by_constant, StableHash};
pub use module::{AnalysisModule, ShallowAnalysis};
