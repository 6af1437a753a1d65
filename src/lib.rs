//! Shard partitioning and sampled trajectory search over conservative
//! matrix fields.
//!
//! A matrix field indexed by an integer lattice has singular hyperplanes
//! where its matrices degenerate. This crate splits the lattice into the
//! open cells ("shards") those hyperplanes cut out, finds valid start points
//! in each one, generates well-distributed integer directions, and runs a
//! sampled search over (start, direction) pairs looking for limits that match
//! a target constant. Several analysis passes rank the shards and a
//! consensus step merges their rankings.
//!
//! The numeric work (walking matrices, computing limits) is delegated to an
//! external algebra engine behind the traits in [`engine`].
//!
//! # Layout
//!
//! - [`geometry`]: exact positions, hyperplanes, lattice point generation
//! - [`subspaces`]: shard extraction and the [`Searchable`](subspaces::Searchable) trait
//! - [`search`]: serial/deep searchers and the per-space data manager
//! - [`analysis`]: shallow analysis, ranking and consensus
//! - [`pipeline`]: end-to-end runs over a set of constants

pub mod analysis;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod pipeline;
pub mod search;
pub mod subspaces;

pub use config::{AnalysisConfig, Config, ExtractorConfig, FeatureFlags, SearchConfig, Shape};
pub use constants::{Constant, ConstantCatalog};
pub use engine::{Construction, IdentificationOracle, MatrixField};
pub use error::{SearchError, SearchResult};
pub use pipeline::{RunMode, RunReport, System};
