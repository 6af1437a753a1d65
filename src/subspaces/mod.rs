//! Searchable spaces
//!
//! The hyperplane arrangement of a construction, its shards, and the
//! trajectory sets searched inside them.

pub mod extractor;
pub mod searchable;
pub mod shard;
pub mod trajectory_generator;

pub use extractor::{PopulationReport, ShardExtractor, ShardVector, Side};
pub use searchable::{Membership, Searchable, SpaceId};
pub use shard::Shard;
pub use trajectory_generator::{PointGroup, TrajectoryGenerator};
