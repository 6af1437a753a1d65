//! The searchable-space capability.
//!
//! A searchable space answers three questions for the search orchestrator:
//! does a point belong to it, does a direction stay inside it from a given
//! start, and which start points are available. [`Shard`](super::Shard) is
//! the extractor-backed implementation; other region kinds (for example the
//! borders between shards) implement the same trait.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::extractor::ShardVector;
use super::trajectory_generator::TrajectoryGenerator;
use crate::engine::MatrixField;
use crate::error::SearchResult;
use crate::geometry::Position;

/// Result of a membership query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    /// The point is valid and encodes to this space's vector.
    pub inside: bool,
    /// Sign vector the point encodes to.
    pub vector: ShardVector,
}

/// Value identity of a searchable space across analyzers and runs.
///
/// Two spaces built independently from the same construction compare equal,
/// which is what consensus aggregation needs. A field listed under several
/// shifts yields distinct identities per shift.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpaceId {
    pub construction: String,
    pub shift: Position,
    pub vector: ShardVector,
}

impl SpaceId {
    pub fn new(construction: impl Into<String>, shift: Position, vector: ShardVector) -> Self {
        Self {
            construction: construction.into(),
            shift,
            vector,
        }
    }
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}{}", self.construction, self.shift, self.vector)
    }
}

/// A region of the lattice that can be searched.
///
/// Start-point operations take `&self`: implementations synchronize
/// internally so a space can be shared between searchers.
pub trait Searchable: Send + Sync + fmt::Debug {
    fn id(&self) -> SpaceId;

    fn dim(&self) -> usize;

    /// Lattice offset that generated start points are taken relative to.
    fn shift(&self) -> Position;

    /// The matrix field this space lives in.
    fn field(&self) -> Arc<dyn MatrixField>;

    /// Shared, memoizing trajectory generator for this space's dimension.
    fn trajectory_generator(&self) -> Arc<TrajectoryGenerator>;

    fn in_space(&self, point: &Position) -> SearchResult<Membership>;

    /// Whether walking from `start` along `direction` never leaves the space.
    fn trajectory_in_space(&self, start: &Position, direction: &Position) -> SearchResult<bool>;

    /// Add start points, dropping those outside the space when `filtering`.
    /// Returns how many points were newly inserted.
    fn add_start_points(&self, points: &[Position], filtering: bool) -> SearchResult<usize>;

    fn remove_start_points(&self, points: &[Position]) -> SearchResult<()>;

    fn clear_start_points(&self) -> SearchResult<()>;

    /// A stable member of the start-point set, populating lazily if empty.
    ///
    /// `None` means the space has no reachable start point and should be
    /// skipped.
    fn choose_start_point(&self) -> SearchResult<Option<Position>>;

    /// All start points, populating lazily if empty.
    fn start_points(&self) -> SearchResult<BTreeSet<Position>>;

    /// Whether any start point is known, without triggering population.
    fn has_start_points(&self) -> SearchResult<bool>;
}
