//! Extractor-backed shard handles.
//!
//! A [`Shard`] is a lightweight handle: its sign vector plus a weak reference
//! to the extractor that owns the hyperplanes and the start-point registry.
//! Handles are cheap to clone and safe to share between threads.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use super::extractor::{ShardExtractor, ShardVector};
use super::searchable::{Membership, Searchable, SpaceId};
use super::trajectory_generator::TrajectoryGenerator;
use crate::engine::MatrixField;
use crate::error::{SearchError, SearchResult};
use crate::geometry::Position;

/// A searchable open cell of the hyperplane arrangement.
#[derive(Clone)]
pub struct Shard {
    vector: ShardVector,
    extractor: Weak<ShardExtractor>,
    construction: String,
    dim: usize,
    shift: Position,
    field: Arc<dyn MatrixField>,
    trajectories: Arc<TrajectoryGenerator>,
}

impl Shard {
    pub(crate) fn new(vector: ShardVector, extractor: Weak<ShardExtractor>, source: &ShardExtractor) -> Self {
        Self {
            vector,
            extractor,
            construction: source.name().to_string(),
            dim: source.dim(),
            shift: source.shift().clone(),
            field: Arc::clone(&source.construction().field),
            trajectories: source.trajectory_generator(),
        }
    }

    pub fn vector(&self) -> &ShardVector {
        &self.vector
    }

    /// The owning extractor.
    ///
    /// # Errors
    ///
    /// `DetachedShard` if the extractor has been dropped.
    pub fn extractor(&self) -> SearchResult<Arc<ShardExtractor>> {
        self.extractor
            .upgrade()
            .ok_or_else(|| SearchError::DetachedShard(self.vector.to_string()))
    }
}

impl Searchable for Shard {
    fn id(&self) -> SpaceId {
        SpaceId::new(self.construction.clone(), self.shift.clone(), self.vector.clone())
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn shift(&self) -> Position {
        self.shift.clone()
    }

    fn field(&self) -> Arc<dyn MatrixField> {
        Arc::clone(&self.field)
    }

    fn trajectory_generator(&self) -> Arc<TrajectoryGenerator> {
        Arc::clone(&self.trajectories)
    }

    fn in_space(&self, point: &Position) -> SearchResult<Membership> {
        let (vector, valid) = self.extractor()?.encode_point(point)?;
        Ok(Membership {
            inside: valid && vector == self.vector,
            vector,
        })
    }

    fn trajectory_in_space(&self, start: &Position, direction: &Position) -> SearchResult<bool> {
        if !self.in_space(start)?.inside {
            return Ok(false);
        }
        let extractor = self.extractor()?;
        let graze = extractor.config().graze_tolerance;
        // Keep a safe distance: crossings ahead or just behind both disqualify
        let crosses = extractor.hyperplanes().iter().any(|plane| {
            plane
                .intersection_with_line_coeff(start, direction)
                .map_or(false, |t| t >= -graze)
        });
        Ok(!crosses)
    }

    fn add_start_points(&self, points: &[Position], filtering: bool) -> SearchResult<usize> {
        let extractor = self.extractor()?;
        let mut accepted = Vec::with_capacity(points.len());
        for p in points {
            if !filtering || self.in_space(p)?.inside {
                accepted.push(p.clone());
            }
        }
        Ok(extractor.insert_start_points(&self.vector, accepted))
    }

    fn remove_start_points(&self, points: &[Position]) -> SearchResult<()> {
        self.extractor()?.remove_start_points(&self.vector, points);
        Ok(())
    }

    fn clear_start_points(&self) -> SearchResult<()> {
        self.extractor()?.clear_start_points(&self.vector);
        Ok(())
    }

    fn choose_start_point(&self) -> SearchResult<Option<Position>> {
        let extractor = self.extractor()?;
        if let Some(p) = extractor.first_start_point(&self.vector) {
            return Ok(Some(p));
        }
        extractor.populate_start_points(false)?;
        Ok(extractor.first_start_point(&self.vector))
    }

    fn start_points(&self) -> SearchResult<BTreeSet<Position>> {
        let extractor = self.extractor()?;
        let points = extractor.start_points_of(&self.vector);
        if !points.is_empty() {
            return Ok(points);
        }
        extractor.populate_start_points(false)?;
        Ok(extractor.start_points_of(&self.vector))
    }

    fn has_start_points(&self) -> SearchResult<bool> {
        Ok(self.extractor()?.first_start_point(&self.vector).is_some())
    }
}

/// Equal iff same vector and same extractor.
impl PartialEq for Shard {
    fn eq(&self, other: &Self) -> bool {
        self.vector == other.vector && Weak::ptr_eq(&self.extractor, &other.extractor)
    }
}

impl Eq for Shard {}

/// Hashes the vector only; shards of different extractors with equal
/// vectors collide and are told apart by `Eq`.
impl Hash for Shard {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.vector.hash(state);
    }
}

impl fmt::Debug for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shard")
            .field("construction", &self.construction)
            .field("vector", &self.vector)
            .finish()
    }
}

impl fmt::Display for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Shard {} of {}>", self.vector, self.construction)
    }
}
