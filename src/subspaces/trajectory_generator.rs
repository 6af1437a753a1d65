//! Memoized trajectory sets.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::Shape;
use crate::geometry::{generate_via_shape, Point, Sampling};

/// Cache key for a generated point set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PointGroup {
    pub shape: Shape,
    pub length: i64,
    pub dim: usize,
    pub primitive: bool,
}

/// Generates full shape point sets for one dimension, caching each.
#[derive(Debug)]
pub struct TrajectoryGenerator {
    dim: usize,
    groups: Mutex<HashMap<PointGroup, Arc<BTreeSet<Point>>>>,
}

impl TrajectoryGenerator {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            groups: Mutex::new(HashMap::new()),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The point set for `shape` at `length`, generated on first request.
    pub fn get_trajectories(&self, shape: Shape, length: i64, primitive: bool) -> Arc<BTreeSet<Point>> {
        let group = PointGroup {
            shape,
            length,
            dim: self.dim,
            primitive,
        };
        let mut groups = self.groups.lock();
        let dim = self.dim;
        Arc::clone(groups.entry(group).or_insert_with(|| {
            Arc::new(generate_via_shape::<rand_chacha::ChaCha8Rng>(
                length,
                dim,
                shape,
                primitive,
                Sampling::Full,
            ))
        }))
    }

    /// Number of cached groups.
    pub fn cached(&self) -> usize {
        self.groups.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memoized_by_group() {
        let tg = TrajectoryGenerator::new(2);
        let a = tg.get_trajectories(Shape::Sphere, 3, true);
        let b = tg.get_trajectories(Shape::Sphere, 3, true);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(tg.cached(), 1);

        let c = tg.get_trajectories(Shape::Sphere, 4, true);
        assert!(c.len() > a.len());
        assert_eq!(tg.cached(), 2);

        tg.get_trajectories(Shape::Cube, 3, true);
        assert_eq!(tg.cached(), 3);
    }
}
