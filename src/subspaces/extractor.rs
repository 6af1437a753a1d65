//! Shard extraction
//!
//! Derives the singular hyperplane arrangement of a matrix field, encodes
//! lattice points into sign vectors, and makes sure every shard that can hold
//! a lattice point gets one.
//!
//! # Overview
//!
//! - Hyperplanes come from the zero-determinant and pole loci of every axis.
//!   They are deduplicated exactly and their order is frozen at construction,
//!   since a [`ShardVector`] is only meaningful against that order.
//! - The shards are the non-empty open cells of the arrangement, enumerated
//!   exactly with Fourier–Motzkin feasibility checks.
//! - Start points are found by classifying the `(2k+1)^dim` box around the
//!   shift and then expanding outward one unit shell at a time. Each lattice
//!   point is classified at most once.
//!
//! # Concurrency
//!
//! Population is single-writer: the population state sits behind a mutex and
//! the per-shard start-point registry behind a read-write lock. Population
//! always takes the mutex before the registry lock.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Weak};

use num_traits::{Signed, ToPrimitive, Zero};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::shard::Shard;
use super::trajectory_generator::TrajectoryGenerator;
use crate::config::ExtractorConfig;
use crate::engine::Construction;
use crate::error::{SearchError, SearchResult};
use crate::geometry::{
    check_strict_system, expand_set, generate_cube, Feasibility, Hyperplane, Point, Position,
    StrictInequality,
};

/// Which side of a hyperplane a region lies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    Above,
    Below,
}

impl Side {
    pub fn sign(self) -> i8 {
        match self {
            Side::Above => 1,
            Side::Below => -1,
        }
    }
}

/// Sign vector identifying a shard, one entry per hyperplane in frozen order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardVector(Vec<Side>);

impl ShardVector {
    pub fn new(sides: Vec<Side>) -> Self {
        Self(sides)
    }

    /// Build from `±1` signs; any other value yields `None`.
    pub fn from_signs(signs: &[i8]) -> Option<Self> {
        signs
            .iter()
            .map(|&s| match s {
                1 => Some(Side::Above),
                -1 => Some(Side::Below),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(Self)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn sides(&self) -> &[Side] {
        &self.0
    }

    pub fn signs(&self) -> Vec<i8> {
        self.0.iter().map(|s| s.sign()).collect()
    }
}

impl fmt::Display for ShardVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, s) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:+}", s.sign())?;
        }
        write!(f, ")")
    }
}

/// Outcome of a population pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopulationReport {
    pub shards: usize,
    /// Shards still without a start point.
    pub empty_shards: Vec<ShardVector>,
    /// Shell expansions performed by this call.
    pub expansions: usize,
    /// Lattice points classified by this call.
    pub points_scanned: usize,
}

#[derive(Debug, Default)]
struct PopulationState {
    initialized: bool,
    expansions: usize,
    /// Integer offsets (relative to the shift) already classified.
    scanned: BTreeSet<Point>,
    /// Every valid classified position, by the shard it encodes to.
    catalog: BTreeMap<ShardVector, BTreeSet<Position>>,
}

/// Hyperplane arrangement and shard registry of one construction.
pub struct ShardExtractor {
    construction: Construction,
    config: ExtractorConfig,
    hyperplanes: Vec<Hyperplane>,
    trajectories: Arc<TrajectoryGenerator>,
    population: Mutex<PopulationState>,
    registry: RwLock<BTreeMap<ShardVector, BTreeSet<Position>>>,
    this: Weak<ShardExtractor>,
}

impl ShardExtractor {
    /// Derive the arrangement of `construction` and enumerate its shards.
    ///
    /// # Errors
    ///
    /// - `Engine` if the field fails to report its singular loci
    /// - `DimensionMismatch` if a locus does not match the field dimension
    /// - `MalformedField` if a locus covers the whole lattice
    pub fn new(construction: Construction, config: ExtractorConfig) -> SearchResult<Arc<Self>> {
        let dim = construction.dim();
        let hyperplanes = Self::extract_hyperplanes(&construction)?;
        let cells = enumerate_cells(&hyperplanes, dim, config.max_feasibility_constraints);
        debug!(
            construction = %construction,
            hyperplanes = hyperplanes.len(),
            shards = cells.len(),
            "extracted arrangement"
        );

        let registry = cells.into_iter().map(|v| (v, BTreeSet::new())).collect();
        Ok(Arc::new_cyclic(|this| Self {
            construction,
            config,
            hyperplanes,
            trajectories: Arc::new(TrajectoryGenerator::new(dim)),
            population: Mutex::new(PopulationState::default()),
            registry: RwLock::new(registry),
            this: this.clone(),
        }))
    }

    fn extract_hyperplanes(construction: &Construction) -> SearchResult<Vec<Hyperplane>> {
        let field = &construction.field;
        let dim = field.dim();
        let mut planes = BTreeSet::new();
        for axis in 0..dim {
            let loci = field
                .zero_determinant_loci(axis)?
                .into_iter()
                .chain(field.pole_loci(axis)?);
            for form in loci {
                if form.dim() != dim {
                    return Err(SearchError::DimensionMismatch {
                        expected: dim,
                        actual: form.dim(),
                    });
                }
                if let Some(plane) = Hyperplane::from_form(&form)? {
                    planes.insert(plane);
                }
            }
        }
        Ok(planes.into_iter().collect())
    }

    pub fn construction(&self) -> &Construction {
        &self.construction
    }

    pub fn name(&self) -> &str {
        &self.construction.name
    }

    pub fn dim(&self) -> usize {
        self.construction.dim()
    }

    pub fn shift(&self) -> &Position {
        &self.construction.shift
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Hyperplanes in frozen enumeration order.
    pub fn hyperplanes(&self) -> &[Hyperplane] {
        &self.hyperplanes
    }

    pub fn trajectory_generator(&self) -> Arc<TrajectoryGenerator> {
        Arc::clone(&self.trajectories)
    }

    /// Encode a position into its sign vector.
    ///
    /// The flag is false when the position lies on a hyperplane, that is
    /// when some value satisfies `|value| <= tolerance`. The sign recorded for
    /// such a hyperplane is `Below` unless the value is positive.
    pub fn encode_point(&self, point: &Position) -> SearchResult<(ShardVector, bool)> {
        let mut valid = true;
        let mut sides = Vec::with_capacity(self.hyperplanes.len());
        for plane in &self.hyperplanes {
            let value = plane.evaluate(point)?;
            let magnitude = value.abs().to_f64().unwrap_or(f64::INFINITY);
            if value.is_zero() || magnitude <= self.config.tolerance {
                valid = false;
            }
            sides.push(if value.is_positive() {
                Side::Above
            } else {
                Side::Below
            });
        }
        Ok((ShardVector(sides), valid))
    }

    /// Handles to every known shard, in sign-vector order.
    pub fn shards(&self) -> Vec<Shard> {
        self.registry
            .read()
            .keys()
            .map(|v| Shard::new(v.clone(), self.this.clone(), self))
            .collect()
    }

    /// Handle to the shard with the given vector, if it exists.
    pub fn shard(&self, vector: &ShardVector) -> Option<Shard> {
        self.registry
            .read()
            .contains_key(vector)
            .then(|| Shard::new(vector.clone(), self.this.clone(), self))
    }

    /// Shards currently without any start point.
    pub fn empty_shards(&self) -> Vec<ShardVector> {
        self.registry
            .read()
            .iter()
            .filter(|(_, points)| points.is_empty())
            .map(|(v, _)| v.clone())
            .collect()
    }

    /// Find start points for the shards.
    ///
    /// Classifies the initial box once, then expands by unit shells (up to
    /// `max_expansions` in total over the extractor's lifetime) while
    /// `expand_anyway` is set or some shard has no classified point yet.
    /// Shards without start points then receive every classified point of
    /// their region; with `expand_anyway`, all shards do.
    ///
    /// Never removes points. Repeating a call without new needs is a no-op.
    pub fn populate_start_points(&self, expand_anyway: bool) -> SearchResult<PopulationReport> {
        let mut state = self.population.lock();
        let mut scanned_now = 0;
        let mut expansions_now = 0;

        // Step 1: initial box
        if !state.initialized {
            let box_points = generate_cube(self.config.initial_radius, self.dim(), false);
            scanned_now += self.classify(&mut state, box_points)?;
            state.initialized = true;
        }

        // Step 2: unit shells
        while state.expansions < self.config.max_expansions
            && (expand_anyway || self.has_unreached_shard(&state))
        {
            let (shell, _) = expand_set(&state.scanned, 1, true, None, false);
            state.expansions += 1;
            expansions_now += 1;
            debug!(
                construction = %self.construction,
                expansion = state.expansions,
                points = shell.len(),
                "expanding start point search"
            );
            scanned_now += self.classify(&mut state, shell)?;
        }

        // Step 3: hand classified points to the registry
        {
            let mut registry = self.registry.write();
            for (vector, points) in &state.catalog {
                let entry = registry.entry(vector.clone()).or_default();
                if expand_anyway || entry.is_empty() {
                    entry.extend(points.iter().cloned());
                }
            }
        }

        let empty_shards = self.empty_shards();
        let shards = self.registry.read().len();
        if !empty_shards.is_empty() && scanned_now > 0 {
            warn!(
                construction = %self.construction,
                empty = empty_shards.len(),
                shards,
                "could not find valid start points for some shards, \
                 try increasing max_expansions or changing the shift"
            );
        }

        Ok(PopulationReport {
            shards,
            empty_shards,
            expansions: expansions_now,
            points_scanned: scanned_now,
        })
    }

    fn has_unreached_shard(&self, state: &PopulationState) -> bool {
        self.registry
            .read()
            .keys()
            .any(|v| state.catalog.get(v).map_or(true, BTreeSet::is_empty))
    }

    /// Classify unseen offsets, returning how many were new.
    fn classify(&self, state: &mut PopulationState, points: BTreeSet<Point>) -> SearchResult<usize> {
        let mut count = 0;
        for p in points {
            if state.scanned.contains(&p) {
                continue;
            }
            let position = self.construction.shift.offset_by(&p)?;
            state.scanned.insert(p);
            count += 1;
            let (vector, valid) = self.encode_point(&position)?;
            if valid {
                state.catalog.entry(vector).or_default().insert(position);
            }
        }
        Ok(count)
    }

    // Registry access for shard handles

    pub(crate) fn first_start_point(&self, vector: &ShardVector) -> Option<Position> {
        self.registry
            .read()
            .get(vector)
            .and_then(|points| points.iter().next().cloned())
    }

    pub(crate) fn start_points_of(&self, vector: &ShardVector) -> BTreeSet<Position> {
        self.registry.read().get(vector).cloned().unwrap_or_default()
    }

    pub(crate) fn insert_start_points<I>(&self, vector: &ShardVector, points: I) -> usize
    where
        I: IntoIterator<Item = Position>,
    {
        let mut registry = self.registry.write();
        let entry = registry.entry(vector.clone()).or_default();
        points.into_iter().filter(|p| entry.insert(p.clone())).count()
    }

    pub(crate) fn remove_start_points(&self, vector: &ShardVector, points: &[Position]) {
        if let Some(entry) = self.registry.write().get_mut(vector) {
            for p in points {
                entry.remove(p);
            }
        }
    }

    pub(crate) fn clear_start_points(&self, vector: &ShardVector) {
        if let Some(entry) = self.registry.write().get_mut(vector) {
            entry.clear();
        }
    }
}

impl fmt::Debug for ShardExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardExtractor")
            .field("construction", &self.construction.name)
            .field("shift", &self.construction.shift)
            .field("hyperplanes", &self.hyperplanes.len())
            .field("shards", &self.registry.read().len())
            .finish()
    }
}

/// Sign vectors of the non-empty open cells of an arrangement.
///
/// Cells are split one hyperplane at a time, keeping only feasible halves.
/// With no hyperplanes the single cell is the empty vector.
fn enumerate_cells(planes: &[Hyperplane], dim: usize, max_rows: usize) -> BTreeSet<ShardVector> {
    let mut cells: Vec<(Vec<Side>, Vec<StrictInequality>)> = vec![(Vec::new(), Vec::new())];
    let mut undecided = 0usize;

    for plane in planes {
        let above = StrictInequality::new(plane.coeffs().to_vec(), plane.constant().clone());
        let below = above.negated();
        let mut next = Vec::with_capacity(cells.len() * 2);
        for (sides, constraints) in cells {
            for (side, row) in [(Side::Above, &above), (Side::Below, &below)] {
                let mut rows = constraints.clone();
                rows.push(row.clone());
                let (outcome, _) = check_strict_system(&rows, dim, max_rows);
                if outcome == Feasibility::Undecided {
                    undecided += 1;
                }
                if outcome.is_possible() {
                    let mut s = sides.clone();
                    s.push(side);
                    next.push((s, rows));
                }
            }
        }
        cells = next;
    }

    if undecided > 0 {
        debug!(undecided, "feasibility checks hit the constraint cap");
    }
    cells.into_iter().map(|(s, _)| ShardVector(s)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::PlaneField;
    use crate::geometry::AffineForm;
    use num_bigint::BigInt;
    use num_rational::BigRational;

    fn ratio(n: i64, d: i64) -> BigRational {
        BigRational::new(BigInt::from(n), BigInt::from(d))
    }

    fn extractor(dim: usize, loci: Vec<AffineForm>) -> Arc<ShardExtractor> {
        let field = Arc::new(PlaneField::new(dim, loci));
        ShardExtractor::new(Construction::unshifted("test", field), ExtractorConfig::default())
            .expect("Failed to build extractor")
    }

    /// x0 = 1/3, x1 = 1/3 and x0 + x1 = 3/4: seven cells, one of them a
    /// small triangle without lattice points.
    fn triangle_loci() -> Vec<AffineForm> {
        vec![
            AffineForm::axis_equals(2, 0, ratio(1, 3)),
            AffineForm::axis_equals(2, 1, ratio(1, 3)),
            AffineForm::new(vec![ratio(1, 1), ratio(1, 1)], ratio(-3, 4)),
        ]
    }

    #[test]
    fn test_no_hyperplanes_single_shard() {
        let ex = extractor(2, vec![]);
        let shards = ex.shards();
        assert_eq!(shards.len(), 1);
        assert!(shards[0].vector().is_empty());

        ex.populate_start_points(false).unwrap();
        let points = ex.start_points_of(&ShardVector::default());
        for p in generate_cube(1, 2, false) {
            assert!(points.contains(&Position::from(p)));
        }
    }

    #[test]
    fn test_duplicate_loci_collapse() {
        let ex = extractor(
            2,
            vec![
                AffineForm::from_ints(&[1, 1], -1),
                AffineForm::from_ints(&[-2, -2], 2),
            ],
        );
        assert_eq!(ex.hyperplanes().len(), 1);
        assert_eq!(ex.shards().len(), 2);
    }

    #[test]
    fn test_encode_matches_plane_values() {
        let ex = extractor(2, triangle_loci());
        let tol = ex.config().tolerance;
        for p in generate_cube(3, 2, false) {
            let pos = Position::from(p);
            let (vector, valid) = ex.encode_point(&pos).unwrap();
            let mut expect_valid = true;
            for (plane, side) in ex.hyperplanes().iter().zip(vector.sides()) {
                let value = plane.evaluate(&pos).unwrap().to_f64().unwrap();
                if value > tol {
                    assert_eq!(*side, Side::Above);
                } else if value < -tol {
                    assert_eq!(*side, Side::Below);
                } else {
                    expect_valid = false;
                }
            }
            assert_eq!(valid, expect_valid, "validity mismatch at {}", pos);
        }
    }

    #[test]
    fn test_point_on_plane_is_invalid() {
        let ex = extractor(2, vec![AffineForm::from_ints(&[1, 0], 0)]);
        let (_, valid) = ex.encode_point(&Position::from_ints(&[0, 5])).unwrap();
        assert!(!valid);
        let (v, valid) = ex.encode_point(&Position::from_ints(&[-1, 5])).unwrap();
        assert!(valid);
        assert_eq!(v, ShardVector::new(vec![Side::Below]));
    }

    #[test]
    fn test_unreachable_lattice_cell_reported() {
        let ex = extractor(2, triangle_loci());
        assert_eq!(ex.shards().len(), 7);

        let report = ex.populate_start_points(false).unwrap();
        assert_eq!(report.shards, 7);
        assert_eq!(report.expansions, ex.config().max_expansions);
        assert_eq!(
            report.empty_shards,
            vec![ShardVector::new(vec![Side::Above, Side::Above, Side::Below])]
        );
    }

    #[test]
    fn test_populate_idempotent() {
        let ex = extractor(2, triangle_loci());
        ex.populate_start_points(false).unwrap();
        let first: Vec<_> = ex.shards().iter().map(|s| ex.start_points_of(s.vector())).collect();

        let report = ex.populate_start_points(false).unwrap();
        assert_eq!(report.points_scanned, 0);
        let second: Vec<_> = ex.shards().iter().map(|s| ex.start_points_of(s.vector())).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_expand_anyway_uses_all_expansions() {
        let ex = extractor(2, vec![AffineForm::axis_equals(2, 0, ratio(1, 2))]);
        let report = ex.populate_start_points(true).unwrap();
        assert_eq!(report.expansions, 3);
        // Box of radius 1 + 3 shells = 9x9
        assert_eq!(report.points_scanned, 81);
        assert!(report.empty_shards.is_empty());
    }

    #[test]
    fn test_members_encode_to_their_shard() {
        let ex = extractor(2, triangle_loci());
        ex.populate_start_points(true).unwrap();
        for shard in ex.shards() {
            for p in ex.start_points_of(shard.vector()) {
                assert_eq!(ex.encode_point(&p).unwrap(), (shard.vector().clone(), true));
            }
        }
    }

    #[test]
    fn test_shifted_points() {
        let field = Arc::new(PlaneField::new(1, vec![AffineForm::from_ints(&[1], 0)]));
        let shift = Position::from_fractions(&[(1, 2)]).unwrap();
        let ex = ShardExtractor::new(
            Construction::new("half", field, shift).unwrap(),
            ExtractorConfig::default(),
        )
        .unwrap();
        ex.populate_start_points(false).unwrap();
        let above = ex.start_points_of(&ShardVector::new(vec![Side::Above]));
        assert!(above.contains(&Position::from_fractions(&[(1, 2)]).unwrap()));
        assert!(above.contains(&Position::from_fractions(&[(3, 2)]).unwrap()));
    }

    #[test]
    fn test_concurrent_population() {
        let ex = extractor(2, triangle_loci());
        std::thread::scope(|s| {
            for _ in 0..4 {
                let ex = Arc::clone(&ex);
                s.spawn(move || ex.populate_start_points(false).unwrap());
            }
        });
        let reference = extractor(2, triangle_loci());
        reference.populate_start_points(false).unwrap();
        for (a, b) in ex.shards().iter().zip(reference.shards()) {
            assert_eq!(ex.start_points_of(a.vector()), reference.start_points_of(b.vector()));
        }
    }

    #[test]
    fn test_shard_vector_display() {
        let v = ShardVector::from_signs(&[1, -1]).unwrap();
        assert_eq!(v.to_string(), "(+1, -1)");
        assert!(ShardVector::from_signs(&[0]).is_none());
    }
}
