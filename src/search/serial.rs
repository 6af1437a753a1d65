//! Sampled search over one searchable space.
//!
//! A [`SerialSearcher`] moves through three states:
//!
//! - `Idle`: nothing generated yet
//! - `TrajectoriesGenerated`: directions valid from a representative start
//!   point are known
//! - `Searched`: pairs have been evaluated into the data manager
//!
//! Trajectory validity is checked from one representative start point only;
//! pairs using other starts are not re-checked.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{debug, warn};

use super::data_manager::{DataManager, SearchVector};
use super::worker::{PairEvaluator, PairOutcome};
use crate::config::{FeatureFlags, SearchConfig, Shape};
use crate::constants::Constant;
use crate::engine::IdentificationOracle;
use crate::error::{SearchError, SearchResult};
use crate::geometry::{generate_random, generate_via_shape, Point, Position, Sampling};
use crate::subspaces::Searchable;

/// Lifecycle of a searcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    Idle,
    TrajectoriesGenerated,
    Searched,
}

/// Searches (start, trajectory) pairs of one space.
pub struct SerialSearcher {
    space: Arc<dyn Searchable>,
    constant: Constant,
    config: SearchConfig,
    oracle: Option<Arc<dyn IdentificationOracle>>,
    trajectories: BTreeSet<Position>,
    data_manager: DataManager,
    state: SearchState,
    rng: ChaCha8Rng,
}

impl SerialSearcher {
    /// # Errors
    ///
    /// `InvalidConfig` if oracle mode is requested without an oracle, or a
    /// chunk size is zero.
    pub fn new(
        space: Arc<dyn Searchable>,
        constant: Constant,
        config: SearchConfig,
        oracle: Option<Arc<dyn IdentificationOracle>>,
    ) -> SearchResult<Self> {
        if config.use_oracle && oracle.is_none() {
            return Err(SearchError::InvalidConfig(
                "use_oracle is set but no identification oracle was provided".to_string(),
            ));
        }
        if config.chunk_size == 0 || config.validation_chunk == 0 {
            return Err(SearchError::InvalidConfig(
                "search chunk sizes must be positive".to_string(),
            ));
        }
        let rng = match config.sampling_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Ok(Self {
            space,
            constant,
            data_manager: DataManager::new(config.use_oracle),
            config,
            oracle,
            trajectories: BTreeSet::new(),
            state: SearchState::Idle,
            rng,
        })
    }

    /// Continue filling an existing manager instead of a fresh one.
    pub fn with_data_manager(mut self, data_manager: DataManager) -> Self {
        self.data_manager = data_manager;
        self
    }

    pub fn space(&self) -> &Arc<dyn Searchable> {
        &self.space
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    pub fn trajectories(&self) -> &BTreeSet<Position> {
        &self.trajectories
    }

    pub fn data_manager(&self) -> &DataManager {
        &self.data_manager
    }

    /// Hand the results to the caller.
    pub fn into_data_manager(self) -> DataManager {
        self.data_manager
    }

    /// Generate the full primitive shape set and keep the directions that
    /// stay inside the space from a representative start point.
    ///
    /// Without a start point nothing is generated; this is logged, not an
    /// error. Returns the number of trajectories added.
    pub fn generate_trajectories(&mut self, shape: Shape, length: i64, clear: bool) -> SearchResult<usize> {
        if clear {
            self.trajectories.clear();
        }
        let start = match self.space.choose_start_point()? {
            Some(s) => s,
            None => {
                warn!(space = %self.space.id(), "could not generate trajectories, no valid start point");
                return Ok(0);
            }
        };
        let points = self.space.trajectory_generator().get_trajectories(shape, length, true);
        self.keep_valid(&start, points.iter())
    }

    /// Like [`generate_trajectories`](Self::generate_trajectories) with `n`
    /// primitive directions sampled uniformly from the shape.
    pub fn generate_sampled_trajectories(
        &mut self,
        shape: Shape,
        length: i64,
        n: usize,
        clear: bool,
    ) -> SearchResult<usize> {
        if clear {
            self.trajectories.clear();
        }
        let start = match self.space.choose_start_point()? {
            Some(s) => s,
            None => {
                warn!(space = %self.space.id(), "could not generate trajectories, no valid start point");
                return Ok(0);
            }
        };
        let points = generate_random(n, length, self.space.dim(), shape, true, &mut self.rng);
        self.keep_valid(&start, points.iter())
    }

    fn keep_valid<'a, I>(&mut self, start: &Position, points: I) -> SearchResult<usize>
    where
        I: Iterator<Item = &'a Point>,
    {
        // The origin is not a direction
        let candidates: Vec<Position> = points
            .filter(|p| p.iter().any(|&c| c != 0))
            .map(|p| Position::from_ints(p))
            .collect();

        let space = &self.space;
        let valid: Vec<Position> = if self.config.parallel {
            let chunks: Vec<Vec<Position>> = candidates
                .par_chunks(self.config.validation_chunk)
                .map(|chunk| Self::filter_directions(space.as_ref(), start, chunk))
                .collect::<SearchResult<_>>()?;
            chunks.into_iter().flatten().collect()
        } else {
            Self::filter_directions(space.as_ref(), start, &candidates)?
        };

        let before = self.trajectories.len();
        self.trajectories.extend(valid);
        let added = self.trajectories.len() - before;
        debug!(
            space = %self.space.id(),
            candidates = candidates.len(),
            added,
            "generated trajectories"
        );
        self.state = SearchState::TrajectoriesGenerated;
        Ok(added)
    }

    fn filter_directions(space: &dyn Searchable, start: &Position, directions: &[Position]) -> SearchResult<Vec<Position>> {
        let mut valid = Vec::new();
        for d in directions {
            if space.trajectory_in_space(start, d)? {
                valid.push(d.clone());
            }
        }
        Ok(valid)
    }

    /// Add every shape point (offset by the space's shift) that lies in the
    /// space to its start points. Returns how many were new.
    pub fn generate_start_points(&mut self, shape: Shape, length: i64) -> SearchResult<usize> {
        let shift = self.space.shift();
        let points = generate_via_shape::<ChaCha8Rng>(length, self.space.dim(), shape, false, Sampling::Full);
        let positions = points
            .iter()
            .map(|p| shift.offset_by(p))
            .collect::<SearchResult<Vec<_>>>()?;
        self.space.add_start_points(&positions, true)
    }

    /// Evaluate `starts × sampled trajectories`.
    ///
    /// `partial_search_factor` selects that fraction of the trajectories
    /// without replacement. Pairs already in the data manager are skipped.
    /// Without starts, one start point is chosen from the space; if there is
    /// none the search is skipped with a warning.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the factor is outside `[0, 1]`.
    pub fn search(
        &mut self,
        starts: Option<Vec<Position>>,
        partial_search_factor: f64,
        features: FeatureFlags,
    ) -> SearchResult<&DataManager> {
        if !(0.0..=1.0).contains(&partial_search_factor) {
            return Err(SearchError::InvalidConfig(format!(
                "partial_search_factor must be in [0, 1], got {}",
                partial_search_factor
            )));
        }

        let starts = match starts.filter(|s| !s.is_empty()) {
            Some(s) => s,
            None => match self.space.choose_start_point()? {
                Some(s) => vec![s],
                None => {
                    warn!(space = %self.space.id(), "could not provide a valid start point, skipping search");
                    return Ok(&self.data_manager);
                }
            },
        };

        if self.trajectories.is_empty() {
            warn!(
                space = %self.space.id(),
                state = ?self.state,
                "no trajectories to search, generate trajectories first"
            );
        }
        let trajectories = self.pick_trajectories(partial_search_factor);
        let pairs: Vec<SearchVector> = starts
            .iter()
            .flat_map(|s| trajectories.iter().map(move |t| SearchVector::new(s.clone(), t.clone())))
            .filter(|sv| !self.data_manager.contains(sv))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let evaluator = PairEvaluator::new(
            self.space.field(),
            self.constant.clone(),
            self.oracle.clone(),
            &self.config,
            features,
        );
        let timeout = self.config.pair_timeout_ms.map(Duration::from_millis);

        let outcomes: Vec<PairOutcome> = if self.config.parallel {
            pairs
                .par_chunks(self.config.chunk_size)
                .map(|chunk| chunk.iter().map(|sv| evaluator.run(sv, timeout)).collect::<Vec<_>>())
                .collect::<Vec<_>>()
                .into_iter()
                .flatten()
                .collect()
        } else {
            pairs.iter().map(|sv| evaluator.run(sv, timeout)).collect()
        };

        // Merge on the orchestrating side only
        let mut discarded = 0;
        for outcome in outcomes {
            match outcome {
                PairOutcome::Scored(data) => {
                    self.data_manager.insert(data);
                }
                PairOutcome::Discarded { vector, reason } => {
                    discarded += 1;
                    warn!(pair = %vector, error = %reason, "pair ignored in stats");
                }
            }
        }
        debug!(
            space = %self.space.id(),
            pairs = pairs.len(),
            discarded,
            total = self.data_manager.len(),
            "search finished"
        );
        self.state = SearchState::Searched;
        Ok(&self.data_manager)
    }

    /// A uniformly sampled fraction of the trajectories, or all of them when
    /// the fraction would select none.
    fn pick_trajectories(&mut self, factor: f64) -> Vec<Position> {
        let all: Vec<Position> = self.trajectories.iter().cloned().collect();
        if factor >= 1.0 {
            return all;
        }
        let amount = (all.len() as f64 * factor).floor() as usize;
        if amount == 0 {
            warn!(
                trajectories = all.len(),
                factor, "too few trajectories, all chosen for search (consider adjusting partial_search_factor)"
            );
            return all;
        }
        let mut picked: Vec<usize> = rand::seq::index::sample(&mut self.rng, all.len(), amount).into_vec();
        picked.sort_unstable();
        picked.into_iter().map(|i| all[i].clone()).collect()
    }
}
